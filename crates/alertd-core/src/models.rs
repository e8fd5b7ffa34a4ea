//! Alert model and strongly-typed identifier.
//!
//! An alert is the unit of work: a recipient, a symbol, a threshold
//! price, and two nullable lifecycle markers. A row is eligible for
//! delivery exactly when it has been marked to send and not yet sent.
//! No process owns an alert persistently; ownership is the row lock held
//! by the claiming transaction.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed alert identifier.
///
/// Wraps the database-assigned row id to prevent mixing with other
/// numeric values. Immutable for the lifetime of the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(pub i64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AlertId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for AlertId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AlertId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for AlertId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// One alert row.
///
/// `marked_to_send_at` is set by an external scheduler and gates
/// eligibility; `sent_at` is set exactly once, by the delivery worker,
/// inside the transaction that holds the row lock.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    /// Unique row identifier.
    pub id: AlertId,

    /// Recipient address.
    pub email: String,

    /// Subject symbol the alert watches.
    pub symbol: String,

    /// Threshold price that triggered the alert.
    pub price: i64,

    /// When the external scheduler marked this row for delivery.
    pub marked_to_send_at: Option<DateTime<Utc>>,

    /// When delivery succeeded. Terminal: never unset.
    pub sent_at: Option<DateTime<Utc>>,

    /// When this row was created.
    pub created_at: DateTime<Utc>,

    /// When this row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Whether this row is claimable for delivery.
    pub fn is_eligible(&self) -> bool {
        self.marked_to_send_at.is_some() && self.sent_at.is_none()
    }
}

/// Attributes for creating a new alert row.
///
/// Creation is the province of whatever upstream system watches prices;
/// it lives here so fixtures and tooling share one insert path.
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Recipient address.
    pub email: String,
    /// Subject symbol.
    pub symbol: String,
    /// Threshold price.
    pub price: i64,
}

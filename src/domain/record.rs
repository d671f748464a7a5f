//! Normalized financial records and the per-kind raw-record normalizers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::currency::CurrencyCode;
use crate::tenants::TenantId;

/// Opaque per-tenant record identifier. Tenants disagree on id shape, so ids
/// are carried as strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The financial record kinds the platform stores.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    VendorPayment,
    Reimbursement,
    Invoice,
    InvoicePayment,
    TicketPurchase,
    TicketRefund,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::VendorPayment => "vendor_payment",
            RecordKind::Reimbursement => "reimbursement",
            RecordKind::Invoice => "invoice",
            RecordKind::InvoicePayment => "invoice_payment",
            RecordKind::TicketPurchase => "ticket_purchase",
            RecordKind::TicketRefund => "ticket_refund",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw record shape as returned by a tenant query. Field names vary per kind
/// and per tenant plugin; only the normalizers know which keys to read.
pub type RawRecord = serde_json::Map<String, Value>;

/// Why a raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("field {field:?} holds {value:?}, not a monetary amount")]
    InvalidAmount { field: &'static str, value: String },
    #[error("field {field:?} is not an epoch timestamp")]
    InvalidTimestamp { field: &'static str },
    #[error("record is marked both settled and failed")]
    ConflictingOutcome,
    #[error("record is settled but was never requested or approved")]
    UnanchoredSettlement,
    #[error("no normalizer registered for kind {0}")]
    UnsupportedKind(RecordKind),
}

/// One money movement, normalized from a tenant's raw shape.
///
/// Lifecycle timestamps are epoch seconds with `0` meaning "never happened".
/// `linked_record` points at the record this one pays off, where the kind has
/// such a notion (invoice payments).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub tenant_id: TenantId,
    pub record_id: RecordId,
    pub record_kind: RecordKind,
    pub currency: CurrencyCode,
    pub amount: Decimal,
    pub timestamp_requested: i64,
    pub timestamp_approved: i64,
    pub timestamp_settled: i64,
    pub timestamp_failed: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub linked_record: Option<RecordId>,
}

impl LedgerRecord {
    /// Checks the lifecycle invariants: a record cannot be both settled and
    /// failed, and a settled record must have been requested or approved at
    /// or before its settlement.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.timestamp_settled != 0 && self.timestamp_failed != 0 {
            return Err(RecordError::ConflictingOutcome);
        }
        if self.timestamp_settled != 0 {
            let anchored = (self.timestamp_requested != 0
                && self.timestamp_requested <= self.timestamp_settled)
                || (self.timestamp_approved != 0
                    && self.timestamp_approved <= self.timestamp_settled);
            if !anchored {
                return Err(RecordError::UnanchoredSettlement);
            }
        }
        Ok(())
    }
}

/// Which raw keys hold the logical fields for one record kind. `None` means
/// the kind has no such field.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub amount: &'static str,
    pub currency: &'static str,
    pub requested: Option<&'static str>,
    pub approved: Option<&'static str>,
    pub settled: Option<&'static str>,
    pub failed: Option<&'static str>,
    pub linked: Option<&'static str>,
}

/// Normalizers for every record kind, keyed by [`RecordKind`].
///
/// The built-in table covers the field names the platform's own plugins
/// write; deployments with bespoke storage register their own maps on top.
#[derive(Debug, Clone)]
pub struct NormalizerRegistry {
    maps: BTreeMap<RecordKind, FieldMap>,
}

impl NormalizerRegistry {
    pub fn empty() -> Self {
        Self {
            maps: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            RecordKind::VendorPayment,
            FieldMap {
                amount: "amount",
                currency: "currency",
                requested: Some("requested_at"),
                approved: Some("approved_at"),
                settled: Some("paid_at"),
                failed: Some("failed_at"),
                linked: None,
            },
        );
        registry.register(
            RecordKind::Reimbursement,
            FieldMap {
                amount: "expense_total",
                currency: "expense_currency",
                requested: Some("submitted_at"),
                approved: Some("approved_at"),
                settled: Some("reimbursed_at"),
                failed: Some("rejected_at"),
                linked: None,
            },
        );
        registry.register(
            RecordKind::Invoice,
            FieldMap {
                amount: "invoice_total",
                currency: "invoice_currency",
                requested: Some("issued_at"),
                approved: Some("sent_at"),
                settled: Some("paid_at"),
                failed: Some("voided_at"),
                linked: None,
            },
        );
        registry.register(
            RecordKind::InvoicePayment,
            FieldMap {
                amount: "payment_total",
                currency: "payment_currency",
                requested: Some("initiated_at"),
                approved: None,
                settled: Some("received_at"),
                failed: Some("bounced_at"),
                linked: Some("linked_transaction"),
            },
        );
        registry.register(
            RecordKind::TicketPurchase,
            FieldMap {
                amount: "ticket_price",
                currency: "ticket_currency",
                requested: Some("ordered_at"),
                approved: None,
                settled: Some("purchased_at"),
                failed: None,
                linked: None,
            },
        );
        registry.register(
            RecordKind::TicketRefund,
            FieldMap {
                amount: "refund_amount",
                currency: "refund_currency",
                requested: Some("requested_at"),
                approved: None,
                settled: Some("refunded_at"),
                failed: None,
                linked: None,
            },
        );
        registry
    }

    pub fn register(&mut self, kind: RecordKind, map: FieldMap) {
        self.maps.insert(kind, map);
    }

    /// Normalizes one raw record of the given kind, then checks the
    /// lifecycle invariants.
    pub fn normalize(
        &self,
        tenant_id: TenantId,
        kind: RecordKind,
        raw: &RawRecord,
    ) -> Result<LedgerRecord, RecordError> {
        let map = self
            .maps
            .get(&kind)
            .ok_or(RecordError::UnsupportedKind(kind))?;
        let record = LedgerRecord {
            tenant_id,
            record_id: read_id(raw)?,
            record_kind: kind,
            currency: read_currency(raw, map.currency)?,
            amount: read_amount(raw, map.amount)?,
            timestamp_requested: read_timestamp(raw, map.requested)?,
            timestamp_approved: read_timestamp(raw, map.approved)?,
            timestamp_settled: read_timestamp(raw, map.settled)?,
            timestamp_failed: read_timestamp(raw, map.failed)?,
            linked_record: read_link(raw, map.linked),
        };
        record.validate()?;
        Ok(record)
    }
}

pub(crate) fn read_id(raw: &RawRecord) -> Result<RecordId, RecordError> {
    match raw.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(RecordId::new(id)),
        Some(Value::Number(id)) => Ok(RecordId::new(&id.to_string())),
        _ => Err(RecordError::MissingField("id")),
    }
}

fn read_currency(raw: &RawRecord, field: &'static str) -> Result<CurrencyCode, RecordError> {
    match raw.get(field) {
        Some(Value::String(code)) if !code.trim().is_empty() => Ok(CurrencyCode::new(code)),
        _ => Err(RecordError::MissingField(field)),
    }
}

fn read_amount(raw: &RawRecord, field: &'static str) -> Result<Decimal, RecordError> {
    let value = raw.get(field).ok_or(RecordError::MissingField(field))?;
    let invalid = || RecordError::InvalidAmount {
        field,
        value: value.to_string(),
    };
    match value {
        Value::String(text) => Decimal::from_str(text.trim()).map_err(|_| invalid()),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Ok(Decimal::from(int))
            } else {
                number
                    .as_f64()
                    .and_then(|float| Decimal::try_from(float).ok())
                    .ok_or_else(invalid)
            }
        }
        _ => Err(invalid()),
    }
}

/// `None` field, missing key, and JSON null all mean "never happened".
fn read_timestamp(raw: &RawRecord, field: Option<&'static str>) -> Result<i64, RecordError> {
    let Some(field) = field else {
        return Ok(0);
    };
    match raw.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => number
            .as_i64()
            .filter(|ts| *ts >= 0)
            .ok_or(RecordError::InvalidTimestamp { field }),
        Some(Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|ts| *ts >= 0)
            .ok_or(RecordError::InvalidTimestamp { field }),
        Some(_) => Err(RecordError::InvalidTimestamp { field }),
    }
}

fn read_link(raw: &RawRecord, field: Option<&'static str>) -> Option<RecordId> {
    let value = raw.get(field?)?;
    match value {
        Value::String(id) if !id.is_empty() => Some(RecordId::new(id)),
        Value::Number(id) => Some(RecordId::new(&id.to_string())),
        _ => None,
    }
}

//! The report catalogue: the trait every report type implements and the
//! payload shapes runs produce.

pub mod event_details;
pub mod event_status;
pub mod invoices;
pub mod payments;
pub mod tickets;

pub use event_details::EventDetailsReport;
pub use event_status::EventStatusReport;
pub use invoices::SponsorshipInvoiceReport;
pub use payments::PaymentActivityReport;
pub use tickets::TicketRevenueReport;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::currency::{CurrencyCode, ExchangeRates, LedgerTotals};
use crate::domain::options::{FieldSafelisted, ReportOptions};
use crate::domain::record::{LedgerRecord, NormalizerRegistry, RawRecord, RecordId, RecordKind};
use crate::domain::status::{StatusId, StatusTable};
use crate::domain::window::ReportWindow;
use crate::errors::Warning;
use crate::statuslog::{StrictMode, TimelineEntry};
use crate::tenants::{RecordScope, TenantId};

/// Everything a report's build step may consult, borrowed from the engine
/// for the duration of one run.
pub struct ReportContext<'a> {
    pub window: &'a ReportWindow,
    pub options: &'a ReportOptions,
    pub target_currency: &'a CurrencyCode,
    pub as_of: NaiveDate,
    pub rates: &'a dyn ExchangeRates,
    pub registry: &'a NormalizerRegistry,
    pub statuses: &'a StatusTable,
    pub target_status: Option<&'a StatusId>,
    pub strict_mode: StrictMode,
}

/// One report type in the catalogue.
///
/// Implementations are stateless: everything run-specific arrives through
/// the [`ReportContext`].
pub trait Report: FieldSafelisted {
    /// Stable identifier; doubles as the leading cache-key part.
    fn id(&self) -> &'static str;

    /// Which records each tenant should be asked for.
    fn scope(&self) -> RecordScope;

    /// Turns the merged fan-out output into this report's payload.
    fn build(
        &self,
        ctx: &ReportContext<'_>,
        records: &[(TenantId, RawRecord)],
    ) -> (ReportPayload, Vec<Warning>);
}

/// The payload of one finished run, tagged by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportPayload {
    Ledger(LedgerPayload),
    Tickets(TicketPayload),
    StatusChanges(StatusChangesPayload),
    EventDetails(DetailsPayload),
}

/// Normalized records plus their money picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPayload {
    pub records: Vec<LedgerRecord>,
    pub totals: LedgerTotals,
}

/// Ticket money split into purchases and refunds, with the net.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    pub records: Vec<LedgerRecord>,
    pub purchases: LedgerTotals,
    pub refunds: LedgerTotals,
    /// Settled purchases minus settled refunds, per native currency.
    pub net_by_currency: BTreeMap<CurrencyCode, Decimal>,
    /// Settled net in the target currency.
    pub net_total: Decimal,
}

/// One entity whose status history intersects the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRow {
    pub tenant: TenantId,
    pub entity: RecordId,
    pub name: String,
    pub baseline: Option<StatusId>,
    pub events: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangesPayload {
    pub rows: Vec<StatusRow>,
}

/// One entity projected onto the effective field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    pub tenant: TenantId,
    pub entity: RecordId,
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailsPayload {
    pub rows: Vec<DetailRow>,
}

/// What one run hands back: the payload plus every recoverable caveat.
/// Cached whole, so replayed results keep their caveats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub payload: ReportPayload,
    pub warnings: Vec<Warning>,
}

/// Adds a warning unless an identical one is already present.
pub(crate) fn push_unique(warnings: &mut Vec<Warning>, warning: Warning) {
    if !warnings.contains(&warning) {
        warnings.push(warning);
    }
}

/// Normalizes tagged raw records into ledger records. Each raw row names
/// its kind in a `record_kind` tag; rows that cannot be normalized become
/// warnings instead of sinking the run.
pub(crate) fn collect_ledger(
    ctx: &ReportContext<'_>,
    records: &[(TenantId, RawRecord)],
) -> (Vec<LedgerRecord>, Vec<Warning>) {
    let mut ledger = Vec::new();
    let mut warnings = Vec::new();
    for (tenant, raw) in records {
        let tag = raw.get("record_kind").cloned().unwrap_or(Value::Null);
        let kind: RecordKind = match serde_json::from_value(tag.clone()) {
            Ok(kind) => kind,
            Err(_) => {
                push_unique(
                    &mut warnings,
                    Warning::MalformedRecord {
                        tenant: *tenant,
                        kind: tag.as_str().unwrap_or("unknown").to_string(),
                        message: "missing or unreadable record_kind tag".into(),
                    },
                );
                continue;
            }
        };
        match ctx.registry.normalize(*tenant, kind, raw) {
            Ok(record) => ledger.push(record),
            Err(err) => push_unique(
                &mut warnings,
                Warning::MalformedRecord {
                    tenant: *tenant,
                    kind: kind.to_string(),
                    message: err.to_string(),
                },
            ),
        }
    }
    sort_ledger(&mut ledger);
    (ledger, warnings)
}

/// Stable payload order regardless of tenant completion order.
pub(crate) fn sort_ledger(records: &mut [LedgerRecord]) {
    records.sort_by(|a, b| {
        (a.tenant_id, a.record_kind, &a.record_id).cmp(&(b.tenant_id, b.record_kind, &b.record_id))
    });
}

//! Money leaving the platform: vendor payments and reimbursements.

use crate::currency::normalize;
use crate::domain::options::{FieldSafelist, FieldSafelisted};
use crate::domain::record::{RawRecord, RecordKind};
use crate::errors::Warning;
use crate::reports::{
    collect_ledger, push_unique, LedgerPayload, Report, ReportContext, ReportPayload,
};
use crate::tenants::{RecordScope, TenantId};

/// Vendor payments and reimbursements across the fleet in one window,
/// normalized into a single ledger with converted totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentActivityReport;

impl FieldSafelisted for PaymentActivityReport {
    fn safelist(&self) -> FieldSafelist {
        FieldSafelist::new()
    }
}

impl Report for PaymentActivityReport {
    fn id(&self) -> &'static str {
        "payment_activity"
    }

    fn scope(&self) -> RecordScope {
        RecordScope::Financial(vec![RecordKind::VendorPayment, RecordKind::Reimbursement])
    }

    fn build(
        &self,
        ctx: &ReportContext<'_>,
        records: &[(TenantId, RawRecord)],
    ) -> (ReportPayload, Vec<Warning>) {
        let (ledger, mut warnings) = collect_ledger(ctx, records);
        let (totals, fx_warnings) = normalize(&ledger, ctx.target_currency, ctx.as_of, ctx.rates);
        for warning in fx_warnings {
            push_unique(&mut warnings, warning);
        }
        (
            ReportPayload::Ledger(LedgerPayload {
                records: ledger,
                totals,
            }),
            warnings,
        )
    }
}

//! Sponsorship revenue: invoices issued and the payments that settle them.

use std::collections::BTreeSet;

use crate::currency::normalize;
use crate::domain::options::{FieldSafelist, FieldSafelisted};
use crate::domain::record::{RawRecord, RecordId, RecordKind};
use crate::errors::Warning;
use crate::reports::{
    collect_ledger, push_unique, LedgerPayload, Report, ReportContext, ReportPayload,
};
use crate::tenants::{RecordScope, TenantId};

/// Invoices and invoice payments in one ledger. Every payment is matched to
/// an invoice through its linked-transaction field; payments that reference
/// nothing, or something the same tenant never issued, are flagged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SponsorshipInvoiceReport;

impl FieldSafelisted for SponsorshipInvoiceReport {
    fn safelist(&self) -> FieldSafelist {
        FieldSafelist::new()
    }
}

impl Report for SponsorshipInvoiceReport {
    fn id(&self) -> &'static str {
        "sponsorship_invoices"
    }

    fn scope(&self) -> RecordScope {
        RecordScope::Financial(vec![RecordKind::Invoice, RecordKind::InvoicePayment])
    }

    fn build(
        &self,
        ctx: &ReportContext<'_>,
        records: &[(TenantId, RawRecord)],
    ) -> (ReportPayload, Vec<Warning>) {
        let (ledger, mut warnings) = collect_ledger(ctx, records);

        let invoices: BTreeSet<(TenantId, &RecordId)> = ledger
            .iter()
            .filter(|record| record.record_kind == RecordKind::Invoice)
            .map(|record| (record.tenant_id, &record.record_id))
            .collect();
        for payment in ledger
            .iter()
            .filter(|record| record.record_kind == RecordKind::InvoicePayment)
        {
            let matched = payment
                .linked_record
                .as_ref()
                .map(|link| invoices.contains(&(payment.tenant_id, link)))
                .unwrap_or(false);
            if !matched {
                push_unique(
                    &mut warnings,
                    Warning::UnmatchedPayment {
                        tenant: payment.tenant_id,
                        record: payment.record_id.clone(),
                    },
                );
            }
        }

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

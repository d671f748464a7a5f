//! Ticket revenue: purchases against refunds, netted per currency.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::currency::normalize;
use crate::domain::options::{FieldSafelist, FieldSafelisted};
use crate::domain::record::{LedgerRecord, RawRecord, RecordKind};
use crate::errors::Warning;
use crate::reports::{
    collect_ledger, push_unique, Report, ReportContext, ReportPayload, TicketPayload,
};
use crate::tenants::{RecordScope, TenantId};

/// Ticket purchases and refunds in the window. Purchases and refunds are
/// totaled separately; net revenue is settled purchases minus settled
/// refunds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketRevenueReport;

impl FieldSafelisted for TicketRevenueReport {
    fn safelist(&self) -> FieldSafelist {
        FieldSafelist::new()
    }
}

impl Report for TicketRevenueReport {
    fn id(&self) -> &'static str {
        "ticket_revenue"
    }

    fn scope(&self) -> RecordScope {
        RecordScope::Financial(vec![RecordKind::TicketPurchase, RecordKind::TicketRefund])
    }

    fn build(
        &self,
        ctx: &ReportContext<'_>,
        records: &[(TenantId, RawRecord)],
    ) -> (ReportPayload, Vec<Warning>) {
        let (ledger, mut warnings) = collect_ledger(ctx, records);
        let (purchase_records, refund_records): (Vec<LedgerRecord>, Vec<LedgerRecord>) = ledger
            .iter()
            .cloned()
            .partition(|record| record.record_kind == RecordKind::TicketPurchase);

        let (purchases, purchase_warnings) =
            normalize(&purchase_records, ctx.target_currency, ctx.as_of, ctx.rates);
        let (refunds, refund_warnings) =
            normalize(&refund_records, ctx.target_currency, ctx.as_of, ctx.rates);
        for warning in purchase_warnings.into_iter().chain(refund_warnings) {
            push_unique(&mut warnings, warning);
        }

        let mut net_by_currency: BTreeMap<_, Decimal> = BTreeMap::new();
        for (currency, amount) in &purchases.settled.native {
            *net_by_currency.entry(currency.clone()).or_default() += *amount;
        }
        for (currency, amount) in &refunds.settled.native {
            *net_by_currency.entry(currency.clone()).or_default() -= *amount;
        }
        let net_total = purchases.settled.total - refunds.settled.total;

        (
            ReportPayload::Tickets(TicketPayload {
                records: ledger,
                purchases,
                refunds,
                net_by_currency,
                net_total,
            }),
            warnings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyCode;
    use crate::reports::testutil::{ContextFixture, WINDOW_START};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn purchase(id: &str, amount: &str, currency: &str) -> RawRecord {
        let value = json!({
            "record_kind": "ticket_purchase",
            "id": id,
            "ticket_price": amount,
            "ticket_currency": currency,
            "ordered_at": WINDOW_START + 5,
            "purchased_at": WINDOW_START + 6,
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn refund(id: &str, amount: &str, currency: &str) -> RawRecord {
        let value = json!({
            "record_kind": "ticket_refund",
            "id": id,
            "refund_amount": amount,
            "refund_currency": currency,
            "requested_at": WINDOW_START + 7,
            "refunded_at": WINDOW_START + 8,
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn nets_settled_purchases_against_settled_refunds() {
        let fixture = ContextFixture::new().with_rate("EUR", dec!(1.1));
        let records = vec![
            (TenantId::new(1), purchase("t1", "100", "USD")),
            (TenantId::new(1), purchase("t2", "200", "EUR")),
            (TenantId::new(1), refund("r1", "50", "USD")),
        ];
        let (payload, warnings) = TicketRevenueReport.build(&fixture.ctx(), &records);

        assert!(warnings.is_empty());
        let ReportPayload::Tickets(tickets) = payload else {
            panic!("expected ticket payload");
        };
        assert_eq!(tickets.purchases.settled.total, dec!(320));
        assert_eq!(tickets.refunds.settled.total, dec!(50));
        assert_eq!(tickets.net_total, dec!(270));
        assert_eq!(
            tickets.net_by_currency.get(&CurrencyCode::new("USD")),
            Some(&dec!(50))
        );
        assert_eq!(
            tickets.net_by_currency.get(&CurrencyCode::new("EUR")),
            Some(&dec!(200))
        );
    }

    #[test]
    fn unknown_currency_is_warned_once_across_both_sides() {
        let fixture = ContextFixture::new();
        let records = vec![
            (TenantId::new(1), purchase("t1", "100", "XXX")),
            (TenantId::new(1), refund("r1", "20", "XXX")),
        ];
        let (payload, warnings) = TicketRevenueReport.build(&fixture.ctx(), &records);

        assert_eq!(
            warnings,
            vec![Warning::UnknownCurrency {
                currency: CurrencyCode::new("XXX")
            }]
        );
        let ReportPayload::Tickets(tickets) = payload else {
            panic!("expected ticket payload");
        };
        assert_eq!(tickets.net_total, Decimal::ZERO);
        assert_eq!(
            tickets.net_by_currency.get(&CurrencyCode::new("XXX")),
            Some(&dec!(80))
        );
    }

    #[test]
    fn refund_only_windows_go_negative() {
        let fixture = ContextFixture::new();
        let records = vec![(TenantId::new(1), refund("r1", "75", "USD"))];
        let (payload, _) = TicketRevenueReport.build(&fixture.ctx(), &records);

        let ReportPayload::Tickets(tickets) = payload else {
            panic!("expected ticket payload");
        };
        assert_eq!(tickets.net_total, dec!(-75));
    }
}

//! Currency identity, exchange-rate lookup, and ledger aggregation into a
//! single reporting currency.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::record::LedgerRecord;
use crate::errors::Warning;

/// ISO 4217 currency representation.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct CurrencyCode(pub String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exchange-lookup failures. `UnknownCurrency` is tolerated by aggregation
/// (the currency's native total survives, its converted share is zero);
/// everything else surfaces as a report warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("currency {0} is not known to the rate source")]
    UnknownCurrency(CurrencyCode),
    #[error("rate lookup failed: {0}")]
    Lookup(String),
}

/// Rate source consumed by aggregation. Implementations convert a native
/// amount into the target currency as of a valuation date.
pub trait ExchangeRates: Send + Sync {
    fn convert(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
        as_of: NaiveDate,
    ) -> Result<Decimal, ExchangeError>;
}

/// In-memory rate table with dated series per currency pair.
///
/// Lookup takes the exact date when present, otherwise the nearest prior
/// rate within `tolerance_days`, otherwise tries the inverse pair. A
/// currency that appears in no series at all is reported as unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxTable {
    rates: HashMap<(String, String), BTreeMap<NaiveDate, Decimal>>,
    pub tolerance_days: i64,
}

impl FxTable {
    pub fn new() -> Self {
        Self {
            rates: HashMap::new(),
            tolerance_days: 5,
        }
    }

    pub fn add_rate(&mut self, from: &CurrencyCode, to: &CurrencyCode, date: NaiveDate, rate: Decimal) {
        let key = (from.0.clone(), to.0.clone());
        self.rates.entry(key).or_default().insert(date, rate);
    }

    fn knows(&self, code: &CurrencyCode) -> bool {
        self.rates
            .keys()
            .any(|(from, to)| from == &code.0 || to == &code.0)
    }

    fn rate_within(
        &self,
        series: &BTreeMap<NaiveDate, Decimal>,
        date: NaiveDate,
    ) -> Option<Decimal> {
        if let Some(rate) = series.get(&date) {
            return Some(*rate);
        }
        let (near_date, rate) = series.range(..=date).next_back()?;
        if (date - *near_date).num_days() <= self.tolerance_days {
            Some(*rate)
        } else {
            None
        }
    }

    fn lookup(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        date: NaiveDate,
    ) -> Result<Decimal, ExchangeError> {
        if let Some(series) = self.rates.get(&(from.0.clone(), to.0.clone())) {
            if let Some(rate) = self.rate_within(series, date) {
                return Ok(rate);
            }
        }
        if let Some(series) = self.rates.get(&(to.0.clone(), from.0.clone())) {
            if let Some(rate) = self.rate_within(series, date) {
                if rate.is_zero() {
                    return Err(ExchangeError::Lookup(format!(
                        "inverse rate {} → {} on {} is zero",
                        to, from, date
                    )));
                }
                return Ok(Decimal::ONE / rate);
            }
        }
        if !self.knows(from) {
            return Err(ExchangeError::UnknownCurrency(from.clone()));
        }
        Err(ExchangeError::Lookup(format!(
            "no {} → {} rate on {} within {} days",
            from, to, date, self.tolerance_days
        )))
    }
}

impl Default for FxTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeRates for FxTable {
    fn convert(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
        as_of: NaiveDate,
    ) -> Result<Decimal, ExchangeError> {
        if from == to {
            return Ok(amount);
        }
        let rate = self.lookup(from, to, as_of)?;
        Ok(amount * rate)
    }
}

/// Lifecycle buckets a ledger record contributes to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Requested,
    Approved,
    Settled,
    Failed,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Requested,
        Bucket::Approved,
        Bucket::Settled,
        Bucket::Failed,
    ];

    pub fn timestamp_of(&self, record: &LedgerRecord) -> i64 {
        match self {
            Bucket::Requested => record.timestamp_requested,
            Bucket::Approved => record.timestamp_approved,
            Bucket::Settled => record.timestamp_settled,
            Bucket::Failed => record.timestamp_failed,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Bucket::Requested => "requested",
            Bucket::Approved => "approved",
            Bucket::Settled => "settled",
            Bucket::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Totals for one lifecycle bucket: native sums per currency, the converted
/// share each currency contributed, and the grand total in the target
/// currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub native: BTreeMap<CurrencyCode, Decimal>,
    pub converted: BTreeMap<CurrencyCode, Decimal>,
    pub total: Decimal,
    pub record_count: usize,
}

impl BucketTotals {
    fn add_native(&mut self, currency: &CurrencyCode, amount: Decimal) {
        *self.native.entry(currency.clone()).or_default() += amount;
        self.record_count += 1;
    }
}

/// One report's money picture across every bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub target: CurrencyCode,
    pub requested: BucketTotals,
    pub approved: BucketTotals,
    pub settled: BucketTotals,
    pub failed: BucketTotals,
}

impl LedgerTotals {
    pub fn new(target: CurrencyCode) -> Self {
        Self {
            target,
            requested: BucketTotals::default(),
            approved: BucketTotals::default(),
            settled: BucketTotals::default(),
            failed: BucketTotals::default(),
        }
    }

    pub fn bucket(&self, bucket: Bucket) -> &BucketTotals {
        match bucket {
            Bucket::Requested => &self.requested,
            Bucket::Approved => &self.approved,
            Bucket::Settled => &self.settled,
            Bucket::Failed => &self.failed,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BucketTotals {
        match bucket {
            Bucket::Requested => &mut self.requested,
            Bucket::Approved => &mut self.approved,
            Bucket::Settled => &mut self.settled,
            Bucket::Failed => &mut self.failed,
        }
    }
}

/// Aggregates ledger records into per-bucket totals converted to `target`.
///
/// A record joins every bucket whose lifecycle timestamp it carries. Native
/// amounts are summed per currency first, so the rate source is called once
/// per currency per bucket; the target currency itself converts 1:1 with no
/// call at all. An unknown currency keeps its native total, contributes zero
/// to the converted total, and is warned about once.
pub fn normalize(
    records: &[LedgerRecord],
    target: &CurrencyCode,
    as_of: NaiveDate,
    rates: &dyn ExchangeRates,
) -> (LedgerTotals, Vec<Warning>) {
    let mut totals = LedgerTotals::new(target.clone());
    for record in records {
        for bucket in Bucket::ALL {
            if bucket.timestamp_of(record) != 0 {
                totals
                    .bucket_mut(bucket)
                    .add_native(&record.currency, record.amount);
            }
        }
    }

    let mut warnings = Vec::new();
    let mut warned: BTreeSet<CurrencyCode> = BTreeSet::new();
    for bucket in Bucket::ALL {
        let entries = totals.bucket(bucket).native.clone();
        for (currency, native) in entries {
            let converted = if &currency == target {
                native
            } else {
                match rates.convert(native, &currency, target, as_of) {
                    Ok(converted) => converted,
                    Err(ExchangeError::UnknownCurrency(currency)) => {
                        if warned.insert(currency.clone()) {
                            warnings.push(Warning::UnknownCurrency { currency });
                        }
                        Decimal::ZERO
                    }
                    Err(ExchangeError::Lookup(message)) => {
                        if warned.insert(currency.clone()) {
                            warnings.push(Warning::ExchangeLookupFailed {
                                currency: currency.clone(),
                                message,
                            });
                        }
                        Decimal::ZERO
                    }
                }
            };
            let slot = totals.bucket_mut(bucket);
            slot.converted.insert(currency, converted);
            slot.total += converted;
        }
    }

    (totals, warnings)
}

//! Unified error and warning types shared across the reporting engine.

use std::fmt;
use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::currency::CurrencyCode;
use crate::domain::options::OptionsError;
use crate::domain::record::RecordId;
use crate::domain::window::WindowError;
use crate::tenants::TenantId;

/// Error type for failures that abort a report run outright.
///
/// Everything recoverable is downgraded to a [`Warning`] instead; a report
/// prefers a partial answer with visible caveats over no answer at all.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid report window: {0}")]
    Window(#[from] WindowError),
    #[error("invalid report options: {0}")]
    Options(#[from] OptionsError),
    #[error("unknown status name: {0:?}")]
    UnknownStatus(String),
    #[error("tenant directory unavailable: {0}")]
    SourceUnavailable(String),
    #[error("all {0} tenant queries failed")]
    AllTenantsFailed(usize),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = StdResult<T, ReportError>;

/// Recoverable issue attached to an otherwise usable report result.
///
/// Warnings travel with the result they describe, including through the
/// cache: a partial data set stays flagged as partial when replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    TenantFailed {
        tenant: TenantId,
        message: String,
    },
    UnknownCurrency {
        currency: CurrencyCode,
    },
    ExchangeLookupFailed {
        currency: CurrencyCode,
        message: String,
    },
    MalformedRecord {
        tenant: TenantId,
        kind: String,
        message: String,
    },
    UnmatchedPayment {
        tenant: TenantId,
        record: RecordId,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::TenantFailed { tenant, message } => {
                write!(f, "tenant {tenant} query failed: {message}")
            }
            Warning::UnknownCurrency { currency } => {
                write!(f, "no exchange rate source for currency {currency}")
            }
            Warning::ExchangeLookupFailed { currency, message } => {
                write!(f, "exchange lookup for {currency} failed: {message}")
            }
            Warning::MalformedRecord {
                tenant,
                kind,
                message,
            } => {
                write!(
                    f,
                    "tenant {tenant} returned a malformed {kind} record: {message}"
                )
            }
            Warning::UnmatchedPayment { tenant, record } => {
                write!(
                    f,
                    "tenant {tenant} payment {record} references no known invoice"
                )
            }
        }
    }
}

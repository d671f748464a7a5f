#![doc(test(attr(deny(warnings))))]

//! Report Core powers the reporting side of a multi-tenant event platform:
//! validated date windows, cached report runs, status-timeline
//! reconstruction from append-only logs, and cross-tenant financial
//! aggregation into a single reporting currency.

pub mod cache;
pub mod config;
pub mod currency;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod reports;
pub mod statuslog;
pub mod tenants;
pub mod utils;

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Report Core tracing initialized.");
    });
}

//! The report engine: validates a request, consults the cache, fans out to
//! tenants, and assembles the payload.

use std::sync::Arc;

use tracing::{info, info_span};
use uuid::Uuid;

use crate::cache::{with_cache, CacheStore};
use crate::config::EngineConfig;
use crate::currency::ExchangeRates;
use crate::domain::options::ReportOptions;
use crate::domain::record::NormalizerRegistry;
use crate::domain::status::{event_statuses, StatusId, StatusTable};
use crate::domain::window::ReportWindow;
use crate::errors::{ReportError, Result, Warning};
use crate::reports::{push_unique, Report, ReportContext, RunOutcome};
use crate::statuslog::StrictMode;
use crate::tenants::{aggregate, QuerySpec, TenantSource};
use crate::utils::{Clock, SystemClock};

/// One engine instance: configuration plus injected collaborators. Holds no
/// per-request state; every run is a pure function of its inputs, the cache,
/// and the collaborators.
pub struct ReportEngine {
    config: EngineConfig,
    source: Arc<dyn TenantSource>,
    cache: Arc<dyn CacheStore>,
    rates: Arc<dyn ExchangeRates>,
    clock: Arc<dyn Clock>,
    registry: NormalizerRegistry,
    statuses: StatusTable,
    strict_mode: StrictMode,
}

impl ReportEngine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn TenantSource>,
        cache: Arc<dyn CacheStore>,
        rates: Arc<dyn ExchangeRates>,
    ) -> Self {
        Self {
            config,
            source,
            cache,
            rates,
            clock: Arc::new(SystemClock),
            registry: NormalizerRegistry::builtin(),
            statuses: event_statuses().clone(),
            strict_mode: StrictMode::Lenient,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_registry(mut self, registry: NormalizerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_statuses(mut self, statuses: StatusTable) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_strict_mode(mut self, mode: StrictMode) -> Self {
        self.strict_mode = mode;
        self
    }

    /// Runs one report over the date range given as admin-form strings.
    ///
    /// Validation happens before any tenant I/O and returns every problem at
    /// once. The result is served from the cache when a fresh entry exists;
    /// `options.flush_cache` forces recomputation but still stores the fresh
    /// result.
    pub fn run_report(
        &self,
        report: &dyn Report,
        start: &str,
        end: &str,
        options: &ReportOptions,
        status_filter: Option<&str>,
    ) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("report_run", %run_id);
        let _enter = span.enter();
        let now = self.clock.now();

        let mut bounds = options.bounds();
        if bounds.earliest_start.is_none() {
            bounds.earliest_start = self.config.platform_launch;
        }
        let window = ReportWindow::parse(start, end, &bounds, now)?;
        report.safelist().validate(options)?;
        let target_status = match status_filter {
            Some(name) => Some(self.statuses.resolve_display(name).ok_or_else(|| {
                ReportError::UnknownStatus(name.to_string())
            })?),
            None => None,
        };

        let mut key_parts = vec![report.id().to_string(), window.cache_fragment()];
        key_parts.extend(options.cache_fragments());
        if let Some(target) = &target_status {
            key_parts.push(format!("status-{target}"));
        }
        let ttl = window.cache_duration(self.config.cache_ttl(), now);

        info!(
            "report `{}` over {} ({} tenant workers)",
            report.id(),
            window,
            self.config.worker_threads
        );

        with_cache(
            self.cache.as_ref(),
            &key_parts,
            ttl,
            options.flush_cache,
            || self.execute(report, &window, options, target_status.as_ref()),
        )
    }

    fn execute(
        &self,
        report: &dyn Report,
        window: &ReportWindow,
        options: &ReportOptions,
        target_status: Option<&StatusId>,
    ) -> Result<RunOutcome> {
        let tenants = self
            .source
            .tenants()
            .map_err(|err| ReportError::SourceUnavailable(err.to_string()))?;

        let spec = QuerySpec {
            scope: report.scope(),
            start_ts: window.start_ts(),
            end_ts: window.end_ts(),
            public: options.public,
            search: options.normalized_search(),
        };
        let source = Arc::clone(&self.source);
        let outcome = aggregate(
            &tenants,
            self.config.worker_threads,
            self.config.query_deadline(),
            move |tenant| source.query(tenant, &spec),
        );

        if outcome.all_failed(tenants.len()) {
            return Err(ReportError::AllTenantsFailed(tenants.len()));
        }

        let mut warnings: Vec<Warning> = outcome
            .failures
            .iter()
            .map(|failure| Warning::TenantFailed {
                tenant: failure.tenant,
                message: failure.error.to_string(),
            })
            .collect();

        let target_currency = self.config.reporting_currency();
        let ctx = ReportContext {
            window,
            options,
            target_currency: &target_currency,
            as_of: window.end().date_naive(),
            rates: self.rates.as_ref(),
            registry: &self.registry,
            statuses: &self.statuses,
            target_status,
            strict_mode: self.strict_mode,
        };
        let (payload, build_warnings) = report.build(&ctx, &outcome.merged);
        for warning in build_warnings {
            push_unique(&mut warnings, warning);
        }

        Ok(RunOutcome { payload, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::currency::FxTable;
    use crate::domain::record::RawRecord;
    use crate::domain::window::WindowViolation;
    use crate::reports::{PaymentActivityReport, ReportPayload};
    use crate::tenants::{TenantId, TenantQueryError};
    use crate::utils::FixedClock;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedSource {
        tenants: Vec<TenantId>,
        records: BTreeMap<TenantId, Vec<RawRecord>>,
        queries: AtomicU32,
    }

    impl ScriptedSource {
        fn new(records: BTreeMap<TenantId, Vec<RawRecord>>) -> Self {
            Self {
                tenants: records.keys().copied().collect(),
                records,
                queries: AtomicU32::new(0),
            }
        }
    }

    impl TenantSource for ScriptedSource {
        fn tenants(&self) -> std::result::Result<Vec<TenantId>, TenantQueryError> {
            Ok(self.tenants.clone())
        }

        fn query(
            &self,
            tenant: TenantId,
            _spec: &QuerySpec,
        ) -> std::result::Result<Vec<RawRecord>, TenantQueryError> {
            self.queries.fetch_add(1, Ordering::Relaxed);
            Ok(self.records.get(&tenant).cloned().unwrap_or_default())
        }
    }

    fn payment_raw(id: &str, amount: &str) -> RawRecord {
        let value = json!({
            "record_kind": "vendor_payment",
            "id": id,
            "amount": amount,
            "currency": "USD",
            "requested_at": 1_717_300_000i64,
            "paid_at": 1_717_400_000i64,
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn engine_with(source: Arc<ScriptedSource>) -> ReportEngine {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 6, 21, 9, 0, 0).unwrap());
        ReportEngine::new(
            EngineConfig {
                worker_threads: 2,
                ..EngineConfig::default()
            },
            source,
            Arc::new(MemoryCache::new()),
            Arc::new(FxTable::new()),
        )
        .with_clock(Arc::new(clock))
    }

    #[test]
    fn validation_failures_happen_before_any_query() {
        let source = Arc::new(ScriptedSource::new(BTreeMap::from([(
            TenantId::new(1),
            vec![payment_raw("p1", "100")],
        )])));
        let engine = engine_with(Arc::clone(&source));

        let err = engine
            .run_report(
                &PaymentActivityReport,
                "2024-06-20",
                "2024-06-01",
                &ReportOptions::default(),
                None,
            )
            .expect_err("reversed window");
        match err {
            ReportError::Window(window) => {
                assert!(window.contains(&WindowViolation::NegativeInterval));
            }
            other => panic!("expected window error, got {other}"),
        }

        let err = engine
            .run_report(
                &PaymentActivityReport,
                "2024-06-01",
                "2024-06-20",
                &ReportOptions::default(),
                Some("No Such Status"),
            )
            .expect_err("unknown status");
        assert!(matches!(err, ReportError::UnknownStatus(_)));

        let options = ReportOptions {
            fields: vec!["bogus".to_string()],
            ..ReportOptions::default()
        };
        let err = engine
            .run_report(&PaymentActivityReport, "2024-06-01", "2024-06-20", &options, None)
            .expect_err("unknown field");
        assert!(matches!(err, ReportError::Options(_)));

        assert_eq!(source.queries.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn second_run_is_served_from_the_cache() {
        let source = Arc::new(ScriptedSource::new(BTreeMap::from([(
            TenantId::new(1),
            vec![payment_raw("p1", "100")],
        )])));
        let engine = engine_with(Arc::clone(&source));

        let first = engine
            .run_report(
                &PaymentActivityReport,
                "2024-06-01",
                "2024-06-20",
                &ReportOptions::default(),
                None,
            )
            .expect("first run");
        let second = engine
            .run_report(
                &PaymentActivityReport,
                "2024-06-01",
                "2024-06-20",
                &ReportOptions::default(),
                None,
            )
            .expect("cached run");

        assert_eq!(first, second);
        assert_eq!(source.queries.load(Ordering::Relaxed), 1);
        let ReportPayload::Ledger(ledger) = first.payload else {
            panic!("expected ledger payload");
        };
        assert_eq!(ledger.totals.settled.total, dec!(100));
    }

    #[test]
    fn flush_recomputes_and_rewarms_the_cache() {
        let source = Arc::new(ScriptedSource::new(BTreeMap::from([(
            TenantId::new(1),
            vec![payment_raw("p1", "100")],
        )])));
        let engine = engine_with(Arc::clone(&source));
        let options = ReportOptions::default();
        let flushing = ReportOptions {
            flush_cache: true,
            ..ReportOptions::default()
        };

        engine
            .run_report(&PaymentActivityReport, "2024-06-01", "2024-06-20", &options, None)
            .expect("warm run");
        engine
            .run_report(&PaymentActivityReport, "2024-06-01", "2024-06-20", &flushing, None)
            .expect("flushed run");
        assert_eq!(source.queries.load(Ordering::Relaxed), 2);

        engine
            .run_report(&PaymentActivityReport, "2024-06-01", "2024-06-20", &options, None)
            .expect("replayed run");
        assert_eq!(source.queries.load(Ordering::Relaxed), 2);
    }

    #[derive(Clone)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("capture lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn run_logs_carry_the_run_id_span() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(CaptureWriter(Arc::clone(&buffer)))
            .with_ansi(false)
            .finish();

        let source = Arc::new(ScriptedSource::new(BTreeMap::from([(
            TenantId::new(1),
            vec![payment_raw("p1", "100")],
        )])));
        let engine = engine_with(Arc::clone(&source));

        tracing::subscriber::with_default(subscriber, || {
            engine
                .run_report(
                    &PaymentActivityReport,
                    "2024-06-01",
                    "2024-06-20",
                    &ReportOptions::default(),
                    None,
                )
                .expect("logged run");
        });

        let output =
            String::from_utf8(buffer.lock().expect("capture lock").clone()).expect("utf8 log");
        assert!(
            output.contains("report_run{run_id="),
            "missing run span in: {output}"
        );
        assert!(output.contains("payment_activity"));
    }
}

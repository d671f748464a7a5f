//! Events whose status history intersects the reporting window.

use serde_json::Value;

use crate::domain::options::{FieldSafelist, FieldSafelisted};
use crate::domain::record::{self, RawRecord};
use crate::errors::Warning;
use crate::reports::{
    push_unique, Report, ReportContext, ReportPayload, StatusChangesPayload, StatusRow,
};
use crate::statuslog::{LogEntry, StatusTimeline};
use crate::tenants::{RecordScope, TenantId};

/// Reconstructs each event's status timeline and keeps the events that were
/// active in, or changed status during, the window. An optional target
/// status narrows the rows further.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStatusReport;

impl FieldSafelisted for EventStatusReport {
    fn safelist(&self) -> FieldSafelist {
        FieldSafelist::new()
    }
}

impl Report for EventStatusReport {
    fn id(&self) -> &'static str {
        "event_status"
    }

    fn scope(&self) -> RecordScope {
        RecordScope::Events
    }

    fn build(
        &self,
        ctx: &ReportContext<'_>,
        records: &[(TenantId, RawRecord)],
    ) -> (ReportPayload, Vec<Warning>) {
        let mut rows = Vec::new();
        let mut warnings = Vec::new();

        for (tenant, raw) in records {
            let entity = match record::read_id(raw) {
                Ok(id) => id,
                Err(err) => {
                    push_unique(
                        &mut warnings,
                        Warning::MalformedRecord {
                            tenant: *tenant,
                            kind: "event".into(),
                            message: err.to_string(),
                        },
                    );
                    continue;
                }
            };
            let entries: Vec<LogEntry> = match raw.get("status_log") {
                None | Some(Value::Null) => Vec::new(),
                Some(value) => match serde_json::from_value(value.clone()) {
                    Ok(entries) => entries,
                    Err(err) => {
                        push_unique(
                            &mut warnings,
                            Warning::MalformedRecord {
                                tenant: *tenant,
                                kind: "event".into(),
                                message: format!("unreadable status_log: {err}"),
                            },
                        );
                        continue;
                    }
                },
            };

            let timeline = StatusTimeline::reconstruct(&entries, ctx.statuses, ctx.strict_mode);
            let Some(windowed) = timeline.window_activity(ctx.window, ctx.statuses) else {
                continue;
            };
            if let Some(target) = ctx.target_status {
                if !windowed.matches_target(target) {
                    continue;
                }
            }

            rows.push(StatusRow {
                tenant: *tenant,
                entity,
                name: raw
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                baseline: windowed.baseline,
                events: windowed.events,
            });
        }

        rows.sort_by(|a, b| (a.tenant, &a.entity).cmp(&(b.tenant, &b.entity)));
        (
            ReportPayload::StatusChanges(StatusChangesPayload { rows }),
            warnings,
        )
    }
}

//! Per-event detail extraction honoring the field safelist.

use serde_json::{json, Value};

use crate::domain::options::{FieldSafelist, FieldSafelisted, FieldSpec};
use crate::domain::record::{self, RawRecord};
use crate::errors::Warning;
use crate::reports::{
    push_unique, DetailRow, DetailsPayload, Report, ReportContext, ReportPayload,
};
use crate::tenants::{RecordScope, TenantId};

const SEARCH_FIELDS: [&str; 2] = ["name", "city"];

/// Projects each event onto the effective field list, after applying the
/// visibility scope and the optional search query.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDetailsReport;

impl FieldSafelisted for EventDetailsReport {
    fn safelist(&self) -> FieldSafelist {
        FieldSafelist::new()
            .with("name", FieldSpec::public(json!("")))
            .with("city", FieldSpec::public(json!("")))
            .with("venue", FieldSpec::public(json!("")))
            .with("start_date", FieldSpec::public(json!("")))
            .with("capacity", FieldSpec::public(json!(0)))
            .with("organizer_email", FieldSpec::internal(json!("")))
            .with("internal_notes", FieldSpec::internal(json!("")))
    }
}

impl Report for EventDetailsReport {
    fn id(&self) -> &'static str {
        "event_details"
    }

    fn scope(&self) -> RecordScope {
        RecordScope::Events
    }

    fn build(
        &self,
        ctx: &ReportContext<'_>,
        records: &[(TenantId, RawRecord)],
    ) -> (ReportPayload, Vec<Warning>) {
        let safelist = self.safelist();
        let effective = safelist.effective_fields(ctx.options);
        let search = ctx.options.normalized_search();

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
            if let Some(query) = &search {
                if !matches_search(raw, query) {
                    continue;
                }
            }

            let fields = effective
                .iter()
                .map(|name| {
                    let value = raw
                        .get(name)
                        .filter(|value| !value.is_null())
                        .or_else(|| safelist.default_for(name))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect();
            rows.push(DetailRow {
                tenant: *tenant,
                entity,
                fields,
            });
        }

        rows.sort_by(|a, b| (a.tenant, &a.entity).cmp(&(b.tenant, &b.entity)));
        (
            ReportPayload::EventDetails(DetailsPayload { rows }),
            warnings,
        )
    }
}

fn matches_search(raw: &RawRecord, query: &str) -> bool {
    SEARCH_FIELDS.iter().any(|field| {
        raw.get(*field)
            .and_then(Value::as_str)
            .map(|text| text.to_lowercase().contains(query))
            .unwrap_or(false)
    })
}

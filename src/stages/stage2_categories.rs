use std::collections::HashSet;

use tracing::info;

use super::{CallClass, PipelineContext};
use crate::llm::validation::{CategoriesResponse, CategoryRecord};
use crate::llm::{build_category_payload, system_prompt, CATEGORY_PROMPT, CATEGORY_SCHEMA};
use crate::models::{ComparativeCategory, IncidentNote, SupportingSegment};

/// Execute category comparison over the order-restored incident list
///
/// Quotes are not requested here; see [`ground_quotes`](super::ground_quotes).
/// A positive `max_categories` is enforced locally as a hard cap.
pub async fn execute_category_comparison(
    ctx: &PipelineContext,
    coder_id: &str,
    incidents: &[IncidentNote],
) -> Vec<ComparativeCategory> {
    if !incidents.iter().any(IncidentNote::is_labeled) {
        ctx.log.warn(format!("{}: no labeled incidents, skipping categories", coder_id));
        return Vec::new();
    }

    let outcome = ctx
        .services
        .request::<CategoriesResponse, _>(
            CallClass::Segment,
            ctx.budgets().category,
            system_prompt(CATEGORY_PROMPT, ctx.config.analysis_mode),
            build_category_payload(&ctx.config, incidents),
            CATEGORY_SCHEMA,
            CategoriesResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "{}: no categories after {} attempts: {}",
            coder_id,
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    let mut categories = categories_from_records(outcome.value.named(), incidents);

    let cap = ctx.config.max_categories;
    if cap > 0 && categories.len() > cap {
        ctx.log.warn(format!(
            "{}: service returned {} categories, keeping the first {}",
            coder_id,
            categories.len(),
            cap
        ));
        categories.truncate(cap);
    }

    info!("{}: {} categories", coder_id, categories.len());
    categories
}

/// Convert records, dropping duplicate names and unknown segment references
fn categories_from_records(records: Vec<CategoryRecord>, incidents: &[IncidentNote]) -> Vec<ComparativeCategory> {
    let mut seen_names = HashSet::new();
    let mut categories = Vec::new();

    for record in records {
        let name = record.name.trim().to_string();
        if !seen_names.insert(name.to_lowercase()) {
            continue;
        }

        let mut supporting_segments: Vec<SupportingSegment> = Vec::new();
        for reference in &record.supporting_segments {
            let key = reference.key();
            if !incidents.iter().any(|n| n.key == key) {
                continue;
            }
            if supporting_segments.iter().any(|s| s.key == key) {
                continue;
            }
            supporting_segments.push(SupportingSegment {
                key,
                labels: reference.labels.clone(),
            });
        }

        let mut category = ComparativeCategory {
            name,
            defining_properties: record.defining_properties,
            comparative_insights: record.comparative_insights,
            supporting_segments,
            supporting_quotes: Vec::new(),
        };
        category.attach_labels(incidents);
        categories.push(category);
    }

    categories
}

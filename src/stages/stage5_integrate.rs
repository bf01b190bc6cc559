use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::info;

use super::{CallClass, PipelineContext};
use crate::llm::validation::{
    DigestResponse, IntegratedCategoriesResponse, IntegratedCategoryRecord, PatternRecord,
    PatternsResponse, SynthesisResponse,
};
use crate::llm::{
    build_category_merge_payload, build_memo_digest_payload, build_pattern_payload,
    build_synthesis_merge_payload, synthesis_system_prompt, system_prompt, CATEGORY_MERGE_PROMPT,
    CATEGORY_MERGE_SCHEMA, MEMO_DIGEST_PROMPT, MEMO_DIGEST_SCHEMA, PATTERN_MERGE_PROMPT,
    PATTERN_SCHEMA, SYNTHESIS_MERGE_PROMPT, SYNTHESIS_SCHEMA,
};
use crate::models::{
    CategorySource, CoderRun, ComparativeSynthesis, IncidentPattern, IntegratedCategory,
    IntegratedMemo, IntegratedResult, SegmentKey, MAX_QUOTES_PER_CATEGORY,
};

/// Merge independent coder runs into dataset-level artifacts
///
/// The four merges are independent and run concurrently. Each degrades to
/// a warning and an empty or partial result; incident patterns fall back
/// to a deterministic local merge.
pub async fn execute_integration(ctx: &PipelineContext, coders: &[CoderRun]) -> IntegratedResult {
    info!("Integrating {} coder runs", coders.len());

    let (incident_patterns, categories, memos, synthesis) = tokio::join!(
        integrate_incident_patterns(ctx, coders),
        integrate_categories(ctx, coders),
        integrate_memos(ctx, coders),
        integrate_synthesis(ctx, coders),
    );

    ctx.log.info(format!(
        "Integration complete: {} incident patterns, {} categories, {} memos",
        incident_patterns.len(),
        categories.len(),
        memos.len()
    ));

    IntegratedResult {
        incident_patterns,
        categories,
        memos,
        synthesis,
    }
}

/// Sum over coders of each coder's distinct-label count
fn label_budget(coders: &[CoderRun]) -> usize {
    coders.iter().map(CoderRun::distinct_label_count).sum()
}

pub async fn integrate_incident_patterns(ctx: &PipelineContext, coders: &[CoderRun]) -> Vec<IncidentPattern> {
    let budget = label_budget(coders);
    if budget == 0 {
        ctx.log.warn("No labels to integrate across coders");
        return Vec::new();
    }

    let known_segments: HashSet<&SegmentKey> = coders
        .iter()
        .flat_map(|run| run.incidents.iter().map(|n| &n.key))
        .collect();
    let known_coders: Vec<&str> = coders.iter().map(|run| run.coder_id.as_str()).collect();
    let from_records = |records: Vec<PatternRecord>| {
        patterns_from_records(records, &known_coders, |key| known_segments.contains(key))
    };

    let outcome = ctx
        .services
        .request::<PatternsResponse, _>(
            CallClass::Segment,
            ctx.budgets().integration,
            system_prompt(PATTERN_MERGE_PROMPT, ctx.config.analysis_mode),
            build_pattern_payload(coders),
            PATTERN_SCHEMA,
            |response| {
                let patterns = from_records(response.patterns.clone());
                !patterns.is_empty() && patterns.len() <= budget
            },
        )
        .await;

    if outcome.valid {
        return from_records(outcome.value.patterns);
    }

    ctx.log.warn(format!(
        "Incident pattern merge unusable after {} attempts, merging locally: {}",
        outcome.calls,
        outcome.diagnostics.describe()
    ));
    merge_patterns_locally(coders)
}

/// Normalize service patterns: case-insensitive label merge, known refs only
fn patterns_from_records<F>(records: Vec<PatternRecord>, known_coders: &[&str], is_known: F) -> Vec<IncidentPattern>
where
    F: Fn(&SegmentKey) -> bool,
{
    let mut merged: Vec<IncidentPattern> = Vec::new();
    for record in records {
        let label = record.label.trim();
        if label.is_empty() {
            continue;
        }

        let folded = label.to_lowercase();
        let position = match merged.iter().position(|p| p.label.to_lowercase() == folded) {
            Some(position) => position,
            None => {
                merged.push(IncidentPattern {
                    label: label.to_string(),
                    coders: Vec::new(),
                    segments: Vec::new(),
                });
                merged.len() - 1
            }
        };

        let pattern = &mut merged[position];
        for coder in record.coders {
            if known_coders.contains(&coder.as_str()) && !pattern.coders.contains(&coder) {
                pattern.coders.push(coder);
            }
        }
        for reference in record.segments {
            let key = reference.key();
            if is_known(&key) {
                pattern.segments.push(key);
            }
        }
    }

    for pattern in &mut merged {
        pattern.segments.sort();
        pattern.segments.dedup();
    }
    merged
}

/// Deterministic merge of every coder's labels, sorted by lowercased label
///
/// The first casing seen (coder order, then incident order) names the
/// pattern.
pub fn merge_patterns_locally(coders: &[CoderRun]) -> Vec<IncidentPattern> {
    let mut merged: BTreeMap<String, (String, Vec<String>, BTreeSet<SegmentKey>)> = BTreeMap::new();

    for run in coders {
        for note in &run.incidents {
            for label in &note.labels {
                let entry = merged
                    .entry(label.to_lowercase())
                    .or_insert_with(|| (label.clone(), Vec::new(), BTreeSet::new()));
                if !entry.1.contains(&run.coder_id) {
                    entry.1.push(run.coder_id.clone());
                }
                entry.2.insert(note.key.clone());
            }
        }
    }

    merged
        .into_values()
        .map(|(label, coders, segments)| IncidentPattern {
            label,
            coders,
            segments: segments.into_iter().collect(),
        })
        .collect()
}

pub async fn integrate_categories(ctx: &PipelineContext, coders: &[CoderRun]) -> Vec<IntegratedCategory> {
    if coders.iter().all(|run| run.categories.is_empty()) {
        ctx.log.warn("No categories to integrate across coders");
        return Vec::new();
    }

    let outcome = ctx
        .services
        .request::<IntegratedCategoriesResponse, _>(
            CallClass::Segment,
            ctx.budgets().integration,
            system_prompt(CATEGORY_MERGE_PROMPT, ctx.config.analysis_mode),
            build_category_merge_payload(&ctx.config, coders),
            CATEGORY_MERGE_SCHEMA,
            IntegratedCategoriesResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "Category matrix incomplete after {} attempts: {}",
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    let grounded: Vec<&str> = coders
        .iter()
        .flat_map(|run| run.categories.iter())
        .flat_map(|c| c.supporting_quotes.iter().map(String::as_str))
        .collect();

    outcome
        .value
        .categories
        .into_iter()
        .filter(|record| !record.name.is_empty())
        .map(|record| integrated_category(record, &grounded))
        .collect()
}

/// Keep only quotes found verbatim inside some coder's grounded quotes
fn integrated_category(record: IntegratedCategoryRecord, grounded: &[&str]) -> IntegratedCategory {
    let mut supporting_quotes: Vec<String> = Vec::new();
    for quote in &record.supporting_quotes {
        let quote = quote.trim();
        if quote.is_empty() || supporting_quotes.iter().any(|q| q == quote) {
            continue;
        }
        if grounded.iter().any(|g| g.contains(quote)) {
            supporting_quotes.push(quote.to_string());
        }
        if supporting_quotes.len() == MAX_QUOTES_PER_CATEGORY {
            break;
        }
    }

    IntegratedCategory {
        name: record.name,
        description: record.description,
        sources: record
            .sources
            .into_iter()
            .filter(|s: &CategorySource| !s.category.trim().is_empty())
            .collect(),
        alignment: record.alignment,
        divergence: record.divergence,
        supporting_quotes,
    }
}

pub async fn integrate_memos(ctx: &PipelineContext, coders: &[CoderRun]) -> Vec<IntegratedMemo> {
    if coders.iter().all(|run| run.memos.is_empty()) {
        ctx.log.warn("No memos to integrate across coders");
        return Vec::new();
    }

    let outcome = ctx
        .services
        .request::<DigestResponse, _>(
            CallClass::Segment,
            ctx.budgets().integration,
            system_prompt(MEMO_DIGEST_PROMPT, ctx.config.analysis_mode),
            build_memo_digest_payload(coders),
            MEMO_DIGEST_SCHEMA,
            DigestResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "Memo digest incomplete after {} attempts: {}",
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    outcome
        .value
        .memos
        .into_iter()
        .filter(|m| !m.theme.is_empty())
        .map(|m| IntegratedMemo {
            theme: m.theme,
            shared_tensions: m.shared_tensions,
            cross_references: m.cross_references,
            open_questions: m.open_questions,
        })
        .collect()
}

pub async fn integrate_synthesis(ctx: &PipelineContext, coders: &[CoderRun]) -> ComparativeSynthesis {
    if coders.iter().all(|run| run.synthesis.is_empty()) {
        ctx.log.warn("No syntheses to integrate across coders");
        return ComparativeSynthesis::default();
    }

    let outcome = ctx
        .services
        .request::<SynthesisResponse, _>(
            CallClass::Segment,
            ctx.budgets().integration,
            synthesis_system_prompt(SYNTHESIS_MERGE_PROMPT, ctx.config.analysis_mode, ctx.config.cac_enabled),
            build_synthesis_merge_payload(&ctx.config, coders),
            SYNTHESIS_SCHEMA,
            SynthesisResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "Integrated synthesis unavailable after {} attempts: {}",
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    ComparativeSynthesis::from_text(&outcome.value.synthesis)
}

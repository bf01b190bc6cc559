use tracing::info;

use super::{CallClass, PipelineContext};
use crate::llm::validation::MemosResponse;
use crate::llm::{build_memo_payload, system_prompt, MEMO_PROMPT, MEMO_SCHEMA};
use crate::models::{ComparativeCategory, ComparativeMemo, IncidentNote, MAX_MEMOS, MIN_MEMOS};

/// Execute memoing: between three and six memos from incidents and categories
pub async fn execute_memoing(
    ctx: &PipelineContext,
    coder_id: &str,
    incidents: &[IncidentNote],
    categories: &[ComparativeCategory],
) -> Vec<ComparativeMemo> {
    let outcome = ctx
        .services
        .request::<MemosResponse, _>(
            CallClass::Segment,
            ctx.budgets().memo,
            system_prompt(MEMO_PROMPT, ctx.config.analysis_mode),
            build_memo_payload(&ctx.config, incidents, categories),
            MEMO_SCHEMA,
            MemosResponse::is_valid,
        )
        .await;

    let memos: Vec<ComparativeMemo> = outcome
        .value
        .focused()
        .into_iter()
        .take(MAX_MEMOS)
        .map(|m| ComparativeMemo {
            focus: m.focus,
            comparisons_made: m.comparisons_made,
            insights: m.insights,
            questions: m.questions,
            next_steps: m.next_steps,
        })
        .collect();

    if !outcome.valid {
        ctx.log.warn(format!(
            "{}: only {} memos (expected at least {}) after {} attempts: {}",
            coder_id,
            memos.len(),
            MIN_MEMOS,
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    info!("{}: {} memos", coder_id, memos.len());
    memos
}

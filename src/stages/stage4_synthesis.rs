use tracing::info;

use super::{CallClass, PipelineContext};
use crate::llm::validation::SynthesisResponse;
use crate::llm::{build_synthesis_payload, synthesis_system_prompt, SYNTHESIS_PROMPT, SYNTHESIS_SCHEMA};
use crate::models::{ComparativeCategory, ComparativeMemo, ComparativeSynthesis, IncidentNote};

/// Execute synthesis: one paragraph integrating the coder's artifacts
pub async fn execute_synthesis(
    ctx: &PipelineContext,
    coder_id: &str,
    incidents: &[IncidentNote],
    categories: &[ComparativeCategory],
    memos: &[ComparativeMemo],
) -> ComparativeSynthesis {
    let outcome = ctx
        .services
        .request::<SynthesisResponse, _>(
            CallClass::Segment,
            ctx.budgets().synthesis,
            synthesis_system_prompt(SYNTHESIS_PROMPT, ctx.config.analysis_mode, ctx.config.cac_enabled),
            build_synthesis_payload(&ctx.config, incidents, categories, memos),
            SYNTHESIS_SCHEMA,
            SynthesisResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "{}: synthesis unavailable after {} attempts: {}",
            coder_id,
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    let synthesis = ComparativeSynthesis::from_text(&outcome.value.synthesis);
    info!("{}: synthesis of {} chars", coder_id, synthesis.paragraph.len());
    synthesis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;
    use crate::llm::BackendError;
    use crate::models::AnalysisRunConfig;
    use crate::stages::testing::{canned_response, context, transcript, SEGMENT_TEXTS};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_synthesis_whitespace_collapsed() {
        let backend = Arc::new(ScriptedBackend::responder(canned_response));
        let ctx = context(AnalysisRunConfig::default(), backend.clone(), vec![transcript("a.txt", &SEGMENT_TEXTS)]).await;

        let synthesis = execute_synthesis(&ctx, "coder1", &[], &[], &[]).await;

        assert_eq!(synthesis.paragraph, "Caregivers sustain care alone until peers help.");
    }

    #[tokio::test]
    async fn test_cac_instruction_only_when_enabled() {
        let backend = Arc::new(ScriptedBackend::responder(|system, user| {
            if system.contains("Condition-Action-Consequence") {
                return canned_response(system, user);
            }
            Err(BackendError::Malformed("CAC missing".to_string()))
        }));
        let config = AnalysisRunConfig {
            cac_enabled: true,
            ..Default::default()
        };
        let ctx = context(config, backend.clone(), vec![transcript("a.txt", &SEGMENT_TEXTS)]).await;

        let synthesis = execute_synthesis(&ctx, "coder1", &[], &[], &[]).await;

        assert!(!synthesis.is_empty());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_synthesis_is_empty() {
        let backend = Arc::new(ScriptedBackend::always(Ok("I cannot help with that.".to_string())));
        let ctx = context(AnalysisRunConfig::default(), backend.clone(), vec![transcript("a.txt", &SEGMENT_TEXTS)]).await;

        let synthesis = execute_synthesis(&ctx, "coder1", &[], &[], &[]).await;

        assert!(synthesis.is_empty());
        assert_eq!(backend.call_count(), 2);
    }
}

use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::{
    execute_category_comparison, execute_incident_coding, execute_memoing, execute_synthesis,
    ground_quotes, PipelineContext,
};
use crate::models::{ComparativeCategory, ComparativeMemo, ComparativeSynthesis, CoderRun, IncidentNote};

/// Stages of one coder's pass, strictly ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoderStage {
    IncidentCoding,
    CategoryComparison,
    Memoing,
    Synthesis,
    Done,
}

impl CoderStage {
    pub fn next(self) -> Self {
        match self {
            CoderStage::IncidentCoding => CoderStage::CategoryComparison,
            CoderStage::CategoryComparison => CoderStage::Memoing,
            CoderStage::Memoing => CoderStage::Synthesis,
            CoderStage::Synthesis | CoderStage::Done => CoderStage::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoderStage::IncidentCoding => "incident coding",
            CoderStage::CategoryComparison => "category comparison",
            CoderStage::Memoing => "memoing",
            CoderStage::Synthesis => "synthesis",
            CoderStage::Done => "done",
        }
    }
}

impl fmt::Display for CoderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independent pass of the constant-comparative method
///
/// Owns every artifact it produces; the context is shared read-only with
/// any other coder of the same run.
pub struct Coder {
    coder_id: String,
    ctx: Arc<PipelineContext>,
    stage: CoderStage,
    incidents: Vec<IncidentNote>,
    categories: Vec<ComparativeCategory>,
    memos: Vec<ComparativeMemo>,
    synthesis: ComparativeSynthesis,
}

impl Coder {
    pub fn new(coder_id: impl Into<String>, ctx: Arc<PipelineContext>) -> Self {
        Self {
            coder_id: coder_id.into(),
            ctx,
            stage: CoderStage::IncidentCoding,
            incidents: Vec::new(),
            categories: Vec::new(),
            memos: Vec::new(),
            synthesis: ComparativeSynthesis::default(),
        }
    }

    pub fn coder_id(&self) -> &str {
        &self.coder_id
    }

    pub fn stage(&self) -> CoderStage {
        self.stage
    }

    /// Run the current stage to completion and advance
    ///
    /// Stages never fail: an exhausted budget advances with the best
    /// (possibly empty) result.
    pub async fn step(&mut self) -> CoderStage {
        let ctx = self.ctx.clone();
        let id = self.coder_id.as_str();

        match self.stage {
            CoderStage::IncidentCoding => {
                let result = execute_incident_coding(&ctx, id).await;
                self.incidents = result.incidents;
            }
            CoderStage::CategoryComparison => {
                let mut categories = execute_category_comparison(&ctx, id, &self.incidents).await;
                ground_quotes(&ctx, id, &mut categories, &self.incidents).await;
                self.categories = categories;
            }
            CoderStage::Memoing => {
                self.memos = execute_memoing(&ctx, id, &self.incidents, &self.categories).await;
            }
            CoderStage::Synthesis => {
                self.synthesis =
                    execute_synthesis(&ctx, id, &self.incidents, &self.categories, &self.memos).await;
            }
            CoderStage::Done => return CoderStage::Done,
        }

        let finished = self.stage;
        self.stage = finished.next();
        ctx.log.info(format!("{}: {} complete", id, finished));
        self.stage
    }

    /// Drive every stage and hand back the coder's artifacts
    pub async fn run(mut self) -> CoderRun {
        info!("{}: starting", self.coder_id);
        while self.stage != CoderStage::Done {
            self.step().await;
        }

        CoderRun {
            coder_id: self.coder_id,
            incidents: self.incidents,
            categories: self.categories,
            memos: self.memos,
            synthesis: self.synthesis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;
    use crate::llm::{CATEGORY_PROMPT, INCIDENT_PROMPT, MEMO_PROMPT, QUOTE_PROMPT, SYNTHESIS_PROMPT};
    use crate::models::AnalysisRunConfig;
    use crate::stages::testing::{canned_response, context, transcript, SEGMENT_TEXTS};

    #[test]
    fn test_stage_order() {
        let mut stage = CoderStage::IncidentCoding;
        let mut seen = vec![stage];
        while stage != CoderStage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                CoderStage::IncidentCoding,
                CoderStage::CategoryComparison,
                CoderStage::Memoing,
                CoderStage::Synthesis,
                CoderStage::Done
            ]
        );
        assert_eq!(CoderStage::Done.next(), CoderStage::Done);
    }

    #[tokio::test]
    async fn test_step_advances_one_stage_at_a_time() {
        let backend = Arc::new(ScriptedBackend::responder(canned_response));
        let ctx = Arc::new(
            context(AnalysisRunConfig::default(), backend.clone(), vec![transcript("a.txt", &SEGMENT_TEXTS)]).await,
        );
        let mut coder = Coder::new("coder1", ctx);

        assert_eq!(coder.step().await, CoderStage::CategoryComparison);
        assert_eq!(backend.calls_with_system_prefix(INCIDENT_PROMPT), 3);
        assert_eq!(backend.calls_with_system_prefix(CATEGORY_PROMPT), 0);

        assert_eq!(coder.step().await, CoderStage::Memoing);
        assert_eq!(backend.calls_with_system_prefix(CATEGORY_PROMPT), 1);
        assert_eq!(backend.calls_with_system_prefix(QUOTE_PROMPT), 1);
    }

    #[tokio::test]
    async fn test_full_pass() {
        let backend = Arc::new(ScriptedBackend::responder(canned_response));
        let ctx = Arc::new(
            context(AnalysisRunConfig::default(), backend.clone(), vec![transcript("a.txt", &SEGMENT_TEXTS)]).await,
        );

        let run = Coder::new("coder1", ctx.clone()).run().await;

        assert_eq!(run.coder_id, "coder1");
        assert_eq!(run.incidents.len(), 3);
        assert!(!run.categories.is_empty());
        assert!((3..=6).contains(&run.memos.len()));
        assert!(!run.synthesis.is_empty());
        assert_eq!(backend.calls_with_system_prefix(MEMO_PROMPT), 1);
        assert_eq!(backend.calls_with_system_prefix(SYNTHESIS_PROMPT), 1);
        assert!(ctx.log.lines().iter().any(|l| l.contains("coder1: synthesis complete")));
    }
}

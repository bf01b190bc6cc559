use std::fmt;

use serde::{Deserialize, Serialize};

/// How strongly the theoretical framework shapes the coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Classic grounded theory, no framework
    #[default]
    Classic,
    /// Framework applied suggestively, only where relevant
    Interpretive,
    /// Framework applied consistently
    Constructionist,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Classic => "classic",
            AnalysisMode::Interpretive => "interpretive",
            AnalysisMode::Constructionist => "constructionist",
        }
    }

    /// Whether the theoretical framework text is sent to the service at all
    pub fn uses_framework(&self) -> bool {
        !matches!(self, AnalysisMode::Classic)
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where category supporting quotes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotePolicy {
    /// Retrieve passages per category and extract quotes in one batched call
    #[default]
    CategoryBatch,
    /// Reuse the verbatim spans captured while coding each incident
    IncidentSpans,
}

/// Immutable configuration for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRunConfig {
    pub analysis_mode: AnalysisMode,
    /// Allow condition-action-consequence structuring in the synthesis
    pub cac_enabled: bool,
    /// Upper bound on categories per coder (0 = leave it to the service)
    pub max_categories: usize,
    /// Approximate segment length in tokens
    pub segment_length: usize,
    /// Number of independent coders (1 or 2)
    pub coder_count: usize,
    pub study_background: String,
    pub theoretical_framework: String,
    pub quote_policy: QuotePolicy,
    /// Passages retrieved per category during quote grounding
    pub retrieval_k: usize,
}

impl Default for AnalysisRunConfig {
    fn default() -> Self {
        Self {
            analysis_mode: AnalysisMode::Classic,
            cac_enabled: false,
            max_categories: 5,
            segment_length: 500,
            coder_count: 1,
            study_background: String::new(),
            theoretical_framework: String::new(),
            quote_policy: QuotePolicy::CategoryBatch,
            retrieval_k: 2,
        }
    }
}

impl AnalysisRunConfig {
    /// Check the values no stage can recover from
    pub fn validate(&self) -> Result<(), crate::RunError> {
        if !(1..=2).contains(&self.coder_count) {
            return Err(crate::RunError::InvalidConfig {
                field: "coder_count",
                message: format!("must be 1 or 2, got {}", self.coder_count),
            });
        }
        if self.segment_length == 0 {
            return Err(crate::RunError::InvalidConfig {
                field: "segment_length",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.retrieval_k == 0 {
            return Err(crate::RunError::InvalidConfig {
                field: "retrieval_k",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Framework text as sent to the service (empty in classic mode)
    pub fn framework_for_payload(&self) -> &str {
        if self.analysis_mode.uses_framework() {
            &self.theoretical_framework
        } else {
            ""
        }
    }

    /// Category bound as sent to the service
    pub fn category_bound(&self) -> serde_json::Value {
        if self.max_categories == 0 {
            serde_json::Value::String("auto".to_string())
        } else {
            serde_json::Value::from(self.max_categories)
        }
    }
}

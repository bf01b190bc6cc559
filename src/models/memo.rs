use serde::{Deserialize, Serialize};

/// Lower bound on memos requested from the service
pub const MIN_MEMOS: usize = 3;
/// Upper bound on memos retained
pub const MAX_MEMOS: usize = 6;

/// Analytic memo produced after category comparison
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparativeMemo {
    pub focus: String,
    pub comparisons_made: Vec<String>,
    pub insights: String,
    pub questions: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Single consolidated narrative paragraph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparativeSynthesis {
    pub paragraph: String,
}

impl ComparativeSynthesis {
    /// Collapse any paragraph breaks and runs of whitespace into one paragraph
    pub fn from_text(text: &str) -> Self {
        Self {
            paragraph: text.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paragraph.is_empty()
    }
}

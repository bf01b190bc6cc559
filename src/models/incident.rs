use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::SegmentKey;

/// Maximum prior-context entries retained per coder
pub const PRIOR_CONTEXT_CAPACITY: usize = 60;
/// Maximum prior-context entries exposed to a single service call
pub const PRIOR_CONTEXT_EXPOSED: usize = 20;

/// One focus/similarities/differences comparison made for an incident
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonNote {
    pub focus: String,
    #[serde(default)]
    pub similarities: String,
    #[serde(default)]
    pub differences: String,
}

/// Segment-level analytic observation made by one coder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentNote {
    #[serde(flatten)]
    pub key: SegmentKey,
    /// Short phrases, ordered, deduplicated case-insensitively
    pub labels: Vec<String>,
    pub comparison_notes: Vec<ComparisonNote>,
    pub analytic_memo: String,
    /// Verbatim spans of the segment text, kept for incident-span quoting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quote_spans: Vec<String>,
}

impl IncidentNote {
    /// Unlabeled entry standing in for a segment not yet coded
    pub fn placeholder(key: SegmentKey) -> Self {
        Self {
            key,
            labels: Vec::new(),
            comparison_notes: Vec::new(),
            analytic_memo: String::new(),
            quote_spans: Vec::new(),
        }
    }

    pub fn is_labeled(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Trim, drop empties, and deduplicate labels case-insensitively keeping first casing
pub fn dedupe_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for label in labels {
        let label = label.as_ref().trim();
        if label.is_empty() {
            continue;
        }
        if seen.insert(label.to_lowercase()) {
            out.push(label.to_string());
        }
    }
    out
}

/// Outcome of merging an incoming note over an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Replace,
    Keep,
}

/// Precedence rule: a labeled entry is never replaced; anything may replace an unlabeled one
pub fn merge_precedence(existing: &IncidentNote, _incoming: &IncidentNote) -> MergeDecision {
    if existing.is_labeled() {
        MergeDecision::Keep
    } else {
        MergeDecision::Replace
    }
}

/// Keyed store holding exactly one incident per segment for a single coder
///
/// The emission order is fixed when the store is seeded, so the order of
/// `merge` calls never affects the order returned by `ordered`.
#[derive(Debug, Clone)]
pub struct IncidentStore {
    notes: Vec<IncidentNote>,
    index: HashMap<SegmentKey, usize>,
}

impl IncidentStore {
    /// Seed one unlabeled placeholder per segment key, in emission order
    pub fn seeded<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a SegmentKey>,
    {
        let mut notes = Vec::new();
        let mut index = HashMap::new();
        for key in keys {
            if index.contains_key(key) {
                continue;
            }
            index.insert(key.clone(), notes.len());
            notes.push(IncidentNote::placeholder(key.clone()));
        }
        Self { notes, index }
    }

    /// Merge an incoming note; returns whether it was stored
    ///
    /// Notes for keys the store was not seeded with are ignored.
    pub fn merge(&mut self, incoming: IncidentNote) -> bool {
        let Some(&slot) = self.index.get(&incoming.key) else {
            return false;
        };
        match merge_precedence(&self.notes[slot], &incoming) {
            MergeDecision::Replace => {
                self.notes[slot] = incoming;
                true
            }
            MergeDecision::Keep => false,
        }
    }

    pub fn get(&self, key: &SegmentKey) -> Option<&IncidentNote> {
        self.index.get(key).and_then(|&i| self.notes.get(i))
    }

    /// Notes in segment emission order
    pub fn ordered(&self) -> &[IncidentNote] {
        &self.notes
    }

    pub fn into_ordered(self) -> Vec<IncidentNote> {
        self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn labeled_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_labeled()).count()
    }
}

/// An entry of the sliding prior-decision memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorIncident {
    pub label: String,
    #[serde(flatten)]
    pub segment: SegmentKey,
    pub memo: String,
}

/// Bounded, order-preserving memory of prior labeling decisions
#[derive(Debug, Clone, Default)]
pub struct PriorIncidentContext {
    entries: VecDeque<PriorIncident>,
}

impl PriorIncidentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every label of a coded incident, then truncate to capacity
    pub fn record(&mut self, note: &IncidentNote) {
        for label in &note.labels {
            self.entries.push_back(PriorIncident {
                label: label.clone(),
                segment: note.key.clone(),
                memo: note.analytic_memo.clone(),
            });
        }
        while self.entries.len() > PRIOR_CONTEXT_CAPACITY {
            self.entries.pop_front();
        }
    }

    /// Most recent entries, most-recent-first, capped for a single call
    pub fn exposed(&self) -> Vec<PriorIncident> {
        self.entries
            .iter()
            .rev()
            .take(PRIOR_CONTEXT_EXPOSED)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

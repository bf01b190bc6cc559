use serde::{Deserialize, Serialize};

use super::{IncidentNote, SegmentKey};

/// Maximum supporting quotes retained per category
pub const MAX_QUOTES_PER_CATEGORY: usize = 3;
/// Maximum sentences in a single supporting quote
pub const MAX_QUOTE_SENTENCES: usize = 3;

/// A segment backing a category, with the labels that placed it there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportingSegment {
    #[serde(flatten)]
    pub key: SegmentKey,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Named cluster of incidents sharing defining properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparativeCategory {
    pub name: String,
    pub defining_properties: Vec<String>,
    pub comparative_insights: Vec<String>,
    pub supporting_segments: Vec<SupportingSegment>,
    /// Verbatim quotes grounded in retrieved transcript passages
    pub supporting_quotes: Vec<String>,
}

impl ComparativeCategory {
    /// Text used to retrieve passages for quote grounding
    pub fn retrieval_query(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if !self.defining_properties.is_empty() {
            parts.push(self.defining_properties.join("; "));
        }
        if !self.comparative_insights.is_empty() {
            parts.push(self.comparative_insights.join("; "));
        }
        parts.join("\n\n")
    }

    /// Fill supporting segment labels from a coder's incidents
    pub fn attach_labels(&mut self, incidents: &[IncidentNote]) {
        for support in &mut self.supporting_segments {
            if support.labels.is_empty() {
                if let Some(note) = incidents.iter().find(|n| n.key == support.key) {
                    support.labels = note.labels.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_query_joins_fields() {
        let category = ComparativeCategory {
            name: "Negotiating care".to_string(),
            defining_properties: vec!["bargaining".to_string(), "timing".to_string()],
            comparative_insights: vec!["varies by shift".to_string()],
            ..Default::default()
        };
        assert_eq!(
            category.retrieval_query(),
            "Negotiating care\n\nbargaining; timing\n\nvaries by shift"
        );
    }

    #[test]
    fn test_attach_labels_from_incidents() {
        let key = SegmentKey::new("t", 2);
        let mut category = ComparativeCategory {
            name: "c".to_string(),
            supporting_segments: vec![SupportingSegment {
                key: key.clone(),
                labels: vec![],
            }],
            ..Default::default()
        };
        let incidents = vec![IncidentNote {
            labels: vec!["waiting it out".to_string()],
            ..IncidentNote::placeholder(key)
        }];

        category.attach_labels(&incidents);
        assert_eq!(category.supporting_segments[0].labels, vec!["waiting it out"]);
    }
}

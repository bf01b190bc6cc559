//! Typed response records decoded from service mappings.
//!
//! Every stage decodes its mapping through here instead of poking at keys.
//! Decoding repairs what it safely can (numbers as strings, a lone string
//! where a list is expected, blank entries, a few known key aliases) and
//! drops list items that cannot be repaired.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::models::{dedupe_labels, CategorySource, SegmentKey, MIN_MEMOS};

/// Decode a mapping into a typed record, `None` if it cannot be repaired
pub fn decode<T: DeserializeOwned>(map: &Map<String, Value>) -> Option<T> {
    serde_json::from_value(Value::Object(map.clone())).ok()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => ["text", "name", "label", "value"]
            .iter()
            .find_map(|k| map.get(*k))
            .map(value_to_string)
            .unwrap_or_default(),
        Value::Null => String::new(),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(value_to_string(&Value::deserialize(d)?))
}

fn lenient_string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(d)?;
    let items = match value {
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        Value::Null => Vec::new(),
        other => vec![value_to_string(&other)],
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(d)?;
    let number = match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    number
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| D::Error::custom(format!("not a segment number: {}", value)))
}

fn lenient_vec<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(d)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Reference to a segment as echoed back by the service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SegmentRef {
    #[serde(alias = "transcript_id", deserialize_with = "lenient_string")]
    pub transcript: String,
    #[serde(deserialize_with = "lenient_u32")]
    pub segment_number: u32,
    #[serde(default, alias = "codes", deserialize_with = "lenient_string_list")]
    pub labels: Vec<String>,
}

impl SegmentRef {
    pub fn key(&self) -> SegmentKey {
        SegmentKey::new(self.transcript.clone(), self.segment_number)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
}

impl SummaryResponse {
    pub fn is_valid(&self) -> bool {
        !self.summary.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComparisonNoteRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub focus: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub similarities: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub differences: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentResponse {
    #[serde(default, alias = "codes", deserialize_with = "lenient_string_list")]
    pub labels: Vec<String>,
    #[serde(default, alias = "comparisons", deserialize_with = "lenient_vec")]
    pub comparison_notes: Vec<ComparisonNoteRecord>,
    #[serde(default, alias = "analytic_memo", deserialize_with = "lenient_string")]
    pub memo: String,
    #[serde(default, alias = "quotes", deserialize_with = "lenient_string_list")]
    pub quote_spans: Vec<String>,
}

impl IncidentResponse {
    pub fn is_valid(&self) -> bool {
        !dedupe_labels(&self.labels).is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, alias = "properties", deserialize_with = "lenient_string_list")]
    pub defining_properties: Vec<String>,
    #[serde(default, alias = "insights", deserialize_with = "lenient_string_list")]
    pub comparative_insights: Vec<String>,
    #[serde(default, alias = "members", deserialize_with = "lenient_vec")]
    pub supporting_segments: Vec<SegmentRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoriesResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub categories: Vec<CategoryRecord>,
}

impl CategoriesResponse {
    /// Categories with a usable name
    pub fn named(self) -> Vec<CategoryRecord> {
        self.categories
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.categories.iter().any(|c| !c.name.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryQuotes {
    #[serde(alias = "category_id", deserialize_with = "lenient_u32")]
    pub id: u32,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub quotes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotesResponse {
    #[serde(default, alias = "categories", deserialize_with = "lenient_vec")]
    pub quotes: Vec<CategoryQuotes>,
}

impl QuotesResponse {
    pub fn is_valid(&self) -> bool {
        self.quotes.iter().any(|q| !q.quotes.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub focus: String,
    #[serde(default, alias = "comparisons", deserialize_with = "lenient_string_list")]
    pub comparisons_made: Vec<String>,
    #[serde(default, alias = "insight", deserialize_with = "lenient_string")]
    pub insights: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub questions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemosResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub memos: Vec<MemoRecord>,
}

impl MemosResponse {
    pub fn focused(self) -> Vec<MemoRecord> {
        self.memos.into_iter().filter(|m| !m.focus.is_empty()).collect()
    }

    pub fn is_valid(&self) -> bool {
        self.memos.iter().filter(|m| !m.focus.is_empty()).count() >= MIN_MEMOS
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthesisResponse {
    #[serde(default, alias = "paragraph", alias = "core_story", deserialize_with = "lenient_string")]
    pub synthesis: String,
}

impl SynthesisResponse {
    pub fn is_valid(&self) -> bool {
        !self.synthesis.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternRecord {
    #[serde(default, alias = "code", deserialize_with = "lenient_string")]
    pub label: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub coders: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub segments: Vec<SegmentRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternsResponse {
    #[serde(default, alias = "incident_patterns", deserialize_with = "lenient_vec")]
    pub patterns: Vec<PatternRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegratedCategoryRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub sources: Vec<CategorySource>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub alignment: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub divergence: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub supporting_quotes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegratedCategoriesResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub categories: Vec<IntegratedCategoryRecord>,
}

impl IntegratedCategoriesResponse {
    pub fn is_valid(&self) -> bool {
        self.categories.iter().any(|c| !c.name.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegratedMemoRecord {
    #[serde(default, alias = "focus", deserialize_with = "lenient_string")]
    pub theme: String,
    #[serde(default, alias = "tensions", deserialize_with = "lenient_string_list")]
    pub shared_tensions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub cross_references: Vec<String>,
    #[serde(default, alias = "questions", deserialize_with = "lenient_string_list")]
    pub open_questions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestResponse {
    #[serde(default, alias = "digest", deserialize_with = "lenient_vec")]
    pub memos: Vec<IntegratedMemoRecord>,
}

impl DigestResponse {
    pub fn is_valid(&self) -> bool {
        self.memos.iter().any(|m| !m.theme.is_empty())
    }
}

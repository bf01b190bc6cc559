use serde::Serialize;
use serde_json::Value;

use crate::models::{
    AnalysisMode, AnalysisRunConfig, ComparativeCategory, ComparativeMemo, CoderRun, IncidentNote,
    PriorIncident, Segment, MAX_MEMOS, MAX_QUOTES_PER_CATEGORY, MIN_MEMOS,
};

pub const SUMMARY_PROMPT: &str = "You are a qualitative researcher writing a TRANSCRIPT SUMMARY. \
Summarize the interview in one neutral narrative paragraph: who is speaking, the situations described, \
and the main concerns raised. Do not interpret beyond the text.";

pub const INCIDENT_PROMPT: &str = "You are a grounded-theory expert performing INCIDENT CODING with constant comparison. \
For the given segment, produce concise, human-like labels (2-6 words) capturing actions, meanings, or conditions. \
Avoid generic words, names, or single words; prefer short gerund or noun phrases. Ignore interviewer prompts. \
Compare the segment against the prior incidents: for each comparison give its focus, the similarities, and the differences. \
Close with a short analytic memo.";

pub const CATEGORY_PROMPT: &str = "You are a grounded-theory expert performing CATEGORY COMPARISON. \
Cluster the incidents into clear, analytic categories with concise but informative names. \
For each category give its defining properties, comparative insights drawn from comparing its incidents, \
and its supporting segments as {transcript, segment_number}. Do NOT include quotes.";

pub const QUOTE_PROMPT: &str = "You extract short, faithful quotes for grounded-theory categories (QUOTE EXTRACTION). \
For each category, return up to 3 quotes (each 1-3 sentences) that are VERBATIM substrings of that category's contexts. \
Copy text exactly, including punctuation. Prefer interviewee speech; exclude interviewer prompts.";

pub const MEMO_PROMPT: &str = "You are a grounded-theory expert writing ANALYTIC MEMOS. \
Write between 3 and 6 memos. Each memo has a focus, the comparisons considered, a synthesized insight, \
open questions, and next steps for theoretical sampling.";

pub const SYNTHESIS_PROMPT: &str = "You are a grounded-theory expert writing the SYNTHESIS. \
Write one consolidated paragraph in a clear academic style that integrates the categories, \
grounded in the incidents and memos provided.";

pub const PATTERN_MERGE_PROMPT: &str = "You are integrating INCIDENT PATTERNS across independent coders. \
Merge labels that name the same pattern, remove duplicates, keep each pattern's representative segments \
and the coders that produced it. Keep coder-specific nuance rather than flattening it.";

pub const CATEGORY_MERGE_PROMPT: &str = "You are integrating CATEGORIES across independent coders into a category matrix. \
Combine overlapping categories, keep distinct ones distinct, and for each integrated category describe \
where the coders align and where they diverge. Use only supporting quotes present in the inputs.";

pub const MEMO_DIGEST_PROMPT: &str = "You are writing a MEMO DIGEST across independent coders. \
Group the coders' memos into themes, cross-reference memos that address the same issue, \
and name the tensions the coders share as well as open questions.";

pub const SYNTHESIS_MERGE_PROMPT: &str = "You are writing the INTEGRATED SYNTHESIS of independent coders. \
Integrate the coders' paragraphs into one coherent paragraph in a clear academic style, \
preserving points where the coders differ.";

pub const SUMMARY_SCHEMA: &str = r#"{"summary": str}"#;
pub const INCIDENT_SCHEMA: &str = r#"{"labels": [str], "comparison_notes": [{"focus": str, "similarities": str, "differences": str}], "memo": str}"#;
pub const INCIDENT_SPANS_SCHEMA: &str = r#"{"labels": [str], "comparison_notes": [{"focus": str, "similarities": str, "differences": str}], "memo": str, "quote_spans": [str]}"#;
pub const CATEGORY_SCHEMA: &str = r#"{"categories": [{"name": str, "defining_properties": [str], "comparative_insights": [str], "supporting_segments": [{"transcript": str, "segment_number": int}]}]}"#;
pub const QUOTES_SCHEMA: &str = r#"{"quotes": [{"id": int, "quotes": [str]}]}"#;
pub const MEMO_SCHEMA: &str = r#"{"memos": [{"focus": str, "comparisons_made": [str], "insights": str, "questions": [str], "next_steps": [str]}]}"#;
pub const SYNTHESIS_SCHEMA: &str = r#"{"synthesis": str}"#;
pub const PATTERN_SCHEMA: &str = r#"{"patterns": [{"label": str, "coders": [str], "segments": [{"transcript": str, "segment_number": int}]}]}"#;
pub const CATEGORY_MERGE_SCHEMA: &str = r#"{"categories": [{"name": str, "description": str, "sources": [{"coder": str, "category": str}], "alignment": str, "divergence": str, "supporting_quotes": [str]}]}"#;
pub const MEMO_DIGEST_SCHEMA: &str = r#"{"memos": [{"theme": str, "shared_tensions": [str], "cross_references": [str], "open_questions": [str]}]}"#;

/// How the theoretical framework should shape a stage
pub fn mode_instruction(mode: AnalysisMode) -> &'static str {
    match mode {
        AnalysisMode::Constructionist => "Apply the theoretical framework consistently.",
        AnalysisMode::Interpretive => {
            "Apply the theoretical framework suggestively, if and only if it is relevant and useful."
        }
        AnalysisMode::Classic => "Use classic grounded theory (no framework).",
    }
}

/// Full system prompt for a stage: base instructions, mode, JSON-only contract
pub fn system_prompt(base: &str, mode: AnalysisMode) -> String {
    format!(
        "{} Analysis mode: {}. {} Return ONLY JSON in the described schema.",
        base,
        mode,
        mode_instruction(mode)
    )
}

/// System prompt for synthesis stages, where CAC structuring is optional
pub fn synthesis_system_prompt(base: &str, mode: AnalysisMode, cac_enabled: bool) -> String {
    let cac = if cac_enabled {
        " CAC is enabled: where the data evidence them, weave in Condition-Action-Consequence relationships \
between categories; never invent relationships the data do not support."
    } else {
        ""
    };
    format!("{}{}", system_prompt(base, mode), cac)
}

fn to_json<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Serialize)]
struct SegmentView<'a> {
    transcript: &'a str,
    segment_number: u32,
    text: &'a str,
}

#[derive(Serialize)]
struct IncidentView<'a> {
    transcript: &'a str,
    segment_number: u32,
    labels: &'a [String],
    #[serde(skip_serializing_if = "str::is_empty")]
    memo: &'a str,
}

impl<'a> IncidentView<'a> {
    fn from_note(note: &'a IncidentNote, with_memo: bool) -> Self {
        Self {
            transcript: &note.key.transcript_id,
            segment_number: note.key.segment_number,
            labels: &note.labels,
            memo: if with_memo { &note.analytic_memo } else { "" },
        }
    }
}

fn labeled_views(incidents: &[IncidentNote], with_memo: bool) -> Vec<IncidentView<'_>> {
    incidents
        .iter()
        .filter(|n| n.is_labeled())
        .map(|n| IncidentView::from_note(n, with_memo))
        .collect()
}

#[derive(Serialize)]
struct CategoryView<'a> {
    name: &'a str,
    defining_properties: &'a [String],
    comparative_insights: &'a [String],
    #[serde(skip_serializing_if = "is_empty_list")]
    supporting_quotes: &'a [String],
}

fn is_empty_list(items: &&[String]) -> bool {
    items.is_empty()
}

impl<'a> From<&'a ComparativeCategory> for CategoryView<'a> {
    fn from(c: &'a ComparativeCategory) -> Self {
        Self {
            name: &c.name,
            defining_properties: &c.defining_properties,
            comparative_insights: &c.comparative_insights,
            supporting_quotes: &c.supporting_quotes,
        }
    }
}

/// User payload for a transcript summary
pub fn build_summary_payload(config: &AnalysisRunConfig, transcript_id: &str, text: &str) -> String {
    #[derive(Serialize)]
    struct Payload<'a> {
        study_background: &'a str,
        transcript: &'a str,
        text: &'a str,
        schema: &'a str,
    }

    to_json(&Payload {
        study_background: &config.study_background,
        transcript: transcript_id,
        text,
        schema: SUMMARY_SCHEMA,
    })
}

/// User payload for coding one segment against the prior-incident window
pub fn build_incident_payload(
    config: &AnalysisRunConfig,
    segment: &Segment,
    transcript_summary: &str,
    prior_incidents: &[PriorIncident],
    request_spans: bool,
) -> String {
    #[derive(Serialize)]
    struct Payload<'a> {
        study_background: &'a str,
        theoretical_framework: &'a str,
        transcript_summary: &'a str,
        segment: SegmentView<'a>,
        prior_incidents: &'a [PriorIncident],
        instructions: &'a str,
        schema: &'a str,
    }

    let instructions = if request_spans {
        "2-6 word labels, no stopwords, no interviewer content. Also return up to 3 quote_spans copied verbatim from the segment text. JSON only."
    } else {
        "2-6 word labels, no stopwords, no interviewer content. JSON only."
    };

    to_json(&Payload {
        study_background: &config.study_background,
        theoretical_framework: config.framework_for_payload(),
        transcript_summary,
        segment: SegmentView {
            transcript: segment.transcript_id(),
            segment_number: segment.segment_number(),
            text: &segment.text,
        },
        prior_incidents,
        instructions,
        schema: if request_spans { INCIDENT_SPANS_SCHEMA } else { INCIDENT_SCHEMA },
    })
}

/// User payload for clustering incidents into categories
pub fn build_category_payload(config: &AnalysisRunConfig, incidents: &[IncidentNote]) -> String {
    #[derive(Serialize)]
    struct Payload<'a> {
        study_background: &'a str,
        theoretical_framework: &'a str,
        max_categories: Value,
        incidents: Vec<IncidentView<'a>>,
        schema: &'a str,
    }

    to_json(&Payload {
        study_background: &config.study_background,
        theoretical_framework: config.framework_for_payload(),
        max_categories: config.category_bound(),
        incidents: labeled_views(incidents, true),
        schema: CATEGORY_SCHEMA,
    })
}

/// One category's retrieval contexts for the batched quote extraction call
pub struct QuoteRequestItem<'a> {
    pub id: usize,
    pub category: &'a ComparativeCategory,
    pub contexts: &'a [String],
}

/// User payload for extracting quotes for every category in one call
pub fn build_quote_payload(items: &[QuoteRequestItem<'_>]) -> String {
    #[derive(Serialize)]
    struct Item<'a> {
        id: usize,
        name: &'a str,
        description: String,
        contexts: &'a [String],
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        categories: Vec<Item<'a>>,
        max_quotes_per_category: usize,
        schema: &'a str,
    }

    to_json(&Payload {
        categories: items
            .iter()
            .map(|item| Item {
                id: item.id,
                name: &item.category.name,
                description: item.category.defining_properties.join("; "),
                contexts: item.contexts,
            })
            .collect(),
        max_quotes_per_category: MAX_QUOTES_PER_CATEGORY,
        schema: QUOTES_SCHEMA,
    })
}

/// User payload for the memoing stage
pub fn build_memo_payload(
    config: &AnalysisRunConfig,
    incidents: &[IncidentNote],
    categories: &[ComparativeCategory],
) -> String {
    #[derive(Serialize)]
    struct Payload<'a> {
        study_background: &'a str,
        theoretical_framework: &'a str,
        incidents: Vec<IncidentView<'a>>,
        categories: Vec<CategoryView<'a>>,
        min_memos: usize,
        max_memos: usize,
        schema: &'a str,
    }

    to_json(&Payload {
        study_background: &config.study_background,
        theoretical_framework: config.framework_for_payload(),
        incidents: labeled_views(incidents, false),
        categories: categories.iter().map(CategoryView::from).collect(),
        min_memos: MIN_MEMOS,
        max_memos: MAX_MEMOS,
        schema: MEMO_SCHEMA,
    })
}

/// User payload for the synthesis stage
pub fn build_synthesis_payload(
    config: &AnalysisRunConfig,
    incidents: &[IncidentNote],
    categories: &[ComparativeCategory],
    memos: &[ComparativeMemo],
) -> String {
    #[derive(Serialize)]
    struct Payload<'a> {
        study_background: &'a str,
        theoretical_framework: &'a str,
        cac_enabled: bool,
        incidents: Vec<IncidentView<'a>>,
        categories: Vec<CategoryView<'a>>,
        memos: &'a [ComparativeMemo],
        schema: &'a str,
    }

    to_json(&Payload {
        study_background: &config.study_background,
        theoretical_framework: config.framework_for_payload(),
        cac_enabled: config.cac_enabled,
        incidents: labeled_views(incidents, false),
        categories: categories.iter().map(CategoryView::from).collect(),
        memos,
        schema: SYNTHESIS_SCHEMA,
    })
}

/// User payload for merging incident labels across coders
pub fn build_pattern_payload(coders: &[CoderRun]) -> String {
    #[derive(Serialize)]
    struct Item<'a> {
        coder: &'a str,
        label: &'a str,
        transcript: &'a str,
        segment_number: u32,
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        labels: Vec<Item<'a>>,
        schema: &'a str,
    }

    let labels = coders
        .iter()
        .flat_map(|run| {
            run.incidents.iter().flat_map(move |note| {
                note.labels.iter().map(move |label| Item {
                    coder: &run.coder_id,
                    label,
                    transcript: &note.key.transcript_id,
                    segment_number: note.key.segment_number,
                })
            })
        })
        .collect();

    to_json(&Payload {
        labels,
        schema: PATTERN_SCHEMA,
    })
}

/// User payload for the cross-coder category matrix
pub fn build_category_merge_payload(config: &AnalysisRunConfig, coders: &[CoderRun]) -> String {
    #[derive(Serialize)]
    struct CoderCategories<'a> {
        coder: &'a str,
        categories: Vec<CategoryView<'a>>,
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        theoretical_framework: &'a str,
        coders: Vec<CoderCategories<'a>>,
        schema: &'a str,
    }

    to_json(&Payload {
        theoretical_framework: config.framework_for_payload(),
        coders: coders
            .iter()
            .map(|run| CoderCategories {
                coder: &run.coder_id,
                categories: run.categories.iter().map(CategoryView::from).collect(),
            })
            .collect(),
        schema: CATEGORY_MERGE_SCHEMA,
    })
}

/// User payload for the cross-coder memo digest
pub fn build_memo_digest_payload(coders: &[CoderRun]) -> String {
    #[derive(Serialize)]
    struct CoderMemos<'a> {
        coder: &'a str,
        memos: &'a [ComparativeMemo],
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        coders: Vec<CoderMemos<'a>>,
        schema: &'a str,
    }

    to_json(&Payload {
        coders: coders
            .iter()
            .map(|run| CoderMemos {
                coder: &run.coder_id,
                memos: &run.memos,
            })
            .collect(),
        schema: MEMO_DIGEST_SCHEMA,
    })
}

/// User payload for the integrated synthesis
pub fn build_synthesis_merge_payload(config: &AnalysisRunConfig, coders: &[CoderRun]) -> String {
    #[derive(Serialize)]
    struct Story<'a> {
        coder: &'a str,
        synthesis: &'a str,
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        cac_enabled: bool,
        theoretical_framework: &'a str,
        syntheses: Vec<Story<'a>>,
        schema: &'a str,
    }

    to_json(&Payload {
        cac_enabled: config.cac_enabled,
        theoretical_framework: config.framework_for_payload(),
        syntheses: coders
            .iter()
            .map(|run| Story {
                coder: &run.coder_id,
                synthesis: &run.synthesis.paragraph,
            })
            .collect(),
        schema: SYNTHESIS_SCHEMA,
    })
}

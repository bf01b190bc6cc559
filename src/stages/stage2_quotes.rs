use tracing::{debug, info};

use super::{CallClass, PipelineContext};
use crate::llm::validation::QuotesResponse;
use crate::llm::{build_quote_payload, system_prompt, QuoteRequestItem, QUOTES_SCHEMA, QUOTE_PROMPT};
use crate::models::{
    ComparativeCategory, IncidentNote, QuotePolicy, MAX_QUOTES_PER_CATEGORY, MAX_QUOTE_SENTENCES,
};

/// Attach verbatim supporting quotes to each category
///
/// Under [`QuotePolicy::CategoryBatch`] passages are retrieved per category
/// and one batched extraction call is made; under
/// [`QuotePolicy::IncidentSpans`] the spans recorded during incident coding
/// are reused. Either way a quote survives only if it is a verbatim
/// substring of a passage grounding that category.
pub async fn ground_quotes(
    ctx: &PipelineContext,
    coder_id: &str,
    categories: &mut [ComparativeCategory],
    incidents: &[IncidentNote],
) {
    if categories.is_empty() {
        return;
    }

    match ctx.config.quote_policy {
        QuotePolicy::CategoryBatch => ground_from_retrieval(ctx, coder_id, categories).await,
        QuotePolicy::IncidentSpans => ground_from_spans(ctx, categories, incidents),
    }

    let quoted = categories.iter().filter(|c| !c.supporting_quotes.is_empty()).count();
    info!("{}: quotes grounded for {}/{} categories", coder_id, quoted, categories.len());
}

async fn ground_from_retrieval(ctx: &PipelineContext, coder_id: &str, categories: &mut [ComparativeCategory]) {
    let mut contexts: Vec<Vec<String>> = Vec::with_capacity(categories.len());
    for category in categories.iter() {
        match ctx.index.query(&category.retrieval_query(), ctx.config.retrieval_k).await {
            Ok(passages) => contexts.push(passages.into_iter().map(|p| p.text).collect()),
            Err(e) => {
                ctx.log.warn(format!(
                    "{}: retrieval failed for category '{}': {:#}",
                    coder_id, category.name, e
                ));
                contexts.push(Vec::new());
            }
        }
    }

    let items: Vec<QuoteRequestItem<'_>> = categories
        .iter()
        .zip(&contexts)
        .enumerate()
        .filter(|(_, (_, passages))| !passages.is_empty())
        .map(|(id, (category, passages))| QuoteRequestItem {
            id,
            category,
            contexts: passages,
        })
        .collect();

    if items.is_empty() {
        ctx.log.warn(format!("{}: no passages retrieved, categories left unquoted", coder_id));
        return;
    }
    let user = build_quote_payload(&items);

    let outcome = ctx
        .services
        .request::<QuotesResponse, _>(
            CallClass::Segment,
            ctx.budgets().quotes,
            system_prompt(QUOTE_PROMPT, ctx.config.analysis_mode),
            user,
            QUOTES_SCHEMA,
            QuotesResponse::is_valid,
        )
        .await;

    if !outcome.valid {
        ctx.log.warn(format!(
            "{}: quote extraction failed after {} attempts: {}",
            coder_id,
            outcome.calls,
            outcome.diagnostics.describe()
        ));
    }

    for entry in outcome.value.quotes {
        let id = entry.id as usize;
        let (Some(category), Some(passages)) = (categories.get_mut(id), contexts.get(id)) else {
            debug!("{}: quotes for unknown category id {}", coder_id, id);
            continue;
        };
        add_grounded_quotes(&mut category.supporting_quotes, &entry.quotes, passages);
    }
}

fn ground_from_spans(ctx: &PipelineContext, categories: &mut [ComparativeCategory], incidents: &[IncidentNote]) {
    for category in categories.iter_mut() {
        let mut candidates = Vec::new();
        let mut passages = Vec::new();
        for support in &category.supporting_segments {
            if let Some(note) = incidents.iter().find(|n| n.key == support.key) {
                candidates.extend(note.quote_spans.iter().cloned());
            }
            if let Some(text) = ctx.segment_text(&support.key) {
                passages.push(text.to_string());
            }
        }
        add_grounded_quotes(&mut category.supporting_quotes, &candidates, &passages);
    }
}

/// Trim, verify and append candidates; at most three quotes are kept
pub fn add_grounded_quotes(quotes: &mut Vec<String>, candidates: &[String], passages: &[String]) {
    for candidate in candidates {
        if quotes.len() >= MAX_QUOTES_PER_CATEGORY {
            break;
        }
        let Some(quote) = grounded_quote(candidate, passages) else {
            continue;
        };
        if !quotes.iter().any(|q| q == quote) {
            quotes.push(quote.to_string());
        }
    }
}

/// The trimmed candidate if it occurs verbatim in one of the passages
fn grounded_quote<'a>(candidate: &'a str, passages: &[String]) -> Option<&'a str> {
    let found = |quote: &str| !quote.is_empty() && passages.iter().any(|p| p.contains(quote));

    let quote = trim_to_sentences(candidate, MAX_QUOTE_SENTENCES);
    if found(quote) {
        return Some(quote);
    }

    // Services often wrap the quote itself in quotation marks
    let unwrapped = trim_to_sentences(
        candidate.trim().trim_matches(|c| matches!(c, '"' | '\u{201C}' | '\u{201D}')),
        MAX_QUOTE_SENTENCES,
    );
    found(unwrapped).then_some(unwrapped)
}

/// Leading `max_sentences` sentences of `text`, trimmed
///
/// A sentence ends at `.`, `!`, `?` or `…`, plus any closing quotes or
/// brackets, followed by whitespace or the end of the text. The result is
/// always a prefix of the trimmed input.
pub fn trim_to_sentences(text: &str, max_sentences: usize) -> &str {
    let text = text.trim();
    if max_sentences == 0 {
        return "";
    }

    let mut count = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?' | '\u{2026}') {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !matches!(next, '"' | '\'' | '\u{201D}' | '\u{2019}' | ')' | ']' | '}') {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            count += 1;
            if count == max_sentences {
                return text[..end].trim_end();
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;
    use crate::models::{AnalysisRunConfig, SegmentKey, SupportingSegment};
    use crate::stages::testing::{canned_response, context, transcript, SEGMENT_TEXTS};
    use std::sync::Arc;

    fn category(name: &str, properties: &[&str]) -> ComparativeCategory {
        ComparativeCategory {
            name: name.to_string(),
            defining_properties: properties.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_trim_to_sentences() {
        let text = "One. Two! Three? Four.";
        assert_eq!(trim_to_sentences(text, 3), "One. Two! Three?");
        assert_eq!(trim_to_sentences(text, 1), "One.");
        assert_eq!(trim_to_sentences("  No terminator here ", 3), "No terminator here");
    }

    #[test]
    fn test_trim_tolerates_closing_quotes() {
        let text = "She said \"stop.\" Then left. Later (much later.) she came back. Again.";
        assert_eq!(
            trim_to_sentences(text, 3),
            "She said \"stop.\" Then left. Later (much later.)"
        );
        // Decimal points are not boundaries
        assert_eq!(trim_to_sentences("It cost 2.50 dollars. Yes.", 1), "It cost 2.50 dollars.");
    }

    #[test]
    fn test_trimmed_quote_stays_substring() {
        let passage = "I care for her. Every day. Every night. Always.".to_string();
        let mut quotes = Vec::new();
        add_grounded_quotes(&mut quotes, &[passage.clone()], &[passage.clone()]);
        assert_eq!(quotes, vec!["I care for her. Every day. Every night."]);
        assert!(passage.contains(&quotes[0]));
    }

    #[test]
    fn test_non_verbatim_and_duplicate_quotes_dropped() {
        let passages = vec!["I never sleep. My back hurts.".to_string()];
        let candidates = vec![
            "I never slept.".to_string(),
            "\u{201C}I never sleep.\u{201D}".to_string(),
            "I never sleep.".to_string(),
            "   ".to_string(),
        ];
        let mut quotes = Vec::new();
        add_grounded_quotes(&mut quotes, &candidates, &passages);
        assert_eq!(quotes, vec!["I never sleep."]);
    }

    #[test]
    fn test_at_most_three_quotes() {
        let passages = vec!["A. B. C. D. E.".to_string()];
        let candidates: Vec<String> = ["A.", "B.", "C.", "D."].iter().map(|s| s.to_string()).collect();
        let mut quotes = Vec::new();
        add_grounded_quotes(&mut quotes, &candidates, &passages);
        assert_eq!(quotes.len(), MAX_QUOTES_PER_CATEGORY);
    }

    #[tokio::test]
    async fn test_batch_quotes_grounded_in_retrieved_passages() {
        let backend = Arc::new(ScriptedBackend::responder(canned_response));
        let ctx = context(
            AnalysisRunConfig::default(),
            backend.clone(),
            vec![transcript("a.txt", &SEGMENT_TEXTS)],
        )
        .await;
        let mut categories = vec![
            category("Caring for mother", &["evening care"]),
            category("Support group", &["peer help"]),
        ];

        ground_quotes(&ctx, "coder1", &mut categories, &[]).await;

        // One batched call for every category
        assert_eq!(backend.call_count(), 1);
        for category in &categories {
            assert!(!category.supporting_quotes.is_empty());
            for quote in &category.supporting_quotes {
                assert!(SEGMENT_TEXTS.iter().any(|t| t.contains(quote.as_str())));
                assert_ne!(quote, "A quote nobody said.");
            }
        }
    }

    #[tokio::test]
    async fn test_incident_span_policy_makes_no_call() {
        let backend = Arc::new(ScriptedBackend::responder(canned_response));
        let config = AnalysisRunConfig {
            quote_policy: QuotePolicy::IncidentSpans,
            ..Default::default()
        };
        let ctx = context(config, backend.clone(), vec![transcript("a.txt", &SEGMENT_TEXTS)]).await;
        let key = SegmentKey::new("a.txt", 2);
        let incidents = vec![IncidentNote {
            labels: vec!["feeling alone".to_string()],
            quote_spans: vec!["I feel alone with all of it.".to_string(), "Not in the text.".to_string()],
            ..IncidentNote::placeholder(key.clone())
        }];
        let mut categories = vec![ComparativeCategory {
            supporting_segments: vec![SupportingSegment { key, labels: Vec::new() }],
            ..category("Isolation", &[])
        }];

        ground_quotes(&ctx, "coder1", &mut categories, &incidents).await;

        assert_eq!(backend.call_count(), 0);
        assert_eq!(categories[0].supporting_quotes, vec!["I feel alone with all of it."]);
    }
}

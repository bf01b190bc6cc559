use serde_json::{Map, Value};

/// Parse a raw model response into JSON, tolerating surrounding prose
///
/// Tries, in order: the body of each `json` or untagged fenced code block
/// (fences tagged with another language are skipped), the whole response
/// when it is already an object or array, then the outermost `{`…`}`
/// span. Anything else yields an empty object. Never fails.
pub fn parse_json_flexible(text: &str) -> Value {
    let t = text.trim();
    if t.is_empty() {
        return empty();
    }

    for body in json_fences(t) {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return value;
        }
    }

    let looks_whole = (t.starts_with('{') && t.ends_with('}')) || (t.starts_with('[') && t.ends_with(']'));
    if looks_whole {
        if let Ok(value) = serde_json::from_str::<Value>(t) {
            return value;
        }
    }

    if let (Some(start), Some(end)) = (t.find('{'), t.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&t[start..=end]) {
                return value;
            }
        }
    }

    empty()
}

/// Like `parse_json_flexible`, but only objects count; anything else is empty
pub fn parse_object(text: &str) -> Map<String, Value> {
    match parse_json_flexible(text) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}

/// Bodies of closed ``` fences tagged `json` or untagged, in order
fn json_fences(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || loop {
        let open = rest.find("```")?;
        let after_fence = &rest[open + 3..];
        let tag_end = after_fence.find('\n')?;
        let tag = after_fence[..tag_end].trim();
        let body = &after_fence[tag_end + 1..];
        let close = body.find("```")?;
        rest = &body[close + 3..];
        if tag.is_empty() || tag.eq_ignore_ascii_case("json") {
            return Some(body[..close].trim());
        }
    })
}

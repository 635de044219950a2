//! Pull a JSON object out of free-form judge output.

use serde_json::Value;

/// Candidate order: fenced block, whole text, outermost `{...}` span.
/// The first candidate that parses wins.
pub fn extract_json(text: &str) -> Option<Value> {
    let candidates = [fenced_block(text), Some(text.trim()), brace_span(text)];
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter(Value::is_object)
}

fn fenced_block(text: &str) -> Option<&str> {
    // Look for ```json ... ``` first, then a bare ``` fence
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body_start = start + fence.len();
            if let Some(end) = text[body_start..].find("```") {
                return Some(text[body_start..body_start + end].trim());
            }
        }
    }
    None
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

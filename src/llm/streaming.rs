//! SSE plumbing for the Gemini streaming endpoint, plus the last-ditch
//! text salvage used when a stream dies mid-response.
//!
//! Gemini emits data-only SSE: `data: {...}` lines with no `event:`
//! prefix, events separated by a blank line. Text deltas live at
//! `candidates[0].content.parts[*].text`.

use regex::Regex;
use std::sync::OnceLock;

/// Drain complete SSE events out of `buffer`, leaving any incomplete tail
/// in place for the next network chunk.
pub fn parse_data_only_sse_events(buffer: &mut String) -> Vec<String> {
    // Normalize CRLF so the blank-line separator is always "\n\n". A lone
    // trailing '\r' from a chunk split mid-CRLF heals on the next call.
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }
    let mut events = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let raw: String = buffer.drain(..pos + 2).collect();
        for line in raw.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() && data != "[DONE]" {
                    events.push(data.to_string());
                }
            }
        }
    }
    events
}

/// Extract the text delta from one SSE data payload.
pub fn extract_stream_text(data: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let parts = json
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut text = String::new();
    for part in parts {
        if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        }
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Scrape `"text": "..."` fragments out of a response body that no longer
/// parses as JSON. Best effort only — used when the stream produced zero
/// parseable content.
pub fn salvage_text_fragments(raw: &str) -> String {
    static TEXT_FIELD: OnceLock<Regex> = OnceLock::new();
    let re = TEXT_FIELD.get_or_init(|| {
        Regex::new(r#""text"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("salvage regex")
    });

    let mut out = String::new();
    for cap in re.captures_iter(raw) {
        let literal = &cap[1];
        // Let serde_json unescape the string literal; fall back to the raw
        // escaped bytes rather than dropping content.
        match serde_json::from_str::<String>(&format!("\"{literal}\"")) {
            Ok(unescaped) => out.push_str(&unescaped),
            Err(_) => out.push_str(literal),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_events_are_drained_and_tail_is_kept() {
        let mut buffer = String::from(
            "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: {\"partial\":",
        );
        let events = parse_data_only_sse_events(&mut buffer);
        assert_eq!(events, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buffer, "data: {\"partial\":");

        buffer.push_str("3}\n\n");
        let events = parse_data_only_sse_events(&mut buffer);
        assert_eq!(events, vec!["{\"partial\":3}"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn done_marker_and_blank_lines_are_skipped() {
        let mut buffer = String::from("data: [DONE]\n\ndata:\n\n");
        assert!(parse_data_only_sse_events(&mut buffer).is_empty());
    }

    #[test]
    fn crlf_events_parse_even_when_split_mid_crlf() {
        let mut buffer = String::from("data: {\"x\":1}\r\n\r");
        assert!(parse_data_only_sse_events(&mut buffer).is_empty());

        buffer.push_str("\ndata: {\"y\":2}\r\n\r\n");
        let events = parse_data_only_sse_events(&mut buffer);
        assert_eq!(events, vec!["{\"x\":1}", "{\"y\":2}"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn text_delta_is_extracted() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Call me "},{"text":"Ishmael."}]}}]}"#;
        assert_eq!(extract_stream_text(data).unwrap(), "Call me Ishmael.");
    }

    #[test]
    fn payload_without_text_yields_none() {
        assert!(extract_stream_text(r#"{"usageMetadata":{"promptTokenCount":10}}"#).is_none());
        assert!(extract_stream_text("not json").is_none());
    }

    #[test]
    fn salvage_unescapes_fragments() {
        let raw = r#"garbage "text": "line one\n", more garbage "text": "요약 done" trailing"#;
        assert_eq!(salvage_text_fragments(raw), "line one\n요약 done");
    }

    #[test]
    fn salvage_of_clean_garbage_is_empty() {
        assert!(salvage_text_fragments("no fragments here").is_empty());
    }
}

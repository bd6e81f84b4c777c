//! Incremental extraction of tool-call tags from streamed model text.
//!
//! Tags look like `<name key="value">body</name>` or `<name key="value" />`. A candidate is
//! buffered until it either completes or can no longer complete, so tags split across any
//! number of deltas are still recognized. Anything that is not a complete, non-nested tag is
//! passed through as text, unchanged.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Argument key a tag body is passed under.
pub const BODY_KEY: &str = "body";

/// Tags whose body is model reasoning rather than a tool call.
pub const REASONING_TAGS: &[&str] = &["think", "thought", "thinking"];

const DEFAULT_MAX_CANDIDATE_BYTES: usize = 1024 * 1024;

/// One tool invocation parsed out of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    /// In source order.
    pub attributes: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ToolCallRecord {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// JSON object of the attributes, plus the body under [`BODY_KEY`] when present.
    ///
    /// A repeated attribute keeps its last value.
    pub fn arguments(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.attributes {
            map.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        if let Some(body) = &self.body {
            map.entry(BODY_KEY.to_string())
                .or_insert_with(|| serde_json::Value::String(body.clone()));
        }
        serde_json::Value::Object(map)
    }
}

/// Output of the extractor, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractEvent {
    Text(String),
    Reasoning(String),
    ToolCall(ToolCallRecord),
}

enum Candidate {
    Complete { event: ExtractEvent, consumed: usize },
    Incomplete,
    Invalid,
}

/// A candidate whose opening tag parsed, waiting for its closing tag.
#[derive(Debug, Clone)]
struct OpenTag {
    name: String,
    attributes: Vec<(String, String)>,
    reasoning: bool,
    body_start: usize,
    /// Buffer length already searched for the closing tag.
    scanned: usize,
}

enum Header {
    Done(Candidate),
    Open(OpenTag),
}

/// Stateful tag parser fed one delta at a time.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    buffer: String,
    open: Option<OpenTag>,
    tool_names: Option<HashSet<String>>,
    max_candidate_bytes: usize,
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TagExtractor {
    /// Accepts any tag name.
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            open: None,
            tool_names: None,
            max_candidate_bytes: DEFAULT_MAX_CANDIDATE_BYTES,
        }
    }

    /// Only the given tool names (and reasoning tags) are parsed; other tags are text.
    pub fn with_tool_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool_names: Some(names.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    /// Abandon candidates that grow beyond `bytes` without completing.
    pub fn with_max_candidate_bytes(mut self, bytes: usize) -> Self {
        self.max_candidate_bytes = bytes.max(1);
        self
    }

    /// Whether a partial tag is buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn feed(&mut self, delta: &str) -> Vec<ExtractEvent> {
        self.buffer.push_str(delta);
        let mut events = Vec::new();

        loop {
            match self.buffer.find('<') {
                None => {
                    let text = std::mem::take(&mut self.buffer);
                    push_text(&mut events, &text);
                    break;
                }
                Some(0) => {}
                Some(start) => {
                    let text: String = self.buffer.drain(..start).collect();
                    push_text(&mut events, &text);
                }
            }

            match self.parse_candidate() {
                Candidate::Complete { event, consumed } => {
                    self.buffer.drain(..consumed);
                    events.push(event);
                }
                Candidate::Incomplete if self.buffer.len() <= self.max_candidate_bytes => break,
                Candidate::Incomplete | Candidate::Invalid => {
                    self.open = None;
                    self.buffer.drain(..1);
                    push_text(&mut events, "<");
                }
            }
        }
        events
    }

    /// End of stream: whatever is still buffered is text.
    pub fn finish(&mut self) -> Vec<ExtractEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            tracing::debug!(
                bytes = self.buffer.len(),
                "Flushing incomplete tag candidate as text"
            );
            let text = std::mem::take(&mut self.buffer);
            push_text(&mut events, &text);
        }
        self.open = None;
        events
    }

    fn accepts(&self, name: &str) -> bool {
        REASONING_TAGS.contains(&name)
            || self
                .tool_names
                .as_ref()
                .map_or(true, |names| names.contains(name))
    }

    /// Parse the candidate at the start of the buffer, which begins with `<`.
    ///
    /// Once the opening tag has parsed, later calls only search the bytes added since.
    fn parse_candidate(&mut self) -> Candidate {
        let open = match self.open.take() {
            Some(open) => open,
            None => match self.parse_header() {
                Header::Done(candidate) => return candidate,
                Header::Open(open) => open,
            },
        };
        let candidate = scan_body(&self.buffer, &open);
        if matches!(candidate, Candidate::Incomplete) {
            self.open = Some(OpenTag {
                scanned: self.buffer.len(),
                ..open
            });
        }
        candidate
    }

    fn parse_header(&self) -> Header {
        let buf = self.buffer.as_str();
        let b = buf.as_bytes();
        let len = b.len();

        let name_start = 1;
        let mut i = scan_identifier(b, name_start);
        if i == len {
            return Header::Done(Candidate::Incomplete);
        }
        if i == name_start || !is_tag_boundary(b[i]) {
            return Header::Done(Candidate::Invalid);
        }
        let name = &buf[name_start..i];
        if !self.accepts(name) {
            return Header::Done(Candidate::Invalid);
        }
        let reasoning = REASONING_TAGS.contains(&name);

        let mut attributes = Vec::new();
        loop {
            i = skip_whitespace(b, i);
            if i == len {
                return Header::Done(Candidate::Incomplete);
            }
            match b[i] {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    if i + 1 == len {
                        return Header::Done(Candidate::Incomplete);
                    }
                    if b[i + 1] != b'>' || reasoning {
                        return Header::Done(Candidate::Invalid);
                    }
                    return Header::Done(Candidate::Complete {
                        event: ExtractEvent::ToolCall(ToolCallRecord {
                            name: name.to_string(),
                            attributes,
                            body: None,
                        }),
                        consumed: i + 2,
                    });
                }
                _ if reasoning => return Header::Done(Candidate::Invalid),
                _ => {}
            }

            let key_start = i;
            i = scan_identifier(b, key_start);
            if i == len {
                return Header::Done(Candidate::Incomplete);
            }
            if i == key_start {
                return Header::Done(Candidate::Invalid);
            }
            let key = &buf[key_start..i];

            i = skip_whitespace(b, i);
            if i == len {
                return Header::Done(Candidate::Incomplete);
            }
            if b[i] != b'=' {
                return Header::Done(Candidate::Invalid);
            }
            i = skip_whitespace(b, i + 1);
            if i == len {
                return Header::Done(Candidate::Incomplete);
            }
            let quote = b[i];
            if quote != b'"' && quote != b'\'' {
                return Header::Done(Candidate::Invalid);
            }
            let value_start = i + 1;
            let Some(rel_end) = b[value_start..].iter().position(|&c| c == quote) else {
                return Header::Done(Candidate::Incomplete);
            };
            let value_end = value_start + rel_end;
            i = value_end + 1;
            if i == len {
                return Header::Done(Candidate::Incomplete);
            }
            if !is_tag_boundary(b[i]) {
                return Header::Done(Candidate::Invalid);
            }
            attributes.push((key.to_string(), buf[value_start..value_end].to_string()));
        }

        Header::Open(OpenTag {
            name: name.to_string(),
            attributes,
            reasoning,
            body_start: i,
            scanned: i,
        })
    }
}

/// Search for the closing tag of `open`, starting just before the bytes not yet scanned.
fn scan_body(buf: &str, open: &OpenTag) -> Candidate {
    let close = format!("</{}>", open.name);
    let mut from = open.scanned.saturating_sub(close.len()).max(open.body_start);
    while !buf.is_char_boundary(from) {
        from -= 1;
    }
    let rest = &buf[from..];
    match rest.find(&close) {
        Some(rel) => {
            let end = from + rel;
            if contains_opening(&buf[from..end], &open.name) {
                return Candidate::Invalid;
            }
            let body = &buf[open.body_start..end];
            let event = if open.reasoning {
                ExtractEvent::Reasoning(body.to_string())
            } else {
                ExtractEvent::ToolCall(ToolCallRecord {
                    name: open.name.clone(),
                    attributes: open.attributes.clone(),
                    body: Some(body.to_string()),
                })
            };
            Candidate::Complete {
                event,
                consumed: end + close.len(),
            }
        }
        None if contains_opening(rest, &open.name) => Candidate::Invalid,
        None => Candidate::Incomplete,
    }
}

fn push_text(events: &mut Vec<ExtractEvent>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(ExtractEvent::Text(last)) = events.last_mut() {
        last.push_str(text);
    } else {
        events.push(ExtractEvent::Text(text.to_string()));
    }
}

fn scan_identifier(b: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < b.len() {
        let c = b[i];
        let ok = if i == start {
            c.is_ascii_alphabetic() || c == b'_'
        } else {
            c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
        };
        if !ok {
            break;
        }
        i += 1;
    }
    i
}

fn skip_whitespace(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn is_tag_boundary(c: u8) -> bool {
    c.is_ascii_whitespace() || c == b'>' || c == b'/'
}

/// Whether `text` contains a complete opening marker for another `<name` tag.
fn contains_opening(text: &str, name: &str) -> bool {
    let marker = format!("<{name}");
    let b = text.as_bytes();
    text.match_indices(&marker)
        .any(|(at, _)| b.get(at + marker.len()).is_some_and(|&c| is_tag_boundary(c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed_all(extractor: &mut TagExtractor, deltas: &[&str]) -> Vec<ExtractEvent> {
        let mut events = Vec::new();
        let batches = deltas
            .iter()
            .map(|delta| extractor.feed(delta))
            .collect::<Vec<_>>()
            .into_iter()
            .chain(std::iter::once(extractor.finish()));
        for event in batches.flatten() {
            match event {
                ExtractEvent::Text(text) => push_text(&mut events, &text),
                other => events.push(other),
            }
        }
        events
    }

    fn call(name: &str, attrs: &[(&str, &str)], body: Option<&str>) -> ExtractEvent {
        ExtractEvent::ToolCall(ToolCallRecord {
            name: name.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.map(str::to_string),
        })
    }

    #[test]
    fn tag_split_across_deltas_is_recognized() {
        let mut extractor = TagExtractor::new();
        let events = feed_all(
            &mut extractor,
            &[
                "Sure, I will create the file.\n<ed",
                "it filePath=\"test.txt\" \n",
                "newString=\"Hello World\" oldString=\"\">\n",
                "</edit>",
            ],
        );
        assert_eq!(
            events,
            vec![
                ExtractEvent::Text("Sure, I will create the file.\n".into()),
                call(
                    "edit",
                    &[
                        ("filePath", "test.txt"),
                        ("newString", "Hello World"),
                        ("oldString", "")
                    ],
                    Some("\n")
                ),
            ]
        );
    }

    #[test]
    fn text_before_a_partial_tag_is_released_immediately() {
        let mut extractor = TagExtractor::new();
        assert_eq!(
            extractor.feed("hello <wri"),
            vec![ExtractEvent::Text("hello ".into())]
        );
        assert!(extractor.has_pending());
    }

    #[test]
    fn code_fence_without_tags_is_text() {
        let mut extractor = TagExtractor::with_tool_names(["edit", "write", "bash"]);
        let input = "Here is the code:\n```java\nSystem.out.println(\"Hello\");\n```";
        assert_eq!(
            feed_all(&mut extractor, &[input]),
            vec![ExtractEvent::Text(input.into())]
        );
    }

    #[test]
    fn unknown_tags_in_fences_are_text() {
        let mut extractor = TagExtractor::with_tool_names(["edit"]);
        let input = "```html\n<div class=\"x\">hi</div>\n```";
        assert_eq!(
            feed_all(&mut extractor, &[input]),
            vec![ExtractEvent::Text(input.into())]
        );
    }

    #[test]
    fn unclosed_tag_is_flushed_as_text_at_end() {
        let mut extractor = TagExtractor::new();
        let input = "```\n<edit filePath=\"a.txt\" newString=\"x\">\n```";
        assert_eq!(
            feed_all(&mut extractor, &[input]),
            vec![ExtractEvent::Text(input.into())]
        );
    }

    #[test]
    fn nested_tag_invalidates_the_outer_candidate() {
        let mut extractor = TagExtractor::new();
        let events = feed_all(&mut extractor, &["<bash>echo <bash>ls</bash>"]);
        assert_eq!(
            events,
            vec![
                ExtractEvent::Text("<bash>echo ".into()),
                call("bash", &[], Some("ls")),
            ]
        );
    }

    #[test]
    fn self_closing_and_multiple_calls() {
        let mut extractor = TagExtractor::new();
        let events = feed_all(
            &mut extractor,
            &["a <read filePath='x.rs' /> b <bash>ls -la</bash> c"],
        );
        assert_eq!(
            events,
            vec![
                ExtractEvent::Text("a ".into()),
                call("read", &[("filePath", "x.rs")], None),
                ExtractEvent::Text(" b ".into()),
                call("bash", &[], Some("ls -la")),
                ExtractEvent::Text(" c".into()),
            ]
        );
    }

    #[test]
    fn comparisons_and_malformed_attributes_stay_text() {
        let mut extractor = TagExtractor::new();
        let input = "if a < b && c <d and <e x=1> then";
        assert_eq!(
            feed_all(&mut extractor, &[input]),
            vec![ExtractEvent::Text(input.into())]
        );
    }

    #[test]
    fn reasoning_tags_become_reasoning_events() {
        let mut extractor = TagExtractor::with_tool_names(["bash"]);
        let events = feed_all(&mut extractor, &["<thi", "nk>plan it</think>done"]);
        assert_eq!(
            events,
            vec![
                ExtractEvent::Reasoning("plan it".into()),
                ExtractEvent::Text("done".into()),
            ]
        );
    }

    #[test]
    fn oversized_candidate_is_abandoned() {
        let mut extractor = TagExtractor::new().with_max_candidate_bytes(16);
        let events = extractor.feed("<bash>0123456789abcdef");
        assert_eq!(
            events,
            vec![ExtractEvent::Text("<bash>0123456789abcdef".into())]
        );
        assert!(!extractor.has_pending());
    }

    #[test]
    fn long_body_is_scanned_once_per_delta() {
        let mut extractor = TagExtractor::new();
        assert!(extractor.feed("<write filePath=\"big.txt\">").is_empty());
        for _ in 0..1000 {
            assert!(extractor.feed("line é\n").is_empty());
            let open = extractor.open.as_ref().unwrap();
            assert_eq!(open.scanned, extractor.buffer.len());
        }
        let events = extractor.feed("</wri");
        assert!(events.is_empty());
        let events = extractor.feed("te> tail");
        assert_eq!(
            events,
            vec![
                call(
                    "write",
                    &[("filePath", "big.txt")],
                    Some("line é\n".repeat(1000).as_str())
                ),
                ExtractEvent::Text(" tail".into()),
            ]
        );
        assert!(extractor.open.is_none());
    }

    #[test]
    fn nested_opening_split_across_deltas_is_still_caught() {
        let mut extractor = TagExtractor::new();
        let events = feed_all(&mut extractor, &["<bash>echo <ba", "sh", ">ls</bash>"]);
        assert_eq!(
            events,
            vec![
                ExtractEvent::Text("<bash>echo ".into()),
                call("bash", &[], Some("ls")),
            ]
        );
    }

    #[test]
    fn arguments_include_body_under_reserved_key() {
        let record = ToolCallRecord {
            name: "write".into(),
            attributes: vec![("filePath".into(), "a.txt".into())],
            body: Some("content".into()),
        };
        assert_eq!(
            record.arguments(),
            serde_json::json!({"filePath": "a.txt", "body": "content"})
        );
    }
}

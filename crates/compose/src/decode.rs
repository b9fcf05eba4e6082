//! Splitter/decoder for the rendered multi-document stream.
//!
//! The stream is pre-scanned once for `---` separator lines; every
//! segment keeps its first line number so parser locations (which are
//! segment-relative) map straight back to absolute stream lines.

use std::fmt;

use serde_json::Value as Json;
use stencil_core::{Object, ANNOTATION_RESOURCE_NAME};
use tracing::debug;

use crate::limits::{node_budget_exceeded, Limits};
use crate::merge::shape;

const SNIPPET_MAX_CHARS: usize = 80;

/// One decoded document and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub object: Object,
    /// 1-based line in the stream where the document starts.
    pub line: usize,
    /// 1-based ordinal of the `---` segment holding the document.
    pub index: usize,
}

impl RenderedDocument {
    pub fn api_version(&self) -> &str {
        self.object.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Always non-empty: documents without a kind never get past the decoder.
    pub fn kind(&self) -> &str {
        self.object.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        annotation(&self.object, key)
    }
}

fn annotation<'a>(object: &'a Object, key: &str) -> Option<&'a str> {
    object
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_str())
}

/// Position of a decode problem in the original stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Absolute 1-based line.
    pub line: usize,
    /// 1-based document index.
    pub document: usize,
    /// 1-based line within the document.
    pub document_line: usize,
    /// Offending line, trimmed, at most 80 characters plus `...`.
    pub snippet: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} (document {}, line {}) near: '{}'", self.line, self.document, self.document_line, self.snippet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{at}: {reason}")]
    Syntax { at: Location, reason: String },
    #[error("{at}: Object 'Kind' is missing")]
    MissingKind { at: Location },
    #[error("{at}: expected an object, found {found}")]
    NotAnObject { at: Location, found: &'static str },
    #[error(
        "{}: cannot read annotations of {}, Kind={} ({} = {}): {}",
        .at,
        .api_version,
        .kind,
        ANNOTATION_RESOURCE_NAME,
        .name.as_deref().unwrap_or("<unset>"),
        .reason
    )]
    Annotations { at: Location, api_version: String, kind: String, name: Option<String>, reason: String },
    #[error("{at}: document too complex (>{max} nodes)")]
    TooComplex { at: Location, max: usize },
    #[error("rendered manifests too large ({size} > {max} bytes)")]
    TooLarge { size: usize, max: usize },
}

impl DecodeError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            DecodeError::Syntax { at, .. }
            | DecodeError::MissingKind { at }
            | DecodeError::NotAnObject { at, .. }
            | DecodeError::Annotations { at, .. }
            | DecodeError::TooComplex { at, .. } => Some(at),
            DecodeError::TooLarge { .. } => None,
        }
    }
}

/// Decode the whole stream eagerly; the first bad document aborts.
pub fn decode_stream(stream: &str, limits: &Limits) -> Result<Vec<RenderedDocument>, DecodeError> {
    if stream.len() > limits.max_manifest_bytes {
        return Err(DecodeError::TooLarge { size: stream.len(), max: limits.max_manifest_bytes });
    }
    let mut docs = Vec::new();
    for seg in segments(stream) {
        if seg.looks_like_json() {
            decode_json(&seg, limits, &mut docs)?;
        } else {
            let (document_line, value) = parse_yaml(&seg)?;
            admit(&seg, document_line, value, limits, &mut docs)?;
        }
    }
    debug!(documents = docs.len(), bytes = stream.len(), "decoded rendered stream");
    Ok(docs)
}

struct Segment<'a> {
    text: &'a str,
    first_line: usize,
    index: usize,
}

impl Segment<'_> {
    fn looks_like_json(&self) -> bool {
        self.text.trim_start().starts_with(['{', '['])
    }

    fn locate(&self, document_line: usize) -> Location {
        let document_line = document_line.max(1);
        let raw = self.text.lines().nth(document_line - 1).unwrap_or("");
        Location {
            line: self.first_line + document_line - 1,
            document: self.index,
            document_line,
            snippet: snippet(raw),
        }
    }

    /// Segment-relative line of the first non-whitespace byte at or after `from`.
    fn content_line(&self, from: usize) -> usize {
        self.advance(&mut LineCursor::default(), from)
    }

    /// Like `content_line`, but only counts newlines past `cursor`, which
    /// then moves up to the located byte. `from` must not go backwards.
    fn advance(&self, cursor: &mut LineCursor, from: usize) -> usize {
        let bytes = self.text.as_bytes();
        let mut at = from.min(bytes.len()).max(cursor.offset);
        while at < bytes.len() && bytes[at].is_ascii_whitespace() { at += 1; }
        cursor.line += bytes[cursor.offset..at].iter().filter(|&&b| b == b'\n').count();
        cursor.offset = at;
        cursor.line
    }
}

/// Byte offset into a segment and the 1-based line it sits on.
struct LineCursor {
    offset: usize,
    line: usize,
}

impl Default for LineCursor {
    fn default() -> Self {
        Self { offset: 0, line: 1 }
    }
}

fn segments(stream: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut offset = 0usize;
    let mut first_line = 1usize;
    for (i, line) in stream.split_inclusive('\n').enumerate() {
        if is_separator(line) {
            push_segment(&mut out, &stream[start..offset], first_line);
            start = offset + line.len();
            first_line = i + 2;
        }
        offset += line.len();
    }
    push_segment(&mut out, &stream[start..], first_line);
    out
}

fn push_segment<'a>(out: &mut Vec<Segment<'a>>, text: &'a str, first_line: usize) {
    let blank = text.lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with('#')
    });
    if blank { return; }
    let index = out.len() + 1;
    out.push(Segment { text, first_line, index });
}

fn is_separator(line: &str) -> bool {
    match line.strip_prefix("---") {
        Some(rest) => {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        }
        None => false,
    }
}

fn snippet(line: &str) -> String {
    let t = line.trim();
    if t.chars().count() > SNIPPET_MAX_CHARS {
        let cut: String = t.chars().take(SNIPPET_MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        t.to_string()
    }
}

fn decode_json(seg: &Segment<'_>, limits: &Limits, docs: &mut Vec<RenderedDocument>) -> Result<(), DecodeError> {
    let mut stream = serde_json::Deserializer::from_str(seg.text).into_iter::<Json>();
    let mut cursor = LineCursor::default();
    let mut decoded_any = false;
    loop {
        let start = stream.byte_offset();
        match stream.next() {
            None => return Ok(()),
            Some(Ok(value)) => {
                admit(seg, seg.advance(&mut cursor, start), value, limits, docs)?;
                decoded_any = true;
            }
            Some(Err(e)) => {
                // Flow-style YAML (`{kind: A}`) looks like JSON but is not.
                if !decoded_any {
                    if let Ok((document_line, value)) = parse_yaml(seg) {
                        return admit(seg, document_line, value, limits, docs);
                    }
                }
                return Err(DecodeError::Syntax { at: seg.locate(e.line()), reason: e.to_string() });
            }
        }
    }
}

fn parse_yaml(seg: &Segment<'_>) -> Result<(usize, Json), DecodeError> {
    let value: serde_yaml::Value = serde_yaml::from_str(seg.text).map_err(|e| {
        let line = e.location().map(|l| l.line()).unwrap_or_else(|| seg.content_line(0));
        DecodeError::Syntax { at: seg.locate(line), reason: e.to_string() }
    })?;
    let document_line = seg.content_line(0);
    let json = serde_json::to_value(value).map_err(|e| DecodeError::Syntax {
        at: seg.locate(document_line),
        reason: format!("cannot convert YAML to JSON: {e}"),
    })?;
    Ok((document_line, json))
}

fn admit(
    seg: &Segment<'_>,
    document_line: usize,
    value: Json,
    limits: &Limits,
    docs: &mut Vec<RenderedDocument>,
) -> Result<(), DecodeError> {
    if value.is_null() { return Ok(()); }
    if node_budget_exceeded(&value, limits.max_doc_nodes) {
        return Err(DecodeError::TooComplex { at: seg.locate(document_line), max: limits.max_doc_nodes });
    }
    let object = match value {
        Json::Object(o) => o,
        other => return Err(DecodeError::NotAnObject { at: seg.locate(document_line), found: shape(&other) }),
    };
    match object.get("kind").and_then(|k| k.as_str()) {
        Some(k) if !k.is_empty() => {}
        _ => return Err(DecodeError::MissingKind { at: seg.locate(document_line) }),
    }
    if let Err(reason) = check_annotations(&object) {
        return Err(DecodeError::Annotations {
            at: seg.locate(document_line),
            api_version: object.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            kind: object.get("kind").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            name: naming_annotation(&object),
            reason,
        });
    }
    docs.push(RenderedDocument { object, line: seg.first_line + document_line - 1, index: seg.index });
    Ok(())
}

/// Naming annotation as written, even when it is not a string.
fn naming_annotation(object: &Object) -> Option<String> {
    let v = object.get("metadata")?.get("annotations")?.get(ANNOTATION_RESOURCE_NAME)?;
    Some(match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Annotations are read as plain strings later on; anything else must fail here.
fn check_annotations(object: &Object) -> Result<(), String> {
    let annotations = match object.get("metadata").and_then(|m| m.get("annotations")) {
        Some(a) => a,
        None => return Ok(()),
    };
    match annotations {
        Json::Null => Ok(()),
        Json::Object(map) => {
            for (k, v) in map.iter() {
                if !v.is_string() {
                    return Err(format!("annotation {:?} must be a string, found {}", k, shape(v)));
                }
            }
            Ok(())
        }
        other => Err(format!("annotations must be a map of strings, found {}", shape(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(s: &str) -> Result<Vec<RenderedDocument>, DecodeError> {
        decode_stream(s, &Limits::default())
    }

    #[test]
    fn splits_yaml_documents_and_tracks_lines() {
        let s = "apiVersion: v1\nkind: A\n---\n# only a comment\n---\napiVersion: v1\nkind: B\n";
        let docs = decode(s).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!((docs[0].kind(), docs[0].line, docs[0].index), ("A", 1, 1));
        assert_eq!((docs[1].kind(), docs[1].line, docs[1].index), ("B", 6, 2));
    }

    #[test]
    fn empty_and_comment_only_streams_decode_to_nothing() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode("---\n# nothing\n---\n\n").unwrap().is_empty());
    }

    #[test]
    fn concatenated_json_objects_are_separate_documents() {
        let s = "{\"apiVersion\":\"v1\",\"kind\":\"A\"}{\"apiVersion\":\"v1\",\"kind\":\"B\"}\n{\"apiVersion\":\"v1\",\"kind\":\"C\"}";
        let docs = decode(s).unwrap();
        let kinds: Vec<_> = docs.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["A", "B", "C"]);
        assert_eq!(docs[2].line, 2);
        assert!(docs.iter().all(|d| d.index == 1));
    }

    #[test]
    fn flow_yaml_falls_back_from_json() {
        let docs = decode("{apiVersion: v1, kind: A}\n").unwrap();
        assert_eq!(docs[0].kind(), "A");
    }

    #[test]
    fn yaml_syntax_error_reports_stream_and_document_lines() {
        let s = "\n---\napiVersion: example.org/v1\nkind: CD\nmetadata:\n  name: %!@#$%^&*()_+\n";
        let err = decode(s).unwrap_err();
        let at = err.location().unwrap();
        assert_eq!(at.line, 6);
        assert_eq!(at.document, 1);
        assert_eq!(at.document_line, 4);
        assert_eq!(at.snippet, "name: %!@#$%^&*()_+");
        assert!(err.to_string().starts_with("line 6 (document 1, line 4) near: 'name: %!@#$%^&*()_+': "), "{}", err);
    }

    #[test]
    fn error_in_second_document_is_relative_to_its_separator() {
        let s = "apiVersion: v1\nkind: A\n---\napiVersion: v1\nkind: B\nbad: %oops\n";
        let at = decode(s).unwrap_err().location().cloned().unwrap();
        assert_eq!((at.line, at.document, at.document_line), (6, 2, 3));
        assert_eq!(at.snippet, "bad: %oops");
    }

    #[test]
    fn long_offending_lines_are_truncated() {
        let long = "x".repeat(120);
        let s = format!("apiVersion: v1\nkind: A\nbad: %{long}\n");
        let at = decode(&s).unwrap_err().location().cloned().unwrap();
        assert!(at.snippet.ends_with("..."));
        assert_eq!(at.snippet.chars().count(), 83);
        assert!(at.snippet.starts_with("bad: %xxx"));
    }

    #[test]
    fn json_error_after_first_value_keeps_its_line() {
        let s = "{\"apiVersion\":\"v1\",\"kind\":\"A\"}\n{\"apiVersion\": v1}\n";
        let err = decode(s).unwrap_err();
        let at = err.location().unwrap();
        assert!(matches!(err, DecodeError::Syntax { .. }));
        assert_eq!((at.line, at.document, at.document_line), (2, 1, 2));
    }

    #[test]
    fn missing_kind_is_fatal() {
        let err = decode("{\"apiVersion\":\"example.org/v1\"}").unwrap_err();
        assert!(matches!(err, DecodeError::MissingKind { .. }));
        assert!(err.to_string().contains("Object 'Kind' is missing"), "{}", err);
    }

    #[test]
    fn scalar_documents_are_rejected() {
        let err = decode("apiVersion: v1\nkind: A\n---\njust a string\n").unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject { found: "string", .. }), "{:?}", err);
        assert_eq!(err.location().unwrap().document, 2);
    }

    #[test]
    fn non_string_annotation_is_fatal_and_names_the_resource() {
        let s = "apiVersion: example.org/v1\nkind: CD\nmetadata:\n  annotations:\n    gotemplating.fn.crossplane.io/composition-resource-name: cool-cd\n    gotemplating.fn.crossplane.io/ready: true\n";
        let err = decode(s).unwrap_err();
        match &err {
            DecodeError::Annotations { api_version, kind, name, .. } => {
                assert_eq!(api_version, "example.org/v1");
                assert_eq!(kind, "CD");
                assert_eq!(name.as_deref(), Some("cool-cd"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("gotemplating.fn.crossplane.io/ready"), "{}", msg);
        assert!(msg.contains("found bool"), "{}", msg);
    }

    #[test]
    fn oversized_streams_are_rejected_up_front() {
        let limits = Limits { max_manifest_bytes: 8, ..Limits::default() };
        let err = decode_stream("apiVersion: v1\nkind: A\n", &limits).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { size: 23, max: 8 }));
    }

    #[test]
    fn non_string_naming_annotation_is_quoted_in_the_error() {
        let s = format!("apiVersion: example.org/v1\nkind: CD\nmetadata:\n  annotations:\n    {}: 123\n", ANNOTATION_RESOURCE_NAME);
        let err = decode(&s).unwrap_err();
        assert!(matches!(err, DecodeError::Annotations { name: Some(ref n), .. } if n == "123"), "{:?}", err);
        let msg = err.to_string();
        assert!(msg.contains(&format!("({} = 123)", ANNOTATION_RESOURCE_NAME)), "{}", msg);
        assert!(!msg.contains("<unset>"), "{}", msg);
    }

    #[test]
    fn document_at_the_node_limit_is_accepted() {
        // root, apiVersion, kind
        let limits = Limits { max_doc_nodes: 3, ..Limits::default() };
        let docs = decode_stream("apiVersion: v1\nkind: A\n", &limits).unwrap();
        assert_eq!(docs.len(), 1);
        let limits = Limits { max_doc_nodes: 2, ..Limits::default() };
        let err = decode_stream("apiVersion: v1\nkind: A\n", &limits).unwrap_err();
        assert!(err.to_string().ends_with("document too complex (>2 nodes)"), "{}", err);
    }

    #[test]
    fn long_concatenated_json_stream_keeps_line_numbers() {
        let mut s = String::new();
        for i in 0..500 {
            s.push_str(&format!("{{\"apiVersion\":\"v1\",\"kind\":\"K{}\"}}\n\n", i));
        }
        let docs = decode(&s).unwrap();
        assert_eq!(docs.len(), 500);
        assert_eq!(docs[0].line, 1);
        assert_eq!(docs[1].line, 3);
        assert_eq!(docs[499].line, 999);
        assert_eq!(docs[499].kind(), "K499");
    }

    #[test]
    fn overly_complex_documents_are_rejected() {
        let limits = Limits { max_doc_nodes: 3, ..Limits::default() };
        let err = decode_stream("apiVersion: v1\nkind: A\nspec: {a: 1}\n", &limits).unwrap_err();
        assert!(matches!(err, DecodeError::TooComplex { max: 3, .. }));
    }
}

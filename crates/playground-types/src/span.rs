//! Span records decoded from a traced program's output

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Attributes = BTreeMap<String, Value>;

/// One observed unit of work, carrying its ancestor chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentSpan>,
    /// Start time in nanoseconds since the epoch
    pub start_time: u64,
    /// Absent while the span is still running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Span {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        start_time: u64,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            name: name.into(),
            parent: None,
            start_time,
            end_time: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<ParentSpan>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn ended(mut self, end_time: u64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.span_id())
    }
}

/// A span whose origin lies outside the observed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub sampled: bool,
}

impl ExternalSpan {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            sampled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParentSpan {
    Span(Box<Span>),
    External(ExternalSpan),
}

impl ParentSpan {
    pub fn span_id(&self) -> &str {
        match self {
            ParentSpan::Span(span) => &span.span_id,
            ParentSpan::External(ext) => &ext.span_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            ParentSpan::Span(span) => &span.trace_id,
            ParentSpan::External(ext) => &ext.trace_id,
        }
    }
}

impl From<Span> for ParentSpan {
    fn from(span: Span) -> Self {
        ParentSpan::Span(Box::new(span))
    }
}

impl From<ExternalSpan> for ParentSpan {
    fn from(ext: ExternalSpan) -> Self {
        ParentSpan::External(ext)
    }
}

/// A named occurrence attached to an existing span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    pub start_time: u64,
    #[serde(default)]
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        start_time: u64,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            name: name.into(),
            start_time,
            attributes: Attributes::new(),
        }
    }
}

/// A single record on the trace stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceMessage {
    Span(Span),
    SpanEvent(SpanEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_message_wire_format() {
        let line = r#"{"type":"span","traceId":"t1","spanId":"b","name":"child","startTime":5,
            "parent":{"type":"external","traceId":"t1","spanId":"a"}}"#;
        let msg: TraceMessage = serde_json::from_str(line).unwrap();

        match msg {
            TraceMessage::Span(span) => {
                assert_eq!(span.parent_id(), Some("a"));
                assert!(span.end_time.is_none());
                assert!(matches!(span.parent, Some(ParentSpan::External(_))));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_span_event_wire_format() {
        let line = r#"{"type":"span_event","traceId":"t1","spanId":"b","name":"log","startTime":7,
            "attributes":{"level":"info"}}"#;
        let msg: TraceMessage = serde_json::from_str(line).unwrap();
        let TraceMessage::SpanEvent(event) = msg else {
            panic!("expected span event");
        };
        assert_eq!(event.attributes["level"], "info");
    }
}

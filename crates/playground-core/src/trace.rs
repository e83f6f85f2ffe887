//! Trace tree builder
//!
//! Folds an unordered stream of span notifications and span events into a
//! forest of call trees. Each `(trace_id, span_id)` pair appears at most once;
//! a repeated notification refreshes the existing node in place and keeps its
//! children and events.

use crate::store::Cell;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use playground_types::{Attributes, ParentSpan, Span, SpanEvent, TraceMessage};
use serde::Serialize;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_LINE_LENGTH: usize = 1 << 20;

/// Timing and attributes of a span observed in full
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanDetail {
    pub name: String,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub attributes: Attributes,
}

impl From<&Span> for SpanDetail {
    fn from(span: &Span) -> Self {
        Self {
            name: span.name.clone(),
            start_time: span.start_time,
            end_time: span.end_time,
            attributes: span.attributes.clone(),
        }
    }
}

/// Event attached to a span
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub name: String,
    pub time: u64,
    pub attributes: Attributes,
}

/// One node of the trace forest.
///
/// `detail` is `None` for a span that originated outside the observed process
/// and has only been seen as somebody's parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanNode {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
    pub detail: Option<SpanDetail>,
    pub children: Vec<SpanNode>,
    pub events: Vec<TraceEvent>,
}

impl SpanNode {
    fn external(trace_id: &str, span_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_id: None,
            detail: None,
            children: Vec::new(),
            events: Vec::new(),
        }
    }

    fn from_span(span: &Span) -> Self {
        Self {
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_id: span.parent_id().map(str::to_string),
            detail: Some(SpanDetail::from(span)),
            children: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_external(&self) -> bool {
        self.detail.is_none()
    }

    pub fn name(&self) -> &str {
        self.detail
            .as_ref()
            .map(|d| d.name.as_str())
            .unwrap_or("<external>")
    }

    /// Duration in the span's own time unit, once it has ended
    pub fn duration(&self) -> Option<u64> {
        let detail = self.detail.as_ref()?;
        detail
            .end_time
            .map(|end| end.saturating_sub(detail.start_time))
    }

    fn matches(&self, trace_id: &str, span_id: &str) -> bool {
        self.trace_id == trace_id && self.span_id == span_id
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(SpanNode::count).sum::<usize>()
    }
}

/// Location of a node: child indices starting from the root set
type NodePath = Vec<usize>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceForest {
    roots: Vec<SpanNode>,
}

impl TraceForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a forest from JSON lines, skipping anything that is not a record
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut forest = Self::new();
        for message in lines.into_iter().filter_map(decode_line) {
            forest.apply(message);
        }
        forest
    }

    pub fn roots(&self) -> &[SpanNode] {
        &self.roots
    }

    /// Roots belonging to one trace, in arrival order
    pub fn trace(&self, trace_id: &str) -> impl Iterator<Item = &SpanNode> {
        let trace_id = trace_id.to_string();
        self.roots.iter().filter(move |r| r.trace_id == trace_id)
    }

    pub fn find(&self, trace_id: &str, span_id: &str) -> Option<&SpanNode> {
        let path = self.locate(trace_id, span_id)?;
        self.node_at(&path)
    }

    /// Total number of nodes in the forest
    pub fn len(&self) -> usize {
        self.roots.iter().map(SpanNode::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn apply(&mut self, message: TraceMessage) {
        match message {
            TraceMessage::Span(span) => {
                self.apply_span(&span);
            }
            TraceMessage::SpanEvent(event) => self.apply_event(event),
        }
    }

    /// Insert or refresh `span`, creating its ancestors first
    fn apply_span(&mut self, span: &Span) -> NodePath {
        if let Some(parent) = &span.parent {
            self.ensure_parent(parent);
        }

        match self.locate(&span.trace_id, &span.span_id) {
            Some(path) => {
                if let Some(node) = self.node_at_mut(&path) {
                    node.detail = Some(SpanDetail::from(span));
                    if span.parent.is_some() {
                        node.parent_id = span.parent_id().map(str::to_string);
                    }
                }
                match span.parent_id() {
                    Some(parent_id) => self.reparent(path, &span.trace_id, parent_id),
                    None => path,
                }
            }
            None => {
                let node = SpanNode::from_span(span);
                match span.parent_id() {
                    Some(parent_id) => self.attach(node, &span.trace_id, parent_id),
                    None => {
                        self.roots.push(node);
                        vec![self.roots.len() - 1]
                    }
                }
            }
        }
    }

    pub fn apply_event(&mut self, event: SpanEvent) {
        let Some(path) = self.locate(&event.trace_id, &event.span_id) else {
            debug!(
                "Dropping event '{}' for unknown span {}/{}",
                event.name, event.trace_id, event.span_id
            );
            return;
        };
        if let Some(node) = self.node_at_mut(&path) {
            node.events.push(TraceEvent {
                name: event.name,
                time: event.start_time,
                attributes: event.attributes,
            });
        }
    }

    fn ensure_parent(&mut self, parent: &ParentSpan) {
        match parent {
            ParentSpan::Span(span) => {
                self.apply_span(span);
            }
            ParentSpan::External(external) => {
                // A placeholder never replaces what is already known
                if self
                    .locate(&external.trace_id, &external.span_id)
                    .is_none()
                {
                    self.roots
                        .push(SpanNode::external(&external.trace_id, &external.span_id));
                }
            }
        }
    }

    /// Append a new node under its parent, which must already exist
    fn attach(&mut self, node: SpanNode, trace_id: &str, parent_id: &str) -> NodePath {
        match self.locate(trace_id, parent_id) {
            Some(mut parent_path) => {
                if let Some(parent) = self.node_at_mut(&parent_path) {
                    parent.children.push(node);
                    parent_path.push(parent.children.len() - 1);
                    return parent_path;
                }
                parent_path
            }
            None => {
                self.roots.push(node);
                vec![self.roots.len() - 1]
            }
        }
    }

    /// Move the node at `path` under `parent_id` unless it is already there
    fn reparent(&mut self, path: NodePath, trace_id: &str, parent_id: &str) -> NodePath {
        let Some(parent_path) = self.locate(trace_id, parent_id) else {
            return path;
        };
        let already_attached = path.len() == parent_path.len() + 1 && path.starts_with(&parent_path);
        // Never move a node below its own descendant
        if already_attached || parent_path.starts_with(&path) {
            return path;
        }

        let Some(node) = self.detach(&path) else {
            return path;
        };
        let key = (node.trace_id.clone(), node.span_id.clone());
        self.attach(node, trace_id, parent_id);
        self.locate(&key.0, &key.1).unwrap_or_default()
    }

    fn detach(&mut self, path: &[usize]) -> Option<SpanNode> {
        let (last, parent) = path.split_last()?;
        let siblings = if parent.is_empty() {
            &mut self.roots
        } else {
            &mut self.node_at_mut(parent)?.children
        };
        (*last < siblings.len()).then(|| siblings.remove(*last))
    }

    fn locate(&self, trace_id: &str, span_id: &str) -> Option<NodePath> {
        fn walk(nodes: &[SpanNode], trace_id: &str, span_id: &str, path: &mut NodePath) -> bool {
            for (i, node) in nodes.iter().enumerate() {
                path.push(i);
                if node.matches(trace_id, span_id) || walk(&node.children, trace_id, span_id, path)
                {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        walk(&self.roots, trace_id, span_id, &mut path).then_some(path)
    }

    fn node_at(&self, path: &[usize]) -> Option<&SpanNode> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.roots.get(*first)?, |node, i| node.children.get(*i))
    }

    fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut SpanNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get_mut(*first)?;
        for i in rest {
            node = node.children.get_mut(*i)?;
        }
        Some(node)
    }
}

/// Parse one line of process output as a trace record
pub fn decode_line(line: &str) -> Option<TraceMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Fold trace records found in `output` into `forest` until the stream ends
/// or `cancel` fires. Lines that are not trace records are ignored.
pub async fn collect(
    output: BoxStream<'static, Bytes>,
    forest: Cell<TraceForest>,
    cancel: CancellationToken,
) {
    let reader = StreamReader::new(output.map(Ok::<_, std::io::Error>));
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next() => line,
        };
        match line {
            Some(Ok(line)) => {
                if let Some(message) = decode_line(&line) {
                    forest.update(|current| {
                        let mut next = current.clone();
                        next.apply(message);
                        next
                    });
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("Skipping trace line longer than {} bytes", MAX_LINE_LENGTH);
            }
            Some(Err(LinesCodecError::Io(e))) => {
                warn!("Trace stream failed: {}", e);
                break;
            }
            None => break,
        }
    }
    debug!("Trace collector stopped");
}

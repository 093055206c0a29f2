use serde::Serialize;

/// What kind of diagnostic an annotation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AnnotationKind {
    /// Declared Length field disagrees with the captured bytes.
    MalformedLength,
    /// A sub-field's declared size exceeds the bytes that remain.
    ValueOverflow,
    /// Direction-scoped identifier repeated: retransmission.
    Retransmission,
    /// MD5-Challenge / LEAP security advisory.
    InsecureMethod,
    /// Reassembled length differs from the length the first fragment declared.
    ReassemblyMismatch,
    /// A reassembly limit was hit and bytes were not kept.
    ReassemblyLimit,
    /// Bytes that could not be decoded into anything meaningful.
    Undecoded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl AnnotationKind {
    pub fn severity(self) -> Severity {
        match self {
            AnnotationKind::Retransmission => Severity::Note,
            AnnotationKind::InsecureMethod | AnnotationKind::Undecoded | AnnotationKind::ReassemblyLimit => {
                Severity::Warning
            }
            AnnotationKind::MalformedLength
            | AnnotationKind::ValueOverflow
            | AnnotationKind::ReassemblyMismatch => Severity::Error,
        }
    }
}

/// Non-fatal diagnostic attached to the field it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub severity: Severity,
    pub message: String,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, message: impl Into<String>) -> Self {
        Annotation {
            kind,
            severity: kind.severity(),
            message: message.into(),
        }
    }
}

/// One node of the annotated parse tree produced per frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtoNode {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProtoNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl ProtoNode {
    pub fn new(label: impl Into<String>) -> Self {
        ProtoNode {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn field(label: impl Into<String>, value: impl ToString) -> Self {
        ProtoNode {
            label: label.into(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    /// A byte field rendered as a bounded hex preview plus its length.
    pub fn bytes(label: impl Into<String>, data: &[u8]) -> Self {
        ProtoNode::field(label, hex_preview(data))
    }

    pub fn push(&mut self, child: ProtoNode) -> &mut ProtoNode {
        self.children.push(child);
        // Just pushed, never empty.
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn with(mut self, child: ProtoNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn annotate(&mut self, kind: AnnotationKind, message: impl Into<String>) {
        self.annotations.push(Annotation::new(kind, message));
    }

    pub fn annotated(mut self, kind: AnnotationKind, message: impl Into<String>) -> Self {
        self.annotate(kind, message);
        self
    }

    /// Depth-first walk over every annotation in this subtree.
    pub fn all_annotations(&self) -> Vec<&Annotation> {
        let mut out = Vec::new();
        self.collect_annotations(&mut out);
        out
    }

    fn collect_annotations<'a>(&'a self, out: &mut Vec<&'a Annotation>) {
        out.extend(self.annotations.iter());
        for child in &self.children {
            child.collect_annotations(out);
        }
    }

    /// Find the first node with the given label (depth-first).
    pub fn find(&self, label: &str) -> Option<&ProtoNode> {
        if self.label == label {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(label))
    }

    /// Indented multi-line rendering used by the text formatter and the TUI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        match &self.value {
            Some(v) => out.push_str(&format!("{}{}: {}\n", pad, self.label, v)),
            None => out.push_str(&format!("{}{}\n", pad, self.label)),
        }
        for a in &self.annotations {
            out.push_str(&format!("{}  [{:?}] {}\n", pad, a.severity, a.message));
        }
        for child in &self.children {
            child.render_into(out, indent + 1);
        }
    }
}

const PREVIEW_BYTES: usize = 16;

/// `0a0b0c... (N bytes)`; at most 16 bytes are spelled out.
pub fn hex_preview(data: &[u8]) -> String {
    let shown: String = data
        .iter()
        .take(PREVIEW_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect();
    if data.len() > PREVIEW_BYTES {
        format!("{}... ({} bytes)", shown, data.len())
    } else {
        format!("{} ({} bytes)", shown, data.len())
    }
}

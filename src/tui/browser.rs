use crate::dissect::methods::BuiltinDecoders;
use crate::dissect::{FrameInput, FrameReport, dissect_frame};
use crate::protocol::CarriedEap;
use crate::session::CaptureSession;

/// One EAP-carrying frame of the capture.
pub struct BrowsedFrame {
    pub frame: u32,
    pub carried: CarriedEap,
}

pub struct FrameRow {
    pub frame: u32,
    pub carriage: &'static str,
    pub src: String,
    pub dst: String,
    pub info: String,
}

impl FrameRow {
    fn new(frame: &BrowsedFrame, report: &FrameReport) -> Self {
        FrameRow {
            frame: frame.frame,
            carriage: frame.carried.carriage.name(),
            src: frame.carried.src.clone(),
            dst: frame.carried.dst.clone(),
            info: row_info(report),
        }
    }
}

fn row_info(report: &FrameReport) -> String {
    let mut parts = Vec::new();
    match report.code {
        Some(code) => parts.push(code.to_string()),
        None => parts.push("Malformed".to_string()),
    }
    if let Some(id) = report.identifier {
        parts.push(format!("id={}", id));
    }
    if let Some(t) = report.method {
        parts.push(crate::eap::type_name(t));
    }
    if let Some(slot) = report.fragment {
        parts.push(format!("frag {}:{}", slot.reassembly_id, slot.sequence));
    }
    if report.reassembled.is_some() {
        parts.push("reassembled".to_string());
    }
    if report.retransmission {
        parts.push("RETX".to_string());
    }
    parts.join(" ")
}

/// Owns the capture session behind the TUI. Frames are dissected once in
/// order when the browser is built; every selection afterwards goes through
/// the replay path.
pub struct FrameBrowser {
    session: CaptureSession,
    decoders: BuiltinDecoders,
    frames: Vec<BrowsedFrame>,
    rows: Vec<FrameRow>,
    replays: u64,
}

impl FrameBrowser {
    pub fn new(frames: Vec<BrowsedFrame>) -> Self {
        let mut session = CaptureSession::new();
        let mut decoders = BuiltinDecoders::new();
        let rows = frames
            .iter()
            .map(|f| {
                let report = dissect(&mut session, &mut decoders, f, false);
                FrameRow::new(f, &report)
            })
            .collect();
        FrameBrowser {
            session,
            decoders,
            frames,
            rows,
            replays: 0,
        }
    }

    pub fn rows(&self) -> &[FrameRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Re-dissect frame `index`; returns its headline and rendered tree.
    pub fn detail(&mut self, index: usize) -> Option<(String, String)> {
        let frame = self.frames.get(index)?;
        let report = dissect(&mut self.session, &mut self.decoders, frame, true);
        self.replays += 1;
        let identity = report
            .conversation
            .and_then(|id| self.session.conversations.get(id))
            .and_then(|c| c.identity.clone());
        let mut header = format!(
            "#{} {} {} -> {}  {}",
            frame.frame,
            frame.carried.carriage.name(),
            frame.carried.src,
            frame.carried.dst,
            row_info(&report)
        );
        if let Some(identity) = identity {
            header.push_str(&format!(" [{}]", identity));
        }
        let mut body = report.tree.render();
        if let Some(message) = &report.reassembled {
            body.push('\n');
            body.push_str(&crate::output::hex_dump(&message.bytes));
        }
        Some((header, body))
    }

    pub fn replays(&self) -> u64 {
        self.replays
    }

    pub fn conversations(&self) -> usize {
        self.session.conversations.len()
    }

    pub fn incomplete_reassemblies(&self) -> usize {
        self.session.incomplete_reassemblies().len()
    }
}

fn dissect(
    session: &mut CaptureSession,
    decoders: &mut BuiltinDecoders,
    frame: &BrowsedFrame,
    visited: bool,
) -> FrameReport {
    dissect_frame(
        session,
        decoders,
        &FrameInput {
            frame: frame.frame,
            key: frame.carried.key,
            visited,
            depth: 0,
            eap: &frame.carried.eap,
        },
    )
}

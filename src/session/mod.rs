//! State owned by one capture-processing session.

pub mod conversation;
pub mod decision;

use serde::Serialize;

use crate::reassembly::{FragmentReassembler, IncompleteReassembly};
use conversation::{ConversationRegistry, ConversationState};
use decision::FrameDecisionCache;

/// Whether frames will be presented again after their first visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Traversal {
    /// Capture files: a first pass, then any number of replays.
    #[default]
    Replayable,
    /// Live capture: every frame is seen once, so nothing is kept for replay.
    SinglePass,
}

/// Created when a capture is opened and dropped with it. Every call into the
/// engine takes it by `&mut`; nothing is process-wide.
#[derive(Default)]
pub struct CaptureSession {
    pub conversations: ConversationRegistry,
    pub decisions: FrameDecisionCache,
    pub reassembler: FragmentReassembler,
    pub(crate) traversal: Traversal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub conversations: Vec<ConversationState>,
    pub incomplete_reassemblies: Vec<IncompleteReassembly>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for a live capture. Decisions, completed messages and
    /// rendered trees are dropped as soon as their frame is done.
    pub fn single_pass() -> Self {
        CaptureSession {
            reassembler: FragmentReassembler::with_traversal(Traversal::SinglePass),
            traversal: Traversal::SinglePass,
            ..Default::default()
        }
    }

    pub fn traversal(&self) -> Traversal {
        self.traversal
    }

    pub fn incomplete_reassemblies(&self) -> Vec<IncompleteReassembly> {
        self.reassembler.incomplete()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            conversations: self.conversations.iter().cloned().collect(),
            incomplete_reassemblies: self.incomplete_reassemblies(),
        }
    }
}

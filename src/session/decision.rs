use std::collections::HashMap;

use thiserror::Error;
use tracing::error;

use crate::leap::LeapState;
use crate::reassembly::FragmentSlot;
use crate::session::conversation::ConversationId;

/// Everything a frame's first visit decided, replayed verbatim afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDecision {
    pub conversation: ConversationId,
    pub retransmission: bool,
    /// Slot assigned to this frame's tunnel fragment.
    pub fragment: Option<FragmentSlot>,
    /// LEAP state after this frame.
    pub leap: Option<LeapState>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("decision for frame {frame} at depth {depth} already recorded")]
    AlreadyRecorded { frame: u32, depth: u32 },
}

/// Write-once map from (frame, depth) to its decision.
#[derive(Default)]
pub struct FrameDecisionCache {
    records: HashMap<(u32, u32), FrameDecision>,
}

impl FrameDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, frame: u32, depth: u32) -> Option<&FrameDecision> {
        self.records.get(&(frame, depth))
    }

    /// Record a decision. A second put for the same key is a consistency
    /// fault: it is logged, the first record is kept and an error returned.
    pub fn put(&mut self, frame: u32, depth: u32, decision: FrameDecision) -> Result<(), DecisionError> {
        if self.records.contains_key(&(frame, depth)) {
            error!(frame, depth, "frame decision recorded twice; keeping the first");
            return Err(DecisionError::AlreadyRecorded { frame, depth });
        }
        self.records.insert((frame, depth), decision);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

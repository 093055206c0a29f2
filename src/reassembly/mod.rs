use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::session::Traversal;
use crate::session::conversation::{ConversationState, ReassemblyCursor};

/// Bounds on what the reassembler holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyLimits {
    /// Reassemblies that have not completed yet, abandoned ones included.
    pub max_open: usize,
    /// Bytes kept per reassembly; the rest of a fragment is dropped.
    pub max_message_bytes: usize,
}

impl Default for ReassemblyLimits {
    fn default() -> Self {
        ReassemblyLimits {
            max_open: 10_000,
            max_message_bytes: 1_048_576, // 1 MB per message
        }
    }
}

/// Identifies one reassembly: the frame that opened it, at its tunnel depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReassemblyId {
    pub frame: u32,
    pub depth: u32,
}

impl std::fmt::Display for ReassemblyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.depth == 0 {
            write!(f, "#{}", self.frame)
        } else {
            write!(f, "#{}/{}", self.frame, self.depth)
        }
    }
}

/// Where one frame's fragment sits inside a reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FragmentSlot {
    pub reassembly_id: ReassemblyId,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FragmentInfo {
    pub sequence: u32,
    pub frame: u32,
    /// Bytes kept.
    pub len: usize,
    /// Bytes past `max_message_bytes`.
    pub dropped: usize,
}

/// All fragments of one reassembly, concatenated in sequence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReassembledMessage {
    pub reassembly_id: ReassemblyId,
    /// Frame carrying the terminal fragment.
    pub completed_in: u32,
    /// Total length announced by the first fragment, if any.
    pub declared_length: Option<u32>,
    pub fragments: Vec<FragmentInfo>,
    /// Fragment bytes left out once `max_message_bytes` was reached.
    pub dropped_bytes: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ReassembledMessage {
    /// `Some((declared, actual))` when the announced total was not met.
    pub fn length_mismatch(&self) -> Option<(u32, usize)> {
        match self.declared_length {
            Some(declared) if declared as usize != self.bytes.len() => Some((declared, self.bytes.len())),
            _ => None,
        }
    }
}

/// A reassembly that never saw its terminal fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteReassembly {
    pub reassembly_id: ReassemblyId,
    pub declared_length: Option<u32>,
    pub fragments: Vec<FragmentInfo>,
}

struct Fragment {
    frame: u32,
    data: Vec<u8>,
    dropped: usize,
}

#[derive(Default)]
struct Reassembly {
    declared_length: Option<u32>,
    fragments: BTreeMap<u32, Fragment>,
    stored: usize,
    completed: Option<Arc<ReassembledMessage>>,
}

impl Reassembly {
    fn fragment_list(&self) -> Vec<FragmentInfo> {
        self.fragments
            .iter()
            .map(|(seq, f)| FragmentInfo {
                sequence: *seq,
                frame: f.frame,
                len: f.data.len(),
                dropped: f.dropped,
            })
            .collect()
    }
}

/// Collects sequenced tunnel fragments and yields the reconstructed payload
/// once the fragment without the more-fragments flag arrives.
#[derive(Default)]
pub struct FragmentReassembler {
    reassemblies: HashMap<ReassemblyId, Reassembly>,
    /// Opened by `begin` and not completed.
    open: HashSet<ReassemblyId>,
    /// First fragments turned away because `max_open` was reached.
    refused: HashSet<ReassemblyId>,
    limits: ReassemblyLimits,
    traversal: Traversal,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ReassemblyLimits) -> Self {
        FragmentReassembler {
            limits,
            ..Default::default()
        }
    }

    /// Single-pass reassemblers hand a finished message out once and forget it.
    pub fn with_traversal(traversal: Traversal) -> Self {
        FragmentReassembler {
            traversal,
            ..Default::default()
        }
    }

    pub fn limits(&self) -> ReassemblyLimits {
        self.limits
    }

    /// Open a reassembly on `conversation`, anchored at `first_frame`.
    /// The first fragment gets sequence 0.
    ///
    /// Returns `None` when `max_open` reassemblies are already unfinished;
    /// the refusal is remembered so a replay of `first_frame` can report it.
    pub fn begin(
        &mut self,
        conversation: &mut ConversationState,
        first_frame: u32,
        declared_length: Option<u32>,
    ) -> Option<FragmentSlot> {
        if let Some(open) = conversation.reassembly.take() {
            warn!(
                conversation = %conversation.id,
                reassembly = %open.reassembly_id,
                "abandoning open reassembly"
            );
        }
        let reassembly_id = ReassemblyId {
            frame: first_frame,
            depth: conversation.depth,
        };
        if self.open.len() >= self.limits.max_open {
            warn!(
                conversation = %conversation.id,
                reassembly = %reassembly_id,
                max_open = self.limits.max_open,
                "reassembly table full, fragment decoded on its own"
            );
            if self.traversal == Traversal::Replayable {
                self.refused.insert(reassembly_id);
            }
            return None;
        }

        self.reassemblies.insert(
            reassembly_id,
            Reassembly {
                declared_length,
                ..Default::default()
            },
        );
        self.open.insert(reassembly_id);
        conversation.reassembly = Some(ReassemblyCursor {
            reassembly_id,
            sequence: 0,
        });
        debug!(conversation = %conversation.id, reassembly = %reassembly_id, ?declared_length, "reassembly begins");
        Some(FragmentSlot {
            reassembly_id,
            sequence: 0,
        })
    }

    /// Whether the reassembly that `id` would have opened was refused.
    pub fn refused(&self, id: ReassemblyId) -> bool {
        self.refused.contains(&id)
    }

    /// Next slot of the reassembly already open on `conversation`.
    pub fn continue_reassembly(&self, conversation: &mut ConversationState) -> Option<FragmentSlot> {
        let cursor = conversation.reassembly.as_mut()?;
        cursor.sequence += 1;
        Some(FragmentSlot {
            reassembly_id: cursor.reassembly_id,
            sequence: cursor.sequence,
        })
    }

    /// Forget the open reassembly; its fragments stay listed as incomplete.
    pub fn reset(&self, conversation: &mut ConversationState) {
        if let Some(open) = conversation.reassembly.take() {
            warn!(
                conversation = %conversation.id,
                reassembly = %open.reassembly_id,
                last_sequence = open.sequence,
                "reassembly abandoned by tunnel restart"
            );
        }
    }

    /// Mark the reassembly on `conversation` as finished.
    pub fn close(&self, conversation: &mut ConversationState) {
        conversation.reassembly = None;
    }

    /// Store a fragment. When `more_fragments` is false the message is
    /// assembled from every fragment in sequence order and returned.
    ///
    /// Replays are safe: a slot already filled keeps its first bytes and a
    /// finished reassembly hands back the same message for its terminal frame.
    pub fn add_fragment(
        &mut self,
        slot: FragmentSlot,
        frame: u32,
        bytes: &[u8],
        more_fragments: bool,
    ) -> Option<Arc<ReassembledMessage>> {
        let max_bytes = self.limits.max_message_bytes;
        let reassembly = self.reassemblies.entry(slot.reassembly_id).or_default();

        if let Some(done) = &reassembly.completed {
            return (!more_fragments && done.completed_in == frame).then(|| done.clone());
        }

        if !reassembly.fragments.contains_key(&slot.sequence) {
            let kept = bytes.len().min(max_bytes.saturating_sub(reassembly.stored));
            if kept < bytes.len() {
                warn!(
                    reassembly = %slot.reassembly_id,
                    frame,
                    max_bytes,
                    dropped = bytes.len() - kept,
                    "reassembly size limit reached"
                );
            }
            reassembly.stored += kept;
            reassembly.fragments.insert(
                slot.sequence,
                Fragment {
                    frame,
                    data: bytes[..kept].to_vec(),
                    dropped: bytes.len() - kept,
                },
            );
        }

        if more_fragments {
            return None;
        }

        let mut payload = Vec::with_capacity(reassembly.stored);
        for fragment in reassembly.fragments.values() {
            payload.extend_from_slice(&fragment.data);
        }

        let message = Arc::new(ReassembledMessage {
            reassembly_id: slot.reassembly_id,
            completed_in: frame,
            declared_length: reassembly.declared_length,
            fragments: reassembly.fragment_list(),
            dropped_bytes: reassembly.fragments.values().map(|f| f.dropped).sum(),
            bytes: payload,
        });
        debug!(
            reassembly = %slot.reassembly_id,
            frame,
            fragments = message.fragments.len(),
            bytes = message.bytes.len(),
            "reassembly complete"
        );
        self.open.remove(&slot.reassembly_id);
        match self.traversal {
            Traversal::Replayable => {
                // Fragment bytes now live in the message.
                for fragment in reassembly.fragments.values_mut() {
                    fragment.data = Vec::new();
                }
                reassembly.completed = Some(message.clone());
            }
            Traversal::SinglePass => {
                self.reassemblies.remove(&slot.reassembly_id);
            }
        }
        Some(message)
    }

    /// Bytes of the fragment in `slot` that the size limit left out, while
    /// its reassembly is still held.
    pub fn dropped(&self, slot: FragmentSlot) -> usize {
        self.reassemblies
            .get(&slot.reassembly_id)
            .and_then(|r| r.fragments.get(&slot.sequence))
            .map_or(0, |f| f.dropped)
    }

    /// Reassemblies that never completed, ordered by opening frame.
    pub fn incomplete(&self) -> Vec<IncompleteReassembly> {
        let mut out: Vec<IncompleteReassembly> = self
            .reassemblies
            .iter()
            .filter(|(_, r)| r.completed.is_none())
            .map(|(id, r)| IncompleteReassembly {
                reassembly_id: *id,
                declared_length: r.declared_length,
                fragments: r.fragment_list(),
            })
            .collect();
        out.sort_by_key(|r| r.reassembly_id);
        out
    }
}

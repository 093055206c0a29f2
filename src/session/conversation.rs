use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::eap::EapCode;
use crate::leap::LeapState;
use crate::protocol::ConversationKey;
use crate::reassembly::ReassemblyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConversationId(pub u32);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conv{}", self.0)
    }
}

/// Position of the reassembly currently open on a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReassemblyCursor {
    pub reassembly_id: ReassemblyId,
    /// Sequence number of the last fragment seen.
    pub sequence: u32,
}

/// Mutable per-session state, one per logical EAP conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationState {
    pub id: ConversationId,
    pub key: ConversationKey,
    pub depth: u32,
    pub first_frame: u32,
    /// `None` when no reassembly is in progress.
    pub reassembly: Option<ReassemblyCursor>,
    pub leap_state: LeapState,
    /// `None` until the first frame of that direction (outside 0..=255).
    pub last_request_id: Option<u8>,
    pub last_response_id: Option<u8>,
    /// First Identity Response seen on the conversation.
    pub identity: Option<String>,
    /// Last authentication method other than Identity/Notification/Nak.
    pub method: Option<u8>,
    /// Success or Failure, once observed.
    pub outcome: Option<EapCode>,
    pub frames: u32,
}

impl ConversationState {
    fn new(id: ConversationId, key: ConversationKey, depth: u32, first_frame: u32) -> Self {
        ConversationState {
            id,
            key,
            depth,
            first_frame,
            reassembly: None,
            leap_state: LeapState::NotStarted,
            last_request_id: None,
            last_response_id: None,
            identity: None,
            method: None,
            outcome: None,
            frames: 0,
        }
    }

    /// Sequence number of the last fragment of the open reassembly.
    pub fn reassembly_sequence(&self) -> Option<u32> {
        self.reassembly.map(|c| c.sequence)
    }
}

/// What the caller knows about the frame asking for a conversation.
#[derive(Debug, Clone, Copy)]
pub struct FrameHint {
    pub frame: u32,
    /// Request/Identity seen on a first visit: always opens a new conversation.
    pub initiating: bool,
}

/// Maps (key, depth) to the conversation currently live on it.
#[derive(Default)]
pub struct ConversationRegistry {
    states: Vec<ConversationState>,
    current: HashMap<(ConversationKey, u32), ConversationId>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the conversation for `key` at `depth`, creating one on a miss
    /// or when `hint.initiating` says a new authentication starts here.
    pub fn get_or_create(&mut self, key: &ConversationKey, depth: u32, hint: FrameHint) -> ConversationId {
        if !hint.initiating
            && let Some(id) = self.current.get(&(*key, depth))
        {
            return *id;
        }

        let id = ConversationId(self.states.len() as u32);
        let previous = self.current.insert((*key, depth), id);
        self.states.push(ConversationState::new(id, *key, depth, hint.frame));

        match previous {
            Some(old) => debug!(
                frame = hint.frame,
                depth,
                %key,
                "{} supersedes {} (new authentication)",
                id,
                old
            ),
            None => debug!(frame = hint.frame, depth, %key, "{} created", id),
        }
        id
    }

    pub fn get(&self, id: ConversationId) -> Option<&ConversationState> {
        self.states.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: ConversationId) -> Option<&mut ConversationState> {
        self.states.get_mut(id.0 as usize)
    }

    /// All conversations in creation order, superseded ones included.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

//! Cisco LEAP: a fixed four-step exchange with no sub-type field, so each
//! frame's meaning comes from its position in the cycle.

use serde::Serialize;

use crate::dissect::tree::{AnnotationKind, ProtoNode};
use crate::sanitize::printable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum LeapState {
    #[default]
    NotStarted,
    PeerChallenge,
    PeerResponse,
    ApChallenge,
    ApResponse,
}

/// How the data bytes of one LEAP frame are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LeapInterpretation {
    PeerChallenge,
    PeerResponse,
    ApChallenge,
    ApResponse,
    /// Position unknown (frames missing from the capture).
    Raw,
}

impl LeapState {
    /// One step along the cycle. After `ApResponse` the next exchange starts
    /// over at `PeerChallenge`.
    pub fn advance(self) -> (LeapState, LeapInterpretation) {
        let next = match self {
            LeapState::NotStarted => LeapState::PeerChallenge,
            LeapState::PeerChallenge => LeapState::PeerResponse,
            LeapState::PeerResponse => LeapState::ApChallenge,
            LeapState::ApChallenge => LeapState::ApResponse,
            LeapState::ApResponse => LeapState::PeerChallenge,
        };
        (next, next.interpretation())
    }

    pub fn interpretation(self) -> LeapInterpretation {
        match self {
            LeapState::NotStarted => LeapInterpretation::Raw,
            LeapState::PeerChallenge => LeapInterpretation::PeerChallenge,
            LeapState::PeerResponse => LeapInterpretation::PeerResponse,
            LeapState::ApChallenge => LeapInterpretation::ApChallenge,
            LeapState::ApResponse => LeapInterpretation::ApResponse,
        }
    }

    /// Numeric position: -1 when not started, else 1..=4.
    pub fn position(self) -> i8 {
        match self {
            LeapState::NotStarted => -1,
            LeapState::PeerChallenge => 1,
            LeapState::PeerResponse => 2,
            LeapState::ApChallenge => 3,
            LeapState::ApResponse => 4,
        }
    }
}

impl LeapInterpretation {
    pub fn label(self) -> &'static str {
        match self {
            LeapInterpretation::PeerChallenge => "Peer Challenge",
            LeapInterpretation::PeerResponse => "Peer Response",
            LeapInterpretation::ApChallenge => "AP Challenge",
            LeapInterpretation::ApResponse => "AP Response",
            LeapInterpretation::Raw => "Data",
        }
    }
}

/// LEAP data: version, reserved, count, `count` bytes of challenge or
/// response, then the user name.
pub fn decode(data: &[u8], interpretation: LeapInterpretation) -> ProtoNode {
    let mut node = ProtoNode::new(format!("LEAP ({})", interpretation.label()));
    if data.len() < 3 {
        node.push(ProtoNode::bytes("Data", data))
            .annotate(AnnotationKind::Undecoded, "LEAP header needs 3 bytes");
        return node;
    }
    node.push(ProtoNode::field("Version", data[0]));
    node.push(ProtoNode::field("Reserved", data[1]));
    let count = data[2] as usize;
    node.push(ProtoNode::field("Count", count));

    let rest = &data[3..];
    let available = count.min(rest.len());
    let (value, name) = rest.split_at(available);
    let value_node = node.push(ProtoNode::bytes(interpretation.label(), value));
    if count > rest.len() {
        value_node.annotate(
            AnnotationKind::ValueOverflow,
            format!("count {} exceeds the {} bytes remaining", count, rest.len()),
        );
    }
    if !name.is_empty() {
        node.push(ProtoNode::field("Name", printable(name)));
    }
    node
}

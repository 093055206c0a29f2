//! Retransmission heuristic: EAP runs lock-step, so the identifier changes on
//! every new exchange and a repeat in the same direction is a resend.

use tracing::debug;

use crate::eap::Direction;
use crate::session::conversation::ConversationState;

/// Compare `identifier` with the last one seen in `direction`. A repeat is a
/// duplicate and leaves state untouched; anything else is recorded.
///
/// Only call this on a frame's first visit.
pub fn is_duplicate(conversation: &mut ConversationState, direction: Direction, identifier: u8) -> bool {
    let last = match direction {
        Direction::Request => &mut conversation.last_request_id,
        Direction::Response => &mut conversation.last_response_id,
    };
    if *last == Some(identifier) {
        debug!(conversation = %conversation.id, ?direction, identifier, "retransmission");
        return true;
    }
    *last = Some(identifier);
    false
}

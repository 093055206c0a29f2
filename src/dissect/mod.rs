//! Per-frame entry point of the reconstruction engine.
//!
//! A frame is processed in one of three modes:
//!
//! - first visit: conversation lookup, retransmission check, reassembly and
//!   LEAP bookkeeping run and their outcome is stored in the decision cache;
//! - replay: a stored decision exists and is used as is, nothing advances;
//! - missing context: the frame was visited before but has no decision, so
//!   stateful method data is skipped rather than guessed.

pub mod methods;
pub mod tree;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::eap::{Direction, EapCode, EapError, EapHeader, EapType, TunnelFlags, TunnelMethod};
use crate::leap::{self, LeapState};
use crate::protocol::ConversationKey;
use crate::reassembly::{FragmentReassembler, FragmentSlot, ReassembledMessage, ReassemblyId};
use crate::retransmit;
use crate::sanitize::printable;
use crate::session::{CaptureSession, Traversal};
use crate::session::conversation::{ConversationId, ConversationState, FrameHint};
use crate::session::decision::FrameDecision;
use crate::tls::TlsSessionContext;
use methods::SubDissectors;
use tree::{AnnotationKind, ProtoNode};

/// One EAP message as handed over by the carriage layer.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub frame: u32,
    /// Already normalized by the carriage adapter.
    pub key: ConversationKey,
    /// Whether this frame has been presented before.
    pub visited: bool,
    pub depth: u32,
    pub eap: &'a [u8],
}

/// Everything the engine produced for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub frame: u32,
    pub depth: u32,
    pub conversation: Option<ConversationId>,
    pub code: Option<EapCode>,
    pub identifier: Option<u8>,
    /// Raw method type byte.
    pub method: Option<u8>,
    pub retransmission: bool,
    pub fragment: Option<FragmentSlot>,
    #[serde(skip)]
    pub reassembled: Option<Arc<ReassembledMessage>>,
    pub leap: Option<LeapState>,
    pub tree: ProtoNode,
}

impl FrameReport {
    fn new(input: &FrameInput<'_>) -> Self {
        FrameReport {
            frame: input.frame,
            depth: input.depth,
            conversation: None,
            code: None,
            identifier: None,
            method: None,
            retransmission: false,
            fragment: None,
            reassembled: None,
            leap: None,
            tree: ProtoNode::new("Extensible Authentication Protocol"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Visit {
    First,
    Replay(FrameDecision),
    MissingContext,
}

/// Everything the method paths need about the current frame.
struct Frame<'s, 'a> {
    input: &'a FrameInput<'a>,
    header: EapHeader,
    visit: Visit,
    retransmission: bool,
    /// Known on first visits and replays.
    conversation_id: Option<ConversationId>,
    /// Live conversation state, first visits only.
    conversation: Option<&'s mut ConversationState>,
    reassembler: &'s mut FragmentReassembler,
}

/// Decisions made while routing the method data.
#[derive(Default)]
struct Routed {
    fragment: Option<FragmentSlot>,
    reassembled: Option<Arc<ReassembledMessage>>,
    leap: Option<LeapState>,
}

/// Dissect one frame. Never fails: problems become annotations on the tree.
pub fn dissect_frame(
    session: &mut CaptureSession,
    decoders: &mut dyn SubDissectors,
    input: &FrameInput<'_>,
) -> FrameReport {
    let mut report = FrameReport::new(input);

    let header = match EapHeader::parse(input.eap) {
        Ok(h) => h,
        Err(e) => {
            let kind = match e {
                EapError::PacketTooShort { .. } => AnnotationKind::MalformedLength,
                EapError::InvalidCode(_) => AnnotationKind::Undecoded,
            };
            report
                .tree
                .push(ProtoNode::bytes("Data", input.eap))
                .annotate(kind, e.to_string());
            return report;
        }
    };
    report.code = Some(header.code);
    report.identifier = Some(header.identifier);
    if !is_erp(header.code) {
        report.method = header.type_byte;
    }
    push_header(&mut report.tree, &header, input.eap.len());

    let CaptureSession {
        conversations,
        decisions,
        reassembler,
        traversal,
    } = session;

    let visit = match decisions.get(input.frame, input.depth) {
        Some(decision) => Visit::Replay(*decision),
        None if input.visited => Visit::MissingContext,
        None => Visit::First,
    };

    let mut conversation = None;
    let retransmission = match visit {
        Visit::First => {
            let hint = FrameHint {
                frame: input.frame,
                initiating: header.is_initiating(),
            };
            let id = conversations.get_or_create(&input.key, input.depth, hint);
            report.conversation = Some(id);
            match conversations.get_mut(id) {
                Some(state) => {
                    state.frames += 1;
                    let duplicate = header
                        .code
                        .direction()
                        .is_some_and(|d| retransmit::is_duplicate(state, d, header.identifier));
                    if !duplicate {
                        record_bookkeeping(state, &header, input.eap);
                    }
                    conversation = Some(state);
                    duplicate
                }
                None => false,
            }
        }
        Visit::Replay(decision) => {
            report.conversation = Some(decision.conversation);
            decision.retransmission
        }
        Visit::MissingContext => false,
    };
    report.retransmission = retransmission;
    if retransmission {
        report.tree.annotate(
            AnnotationKind::Retransmission,
            format!("retransmission of identifier {}", header.identifier),
        );
    }

    let mut frame = Frame {
        input,
        header,
        visit,
        retransmission,
        conversation_id: report.conversation,
        conversation,
        reassembler,
    };
    let routed = route_method(&mut frame, decoders, &mut report.tree);

    if let Visit::First = visit
        && *traversal == Traversal::Replayable
        && let Some(conversation) = report.conversation
    {
        let decision = FrameDecision {
            conversation,
            retransmission,
            fragment: routed.fragment,
            leap: routed.leap,
        };
        // A fault here is logged by the cache; the frame is still reported.
        let _ = decisions.put(input.frame, input.depth, decision);
    }

    report.fragment = routed.fragment;
    report.reassembled = routed.reassembled;
    report.leap = routed.leap;
    report
}

fn is_erp(code: EapCode) -> bool {
    matches!(code, EapCode::Initiate | EapCode::Finish)
}

fn push_header(tree: &mut ProtoNode, header: &EapHeader, captured: usize) {
    tree.push(ProtoNode::field("Code", format!("{} ({})", header.code, header.code.as_u8())));
    tree.push(ProtoNode::field("Identifier", header.identifier));
    let length = tree.push(ProtoNode::field("Length", header.declared_length));
    if let Some((declared, captured)) = header.length_mismatch(captured) {
        length.annotate(
            AnnotationKind::MalformedLength,
            format!(
                "Length {} disagrees with the {} bytes captured; using {}",
                declared, captured, header.effective_length
            ),
        );
    }
}

/// Identity, outcome and method seen on the conversation, first visits only.
fn record_bookkeeping(state: &mut ConversationState, header: &EapHeader, bytes: &[u8]) {
    match header.code {
        EapCode::Success => state.outcome = Some(EapCode::Success),
        EapCode::Failure => {
            state.outcome = Some(EapCode::Failure);
            if state.leap_state != LeapState::NotStarted {
                debug!(conversation = %state.id, "LEAP exchange reset by Failure");
            }
            state.leap_state = LeapState::NotStarted;
        }
        EapCode::Response if header.method() == Some(EapType::Identity) => {
            if state.identity.is_none() {
                state.identity = Some(printable(header.type_data(bytes)));
            }
        }
        _ => {}
    }
    if let (EapCode::Request | EapCode::Response, Some(t)) = (header.code, header.type_byte)
        && !matches!(t, 1..=3)
    {
        state.method = Some(t);
    }
}

/// Method Dispatcher: pure routing on the type byte.
fn route_method(frame: &mut Frame<'_, '_>, decoders: &mut dyn SubDissectors, tree: &mut ProtoNode) -> Routed {
    let header = frame.header;
    let data = header.type_data(frame.input.eap);

    if is_erp(header.code) {
        if let Some(t) = header.type_byte {
            tree.push(decode_erp(t, data));
        }
        return Routed::default();
    }
    let Some(type_byte) = header.type_byte else {
        return Routed::default();
    };

    let method = EapType::from_u8(type_byte);
    let name = match method {
        Some(m) => m.name().to_string(),
        None => format!("Unknown ({})", type_byte),
    };
    let type_node = tree.push(ProtoNode::field("Type", format!("{} ({})", name, type_byte)));
    if method.is_some_and(EapType::is_insecure) {
        type_node.annotate(
            AnnotationKind::InsecureMethod,
            format!("{} offers no protection against offline dictionary attacks", name),
        );
    }

    match method {
        Some(m) => match m.tunnel() {
            Some(tunnel) => route_tunnel(frame, decoders, tree, tunnel, data),
            None if m == EapType::Leap => route_leap(frame, tree, data),
            None if m == EapType::Ikev2 => {
                tree.push(decode_eap_ikev2(decoders, data));
                Routed::default()
            }
            None => {
                tree.push(decoders.decode_method(m, data, header.code, header.identifier));
                Routed::default()
            }
        },
        None => {
            tree.push(ProtoNode::bytes("Type-Data", data));
            Routed::default()
        }
    }
}

fn route_leap(frame: &mut Frame<'_, '_>, tree: &mut ProtoNode, data: &[u8]) -> Routed {
    let state = match (frame.visit, frame.conversation.as_deref_mut()) {
        (Visit::First, Some(conversation)) => {
            if frame.retransmission {
                conversation.leap_state
            } else {
                let (next, _) = conversation.leap_state.advance();
                debug!(
                    conversation = %conversation.id,
                    frame = frame.input.frame,
                    from = ?conversation.leap_state,
                    to = ?next,
                    "LEAP advance"
                );
                conversation.leap_state = next;
                next
            }
        }
        (Visit::Replay(decision), _) => decision.leap.unwrap_or_default(),
        _ => {
            tree.push(ProtoNode::field(
                "LEAP Data",
                format!("{} bytes, no conversation context", data.len()),
            ));
            return Routed::default();
        }
    };

    // A resend is read the way the frame it repeats was.
    tree.push(leap::decode(data, state.interpretation()));
    Routed {
        leap: Some(state),
        ..Default::default()
    }
}

/// Flags, optional message length, optional TEAP outer TLV length, then TLS.
fn route_tunnel(
    frame: &mut Frame<'_, '_>,
    decoders: &mut dyn SubDissectors,
    tree: &mut ProtoNode,
    tunnel: TunnelMethod,
    data: &[u8],
) -> Routed {
    let mut node = ProtoNode::new(tunnel.eap_type().name());
    let Some((&flag_byte, mut rest)) = data.split_first() else {
        node.annotate(AnnotationKind::Undecoded, "missing flags byte");
        tree.push(node);
        return Routed::default();
    };
    let flags = TunnelFlags::from_u8(flag_byte);
    node.push(ProtoNode::field("Flags", flags.describe(tunnel)));

    let mut message_length = None;
    if flags.length_included() {
        match take_u32(rest) {
            Some((len, tail)) => {
                node.push(ProtoNode::field("TLS Message Length", len));
                message_length = Some(len);
                rest = tail;
            }
            None => {
                node.push(ProtoNode::bytes("TLS Message Length", rest))
                    .annotate(AnnotationKind::MalformedLength, "length field needs 4 bytes");
                rest = &[];
            }
        }
    }

    let mut outer_tlvs: &[u8] = &[];
    if tunnel == TunnelMethod::Teap && flags.outer_tlv_length() {
        match take_u32(rest) {
            Some((outer_len, tail)) => {
                let field = node.push(ProtoNode::field("Outer TLV Length", outer_len));
                let outer_len = outer_len as usize;
                if outer_len > tail.len() {
                    field.annotate(
                        AnnotationKind::ValueOverflow,
                        format!("Outer TLV Length {} exceeds the {} bytes remaining", outer_len, tail.len()),
                    );
                }
                let (tls, outer) = tail.split_at(tail.len() - outer_len.min(tail.len()));
                rest = tls;
                outer_tlvs = outer;
            }
            None => {
                node.push(ProtoNode::bytes("Outer TLV Length", rest))
                    .annotate(AnnotationKind::MalformedLength, "length field needs 4 bytes");
                rest = &[];
            }
        }
    }
    let payload = rest;

    let routed = match frame.visit {
        Visit::MissingContext => {
            if !payload.is_empty() {
                node.push(ProtoNode::field(
                    "Tunnel Data",
                    format!("{} bytes, no conversation context", payload.len()),
                ));
            }
            Routed::default()
        }
        _ if frame.retransmission => {
            if !payload.is_empty() {
                node.push(ProtoNode::bytes("Retransmitted Data", payload));
            }
            Routed::default()
        }
        _ => tunnel_payload(frame, decoders, &mut node, tunnel, flags, message_length, payload),
    };

    if !outer_tlvs.is_empty() {
        node.push(decode_outer_tlvs(outer_tlvs));
    }
    tree.push(node);
    routed
}

fn tunnel_payload(
    frame: &mut Frame<'_, '_>,
    decoders: &mut dyn SubDissectors,
    node: &mut ProtoNode,
    tunnel: TunnelMethod,
    flags: TunnelFlags,
    message_length: Option<u32>,
    payload: &[u8],
) -> Routed {
    let frame_no = frame.input.frame;
    let mut refused = false;
    let slot = match (frame.visit, frame.conversation.as_deref_mut()) {
        (Visit::First, Some(conversation)) => {
            if flags.start() {
                frame.reassembler.reset(conversation);
                decoders.tunnel_restarted(conversation.id);
            }
            if payload.is_empty() {
                None
            } else if conversation.reassembly.is_some() {
                frame.reassembler.continue_reassembly(conversation)
            } else if flags.more_fragments() && message_length.is_some() {
                let slot = frame.reassembler.begin(conversation, frame_no, message_length);
                refused = slot.is_none();
                slot
            } else {
                None
            }
        }
        (Visit::Replay(decision), _) => {
            let would_open = ReassemblyId {
                frame: frame_no,
                depth: frame.input.depth,
            };
            refused = decision.fragment.is_none() && frame.reassembler.refused(would_open);
            decision.fragment
        }
        _ => None,
    };

    let ctx = TlsSessionContext {
        conversation: frame.conversation_id,
        depth: frame.input.depth,
        frame: frame_no,
        direction: frame.header.code.direction().unwrap_or(Direction::Request),
        tunnel,
        first_visit: matches!(frame.visit, Visit::First),
    };

    let Some(slot) = slot else {
        if refused {
            node.push(ProtoNode::field("Reassembly", "not started")).annotate(
                AnnotationKind::ReassemblyLimit,
                format!(
                    "{} reassemblies already open; fragment decoded on its own",
                    frame.reassembler.limits().max_open
                ),
            );
        }
        if !payload.is_empty() {
            node.push(decoders.decode_tls_record(payload, &ctx));
        }
        return Routed::default();
    };

    let more = flags.more_fragments();
    let message = frame.reassembler.add_fragment(slot, frame_no, payload, more);
    let dropped = match &message {
        Some(m) => m
            .fragments
            .iter()
            .find(|f| f.sequence == slot.sequence)
            .map_or(0, |f| f.dropped),
        None => frame.reassembler.dropped(slot),
    };
    let fragment = node.push(ProtoNode::field(
        "Fragment",
        format!("{} bytes, sequence {} of reassembly {}", payload.len(), slot.sequence, slot.reassembly_id),
    ));
    if dropped > 0 {
        fragment.annotate(
            AnnotationKind::ReassemblyLimit,
            format!(
                "{} bytes past the {}-byte reassembly limit not kept",
                dropped,
                frame.reassembler.limits().max_message_bytes
            ),
        );
    }

    let Some(message) = message else {
        return Routed {
            fragment: Some(slot),
            ..Default::default()
        };
    };

    if let (Visit::First, Some(conversation)) = (frame.visit, frame.conversation.as_deref_mut()) {
        frame.reassembler.close(conversation);
    }

    let mut reassembled = ProtoNode::field(
        "Reassembled TLS",
        format!("{} bytes in {} fragments", message.bytes.len(), message.fragments.len()),
    );
    for f in &message.fragments {
        reassembled.push(ProtoNode::field(
            format!("Fragment {}", f.sequence),
            format!("frame {}, {} bytes", f.frame, f.len),
        ));
    }
    if let Some((declared, actual)) = message.length_mismatch() {
        reassembled.annotate(
            AnnotationKind::ReassemblyMismatch,
            format!("TLS Message Length {} but {} bytes reassembled", declared, actual),
        );
    }
    if message.dropped_bytes > 0 {
        reassembled.annotate(
            AnnotationKind::ReassemblyLimit,
            format!("{} bytes dropped by the reassembly limit", message.dropped_bytes),
        );
    }
    node.push(reassembled);
    node.push(decoders.decode_tls_record(&message.bytes, &ctx));

    Routed {
        fragment: Some(slot),
        reassembled: Some(message),
        leap: None,
    }
}

fn take_u32(data: &[u8]) -> Option<(u32, &[u8])> {
    let (head, tail) = data.split_first_chunk::<4>()?;
    Some((u32::from_be_bytes(*head), tail))
}

/// TEAP outer TLVs: 2-byte type (top bit mandatory), 2-byte length, value.
fn decode_outer_tlvs(data: &[u8]) -> ProtoNode {
    let mut node = ProtoNode::new("Outer TLVs");
    let mut rest = data;
    while rest.len() >= 4 {
        let raw_type = u16::from_be_bytes([rest[0], rest[1]]);
        let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
        let body = &rest[4..];
        let mut tlv = ProtoNode::new(format!("TLV type {}", raw_type & 0x3fff));
        if raw_type & 0x8000 != 0 {
            tlv.push(ProtoNode::field("Mandatory", "yes"));
        }
        if len > body.len() {
            tlv.push(ProtoNode::bytes("Value", body)).annotate(
                AnnotationKind::ValueOverflow,
                format!("TLV length {} exceeds the {} bytes remaining", len, body.len()),
            );
            node.push(tlv);
            return node;
        }
        tlv.push(ProtoNode::bytes("Value", &body[..len]));
        node.push(tlv);
        rest = &body[len..];
    }
    if !rest.is_empty() {
        node.push(ProtoNode::bytes("Trailing", rest))
            .annotate(AnnotationKind::Undecoded, "partial TLV header");
    }
    node
}

const IKEV2_FLAG_LENGTH: u8 = 0x80;
const IKEV2_FLAG_MORE: u8 = 0x40;
const IKEV2_FLAG_ICV: u8 = 0x20;

/// EAP-IKEv2 (RFC 5106): flags, optional length, IKE message, optional ICV.
fn decode_eap_ikev2(decoders: &mut dyn SubDissectors, data: &[u8]) -> ProtoNode {
    let mut node = ProtoNode::new("EAP-IKEv2");
    let Some((&flags, mut rest)) = data.split_first() else {
        return node;
    };
    let mut names = Vec::new();
    if flags & IKEV2_FLAG_LENGTH != 0 {
        names.push("Length");
    }
    if flags & IKEV2_FLAG_MORE != 0 {
        names.push("More");
    }
    if flags & IKEV2_FLAG_ICV != 0 {
        names.push("ICV");
    }
    node.push(ProtoNode::field("Flags", format!("0x{:02x} [{}]", flags, names.join(" "))));

    if flags & IKEV2_FLAG_LENGTH != 0 {
        match take_u32(rest) {
            Some((len, tail)) => {
                node.push(ProtoNode::field("Message Length", len));
                rest = tail;
            }
            None => {
                node.push(ProtoNode::bytes("Message Length", rest))
                    .annotate(AnnotationKind::MalformedLength, "length field needs 4 bytes");
                return node;
            }
        }
    }
    if rest.is_empty() {
        return node;
    }
    if flags & IKEV2_FLAG_MORE != 0 {
        node.push(ProtoNode::bytes("Fragment", rest));
        return node;
    }

    let (ike, consumed) = decoders.decode_isakmp(rest);
    node.push(ike);
    let trailer = rest.get(consumed..).unwrap_or(&[]);
    if !trailer.is_empty() {
        if flags & IKEV2_FLAG_ICV != 0 {
            node.push(ProtoNode::bytes("Integrity Checksum Data", trailer));
        } else {
            node.push(ProtoNode::bytes("Trailing", trailer))
                .annotate(AnnotationKind::Undecoded, "bytes after the IKE message");
        }
    }
    node
}

/// ERP (RFC 6696) Initiate/Finish: type, flags, sequence, then TLVs.
fn decode_erp(erp_type: u8, data: &[u8]) -> ProtoNode {
    let name = match erp_type {
        1 => "Re-auth-Start",
        2 => "Re-auth",
        _ => "Unknown",
    };
    let mut node = ProtoNode::new("EAP Re-authentication Protocol");
    node.push(ProtoNode::field("Type", format!("{} ({})", name, erp_type)));
    if erp_type == 2 && data.len() >= 3 {
        node.push(ProtoNode::field("Flags", format!("0x{:02x}", data[0])));
        node.push(ProtoNode::field("SEQ", u16::from_be_bytes([data[1], data[2]])));
        if data.len() > 3 {
            node.push(ProtoNode::bytes("TV/TLVs and Authentication Tag", &data[3..]));
        }
    } else if !data.is_empty() {
        node.push(ProtoNode::bytes("Data", data));
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::methods::BuiltinDecoders;
    use crate::protocol::{EndpointAddr, Transport};
    use std::net::{IpAddr, Ipv4Addr};

    fn key() -> ConversationKey {
        ConversationKey::new(
            Transport::Udp,
            EndpointAddr::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            1812,
            EndpointAddr::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            1812,
        )
    }

    fn eap(code: u8, id: u8, body: &[u8]) -> Vec<u8> {
        let mut v = vec![code, id];
        v.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        v.extend_from_slice(body);
        v
    }

    fn run(session: &mut CaptureSession, d: &mut BuiltinDecoders, frame: u32, visited: bool, bytes: &[u8]) -> FrameReport {
        dissect_frame(
            session,
            d,
            &FrameInput {
                frame,
                key: key(),
                visited,
                depth: 0,
                eap: bytes,
            },
        )
    }

    #[test]
    fn identity_recorded() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        run(&mut s, &mut d, 1, false, &eap(1, 1, &[1]));
        let r = run(&mut s, &mut d, 2, false, &eap(2, 1, b"\x01alice"));
        let conv = s.conversations.get(r.conversation.unwrap()).unwrap();
        assert_eq!(conv.identity.as_deref(), Some("alice"));
        assert_eq!(conv.frames, 2);
    }

    #[test]
    fn length_mismatch_annotated() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let mut bytes = eap(2, 1, b"\x01bob");
        bytes[3] = 40;
        let r = run(&mut s, &mut d, 1, false, &bytes);
        let anns = r.tree.all_annotations();
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].kind, AnnotationKind::MalformedLength);
        // Decoding continued with the captured bytes.
        assert_eq!(r.tree.find("Identity").and_then(|n| n.value.as_deref()), Some("bob"));
    }

    #[test]
    fn md5_flagged_insecure() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let mut body = vec![4, 16];
        body.extend_from_slice(&[0; 16]);
        let r = run(&mut s, &mut d, 1, false, &eap(1, 2, &body));
        assert!(
            r.tree
                .all_annotations()
                .iter()
                .any(|a| a.kind == AnnotationKind::InsecureMethod)
        );
    }

    #[test]
    fn short_packet_is_annotated_not_fatal() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let r = run(&mut s, &mut d, 1, false, &[1, 2]);
        assert!(r.code.is_none());
        assert_eq!(r.tree.all_annotations()[0].kind, AnnotationKind::MalformedLength);
        assert!(s.decisions.is_empty());
    }

    #[test]
    fn unknown_type_is_opaque() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let r = run(&mut s, &mut d, 1, false, &eap(1, 2, &[200, 9, 9]));
        assert!(r.tree.find("Type-Data").is_some());
        assert_eq!(r.method, Some(200));
    }

    #[test]
    fn erp_is_not_a_method() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let r = run(&mut s, &mut d, 1, false, &eap(5, 2, &[1, 0]));
        assert_eq!(r.method, None);
        assert!(r.tree.find("EAP Re-authentication Protocol").is_some());
    }

    #[test]
    fn visited_without_decision_skips_tunnel_data() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let body = [13, 0x00, 0x16, 0x03, 0x03, 0x00, 0x00];
        let r = run(&mut s, &mut d, 9, true, &eap(1, 3, &body));
        assert!(r.conversation.is_none());
        assert!(r.tree.find("Tunnel Data").is_some());
        assert!(r.tree.all_annotations().is_empty());
        assert!(s.conversations.is_empty());
    }

    #[test]
    fn teap_outer_tlvs() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        // Start + Outer-TLV-Length, no TLS data, one outer TLV (type 7, 2 bytes).
        let mut body = vec![55, 0x31];
        body.extend_from_slice(&6u32.to_be_bytes());
        body.extend_from_slice(&[0x80, 0x07, 0x00, 0x02, 0xaa, 0xbb]);
        let r = run(&mut s, &mut d, 1, false, &eap(1, 1, &body));
        assert!(r.tree.find("TLV type 7").is_some());
        assert!(r.tree.find("Mandatory").is_some());
        assert!(r.fragment.is_none());
    }

    #[test]
    fn ikev2_icv_after_message() {
        let mut s = CaptureSession::new();
        let mut d = BuiltinDecoders::new();
        let mut ike = vec![0u8; 16];
        ike.extend_from_slice(&[0, 0x20, 34, 0x08, 0, 0, 0, 0]);
        ike.extend_from_slice(&28u32.to_be_bytes());
        let mut body = vec![49, 0x20];
        body.extend_from_slice(&ike);
        body.extend_from_slice(&[0xcc; 12]);
        let r = run(&mut s, &mut d, 1, false, &eap(1, 1, &body));
        assert!(r.tree.find("Internet Key Exchange").is_some());
        assert!(r.tree.find("Integrity Checksum Data").is_some());
    }
}

pub(crate) mod handshake;

use std::collections::HashMap;

use tls_parser::*;

use crate::dissect::tree::{AnnotationKind, ProtoNode};
use crate::eap::{Direction, TunnelMethod};
use crate::session::Traversal;
use crate::session::conversation::ConversationId;

const RECORD_HEADER_LEN: usize = 5;

/// Which EAP conversation a TLS payload belongs to, so records can be tied to
/// one TLS session across frames.
#[derive(Debug, Clone, Copy)]
pub struct TlsSessionContext {
    /// `None` when the frame has no conversation; records are then decoded
    /// against an empty session.
    pub conversation: Option<ConversationId>,
    pub depth: u32,
    pub frame: u32,
    /// Requests come from the authenticator, which is the TLS server.
    pub direction: Direction,
    pub tunnel: TunnelMethod,
    pub first_visit: bool,
}

/// Per-conversation TLS state.
#[derive(Debug, Clone, Default)]
struct TlsSession {
    version: Option<TlsVersion>,
    cipher: Option<TlsCipherSuiteID>,
    /// Whether ChangeCipherSpec has been seen per direction (TLS 1.2).
    client_cipher_active: bool,
    server_cipher_active: bool,
}

impl TlsSession {
    fn cipher_active(&self, from_server: bool) -> bool {
        if from_server {
            self.server_cipher_active
        } else {
            self.client_cipher_active
        }
    }
}

/// Record-level TLS decoder for tunnel payloads.
///
/// One TLS session per EAP conversation, so a new authentication between
/// the same endpoints starts from a clean handshake. Session state advances
/// on first visits only; the tree built for a frame is kept and handed back
/// verbatim on every later visit.
#[derive(Default)]
pub struct TlsDissector {
    sessions: HashMap<ConversationId, TlsSession>,
    rendered: HashMap<(u32, u32), ProtoNode>,
    traversal: Traversal,
}

impl TlsDissector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-pass dissectors keep no rendered trees.
    pub fn with_traversal(traversal: Traversal) -> Self {
        TlsDissector {
            traversal,
            ..Default::default()
        }
    }

    /// The tunnel was restarted (Start flag): the next records open a new
    /// handshake.
    pub fn restart(&mut self, conversation: ConversationId) {
        self.sessions.remove(&conversation);
    }

    pub fn decode(&mut self, data: &[u8], ctx: &TlsSessionContext) -> ProtoNode {
        if let Some(node) = self.rendered.get(&(ctx.frame, ctx.depth)) {
            return node.clone();
        }

        match ctx.conversation {
            Some(id) if ctx.first_visit => {
                let session = self.sessions.entry(id).or_default();
                let node = walk_records(data, session, ctx);
                if self.traversal == Traversal::Replayable {
                    self.rendered.insert((ctx.frame, ctx.depth), node.clone());
                }
                node
            }
            id => {
                // Never seen on a first visit: decode against a scratch copy.
                let mut scratch = id
                    .and_then(|id| self.sessions.get(&id))
                    .cloned()
                    .unwrap_or_default();
                walk_records(data, &mut scratch, ctx)
            }
        }
    }
}

fn walk_records(data: &[u8], session: &mut TlsSession, ctx: &TlsSessionContext) -> ProtoNode {
    let from_server = ctx.direction == Direction::Request;
    let mut root = ProtoNode::new("Transport Layer Security");
    let mut offset = 0;

    while offset < data.len() {
        let remaining = &data[offset..];

        // Validate record type byte (0x14-0x18)
        if !(0x14..=0x18).contains(&remaining[0]) {
            root.push(ProtoNode::bytes("Data", remaining))
                .annotate(AnnotationKind::Undecoded, "not a TLS record");
            break;
        }
        if remaining.len() < RECORD_HEADER_LEN {
            root.push(ProtoNode::bytes("Truncated record header", remaining));
            break;
        }
        let body_len = u16::from_be_bytes([remaining[3], remaining[4]]) as usize;
        let record_len = RECORD_HEADER_LEN + body_len;
        if remaining.len() < record_len {
            root.push(ProtoNode::field(
                "Truncated record",
                format!("{} of {} bytes", remaining.len(), record_len),
            ));
            break;
        }

        let record = &remaining[..record_len];
        match parse_tls_raw_record(record) {
            Ok((_, raw)) => {
                let node = record_node(record, &raw, session, from_server, ctx.tunnel);
                root.push(node);
            }
            Err(_) => {
                root.push(ProtoNode::bytes("Record", record))
                    .annotate(AnnotationKind::Undecoded, "malformed TLS record");
            }
        }
        offset += record_len;
    }

    if let Some(version) = session.version {
        root.push(ProtoNode::field("Session Version", format!("{:?}", version)));
    }
    if let Some(cipher) = session.cipher {
        root.push(ProtoNode::field("Session Cipher", handshake::cipher_name(cipher)));
    }
    root
}

fn record_node(
    record: &[u8],
    raw: &TlsRawRecord<'_>,
    session: &mut TlsSession,
    from_server: bool,
    tunnel: TunnelMethod,
) -> ProtoNode {
    let encrypted = session.cipher_active(from_server);
    let mut node = ProtoNode::new("TLS Record");
    node.push(ProtoNode::field("Content Type", format!("{:?}", raw.hdr.record_type)));
    node.push(ProtoNode::field("Version", format!("{:?}", raw.hdr.version)));
    node.push(ProtoNode::field("Length", raw.hdr.len));

    match raw.hdr.record_type {
        TlsRecordType::ChangeCipherSpec => {
            if from_server {
                session.server_cipher_active = true;
            } else {
                session.client_cipher_active = true;
            }
            node.push(ProtoNode::new("Change Cipher Spec"));
        }
        TlsRecordType::Handshake if !encrypted => {
            let (messages, effects) = handshake::summarize(record, raw.data);
            if effects.version.is_some() {
                session.version = effects.version;
            }
            if effects.cipher.is_some() {
                session.cipher = effects.cipher;
            }
            node.children.extend(messages);
        }
        TlsRecordType::Handshake => {
            node.push(ProtoNode::bytes("Encrypted Handshake Message", raw.data));
        }
        TlsRecordType::Alert if !encrypted && raw.data.len() == 2 => {
            let level = match raw.data[0] {
                1 => "warning",
                2 => "fatal",
                _ => "unknown",
            };
            node.push(ProtoNode::field(
                "Alert",
                format!("{} {:?}", level, TlsAlertDescription(raw.data[1])),
            ));
        }
        TlsRecordType::Alert => {
            node.push(ProtoNode::bytes("Encrypted Alert", raw.data));
        }
        TlsRecordType::ApplicationData => {
            node.push(ProtoNode::bytes(application_label(tunnel), raw.data));
        }
        _ => {
            node.push(ProtoNode::bytes("Record Data", raw.data));
        }
    }
    node
}

/// What the encrypted application data of each tunnel method carries.
fn application_label(tunnel: TunnelMethod) -> &'static str {
    match tunnel {
        TunnelMethod::Tls => "Encrypted Application Data",
        TunnelMethod::Ttls => "Encrypted TTLS AVPs",
        TunnelMethod::Peap => "Encrypted inner EAP (PEAP)",
        TunnelMethod::Fast => "Encrypted EAP-FAST TLVs",
        TunnelMethod::Teap => "Encrypted TEAP TLVs",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(frame: u32, direction: Direction, first_visit: bool) -> TlsSessionContext {
        TlsSessionContext {
            conversation: Some(ConversationId(0)),
            depth: 0,
            frame,
            direction,
            tunnel: TunnelMethod::Peap,
            first_visit,
        }
    }

    fn record(content_type: u8, body: &[u8]) -> Vec<u8> {
        let mut r = vec![content_type, 0x03, 0x03];
        r.extend_from_slice(&(body.len() as u16).to_be_bytes());
        r.extend_from_slice(body);
        r
    }

    #[test]
    fn handshake_after_ccs_is_encrypted() {
        let mut d = TlsDissector::new();
        let mut data = record(0x14, &[1]);
        data.extend(record(0x16, &[0xde; 40]));
        let tree = d.decode(&data, &ctx(1, Direction::Response, true));
        assert!(tree.find("Change Cipher Spec").is_some());
        assert!(tree.find("Encrypted Handshake Message").is_some());
    }

    #[test]
    fn ccs_is_per_direction() {
        let mut d = TlsDissector::new();
        d.decode(&record(0x14, &[1]), &ctx(1, Direction::Response, true));
        let tree = d.decode(&record(0x16, &[14, 0, 0, 0]), &ctx(2, Direction::Request, true));
        assert!(tree.find("Server Hello Done").is_some());
    }

    #[test]
    fn application_data_labelled_by_tunnel() {
        let mut d = TlsDissector::new();
        let tree = d.decode(&record(0x17, &[0; 32]), &ctx(1, Direction::Request, true));
        assert!(tree.find("Encrypted inner EAP (PEAP)").is_some());
    }

    #[test]
    fn replay_returns_first_visit_tree() {
        let mut d = TlsDissector::new();
        let first = d.decode(&record(0x16, &[14, 0, 0, 0]), &ctx(3, Direction::Request, true));
        // Later frames change session state.
        d.decode(&record(0x14, &[1]), &ctx(4, Direction::Request, true));
        let again = d.decode(&record(0x16, &[14, 0, 0, 0]), &ctx(3, Direction::Request, false));
        assert_eq!(first, again);
    }

    #[test]
    fn garbage_is_annotated() {
        let mut d = TlsDissector::new();
        let tree = d.decode(&[0x01, 0x02, 0x03], &ctx(1, Direction::Request, true));
        assert_eq!(tree.all_annotations()[0].kind, AnnotationKind::Undecoded);
    }

    #[test]
    fn truncated_record_not_annotated() {
        let mut d = TlsDissector::new();
        let mut data = record(0x16, &[0; 100]);
        data.truncate(50);
        let tree = d.decode(&data, &ctx(1, Direction::Request, true));
        assert!(tree.find("Truncated record").is_some());
        assert!(tree.all_annotations().is_empty());
    }

    #[test]
    fn new_conversation_starts_in_cleartext() {
        let mut d = TlsDissector::new();
        d.decode(&record(0x14, &[1]), &ctx(1, Direction::Response, true));
        let next = TlsSessionContext {
            conversation: Some(ConversationId(1)),
            ..ctx(2, Direction::Response, true)
        };
        let tree = d.decode(&record(0x16, &[14, 0, 0, 0]), &next);
        assert!(tree.find("Encrypted Handshake Message").is_none());
    }

    #[test]
    fn restart_clears_cipher_state() {
        let mut d = TlsDissector::new();
        d.decode(&record(0x14, &[1]), &ctx(1, Direction::Request, true));
        d.restart(ConversationId(0));
        let tree = d.decode(&record(0x16, &[14, 0, 0, 0]), &ctx(2, Direction::Request, true));
        assert!(tree.find("Server Hello Done").is_some());
    }

    #[test]
    fn single_pass_keeps_no_trees() {
        let mut d = TlsDissector::with_traversal(Traversal::SinglePass);
        d.decode(&record(0x16, &[14, 0, 0, 0]), &ctx(1, Direction::Request, true));
        assert!(d.rendered.is_empty());
        assert_eq!(d.sessions.len(), 1);
    }
}

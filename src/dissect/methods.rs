//! Field decoders for the individual EAP methods.
//!
//! The engine only routes bytes; these are the collaborators it routes to.
//! `SubDissectors` is the seam, `BuiltinDecoders` the stock implementation.

use crate::dissect::tree::{AnnotationKind, ProtoNode};
use crate::eap::{EapCode, EapType, type_name};
use crate::sanitize::printable;
use crate::session::Traversal;
use crate::session::conversation::ConversationId;
use crate::tls::{TlsDissector, TlsSessionContext};

pub trait SubDissectors {
    /// Decode the Type-Data of a fixed-format method.
    fn decode_method(&mut self, method: EapType, data: &[u8], code: EapCode, identifier: u8) -> ProtoNode;

    /// Decode TLS records: one frame's tunnel payload or a reassembled message.
    fn decode_tls_record(&mut self, data: &[u8], ctx: &TlsSessionContext) -> ProtoNode;

    /// A tunnel Start flag was seen on a first visit: drop the conversation's
    /// TLS session.
    fn tunnel_restarted(&mut self, conversation: ConversationId);

    /// Decode an IKEv2 message; returns the tree and the bytes consumed.
    fn decode_isakmp(&mut self, data: &[u8]) -> (ProtoNode, usize);
}

const WFA_VENDOR_ID: u32 = 0x00372A;
const WFA_SIMPLECONFIG: u32 = 1;

#[derive(Default)]
pub struct BuiltinDecoders {
    tls: TlsDissector,
}

impl BuiltinDecoders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single_pass() -> Self {
        BuiltinDecoders {
            tls: TlsDissector::with_traversal(Traversal::SinglePass),
        }
    }
}

impl SubDissectors for BuiltinDecoders {
    fn decode_method(&mut self, method: EapType, data: &[u8], code: EapCode, _identifier: u8) -> ProtoNode {
        match method {
            EapType::Identity => ProtoNode::field("Identity", printable(data)),
            EapType::Notification => ProtoNode::field("Notification", printable(data)),
            EapType::Nak => decode_nak(data),
            EapType::Md5Challenge => decode_md5(data),
            EapType::OneTimePassword | EapType::GenericTokenCard => {
                let label = if code == EapCode::Request { "Prompt" } else { "Response" };
                ProtoNode::new(method.name()).with(ProtoNode::field(label, printable(data)))
            }
            EapType::Expanded => decode_expanded(data),
            _ => ProtoNode::new(method.name()).with(ProtoNode::bytes("Method Data", data)),
        }
    }

    fn decode_tls_record(&mut self, data: &[u8], ctx: &TlsSessionContext) -> ProtoNode {
        self.tls.decode(data, ctx)
    }

    fn tunnel_restarted(&mut self, conversation: ConversationId) {
        self.tls.restart(conversation);
    }

    fn decode_isakmp(&mut self, data: &[u8]) -> (ProtoNode, usize) {
        decode_ike(data)
    }
}

fn decode_nak(data: &[u8]) -> ProtoNode {
    let mut node = ProtoNode::new("Legacy Nak");
    for t in data {
        node.push(ProtoNode::field("Desired Auth Type", format!("{} ({})", type_name(*t), t)));
    }
    if data.is_empty() {
        node.annotate(AnnotationKind::Undecoded, "Nak carries no desired type");
    }
    node
}

/// Value-Size, Value, then an optional name.
fn decode_md5(data: &[u8]) -> ProtoNode {
    let mut node = ProtoNode::new("MD5-Challenge");
    let Some((&size, rest)) = data.split_first() else {
        node.annotate(AnnotationKind::Undecoded, "missing Value-Size");
        return node;
    };
    node.push(ProtoNode::field("Value-Size", size));
    let size = size as usize;
    let (value, name) = rest.split_at(size.min(rest.len()));
    let value_node = node.push(ProtoNode::bytes("Value", value));
    if size > rest.len() {
        value_node.annotate(
            AnnotationKind::ValueOverflow,
            format!("Value-Size {} exceeds the {} bytes remaining", size, rest.len()),
        );
    }
    if !name.is_empty() {
        node.push(ProtoNode::field("Extra Data", printable(name)));
    }
    node
}

/// RFC 3748 expanded type: 3-byte vendor id, 4-byte vendor type.
fn decode_expanded(data: &[u8]) -> ProtoNode {
    let mut node = ProtoNode::new("Expanded Type");
    if data.len() < 7 {
        node.push(ProtoNode::bytes("Data", data))
            .annotate(AnnotationKind::Undecoded, "expanded type header needs 7 bytes");
        return node;
    }
    let vendor_id = u32::from_be_bytes([0, data[0], data[1], data[2]]);
    let vendor_type = u32::from_be_bytes([data[3], data[4], data[5], data[6]]);
    node.push(ProtoNode::field("Vendor-Id", format!("0x{:06x}", vendor_id)));
    node.push(ProtoNode::field("Vendor-Type", vendor_type));
    let body = &data[7..];
    if vendor_id == WFA_VENDOR_ID && vendor_type == WFA_SIMPLECONFIG {
        node.label = "Expanded Type (Wi-Fi Simple Configuration)".to_string();
        if let Some((&opcode, rest)) = body.split_first() {
            node.push(ProtoNode::field("WSC Op-Code", wsc_opcode(opcode)));
            node.push(ProtoNode::bytes("WSC Data", rest));
        }
    } else {
        node.push(ProtoNode::bytes("Vendor Data", body));
    }
    node
}

fn wsc_opcode(opcode: u8) -> String {
    let name = match opcode {
        0x01 => "WSC_Start",
        0x02 => "WSC_ACK",
        0x03 => "WSC_NACK",
        0x04 => "WSC_MSG",
        0x05 => "WSC_Done",
        0x06 => "WSC_FRAG_ACK",
        _ => "Unknown",
    };
    format!("{} (0x{:02x})", name, opcode)
}

const IKE_HEADER_LEN: usize = 28;
const IKE_GENERIC_PAYLOAD_HEADER_LEN: usize = 4;

fn ike_payload_name(kind: u8) -> &'static str {
    match kind {
        33 => "Security Association",
        34 => "Key Exchange",
        35 => "Identification - Initiator",
        36 => "Identification - Responder",
        37 => "Certificate",
        38 => "Certificate Request",
        39 => "Authentication",
        40 => "Nonce",
        41 => "Notify",
        42 => "Delete",
        43 => "Vendor ID",
        46 => "Encrypted and Authenticated",
        48 => "EAP",
        _ => "Unknown Payload",
    }
}

/// IKEv2 header (RFC 7296 §3.1) and its chain of generic payloads.
fn decode_ike(data: &[u8]) -> (ProtoNode, usize) {
    let mut node = ProtoNode::new("Internet Key Exchange");
    if data.len() < IKE_HEADER_LEN {
        node.push(ProtoNode::bytes("Data", data))
            .annotate(AnnotationKind::Undecoded, "IKE header needs 28 bytes");
        return (node, data.len());
    }
    node.push(ProtoNode::bytes("Initiator SPI", &data[0..8]));
    node.push(ProtoNode::bytes("Responder SPI", &data[8..16]));
    let mut next = data[16];
    node.push(ProtoNode::field("Version", format!("{}.{}", data[17] >> 4, data[17] & 0x0f)));
    node.push(ProtoNode::field("Exchange Type", data[18]));
    node.push(ProtoNode::field("Flags", format!("0x{:02x}", data[19])));
    node.push(ProtoNode::field(
        "Message ID",
        u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
    ));
    let declared = u32::from_be_bytes([data[24], data[25], data[26], data[27]]) as usize;
    let length = node.push(ProtoNode::field("Length", declared));
    let end = if declared < IKE_HEADER_LEN {
        length.annotate(AnnotationKind::MalformedLength, "IKE length shorter than its header");
        data.len()
    } else if declared > data.len() {
        length.annotate(
            AnnotationKind::MalformedLength,
            format!("IKE length {} exceeds the {} bytes available", declared, data.len()),
        );
        data.len()
    } else {
        declared
    };

    let mut offset = IKE_HEADER_LEN;
    while next != 0 && offset + IKE_GENERIC_PAYLOAD_HEADER_LEN <= end {
        let kind = next;
        next = data[offset];
        let plen = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let mut payload = ProtoNode::new(ike_payload_name(kind));
        payload.push(ProtoNode::field("Payload Length", plen));
        if plen < IKE_GENERIC_PAYLOAD_HEADER_LEN || offset + plen > end {
            payload.annotate(AnnotationKind::MalformedLength, "payload runs past the message");
            node.push(payload);
            offset = end;
            break;
        }
        payload.push(ProtoNode::bytes(
            "Payload Data",
            &data[offset + IKE_GENERIC_PAYLOAD_HEADER_LEN..offset + plen],
        ));
        node.push(payload);
        offset += plen;
    }
    (node, end.max(offset.min(data.len())))
}

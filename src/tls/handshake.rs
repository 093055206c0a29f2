use tls_parser::*;

use crate::dissect::tree::ProtoNode;

const HANDSHAKE_HEADER_LEN: usize = 4;

/// Connection parameters learned from a handshake record.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct HandshakeEffects {
    pub version: Option<TlsVersion>,
    pub cipher: Option<TlsCipherSuiteID>,
}

fn message_name(msg_type: u8) -> &'static str {
    match msg_type {
        0 => "Hello Request",
        1 => "Client Hello",
        2 => "Server Hello",
        4 => "New Session Ticket",
        5 => "End Of Early Data",
        8 => "Encrypted Extensions",
        11 => "Certificate",
        12 => "Server Key Exchange",
        13 => "Certificate Request",
        14 => "Server Hello Done",
        15 => "Certificate Verify",
        16 => "Client Key Exchange",
        20 => "Finished",
        22 => "Certificate Status",
        24 => "Key Update",
        _ => "Unknown Handshake Message",
    }
}

/// Walk the handshake messages of one plaintext record.
///
/// `record` is the complete record (header included), `body` its payload.
/// Message framing comes from the 4-byte handshake headers; ClientHello,
/// ServerHello and Certificate get their fields from `tls-parser`.
pub(crate) fn summarize(record: &[u8], body: &[u8]) -> (Vec<ProtoNode>, HandshakeEffects) {
    let mut nodes = Vec::new();
    let mut types = Vec::new();
    let mut offset = 0;

    while offset < body.len() {
        let remaining = &body[offset..];
        if remaining.len() < HANDSHAKE_HEADER_LEN {
            nodes.push(ProtoNode::bytes("Handshake fragment", remaining));
            break;
        }
        let msg_type = remaining[0];
        let len = u32::from_be_bytes([0, remaining[1], remaining[2], remaining[3]]) as usize;
        let mut node = ProtoNode::new(message_name(msg_type));
        node.push(ProtoNode::field("Type", msg_type));
        node.push(ProtoNode::field("Length", len));
        if remaining.len() < HANDSHAKE_HEADER_LEN + len {
            // Continues in the next record.
            node.push(ProtoNode::field(
                "Partial",
                format!("{} of {} bytes", remaining.len() - HANDSHAKE_HEADER_LEN, len),
            ));
            nodes.push(node);
            types.push(msg_type);
            break;
        }
        nodes.push(node);
        types.push(msg_type);
        offset += HANDSHAKE_HEADER_LEN + len;
    }

    let mut effects = HandshakeEffects::default();
    let Ok((_, parsed)) = parse_tls_plaintext(record) else {
        return (nodes, effects);
    };

    for msg in &parsed.msg {
        match msg {
            TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => {
                if let Some(node) = node_for(&mut nodes, &types, 1) {
                    node.push(ProtoNode::field("Version", format!("{:?}", ch.version)));
                    node.push(ProtoNode::field("Cipher Suites", ch.ciphers.len()));
                    if let Some(sid) = ch.session_id {
                        node.push(ProtoNode::field("Session ID Length", sid.len()));
                    }
                    if let Some(ext_data) = ch.ext
                        && let Ok((_, exts)) = parse_tls_client_hello_extensions(ext_data)
                    {
                        node.push(ProtoNode::field("Extensions", exts.len()));
                        for ext in &exts {
                            if let TlsExtension::SupportedVersions(versions) = ext
                                && versions.contains(&TlsVersion::Tls13)
                            {
                                node.push(ProtoNode::field("Offers", "TLS 1.3"));
                            }
                        }
                    }
                }
            }
            TlsMessage::Handshake(TlsMessageHandshake::ServerHello(sh)) => {
                effects.cipher = Some(sh.cipher);
                effects.version = Some(sh.version);
                if let Some(ext_data) = sh.ext
                    && let Ok((_, exts)) = parse_tls_extensions(ext_data)
                {
                    for ext in &exts {
                        if let TlsExtension::SupportedVersions(versions) = ext
                            && versions.contains(&TlsVersion::Tls13)
                        {
                            effects.version = Some(TlsVersion::Tls13);
                        }
                    }
                }
                if let Some(node) = node_for(&mut nodes, &types, 2) {
                    if let Some(version) = effects.version {
                        node.push(ProtoNode::field("Version", format!("{:?}", version)));
                    }
                    node.push(ProtoNode::field("Cipher Suite", cipher_name(sh.cipher)));
                }
            }
            TlsMessage::Handshake(TlsMessageHandshake::Certificate(cert)) => {
                if let Some(node) = node_for(&mut nodes, &types, 11) {
                    node.push(ProtoNode::field("Certificates", cert.cert_chain.len()));
                    for (i, c) in cert.cert_chain.iter().enumerate() {
                        node.push(ProtoNode::field(format!("Certificate {}", i), format!("{} bytes", c.data.len())));
                    }
                }
            }
            _ => {}
        }
    }

    (nodes, effects)
}

fn node_for<'a>(nodes: &'a mut [ProtoNode], types: &[u8], msg_type: u8) -> Option<&'a mut ProtoNode> {
    let index = types.iter().position(|t| *t == msg_type)?;
    nodes.get_mut(index)
}

pub(crate) fn cipher_name(cipher: TlsCipherSuiteID) -> String {
    match TlsCipherSuite::from_id(cipher.0) {
        Some(suite) => format!("{} (0x{:04x})", suite.name, cipher.0),
        None => format!("0x{:04x}", cipher.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_each_message() {
        // Server Hello Done (empty) followed by a truncated Finished.
        let body = [14, 0, 0, 0, 20, 0, 0, 12, 1, 2];
        let mut record = vec![0x16, 0x03, 0x03];
        record.extend_from_slice(&(body.len() as u16).to_be_bytes());
        record.extend_from_slice(&body);
        let (nodes, effects) = summarize(&record, &body);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].label, "Server Hello Done");
        assert_eq!(nodes[1].label, "Finished");
        assert!(nodes[1].find("Partial").is_some());
        assert!(effects.cipher.is_none());
    }

    #[test]
    fn short_tail_is_fragment() {
        let body = [1, 0];
        let (nodes, _) = summarize(&[0x16, 3, 3, 0, 2, 1, 0], &body);
        assert_eq!(nodes[0].label, "Handshake fragment");
    }

    #[test]
    fn known_cipher_named() {
        assert!(cipher_name(TlsCipherSuiteID(0xc02f)).contains("0xc02f"));
        assert_eq!(cipher_name(TlsCipherSuiteID(0xfefe)), "0xfefe");
    }
}

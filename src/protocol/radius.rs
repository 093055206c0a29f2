//! EAP carried in RADIUS (RFC 3579): EAP-Message attributes, concatenated.

const RADIUS_HEADER_LEN: usize = 20;
const ATTR_EAP_MESSAGE: u8 = 79;

pub const DEFAULT_RADIUS_PORTS: [u16; 2] = [1812, 1645];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusFrame {
    pub code: u8,
    pub identifier: u8,
    /// Reassembled EAP packet, if the RADIUS packet carried any EAP-Message.
    pub eap: Option<Vec<u8>>,
}

impl RadiusFrame {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < RADIUS_HEADER_LEN {
            return None;
        }
        let code = data[0];
        if !matches!(code, 1 | 2 | 3 | 11) {
            return None;
        }
        let identifier = data[1];
        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        let end = declared.clamp(RADIUS_HEADER_LEN, data.len());

        let mut eap: Option<Vec<u8>> = None;
        let mut offset = RADIUS_HEADER_LEN;
        while offset + 2 <= end {
            let attr_type = data[offset];
            let attr_len = data[offset + 1] as usize;
            if attr_len < 2 || offset + attr_len > end {
                break;
            }
            if attr_type == ATTR_EAP_MESSAGE {
                eap.get_or_insert_with(Vec::new)
                    .extend_from_slice(&data[offset + 2..offset + attr_len]);
            }
            offset += attr_len;
        }

        Some(RadiusFrame {
            code,
            identifier,
            eap,
        })
    }
}

pub fn code_name(code: u8) -> &'static str {
    match code {
        1 => "Access-Request",
        2 => "Access-Accept",
        3 => "Access-Reject",
        11 => "Access-Challenge",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radius(code: u8, attrs: &[(u8, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (t, v) in attrs {
            body.push(*t);
            body.push((v.len() + 2) as u8);
            body.extend_from_slice(v);
        }
        let mut pkt = vec![code, 42];
        pkt.extend_from_slice(&((20 + body.len()) as u16).to_be_bytes());
        pkt.extend_from_slice(&[0u8; 16]);
        pkt.extend_from_slice(&body);
        pkt
    }

    #[test]
    fn concatenates_eap_message_attributes() {
        let pkt = radius(11, &[(79, &[1, 2, 0]), (24, b"state"), (79, &[7, 1])]);
        let f = RadiusFrame::parse(&pkt).unwrap();
        assert_eq!(code_name(f.code), "Access-Challenge");
        assert_eq!(f.identifier, 42);
        assert_eq!(f.eap, Some(vec![1, 2, 0, 7, 1]));
    }

    #[test]
    fn no_eap_message() {
        let pkt = radius(1, &[(1, b"alice")]);
        assert_eq!(RadiusFrame::parse(&pkt).unwrap().eap, None);
    }

    #[test]
    fn accounting_is_not_eap_carriage() {
        let pkt = radius(4, &[(79, &[1])]);
        assert!(RadiusFrame::parse(&pkt).is_none());
    }

    #[test]
    fn zero_length_attribute_stops_walk() {
        let mut pkt = radius(1, &[(79, &[1, 1, 0, 4])]);
        pkt.extend_from_slice(&[79, 0, 9, 9]);
        let len = pkt.len() as u16;
        pkt[2..4].copy_from_slice(&len.to_be_bytes());
        assert_eq!(RadiusFrame::parse(&pkt).unwrap().eap, Some(vec![1, 1, 0, 4]));
    }

    #[test]
    fn truncated_header() {
        assert!(RadiusFrame::parse(&[1, 2, 0, 20]).is_none());
    }
}

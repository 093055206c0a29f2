//! IEEE 802.1X EAPOL framing.

pub const ETHERTYPE_EAPOL: u16 = 0x888E;
const EAPOL_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EapolType {
    Eap,
    Start,
    Logoff,
    Key,
    AsfAlert,
    Other(u8),
}

impl EapolType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EapolType::Eap,
            1 => EapolType::Start,
            2 => EapolType::Logoff,
            3 => EapolType::Key,
            4 => EapolType::AsfAlert,
            other => EapolType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapolFrame<'a> {
    pub version: u8,
    pub packet_type: EapolType,
    pub length: u16,
    /// Body, clipped to the declared length (Ethernet padding dropped).
    pub body: &'a [u8],
}

impl<'a> EapolFrame<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Option<Self> {
        if data.len() < EAPOL_HEADER_LEN {
            return None;
        }
        let length = u16::from_be_bytes([data[2], data[3]]);
        let available = &data[EAPOL_HEADER_LEN..];
        let body = &available[..available.len().min(length as usize)];

        Some(EapolFrame {
            version: data[0],
            packet_type: EapolType::from_u8(data[1]),
            length,
            body,
        })
    }

    /// The EAP packet, for EAPOL type 0 only.
    pub fn eap(&self) -> Option<&'a [u8]> {
        match self.packet_type {
            EapolType::Eap => Some(self.body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eap_packet_body_strips_padding() {
        let mut data = vec![2, 0, 0, 5, 1, 1, 0, 5, 1];
        data.extend_from_slice(&[0u8; 30]);
        let f = EapolFrame::from_bytes(&data).unwrap();
        assert_eq!(f.version, 2);
        assert_eq!(f.packet_type, EapolType::Eap);
        assert_eq!(f.eap(), Some(&[1, 1, 0, 5, 1][..]));
    }

    #[test]
    fn start_frame_has_no_eap() {
        let f = EapolFrame::from_bytes(&[1, 1, 0, 0]).unwrap();
        assert_eq!(f.packet_type, EapolType::Start);
        assert!(f.eap().is_none());
    }

    #[test]
    fn declared_length_beyond_capture_is_clipped() {
        let f = EapolFrame::from_bytes(&[2, 0, 0x01, 0x00, 1, 2]).unwrap();
        assert_eq!(f.length, 256);
        assert_eq!(f.body, &[1, 2]);
    }

    #[test]
    fn too_short() {
        assert!(EapolFrame::from_bytes(&[2, 0, 0]).is_none());
    }

    #[test]
    fn unknown_type_preserved() {
        let f = EapolFrame::from_bytes(&[3, 9, 0, 0]).unwrap();
        assert_eq!(f.packet_type, EapolType::Other(9));
    }
}

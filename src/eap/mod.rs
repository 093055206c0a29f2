//! EAP header codec (RFC 3748, RFC 6696 for the ERP codes).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Parsing here is deliberately lenient: a Length field that disagrees with
//! the bytes actually captured is reported, not rejected, so the engine can
//! keep going with whatever is there.

use serde::Serialize;
use thiserror::Error;

pub const HEADER_LEN: usize = 4;

/// EAP packet code (first byte of the packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EapCode {
    Request = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
    /// ERP (RFC 6696)
    Initiate = 5,
    /// ERP (RFC 6696)
    Finish = 6,
}

impl EapCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            5 => Some(EapCode::Initiate),
            6 => Some(EapCode::Finish),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether a Type byte follows the 4-byte header.
    pub fn has_type(self) -> bool {
        !matches!(self, EapCode::Success | EapCode::Failure)
    }

    /// Retransmission direction. Success and Failure are not tracked.
    pub fn direction(self) -> Option<Direction> {
        match self {
            EapCode::Request | EapCode::Initiate => Some(Direction::Request),
            EapCode::Response | EapCode::Finish => Some(Direction::Response),
            EapCode::Success | EapCode::Failure => None,
        }
    }

    /// True when the frame is sent by the authenticator (server) side.
    pub fn from_authenticator(self) -> bool {
        !matches!(self, EapCode::Response | EapCode::Finish)
    }
}

impl std::fmt::Display for EapCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EapCode::Request => "Request",
            EapCode::Response => "Response",
            EapCode::Success => "Success",
            EapCode::Failure => "Failure",
            EapCode::Initiate => "Initiate",
            EapCode::Finish => "Finish",
        };
        f.write_str(name)
    }
}

/// Which half of the lock-step exchange a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Request,
    Response,
}

/// EAP method types (IANA "Method Types" registry, the subset seen in the wild).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EapType {
    Identity = 1,
    Notification = 2,
    Nak = 3,
    Md5Challenge = 4,
    OneTimePassword = 5,
    GenericTokenCard = 6,
    Tls = 13,
    Leap = 17,
    Sim = 18,
    Ttls = 21,
    Aka = 23,
    Peap = 25,
    MsChapV2 = 26,
    MsAuthTlv = 33,
    Fast = 43,
    Pax = 46,
    Psk = 47,
    Sake = 48,
    Ikev2 = 49,
    AkaPrime = 50,
    Gpsk = 51,
    Pwd = 52,
    Teap = 55,
    Expanded = 254,
    Experimental = 255,
}

impl EapType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use EapType::*;
        let t = match value {
            1 => Identity,
            2 => Notification,
            3 => Nak,
            4 => Md5Challenge,
            5 => OneTimePassword,
            6 => GenericTokenCard,
            13 => Tls,
            17 => Leap,
            18 => Sim,
            21 => Ttls,
            23 => Aka,
            25 => Peap,
            26 => MsChapV2,
            33 => MsAuthTlv,
            43 => Fast,
            46 => Pax,
            47 => Psk,
            48 => Sake,
            49 => Ikev2,
            50 => AkaPrime,
            51 => Gpsk,
            52 => Pwd,
            55 => Teap,
            254 => Expanded,
            255 => Experimental,
            _ => return None,
        };
        Some(t)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        use EapType::*;
        match self {
            Identity => "Identity",
            Notification => "Notification",
            Nak => "Legacy Nak",
            Md5Challenge => "MD5-Challenge",
            OneTimePassword => "One-Time Password",
            GenericTokenCard => "Generic Token Card",
            Tls => "EAP-TLS",
            Leap => "LEAP",
            Sim => "EAP-SIM",
            Ttls => "EAP-TTLS",
            Aka => "EAP-AKA",
            Peap => "PEAP",
            MsChapV2 => "EAP-MSCHAPv2",
            MsAuthTlv => "MS-Authentication-TLV",
            Fast => "EAP-FAST",
            Pax => "EAP-PAX",
            Psk => "EAP-PSK",
            Sake => "EAP-SAKE",
            Ikev2 => "EAP-IKEv2",
            AkaPrime => "EAP-AKA'",
            Gpsk => "EAP-GPSK",
            Pwd => "EAP-pwd",
            Teap => "TEAP",
            Expanded => "Expanded Type",
            Experimental => "Experimental",
        }
    }

    /// Methods whose Type-Data is a flags byte followed by TLS records.
    pub fn tunnel(self) -> Option<TunnelMethod> {
        match self {
            EapType::Tls => Some(TunnelMethod::Tls),
            EapType::Ttls => Some(TunnelMethod::Ttls),
            EapType::Peap => Some(TunnelMethod::Peap),
            EapType::Fast => Some(TunnelMethod::Fast),
            EapType::Teap => Some(TunnelMethod::Teap),
            _ => None,
        }
    }

    /// MD5-Challenge and LEAP are broken; every frame carrying them is flagged.
    pub fn is_insecure(self) -> bool {
        matches!(self, EapType::Md5Challenge | EapType::Leap)
    }
}

/// Human-readable name for a raw type byte, known or not.
pub fn type_name(value: u8) -> String {
    match EapType::from_u8(value) {
        Some(t) => t.name().to_string(),
        None => format!("Unknown type {}", value),
    }
}

/// The TLS-based methods that share the fragmentation scheme of RFC 5216.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TunnelMethod {
    Tls,
    Ttls,
    Peap,
    Fast,
    Teap,
}

impl TunnelMethod {
    /// Whether the low three flag bits carry a version number.
    pub fn has_version_bits(self) -> bool {
        !matches!(self, TunnelMethod::Tls)
    }

    pub fn eap_type(self) -> EapType {
        match self {
            TunnelMethod::Tls => EapType::Tls,
            TunnelMethod::Ttls => EapType::Ttls,
            TunnelMethod::Peap => EapType::Peap,
            TunnelMethod::Fast => EapType::Fast,
            TunnelMethod::Teap => EapType::Teap,
        }
    }
}

/// Flags byte at the start of EAP-TLS style Type-Data.
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |L M S O R V V V|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// `O` (outer TLV length) is only defined for TEAP; `V` is the version for
/// every method except plain EAP-TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TunnelFlags(u8);

impl TunnelFlags {
    pub const LENGTH_INCLUDED: u8 = 0x80;
    pub const MORE_FRAGMENTS: u8 = 0x40;
    pub const START: u8 = 0x20;
    pub const OUTER_TLV_LENGTH: u8 = 0x10;
    pub const VERSION_MASK: u8 = 0x07;

    pub fn from_u8(value: u8) -> Self {
        TunnelFlags(value)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn length_included(self) -> bool {
        self.0 & Self::LENGTH_INCLUDED != 0
    }

    pub fn more_fragments(self) -> bool {
        self.0 & Self::MORE_FRAGMENTS != 0
    }

    pub fn start(self) -> bool {
        self.0 & Self::START != 0
    }

    pub fn outer_tlv_length(self) -> bool {
        self.0 & Self::OUTER_TLV_LENGTH != 0
    }

    pub fn version(self) -> u8 {
        self.0 & Self::VERSION_MASK
    }

    /// Compact rendering such as `[L M S]`.
    pub fn describe(self, method: TunnelMethod) -> String {
        let mut parts = Vec::new();
        if self.length_included() {
            parts.push("Length".to_string());
        }
        if self.more_fragments() {
            parts.push("More".to_string());
        }
        if self.start() {
            parts.push("Start".to_string());
        }
        if method == TunnelMethod::Teap && self.outer_tlv_length() {
            parts.push("Outer-TLV-Length".to_string());
        }
        if method.has_version_bits() {
            parts.push(format!("v{}", self.version()));
        }
        format!("0x{:02x} [{}]", self.0, parts.join(" "))
    }
}

/// Decoded fixed header of one EAP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EapHeader {
    pub code: EapCode,
    pub identifier: u8,
    /// Length as declared on the wire.
    pub declared_length: u16,
    /// Length actually used: the smaller of declared and captured.
    pub effective_length: usize,
    /// Raw type byte, when the code carries one and it was captured.
    pub type_byte: Option<u8>,
}

impl EapHeader {
    /// Decode the fixed header. Only a packet too short for Code/Identifier/
    /// Length or with an unassigned code is an error; a Length mismatch is
    /// reflected in `effective_length` and surfaced via [`length_mismatch`].
    ///
    /// [`length_mismatch`]: EapHeader::length_mismatch
    pub fn parse(bytes: &[u8]) -> Result<Self, EapError> {
        if bytes.len() < HEADER_LEN {
            return Err(EapError::PacketTooShort {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let code = EapCode::from_u8(bytes[0]).ok_or(EapError::InvalidCode(bytes[0]))?;
        let identifier = bytes[1];
        let declared_length = u16::from_be_bytes([bytes[2], bytes[3]]);

        // A declared length below the header itself is nonsense; fall back to
        // what was captured.
        let effective_length = if (declared_length as usize) < HEADER_LEN {
            bytes.len()
        } else {
            (declared_length as usize).min(bytes.len())
        };

        let type_byte = if code.has_type() && effective_length > HEADER_LEN {
            Some(bytes[HEADER_LEN])
        } else {
            None
        };

        Ok(EapHeader {
            code,
            identifier,
            declared_length,
            effective_length,
            type_byte,
        })
    }

    pub fn method(&self) -> Option<EapType> {
        self.type_byte.and_then(EapType::from_u8)
    }

    /// `Some((declared, captured))` when the Length field disagrees with the
    /// bytes available.
    pub fn length_mismatch(&self, captured: usize) -> Option<(u16, usize)> {
        if self.declared_length as usize != captured {
            Some((self.declared_length, captured))
        } else {
            None
        }
    }

    /// Type-Data region (after the Type byte) of `bytes`, clipped to the
    /// effective length.
    pub fn type_data<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        match self.type_byte {
            Some(_) => bytes.get(HEADER_LEN + 1..self.effective_length).unwrap_or(&[]),
            None => &[],
        }
    }

    /// True for the frame that opens a fresh authentication: Request/Identity.
    pub fn is_initiating(&self) -> bool {
        self.code == EapCode::Request && self.method() == Some(EapType::Identity)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EapError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(code: u8, id: u8, length: u16, rest: &[u8]) -> Vec<u8> {
        let mut v = vec![code, id];
        v.extend_from_slice(&length.to_be_bytes());
        v.extend_from_slice(rest);
        v
    }

    #[test]
    fn parse_identity_request() {
        let bytes = packet(1, 7, 5, &[1]);
        let hdr = EapHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.code, EapCode::Request);
        assert_eq!(hdr.identifier, 7);
        assert_eq!(hdr.method(), Some(EapType::Identity));
        assert!(hdr.is_initiating());
        assert!(hdr.length_mismatch(bytes.len()).is_none());
    }

    #[test]
    fn identity_response_is_not_initiating() {
        let bytes = packet(2, 7, 10, &[1, b'a', b'l', b'i', b'c', b'e']);
        let hdr = EapHeader::parse(&bytes).unwrap();
        assert!(!hdr.is_initiating());
        assert_eq!(hdr.type_data(&bytes), b"alice");
    }

    #[test]
    fn success_has_no_type() {
        let bytes = packet(3, 9, 4, &[]);
        let hdr = EapHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.type_byte, None);
        assert!(hdr.type_data(&bytes).is_empty());
    }

    #[test]
    fn declared_length_longer_than_capture_is_clipped() {
        let bytes = packet(1, 1, 200, &[13, 0x20]);
        let hdr = EapHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.effective_length, bytes.len());
        assert_eq!(hdr.length_mismatch(bytes.len()), Some((200, 6)));
        assert_eq!(hdr.type_data(&bytes), &[0x20]);
    }

    #[test]
    fn declared_length_shorter_than_capture_wins() {
        let bytes = packet(2, 1, 6, &[1, b'x', b'y', b'z']);
        let hdr = EapHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.effective_length, 6);
        assert_eq!(hdr.type_data(&bytes), b"x");
    }

    #[test]
    fn declared_length_below_header_uses_capture() {
        let bytes = packet(2, 1, 2, &[1, b'x']);
        let hdr = EapHeader::parse(&bytes).unwrap();
        assert_eq!(hdr.effective_length, bytes.len());
    }

    #[test]
    fn too_short_and_bad_code_rejected() {
        assert_eq!(
            EapHeader::parse(&[1, 2]),
            Err(EapError::PacketTooShort {
                expected: 4,
                actual: 2
            })
        );
        assert_eq!(EapHeader::parse(&[9, 0, 0, 4]), Err(EapError::InvalidCode(9)));
    }

    #[test]
    fn code_directions() {
        assert_eq!(EapCode::Request.direction(), Some(Direction::Request));
        assert_eq!(EapCode::Initiate.direction(), Some(Direction::Request));
        assert_eq!(EapCode::Response.direction(), Some(Direction::Response));
        assert_eq!(EapCode::Finish.direction(), Some(Direction::Response));
        assert_eq!(EapCode::Failure.direction(), None);
        assert!(EapCode::Success.from_authenticator());
        assert!(!EapCode::Response.from_authenticator());
    }

    #[test]
    fn tunnel_flags_bits() {
        let f = TunnelFlags::from_u8(0xC1);
        assert!(f.length_included());
        assert!(f.more_fragments());
        assert!(!f.start());
        assert_eq!(f.version(), 1);
        assert_eq!(f.describe(TunnelMethod::Peap), "0xc1 [Length More v1]");
        assert_eq!(TunnelFlags::from_u8(0x20).describe(TunnelMethod::Tls), "0x20 [Start]");
    }

    #[test]
    fn teap_outer_tlv_flag_only_described_for_teap() {
        let f = TunnelFlags::from_u8(0x11);
        assert!(f.describe(TunnelMethod::Teap).contains("Outer-TLV-Length"));
        assert!(!f.describe(TunnelMethod::Fast).contains("Outer-TLV-Length"));
    }

    #[test]
    fn type_table() {
        assert_eq!(EapType::from_u8(25).and_then(EapType::tunnel), Some(TunnelMethod::Peap));
        assert_eq!(EapType::from_u8(17), Some(EapType::Leap));
        assert!(EapType::Leap.is_insecure());
        assert!(EapType::Md5Challenge.is_insecure());
        assert!(!EapType::Tls.is_insecure());
        assert_eq!(type_name(200), "Unknown type 200");
        assert_eq!(EapType::from_u8(99), None);
    }
}

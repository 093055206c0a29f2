pub mod eapol;
pub mod radius;

use etherparse::{Ethernet2Header, Ethernet2HeaderSlice, NetSlice, SlicedPacket, TransportSlice};
use serde::Serialize;
use std::net::IpAddr;

use crate::eap::EapCode;
use eapol::{ETHERTYPE_EAPOL, EapolFrame};
use radius::{DEFAULT_RADIUS_PORTS, RadiusFrame};

const ETHERTYPE_VLAN: u16 = 0x8100;
const LLC_SNAP: [u8; 6] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00];

/// Link-layer type of the capture, determines how to parse raw packet bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    LinuxSll,
    RawIp,
    Ieee80211,
    Radiotap,
}

impl LinkType {
    /// Return the pcap link-layer header type value (DLT_*).
    pub fn pcap_link_type(self) -> u32 {
        match self {
            LinkType::Ethernet => 1,    // DLT_EN10MB
            LinkType::RawIp => 101,     // DLT_RAW
            LinkType::Ieee80211 => 105, // DLT_IEEE802_11
            LinkType::LinuxSll => 113,  // DLT_LINUX_SLL
            LinkType::Radiotap => 127,  // DLT_IEEE802_11_RADIO
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Transport {
    Udp,
    /// Link-layer carriage (EAPOL); ports are synthesized.
    Link,
}

/// One side of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EndpointAddr {
    Ip(IpAddr),
    Mac([u8; 6]),
    /// Link-layer captures that only record one address (Linux cooked).
    Unspecified,
}

impl std::fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointAddr::Ip(ip) => write!(f, "{}", ip),
            EndpointAddr::Mac(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
            EndpointAddr::Unspecified => f.write_str("*"),
        }
    }
}

/// Bidirectional conversation identifier, normalized so (A->B) == (B->A).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub struct ConversationKey {
    pub transport: Transport,
    pub addr_a: EndpointAddr,
    pub port_a: u16,
    pub addr_b: EndpointAddr,
    pub port_b: u16,
}

impl ConversationKey {
    pub fn new(
        transport: Transport,
        src: EndpointAddr,
        src_port: u16,
        dst: EndpointAddr,
        dst_port: u16,
    ) -> Self {
        let src = normalize_addr(src);
        let dst = normalize_addr(dst);
        if (src, src_port) <= (dst, dst_port) {
            ConversationKey {
                transport,
                addr_a: src,
                port_a: src_port,
                addr_b: dst,
                port_b: dst_port,
            }
        } else {
            ConversationKey {
                transport,
                addr_a: dst,
                port_a: dst_port,
                addr_b: src,
                port_b: src_port,
            }
        }
    }

    /// Key for port-less link-layer carriage.
    ///
    /// The authenticator endpoint gets pseudo-port `depth << 1`, the peer
    /// `(depth << 1) | 1`. The sender's role is taken from the EAP code, so
    /// a Request and the Response answering it land on the same key.
    ///
    /// `None` for depths of 32768 and up, whose pseudo-ports would not fit
    /// in 16 bits.
    pub fn link(src: EndpointAddr, dst: EndpointAddr, code: Option<EapCode>, depth: u32) -> Option<Self> {
        let from_authenticator = code.is_none_or(EapCode::from_authenticator);
        let (authenticator, peer) = if from_authenticator {
            (src, dst)
        } else {
            (dst, src)
        };
        let base = u16::try_from(depth).ok()?.checked_mul(2)?;
        Some(ConversationKey::new(Transport::Link, authenticator, base, peer, base | 1))
    }
}

/// Convert IPv6-mapped-IPv4 addresses to their IPv4 equivalent.
fn normalize_addr(addr: EndpointAddr) -> EndpointAddr {
    match addr {
        EndpointAddr::Ip(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => EndpointAddr::Ip(IpAddr::V4(v4)),
            None => addr,
        },
        other => other,
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.transport {
            Transport::Link => write!(f, "{} <-> {}", self.addr_a, self.addr_b),
            Transport::Udp => write!(
                f,
                "{}:{} <-> {}:{}",
                self.addr_a, self.port_a, self.addr_b, self.port_b
            ),
        }
    }
}

/// How the EAP packet reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Carriage {
    Eapol { version: u8 },
    Radius { code: u8, identifier: u8 },
}

impl Carriage {
    pub fn name(&self) -> &'static str {
        match self {
            Carriage::Eapol { .. } => "EAPOL",
            Carriage::Radius { .. } => "RADIUS",
        }
    }

    /// Name plus the RADIUS packet code, for headlines.
    pub fn label(&self) -> String {
        match self {
            Carriage::Eapol { .. } => self.name().to_string(),
            Carriage::Radius { code, .. } => format!("RADIUS {}", radius::code_name(*code)),
        }
    }
}

/// An EAP packet lifted out of its carriage, with a canonical key.
#[derive(Debug, Clone)]
pub struct CarriedEap {
    pub carriage: Carriage,
    pub key: ConversationKey,
    pub src: String,
    pub dst: String,
    pub eap: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CarriageConfig {
    pub radius_ports: Vec<u16>,
}

impl Default for CarriageConfig {
    fn default() -> Self {
        CarriageConfig {
            radius_ports: DEFAULT_RADIUS_PORTS.to_vec(),
        }
    }
}

/// Parse raw frame bytes into the EAP packet they carry, if any.
pub fn parse_frame(data: &[u8], link_type: LinkType, config: &CarriageConfig) -> Option<CarriedEap> {
    match link_type {
        LinkType::Ethernet => parse_ethernet(data, config),
        LinkType::RawIp => {
            let sliced = SlicedPacket::from_ip(data).ok()?;
            radius_carriage(&sliced, config)
        }
        LinkType::LinuxSll => {
            // Linux cooked capture v1: 16-byte header, protocol in the last two bytes
            if data.len() < 16 {
                return None;
            }
            let protocol = u16::from_be_bytes([data[14], data[15]]);
            if protocol == ETHERTYPE_EAPOL {
                // Only the sender's address is recorded; both sides collapse
                // to the role-based pseudo-ports.
                return eapol_carriage(&data[16..], EndpointAddr::Unspecified, EndpointAddr::Unspecified);
            }
            let sliced = SlicedPacket::from_ip(&data[16..]).ok()?;
            radius_carriage(&sliced, config)
        }
        LinkType::Ieee80211 => parse_80211(data),
        LinkType::Radiotap => {
            if data.len() < 4 {
                return None;
            }
            let rt_len = u16::from_le_bytes([data[2], data[3]]) as usize;
            parse_80211(data.get(rt_len..)?)
        }
    }
}

fn parse_ethernet(data: &[u8], config: &CarriageConfig) -> Option<CarriedEap> {
    let eth = Ethernet2HeaderSlice::from_slice(data).ok()?;
    let mut ether_type = eth.ether_type().0;
    let mut offset = Ethernet2Header::LEN;

    // One 802.1Q tag is common on authenticator uplinks
    if ether_type == ETHERTYPE_VLAN {
        let tag = data.get(offset..offset + 4)?;
        ether_type = u16::from_be_bytes([tag[2], tag[3]]);
        offset += 4;
    }

    if ether_type == ETHERTYPE_EAPOL {
        return eapol_carriage(
            &data[offset..],
            EndpointAddr::Mac(eth.source()),
            EndpointAddr::Mac(eth.destination()),
        );
    }

    let sliced = SlicedPacket::from_ethernet(data).ok()?;
    radius_carriage(&sliced, config)
}

/// 802.11 data frame with an LLC/SNAP-encapsulated EAPOL payload.
fn parse_80211(data: &[u8]) -> Option<CarriedEap> {
    if data.len() < 24 {
        return None;
    }
    let fc0 = data[0];
    let fc1 = data[1];
    let frame_type = (fc0 >> 2) & 0x03;
    let subtype = fc0 >> 4;
    if frame_type != 2 || fc1 & 0x40 != 0 {
        // Not data, or protected: EAPOL is never encrypted before the 4-way handshake
        return None;
    }

    let mut hdr_len = 24;
    if fc1 & 0x03 == 0x03 {
        hdr_len += 6; // addr4
    }
    let qos = subtype & 0x08 != 0;
    if qos {
        hdr_len += 2;
        if fc1 & 0x80 != 0 {
            hdr_len += 4; // HT control
        }
    }

    let llc = data.get(hdr_len..hdr_len + 8)?;
    if llc[..6] != LLC_SNAP || u16::from_be_bytes([llc[6], llc[7]]) != ETHERTYPE_EAPOL {
        return None;
    }

    let mut receiver = [0u8; 6];
    receiver.copy_from_slice(&data[4..10]);
    let mut transmitter = [0u8; 6];
    transmitter.copy_from_slice(&data[10..16]);

    eapol_carriage(
        &data[hdr_len + 8..],
        EndpointAddr::Mac(transmitter),
        EndpointAddr::Mac(receiver),
    )
}

fn eapol_carriage(data: &[u8], src: EndpointAddr, dst: EndpointAddr) -> Option<CarriedEap> {
    let frame = EapolFrame::from_bytes(data)?;
    let eap = frame.eap()?;
    let code = eap.first().copied().and_then(EapCode::from_u8);

    Some(CarriedEap {
        carriage: Carriage::Eapol {
            version: frame.version,
        },
        key: ConversationKey::link(src, dst, code, 0)?,
        src: src.to_string(),
        dst: dst.to_string(),
        eap: eap.to_vec(),
    })
}

fn radius_carriage(sliced: &SlicedPacket, config: &CarriageConfig) -> Option<CarriedEap> {
    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return None,
    };

    let udp = match &sliced.transport {
        Some(TransportSlice::Udp(udp)) => udp,
        _ => return None,
    };
    let (src_port, dst_port) = (udp.source_port(), udp.destination_port());
    if !config.radius_ports.contains(&src_port) && !config.radius_ports.contains(&dst_port) {
        return None;
    }

    let frame = RadiusFrame::parse(udp.payload())?;
    let eap = frame.eap?;
    let src = EndpointAddr::Ip(src_ip);
    let dst = EndpointAddr::Ip(dst_ip);

    Some(CarriedEap {
        carriage: Carriage::Radius {
            code: frame.code,
            identifier: frame.identifier,
        },
        key: ConversationKey::new(Transport::Udp, src, src_port, dst, dst_port),
        src: format!("{}:{}", src_ip, src_port),
        dst: format!("{}:{}", dst_ip, dst_port),
        eap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const AP: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const STA: [u8; 6] = [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];

    fn ip(a: u8, b: u8, c: u8, d: u8) -> EndpointAddr {
        EndpointAddr::Ip(IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
    }

    // -- ConversationKey tests --

    #[test]
    fn key_bidirectional() {
        let k1 = ConversationKey::new(Transport::Udp, ip(10, 0, 0, 1), 1812, ip(10, 0, 0, 2), 40000);
        let k2 = ConversationKey::new(Transport::Udp, ip(10, 0, 0, 2), 40000, ip(10, 0, 0, 1), 1812);
        assert_eq!(k1, k2);
    }

    #[test]
    fn key_same_ports_different_addresses() {
        let k1 = ConversationKey::new(Transport::Udp, ip(10, 0, 0, 1), 1812, ip(10, 0, 0, 2), 1812);
        let k2 = ConversationKey::new(Transport::Udp, ip(10, 0, 0, 1), 1812, ip(10, 0, 0, 3), 1812);
        assert_ne!(k1, k2);
    }

    #[test]
    fn key_ipv6_mapped_normalized() {
        let mapped = EndpointAddr::Ip(IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped()));
        let k1 = ConversationKey::new(Transport::Udp, mapped, 1, ip(10, 0, 0, 2), 2);
        let k2 = ConversationKey::new(Transport::Udp, ip(10, 0, 0, 1), 1, ip(10, 0, 0, 2), 2);
        assert_eq!(k1, k2);
        let v6 = EndpointAddr::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
        let k3 = ConversationKey::new(Transport::Udp, v6, 1, ip(10, 0, 0, 2), 2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn link_key_request_and_response_collapse() {
        let req = ConversationKey::link(
            EndpointAddr::Mac(AP),
            EndpointAddr::Mac(STA),
            Some(EapCode::Request),
            0,
        )
        .unwrap();
        let resp = ConversationKey::link(
            EndpointAddr::Mac(STA),
            EndpointAddr::Mac(AP),
            Some(EapCode::Response),
            0,
        )
        .unwrap();
        assert_eq!(req, resp);
        assert_eq!(req.transport, Transport::Link);
    }

    #[test]
    fn link_key_depth_separates() {
        let d0 = ConversationKey::link(EndpointAddr::Mac(AP), EndpointAddr::Mac(STA), Some(EapCode::Request), 0).unwrap();
        let d1 = ConversationKey::link(EndpointAddr::Mac(AP), EndpointAddr::Mac(STA), Some(EapCode::Request), 1).unwrap();
        assert_ne!(d0, d1);
    }

    #[test]
    fn link_key_roles_not_mirrored() {
        // A frame where the station claims to be the authenticator must not
        // share a key with the normal direction.
        let normal = ConversationKey::link(EndpointAddr::Mac(AP), EndpointAddr::Mac(STA), Some(EapCode::Request), 0).unwrap();
        let swapped = ConversationKey::link(EndpointAddr::Mac(STA), EndpointAddr::Mac(AP), Some(EapCode::Request), 0).unwrap();
        assert_ne!(normal, swapped);
    }

    #[test]
    fn link_key_depth_overflow_rejected() {
        let mac = |m| EndpointAddr::Mac(m);
        assert!(ConversationKey::link(mac(AP), mac(STA), None, 0x7FFF).is_some());
        assert!(ConversationKey::link(mac(AP), mac(STA), None, 0x8000).is_none());
        assert!(ConversationKey::link(mac(AP), mac(STA), None, u32::MAX).is_none());
    }

    #[test]
    fn key_display() {
        let k = ConversationKey::new(Transport::Udp, ip(1, 2, 3, 4), 1812, ip(5, 6, 7, 8), 5000);
        let s = k.to_string();
        assert!(s.contains("1.2.3.4:1812"));
        assert!(s.contains("<->"));
        let l = ConversationKey::link(EndpointAddr::Mac(AP), EndpointAddr::Mac(STA), None, 0).unwrap();
        assert!(l.to_string().contains("00:11:22:33:44:55"));
    }

    // -- carriage tests --

    fn eapol_ethernet(src: [u8; 6], dst: [u8; 6], eap: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&dst);
        frame.extend_from_slice(&src);
        frame.extend_from_slice(&ETHERTYPE_EAPOL.to_be_bytes());
        frame.extend_from_slice(&[2, 0]);
        frame.extend_from_slice(&(eap.len() as u16).to_be_bytes());
        frame.extend_from_slice(eap);
        // Ethernet minimum frame padding
        while frame.len() < 60 {
            frame.push(0);
        }
        frame
    }

    #[test]
    fn ethernet_eapol_request() {
        let eap = [1, 3, 0, 5, 1];
        let data = eapol_ethernet(AP, STA, &eap);
        let c = parse_frame(&data, LinkType::Ethernet, &CarriageConfig::default()).unwrap();
        assert_eq!(c.eap, eap);
        assert_eq!(c.carriage, Carriage::Eapol { version: 2 });
        assert_eq!(c.src, "00:11:22:33:44:55");
        assert_eq!(
            c.key,
            ConversationKey::link(EndpointAddr::Mac(AP), EndpointAddr::Mac(STA), Some(EapCode::Request), 0).unwrap()
        );
    }

    #[test]
    fn ethernet_vlan_eapol() {
        let inner = eapol_ethernet(STA, AP, &[2, 3, 0, 6, 1, b'a']);
        let mut data = inner[..12].to_vec();
        data.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a]);
        data.extend_from_slice(&inner[12..]);
        let c = parse_frame(&data, LinkType::Ethernet, &CarriageConfig::default()).unwrap();
        assert_eq!(c.eap, vec![2, 3, 0, 6, 1, b'a']);
    }

    #[test]
    fn eapol_key_frames_ignored() {
        let mut data = eapol_ethernet(AP, STA, &[]);
        data[15] = 3; // EAPOL-Key
        assert!(parse_frame(&data, LinkType::Ethernet, &CarriageConfig::default()).is_none());
    }

    fn radius_udp(src_port: u16, dst_port: u16, code: u8, eap: &[u8]) -> Vec<u8> {
        use etherparse::PacketBuilder;
        let mut radius_pkt = vec![code, 9];
        let total = 20 + 2 + eap.len();
        radius_pkt.extend_from_slice(&(total as u16).to_be_bytes());
        radius_pkt.extend_from_slice(&[0u8; 16]);
        radius_pkt.push(79);
        radius_pkt.push((eap.len() + 2) as u8);
        radius_pkt.extend_from_slice(eap);

        let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(src_port, dst_port);
        let mut buf = Vec::new();
        builder.write(&mut buf, &radius_pkt).unwrap();
        buf
    }

    #[test]
    fn radius_eap_message() {
        let data = radius_udp(40000, 1812, 1, &[2, 4, 0, 5, 1]);
        let c = parse_frame(&data, LinkType::Ethernet, &CarriageConfig::default()).unwrap();
        assert_eq!(c.carriage, Carriage::Radius { code: 1, identifier: 9 });
        assert_eq!(c.eap, vec![2, 4, 0, 5, 1]);
        assert_eq!(c.key.transport, Transport::Udp);
        assert_eq!(c.src, "10.0.0.1:40000");
        assert_eq!(c.carriage.label(), "RADIUS Access-Request");
    }

    #[test]
    fn radius_on_unconfigured_port_ignored() {
        let data = radius_udp(40000, 9999, 1, &[2, 4, 0, 5, 1]);
        assert!(parse_frame(&data, LinkType::Ethernet, &CarriageConfig::default()).is_none());
        let config = CarriageConfig {
            radius_ports: vec![9999],
        };
        assert!(parse_frame(&data, LinkType::Ethernet, &config).is_some());
    }

    #[test]
    fn raw_ip_radius() {
        let data = radius_udp(1812, 40000, 11, &[1, 5, 0, 6, 13, 0x20]);
        let c = parse_frame(&data[14..], LinkType::RawIp, &CarriageConfig::default()).unwrap();
        assert_eq!(c.eap, vec![1, 5, 0, 6, 13, 0x20]);
    }

    #[test]
    fn linux_sll_eapol() {
        let eth = eapol_ethernet(AP, STA, &[1, 3, 0, 5, 1]);
        let mut sll = vec![0u8; 16];
        sll[14] = 0x88;
        sll[15] = 0x8e;
        sll.extend_from_slice(&eth[14..]);
        let c = parse_frame(&sll, LinkType::LinuxSll, &CarriageConfig::default()).unwrap();
        assert_eq!(c.eap, vec![1, 3, 0, 5, 1]);
        assert_eq!(c.key.addr_a, EndpointAddr::Unspecified);
    }

    #[test]
    fn linux_sll_too_short() {
        assert!(parse_frame(&[0u8; 10], LinkType::LinuxSll, &CarriageConfig::default()).is_none());
    }

    fn wifi_eapol(eap: &[u8], qos: bool) -> Vec<u8> {
        let mut data = vec![if qos { 0x88 } else { 0x08 }, 0x02, 0, 0];
        data.extend_from_slice(&STA); // addr1: receiver
        data.extend_from_slice(&AP); // addr2: transmitter
        data.extend_from_slice(&AP); // addr3: BSSID
        data.extend_from_slice(&[0, 0]); // seq ctl
        if qos {
            data.extend_from_slice(&[0, 0]);
        }
        data.extend_from_slice(&LLC_SNAP);
        data.extend_from_slice(&ETHERTYPE_EAPOL.to_be_bytes());
        data.extend_from_slice(&[1, 0]);
        data.extend_from_slice(&(eap.len() as u16).to_be_bytes());
        data.extend_from_slice(eap);
        data
    }

    #[test]
    fn ieee80211_eapol() {
        let eap = [1, 1, 0, 5, 1];
        let c = parse_frame(&wifi_eapol(&eap, false), LinkType::Ieee80211, &CarriageConfig::default()).unwrap();
        assert_eq!(c.eap, eap);
        assert_eq!(c.src, "00:11:22:33:44:55");
        let q = parse_frame(&wifi_eapol(&eap, true), LinkType::Ieee80211, &CarriageConfig::default()).unwrap();
        assert_eq!(q.key, c.key);
    }

    #[test]
    fn radiotap_wraps_80211() {
        let mut data = vec![0, 0, 8, 0, 0, 0, 0, 0];
        data.extend_from_slice(&wifi_eapol(&[1, 1, 0, 5, 1], false));
        assert!(parse_frame(&data, LinkType::Radiotap, &CarriageConfig::default()).is_some());
    }

    #[test]
    fn protected_80211_ignored() {
        let mut data = wifi_eapol(&[1, 1, 0, 5, 1], false);
        data[1] |= 0x40;
        assert!(parse_frame(&data, LinkType::Ieee80211, &CarriageConfig::default()).is_none());
    }

    #[test]
    fn parse_truncated_data() {
        assert!(parse_frame(&[0, 1, 2], LinkType::Ethernet, &CarriageConfig::default()).is_none());
    }
}

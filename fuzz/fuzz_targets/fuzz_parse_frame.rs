#![no_main]
use eaptrace::protocol::{CarriageConfig, LinkType, parse_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = CarriageConfig::default();
    for lt in [
        LinkType::Ethernet,
        LinkType::LinuxSll,
        LinkType::RawIp,
        LinkType::Ieee80211,
        LinkType::Radiotap,
    ] {
        let _ = parse_frame(data, lt, &config);
    }
});

#![no_main]
use eaptrace::dissect::methods::BuiltinDecoders;
use eaptrace::dissect::{FrameInput, dissect_frame};
use eaptrace::protocol::{ConversationKey, EndpointAddr};
use eaptrace::session::CaptureSession;
use libfuzzer_sys::fuzz_target;

// Input is a sequence of EAP packets, each prefixed by a one-byte length.
// Every packet is dissected on a first pass and again on a replay pass,
// and both passes must agree.
fuzz_target!(|data: &[u8]| {
    let mut packets = Vec::new();
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (packet, tail) = tail.split_at(len);
        packets.push(packet);
        rest = tail;
    }

    let Some(key) = ConversationKey::link(
        EndpointAddr::Mac([0, 1, 2, 3, 4, 5]),
        EndpointAddr::Mac([6, 7, 8, 9, 10, 11]),
        None,
        0,
    ) else {
        return;
    };
    let mut session = CaptureSession::new();
    let mut decoders = BuiltinDecoders::new();
    let mut first = Vec::with_capacity(packets.len());
    for (i, eap) in packets.iter().enumerate() {
        let input = FrameInput {
            frame: i as u32 + 1,
            key,
            visited: false,
            depth: 0,
            eap,
        };
        first.push(dissect_frame(&mut session, &mut decoders, &input).tree);
    }
    for (i, eap) in packets.iter().enumerate() {
        let input = FrameInput {
            frame: i as u32 + 1,
            key,
            visited: true,
            depth: 0,
            eap,
        };
        assert_eq!(dissect_frame(&mut session, &mut decoders, &input).tree, first[i]);
    }
});

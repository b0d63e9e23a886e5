use std::time::Duration;

use gradex::{DataType, GradexConfig, Server};

use super::helpers::*;

const KEY: u64 = 41;

#[test]
fn f16_pushes_reduce_in_f32_and_pull_back_f16() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 2, transport.clone()).unwrap();

    // Init with the low-precision footprint (4 halves = 8 bytes).
    server
        .handle(push_meta(0, DataType::F16), f16_payload(KEY, &[0.0; 4]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F16), f16_payload(KEY, &[0.0; 4]))
        .unwrap();
    assert_eq!(transport.push_ack_count(), 2);

    // Values exactly representable in f16 so the round-trip is lossless.
    server
        .handle(push_meta(0, DataType::F16), f16_payload(KEY, &[1.5, 2.5, -3.0, 4.0]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F16), f16_payload(KEY, &[0.5, 0.5, 1.0, -2.0]))
        .unwrap();
    server.handle(pull_meta(0, DataType::F16), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F16), pull_payload(KEY)).unwrap();

    assert!(transport.wait_for_pulls(2, Duration::from_secs(5)));
    for i in 0..2 {
        let bytes = transport.pull_bytes(i);
        // The response is the demoted low-precision copy.
        assert_eq!(bytes.len(), 8);
        let vals: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|b| half::f16::from_bits(u16::from_ne_bytes(b.try_into().unwrap())).to_f32())
            .collect();
        assert_eq!(vals, vec![2.0, 3.0, -2.0, 2.0]);
    }
}

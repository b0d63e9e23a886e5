use gradex::{DataType, GradexConfig, Server};

use super::helpers::*;

const KEY: u64 = 21;

fn blocking_config() -> GradexConfig {
    GradexConfig {
        engine_blocking: true,
        ..GradexConfig::default()
    }
}

#[test]
fn inline_engine_merges_and_serves_synchronously() {
    let transport = MockTransport::new();
    let server = Server::new(blocking_config(), 2, transport.clone()).unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[4.0, 3.0, 2.0, 1.0]))
        .unwrap();

    // No engine strands in blocking mode: the merge already happened.
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(KEY)).unwrap();
    assert_eq!(transport.pull_count(), 2);
    for i in 0..2 {
        let (_, vals) = transport.pull_f32(i);
        assert_eq!(vals, vec![5.0, 5.0, 5.0, 5.0]);
    }

    // Second step overwrites rather than accumulates.
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[10.0; 4]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[-10.0; 4]))
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    let (_, vals) = transport.pull_f32(2);
    assert_eq!(vals, vec![0.0, 0.0, 0.0, 0.0]);
}

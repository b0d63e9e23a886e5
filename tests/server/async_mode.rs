use gradex::{DataType, GradexConfig, Server};

use super::helpers::*;

const KEY: u64 = 11;

fn async_config() -> GradexConfig {
    GradexConfig {
        sync_mode: false,
        ..GradexConfig::default()
    }
}

#[test]
fn pushes_accumulate_without_barrier() {
    let transport = MockTransport::new();
    let server = Server::new(async_config(), 2, transport.clone()).unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();

    // Worker A's push lands immediately; a pull in between observes the
    // partial sum.
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    let (_, partial) = transport.pull_f32(0);
    assert_eq!(partial, vec![1.0, 2.0, 3.0, 4.0]);

    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[4.0, 3.0, 2.0, 1.0]))
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(KEY)).unwrap();

    // Async pulls are answered synchronously from the store.
    assert_eq!(transport.pull_count(), 3);
    for i in 1..3 {
        let (_, vals) = transport.pull_f32(i);
        assert_eq!(vals, vec![5.0, 5.0, 5.0, 5.0]);
    }
}

#[test]
fn every_push_is_acked_immediately() {
    let transport = MockTransport::new();
    let server = Server::new(async_config(), 2, transport.clone()).unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 2]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[0.0; 2]))
        .unwrap();
    assert_eq!(transport.push_ack_count(), 2);

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[1.0, 1.0]))
        .unwrap();
    // No barrier: the ack does not wait for worker B.
    assert_eq!(transport.push_ack_count(), 3);
}

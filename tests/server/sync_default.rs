use std::time::Duration;

use gradex::{DataType, GradexConfig, Server};

use super::helpers::*;

const KEY: u64 = 7;

#[test]
fn two_worker_merge_and_second_step() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 2, transport.clone()).unwrap();

    // Init barrier: two pushes allocate the store, both acked together.
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    assert_eq!(transport.push_ack_count(), 0);
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    assert_eq!(transport.push_ack_count(), 2);

    // Step 1.
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[4.0, 3.0, 2.0, 1.0]))
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(KEY)).unwrap();

    assert!(transport.wait_for_pulls(2, Duration::from_secs(5)));
    for i in 0..2 {
        let (_, vals) = transport.pull_f32(i);
        assert_eq!(vals, vec![5.0, 5.0, 5.0, 5.0]);
    }
    let senders: Vec<_> = (0..2).map(|i| transport.pull_f32(i).0).collect();
    assert!(senders.contains(&0) && senders.contains(&1));

    // Step 2: the first push of a step replaces, it does not accumulate.
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[10.0; 4]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[-10.0; 4]))
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(KEY)).unwrap();

    assert!(transport.wait_for_pulls(4, Duration::from_secs(5)));
    for i in 2..4 {
        let (_, vals) = transport.pull_f32(i);
        assert_eq!(vals, vec![0.0, 0.0, 0.0, 0.0]);
    }
}

#[test]
fn pulls_parked_until_merge_completes_are_served_once() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 2, transport.clone()).unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 2]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[0.0; 2]))
        .unwrap();

    // Pulls before any data push of the step: parked.
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(KEY)).unwrap();
    assert_eq!(transport.pull_count(), 0);

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[1.0, 1.0]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[2.0, 2.0]))
        .unwrap();

    assert!(transport.wait_for_pulls(2, Duration::from_secs(5)));
    // Exactly one response per worker for this step.
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(transport.pull_count(), 2);
    for i in 0..2 {
        let (_, vals) = transport.pull_f32(i);
        assert_eq!(vals, vec![3.0, 3.0]);
    }
}

#[test]
fn independent_keys_merge_independently() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 2, transport.clone()).unwrap();

    for key in [1u64, 2] {
        server
            .handle(push_meta(0, DataType::F32), f32_payload(key, &[0.0; 2]))
            .unwrap();
        server
            .handle(push_meta(1, DataType::F32), f32_payload(key, &[0.0; 2]))
            .unwrap();
    }
    server.handle(push_meta(0, DataType::F32), f32_payload(1, &[1.0, 0.0])).unwrap();
    server.handle(push_meta(0, DataType::F32), f32_payload(2, &[0.0, 7.0])).unwrap();
    server.handle(push_meta(1, DataType::F32), f32_payload(1, &[1.0, 0.0])).unwrap();
    server.handle(push_meta(1, DataType::F32), f32_payload(2, &[0.0, 7.0])).unwrap();

    server.handle(pull_meta(0, DataType::F32), pull_payload(1)).unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(2)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(1)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(2)).unwrap();

    assert!(transport.wait_for_pulls(4, Duration::from_secs(5)));
    let pulls = transport.pulls.lock().unwrap();
    for (_, key, bytes) in pulls.iter() {
        let vals: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes(b.try_into().unwrap()))
            .collect();
        match key {
            1 => assert_eq!(vals, vec![2.0, 0.0]),
            2 => assert_eq!(vals, vec![0.0, 14.0]),
            other => panic!("unexpected key {other}"),
        }
    }
}

#[test]
fn pull_before_init_is_a_contract_violation() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 2, transport.clone()).unwrap();
    let err = server
        .handle(pull_meta(0, DataType::F32), pull_payload(99))
        .unwrap_err();
    assert!(matches!(err, gradex::GradexError::KeyNotInitialized { key: 99 }));
}

#[test]
fn row_sparse_requests_fail_loudly() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 1, transport.clone()).unwrap();
    let meta = gradex::RequestMeta {
        cmd: gradex::pack_cmd(gradex::RequestType::RowSparse, DataType::F32),
        push: true,
        sender: 0,
    };
    let err = server.handle(meta, f32_payload(1, &[0.0])).unwrap_err();
    assert!(matches!(err, gradex::GradexError::Unimplemented(_)));
}

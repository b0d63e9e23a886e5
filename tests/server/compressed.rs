use std::time::Duration;

use bytes::Bytes;
use gradex::compression::serialize_kwargs;
use gradex::{DataType, GradexConfig, Kwargs, KvPairs, RequestType, Server};

use super::helpers::*;

const KEY: u64 = 31;

fn topk_kwargs(k: &str) -> KvPairs {
    let mut kwargs = Kwargs::new();
    kwargs.insert("compressor_type".into(), "topk".into());
    kwargs.insert("compressor_k".into(), k.into());
    KvPairs::single(KEY, Bytes::from(serialize_kwargs(&kwargs).into_bytes()))
}

fn compressed_push_meta(sender: u32) -> gradex::RequestMeta {
    gradex::RequestMeta {
        cmd: gradex::pack_cmd(RequestType::Compressed, DataType::F32),
        push: true,
        sender,
    }
}

#[test]
fn single_worker_topk_roundtrip() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 1, transport.clone()).unwrap();

    // Init allocates the 4-element f32 store.
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    assert_eq!(transport.push_ack_count(), 1);

    // Register topk with k=2 via a config push.
    server.handle(config_meta(0), topk_kwargs("2")).unwrap();
    assert_eq!(transport.push_ack_count(), 2);

    // The worker pushes its own topk-compressed gradient: the two largest
    // of [0.1, -0.9, 0.3, 0.8].
    server
        .handle(
            compressed_push_meta(0),
            pair_payload(KEY, &[(1, -0.9), (3, 0.8)]),
        )
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();

    assert!(transport.wait_for_pulls(1, Duration::from_secs(5)));
    let mut pairs = decode_pairs_f32(&transport.pull_bytes(0));
    pairs.sort_by_key(|p| p.0);
    assert_eq!(pairs, vec![(1, -0.9), (3, 0.8)]);
}

#[test]
fn two_worker_compressed_contributions_are_summed() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 2, transport.clone()).unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    server
        .handle(push_meta(1, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();

    server.handle(config_meta(0), topk_kwargs("2")).unwrap();
    server.handle(config_meta(1), topk_kwargs("2")).unwrap();

    // A contributes {0: 1.0, 2: 2.0}; B contributes {0: 3.0, 3: -4.0}.
    // Dense merge is [4, 0, 2, -4]; its top-2 is {0: 4, 3: -4}.
    server
        .handle(
            compressed_push_meta(0),
            pair_payload(KEY, &[(0, 1.0), (2, 2.0)]),
        )
        .unwrap();
    server
        .handle(
            compressed_push_meta(1),
            pair_payload(KEY, &[(0, 3.0), (3, -4.0)]),
        )
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    server.handle(pull_meta(1, DataType::F32), pull_payload(KEY)).unwrap();

    assert!(transport.wait_for_pulls(2, Duration::from_secs(5)));
    for i in 0..2 {
        let mut pairs = decode_pairs_f32(&transport.pull_bytes(i));
        pairs.sort_by_key(|p| p.0);
        assert_eq!(pairs, vec![(0, 4.0), (3, -4.0)]);
    }
}

#[test]
fn config_registration_is_idempotent() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 1, transport.clone()).unwrap();

    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();
    server.handle(config_meta(0), topk_kwargs("2")).unwrap();
    // Re-registration with different parameters is a no-op.
    server.handle(config_meta(0), topk_kwargs("1")).unwrap();

    server
        .handle(
            compressed_push_meta(0),
            pair_payload(KEY, &[(1, -0.9), (3, 0.8)]),
        )
        .unwrap();
    server.handle(pull_meta(0, DataType::F32), pull_payload(KEY)).unwrap();
    assert!(transport.wait_for_pulls(1, Duration::from_secs(5)));
    // Still two pairs: the k=2 chain stayed installed.
    assert_eq!(transport.pull_bytes(0).len(), 16);
}

#[test]
fn config_with_unknown_compressor_is_fatal() {
    let transport = MockTransport::new();
    let server = Server::new(GradexConfig::default(), 1, transport.clone()).unwrap();
    server
        .handle(push_meta(0, DataType::F32), f32_payload(KEY, &[0.0; 4]))
        .unwrap();

    let mut kwargs = Kwargs::new();
    kwargs.insert("compressor_type".into(), "gzip".into());
    let err = server
        .handle(
            config_meta(0),
            KvPairs::single(KEY, Bytes::from(serialize_kwargs(&kwargs).into_bytes())),
        )
        .unwrap_err();
    assert!(matches!(err, gradex::GradexError::UnknownCompressor(_)));
}

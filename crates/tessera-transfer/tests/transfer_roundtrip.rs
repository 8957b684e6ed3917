//! Integration test: transfer → retrieve round trips against in-memory nodes

mod common;

use common::{pattern, settings, Cluster};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_chunks::{compute_root, split_slice};
use tessera_transfer::{SessionStatus, TransferManifest};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn thousand_bytes_in_three_hundred_byte_fragments() {
    let cluster = Cluster::trusted(3);
    let data = pattern(1000);

    let session = cluster
        .orchestrator(settings(300, 2))
        .transfer(&data[..], &CancellationToken::new())
        .await
        .expect("valid configuration");

    assert_eq!(session.status(), &SessionStatus::Completed);
    let lengths: Vec<u64> = session.records().iter().map(|r| r.length).collect();
    assert_eq!(lengths, vec![300, 300, 300, 100]);

    let roots = session.roots();
    let distinct: HashSet<_> = roots.iter().collect();
    assert_eq!(distinct.len(), 4);
    for (record, fragment) in session.records().iter().zip(split_slice(&data, 300).unwrap()) {
        assert_eq!(record.root, compute_root(&fragment.payload));
        assert_eq!(record.offset, fragment.offset);
        assert_eq!(record.replication_achieved, 2);
        assert_eq!(record.nodes.len(), 2);
    }
    assert_eq!(session.total_bytes(), 1000);

    let restored = cluster.retrieve_all(&roots).await.unwrap();
    assert_eq!(restored.as_ref(), &data[..]);
}

#[tokio::test]
async fn empty_source_completes_with_no_fragments() {
    let cluster = Cluster::trusted(1);
    let session = cluster
        .orchestrator(settings(300, 1))
        .transfer(&b""[..], &CancellationToken::new())
        .await
        .unwrap();

    assert!(session.is_completed());
    assert!(session.records().is_empty());
    assert_eq!(cluster.transport.put_calls(), 0);

    let restored = cluster.retrieve_all(&session.roots()).await.unwrap();
    assert!(restored.is_empty());
}

#[tokio::test]
async fn parallel_workers_keep_records_in_order() {
    let cluster = Cluster::trusted(4);
    let data = pattern(10_000);

    let session = cluster
        .orchestrator(settings(512, 3).with_workers(4))
        .transfer(&data[..], &CancellationToken::new())
        .await
        .unwrap();

    assert!(session.is_completed());
    let indices: Vec<u64> = session.records().iter().map(|r| r.fragment_index).collect();
    let expected: Vec<u64> = (0..data.len().div_ceil(512) as u64).collect();
    assert_eq!(indices, expected);

    let restored = cluster.retrieve_all(&session.roots()).await.unwrap();
    assert_eq!(restored.as_ref(), &data[..]);
}

#[tokio::test]
async fn progress_reports_every_committed_fragment() {
    let cluster = Cluster::trusted(2);
    let data = pattern(2_500);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let orchestrator = cluster
        .orchestrator(settings(1_000, 1))
        .with_progress(Box::new(move |done: u64, _read: u64, msg: &str| {
            sink.lock().unwrap().push((done, msg.to_string()));
        }));
    let session = orchestrator
        .transfer(&data[..], &CancellationToken::new())
        .await
        .unwrap();
    assert!(session.is_completed());

    let seen = seen.lock().unwrap();
    let done: Vec<u64> = seen.iter().map(|(d, _)| *d).collect();
    assert_eq!(done, vec![1_000, 2_000, 2_500]);
    assert!(seen[0].1.starts_with("fragment 0 committed"));
}

#[tokio::test]
async fn manifest_drives_download_to_file() {
    let cluster = Cluster::trusted(2);
    let data = pattern(4_321);
    let session = cluster
        .orchestrator(settings(1_024, 2))
        .transfer(&data[..], &CancellationToken::new())
        .await
        .unwrap();

    let manifest = TransferManifest::from_session(&session, Some("blob.bin".into())).unwrap();
    let manifest = TransferManifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
    assert_eq!(manifest.total_size, 4_321);
    assert_eq!(manifest.roots.len(), 5);

    let dir = tempfile::TempDir::new().unwrap();
    let out_path = dir.path().join("blob.bin");
    let mut out = tokio::fs::File::create(&out_path).await.unwrap();
    let written = cluster
        .verifier()
        .with_prefetch(3)
        .retrieve_into(&manifest.roots, &mut out, &CancellationToken::new())
        .await
        .unwrap();
    drop(out);

    assert_eq!(written, 4_321);
    assert_eq!(std::fs::read(&out_path).unwrap(), data);
}

#[tokio::test]
async fn source_delivering_short_reads_still_fragments_exactly() {
    let cluster = Cluster::trusted(1);
    let data = pattern(700);
    let source = tokio_test::io::Builder::new()
        .read(&data[..1])
        .read(&data[1..250])
        .read(&data[250..251])
        .read(&data[251..])
        .build();

    let session = cluster
        .orchestrator(settings(256, 1))
        .transfer(source, &CancellationToken::new())
        .await
        .unwrap();

    let lengths: Vec<u64> = session.records().iter().map(|r| r.length).collect();
    assert_eq!(lengths, vec![256, 256, 188]);
}

#[tokio::test]
async fn identical_fragments_upload_concurrently() {
    let cluster = Cluster::trusted(2);
    cluster
        .transport
        .inject(|f| f.slow_puts = Some(Duration::from_millis(2)));
    let data = vec![0u8; 64 * 16];

    for _ in 0..5 {
        let session = cluster
            .orchestrator(settings(64, 2).with_task_size(16).with_workers(4))
            .transfer(&data[..], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status(), &SessionStatus::Completed);
        assert_eq!(session.records().len(), 16);
        let distinct: HashSet<_> = session.roots().into_iter().collect();
        assert_eq!(distinct.len(), 1);

        let restored = cluster.retrieve_all(&session.roots()).await.unwrap();
        assert_eq!(restored.as_ref(), &data[..]);
    }
}

#[tokio::test]
async fn repeated_blocks_round_trip_across_replicas() {
    let cluster = Cluster::trusted(3);
    let block = pattern(200);
    // Each block spans two fragments, so even and odd fragments repeat
    let mut data = Vec::new();
    for _ in 0..5 {
        data.extend_from_slice(&block);
    }
    data.extend_from_slice(&pattern(90));

    let session = cluster
        .orchestrator(settings(100, 2).with_workers(4))
        .transfer(&data[..], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.status(), &SessionStatus::Completed);
    let roots = session.roots();
    assert_eq!(roots.len(), 11);
    assert_eq!(roots[0], roots[2]);
    assert_eq!(roots[1], roots[3]);
    assert!(session.records().iter().all(|r| r.replication_achieved == 2));

    let restored = cluster.retrieve_all(&roots).await.unwrap();
    assert_eq!(restored.as_ref(), &data[..]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_payload_survives_the_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..3_000),
        fragment_size in 16usize..700,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (session, restored) = rt.block_on(async {
            let cluster = Cluster::trusted(2);
            let session = cluster
                .orchestrator(settings(fragment_size, 1).with_workers(3))
                .transfer(&data[..], &CancellationToken::new())
                .await
                .unwrap();
            let restored = cluster.retrieve_all(&session.roots()).await.unwrap();
            (session, restored)
        });

        prop_assert!(session.is_completed());
        prop_assert_eq!(session.records().len(), data.len().div_ceil(fragment_size));
        prop_assert_eq!(restored.as_ref(), &data[..]);
    }
}

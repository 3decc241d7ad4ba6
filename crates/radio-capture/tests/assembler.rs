mod common;

use std::sync::Arc;

use chrono::{Local, TimeZone};
use common::PassthroughCodec;
use radio_capture::assembler::Assembler;
use radio_capture::playlist::SegmentRef;
use radio_capture::store::SegmentStore;
use radio_capture::CaptureError;
use tempfile::TempDir;

async fn cache(store: &SegmentStore, sequence: u64, body: &[u8]) {
    let segment = SegmentRef {
        sequence,
        url: format!("https://cdn.example.com/zc1469/seg_{}.aac", sequence),
    };
    tokio::fs::write(store.cache_path_for(&segment), body)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_assembles_in_sequence_order_and_skips_empty_files() {
    let dir = TempDir::new().unwrap();
    let store = SegmentStore::new(dir.path().join("cache"));
    store.prepare().await.unwrap();

    // Written in completion order, not sequence order.
    cache(&store, 1000, b"c").await;
    cache(&store, 8, b"a").await;
    cache(&store, 999, b"").await;
    cache(&store, 99, b"b").await;

    let codec = Arc::new(PassthroughCodec::default());
    let assembler = Assembler::new(codec.clone(), dir.path().join("out"));
    let started = Local.with_ymd_and_hms(2024, 5, 1, 9, 5, 7).unwrap();

    let recording = assembler.assemble(&store, "Z100", started).await.unwrap();

    assert_eq!(recording.segments, 3);
    assert_eq!(std::fs::read(&recording.path).unwrap(), b"abc");
    assert_eq!(
        recording.path.file_name().unwrap().to_str().unwrap(),
        "Z100_2024-05-01_09-05-07.mp3"
    );
    assert_eq!(codec.decoded(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    // Assembly leaves the cache alone.
    assert_eq!(store.cached_segments().await.unwrap().len(), 4);

    let again = assembler.assemble(&store, "Z100", started).await.unwrap();
    assert_eq!(
        again.path.file_name().unwrap().to_str().unwrap(),
        "Z100_2024-05-01_09-05-07-1.mp3"
    );
}

#[tokio::test]
async fn test_only_empty_files_is_no_segments() {
    let dir = TempDir::new().unwrap();
    let store = SegmentStore::new(dir.path().join("cache"));
    store.prepare().await.unwrap();
    cache(&store, 1, b"").await;

    let assembler = Assembler::new(Arc::new(PassthroughCodec::default()), dir.path().join("out"));
    let err = assembler
        .assemble(&store, "Z100", Local::now())
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::NoSegments));
    assert!(!dir.path().join("out").exists());
}

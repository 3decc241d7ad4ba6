mod common;

use std::time::Duration;

use common::{segment_body, MockOrigin};
use radio_capture::fetcher::SegmentFetcher;
use radio_capture::playlist::SegmentRef;
use radio_capture::store::SegmentStore;
use radio_capture::CaptureError;
use tempfile::TempDir;

fn fetcher() -> SegmentFetcher {
    SegmentFetcher::with_retry(reqwest::Client::new(), 7, Duration::from_millis(5))
}

async fn store(dir: &TempDir) -> SegmentStore {
    let store = SegmentStore::new(dir.path().join("cache"));
    store.prepare().await.unwrap();
    store
}

#[tokio::test]
async fn test_fetch_succeeds_on_last_attempt() {
    let origin = MockOrigin::start().await;
    origin.fail_segment("seg_42.aac", 6);
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;

    let segment = SegmentRef {
        sequence: 42,
        url: origin.segment_url("seg_42.aac"),
    };
    let fetched = fetcher().fetch(&segment, &store).await.unwrap();

    assert_eq!(fetched.attempts, 7);
    assert_eq!(fetched.sequence, 42);
    assert_eq!(origin.segment_hits("seg_42.aac"), 7);
    assert_eq!(std::fs::read(&fetched.path).unwrap(), segment_body("seg_42.aac"));
    assert_eq!(fetched.path, store.cache_path_for(&segment));
}

#[tokio::test]
async fn test_fetch_gives_up_after_seven_attempts() {
    let origin = MockOrigin::start().await;
    origin.fail_segment("seg_43.aac", 7);
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;

    let segment = SegmentRef {
        sequence: 43,
        url: origin.segment_url("seg_43.aac"),
    };
    let err = fetcher().fetch(&segment, &store).await.unwrap_err();

    match err {
        CaptureError::FetchFailed { url, attempts } => {
            assert_eq!(attempts, 7);
            assert_eq!(url, segment.url);
        }
        other => panic!("expected FetchFailed, got {:?}", other),
    }
    assert_eq!(origin.segment_hits("seg_43.aac"), 7);
    assert!(!store.cache_path_for(&segment).exists());
    assert!(store.cached_segments().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_first_try_uses_one_request() {
    let origin = MockOrigin::start().await;
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;

    let segment = SegmentRef {
        sequence: 7,
        url: origin.segment_url("7.aac"),
    };
    let fetched = fetcher().fetch(&segment, &store).await.unwrap();

    assert_eq!(fetched.attempts, 1);
    assert_eq!(fetched.bytes, segment_body("7.aac").len() as u64);
    assert_eq!(origin.segment_hits("7.aac"), 1);
}

#[tokio::test]
async fn test_unreachable_host_is_fetch_failed() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let fetcher = SegmentFetcher::with_retry(reqwest::Client::new(), 2, Duration::from_millis(1));

    // Port 9 (discard) on localhost is expected to refuse connections.
    let segment = SegmentRef {
        sequence: 1,
        url: "http://127.0.0.1:9/seg_1.aac".to_string(),
    };
    let err = fetcher.fetch(&segment, &store).await.unwrap_err();
    assert!(matches!(err, CaptureError::FetchFailed { attempts: 2, .. }));
}

use std::time::{Duration, Instant};

use containers::U256;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::sync::{NetworkStatus, NetworkStatusTracker};

fn claim(peer: &str, td: u64, best: u64) -> NetworkStatus {
    NetworkStatus {
        display_id: peer.to_string(),
        total_difficulty: U256::from(td),
        best_number: best,
        ..NetworkStatus::default()
    }
}

#[test]
fn test_replaced_only_by_strictly_heavier_claim() {
    let mut tracker = NetworkStatusTracker::new(Duration::from_secs(1));
    let start = Instant::now();

    assert!(tracker.offer(start, claim("aaaaaa", 10, 10)));
    assert!(!tracker.offer(start + Duration::from_secs(2), claim("bbbbbb", 10, 11)));
    assert_eq!(tracker.status().display_id, "aaaaaa");

    assert!(tracker.offer(start + Duration::from_secs(4), claim("cccccc", 11, 11)));
    assert_eq!(tracker.status().best_number, 11);
}

#[rstest]
#[case::inside_window(Duration::from_millis(300), false)]
#[case::at_window_edge(Duration::from_secs(1), false)]
#[case::after_window(Duration::from_millis(1_001), true)]
fn test_one_update_per_window(#[case] gap: Duration, #[case] replaced: bool) {
    let mut tracker = NetworkStatusTracker::new(Duration::from_secs(1));
    let start = Instant::now();
    assert!(tracker.offer(start, claim("aaaaaa", 10, 10)));

    assert_eq!(tracker.offer(start + gap, claim("bbbbbb", 20, 20)), replaced);
}

#[test]
fn test_lighter_claim_still_opens_window() {
    let mut tracker = NetworkStatusTracker::new(Duration::from_secs(1));
    let start = Instant::now();
    tracker.offer(start, claim("aaaaaa", 10, 10));

    assert!(!tracker.offer(start + Duration::from_secs(2), claim("bbbbbb", 5, 5)));
    assert!(!tracker.offer(start + Duration::from_millis(2_500), claim("cccccc", 50, 50)));
    assert!(tracker.offer(start + Duration::from_millis(3_500), claim("cccccc", 50, 50)));
}

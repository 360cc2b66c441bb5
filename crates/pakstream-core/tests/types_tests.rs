use std::time::Duration;

use pakstream_core::types::duration_to_us;
use pakstream_core::{FileRange, RequestStatus};

#[test]
fn only_completed_and_failed_are_terminal() {
    assert!(RequestStatus::Completed.is_terminal());
    assert!(RequestStatus::Failed.is_terminal());
    for status in [
        RequestStatus::Pending,
        RequestStatus::Queued,
        RequestStatus::Processing,
    ] {
        assert!(!status.is_terminal(), "{status:?} should not be terminal");
    }
}

#[test]
fn file_range_end_detects_overflow() {
    assert_eq!(FileRange::new(10, 20).end(), Some(30));
    assert_eq!(FileRange::new(u64::MAX, 1).end(), None);
    assert_eq!(FileRange::new(u64::MAX, 0).end(), Some(u64::MAX));
}

#[test]
fn durations_convert_to_microseconds() {
    assert_eq!(duration_to_us(Duration::from_millis(3)), 3_000);
    assert_eq!(duration_to_us(Duration::MAX), u64::MAX);
}

#[test]
fn request_status_serializes_by_name() -> Result<(), Box<dyn std::error::Error>> {
    let encoded = serde_json::to_string(&RequestStatus::Processing)?;
    assert_eq!(encoded, "\"Processing\"");
    let decoded: RequestStatus = serde_json::from_str(&encoded)?;
    assert_eq!(decoded, RequestStatus::Processing);
    Ok(())
}

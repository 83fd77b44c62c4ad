//! Evidence records produced by test executions.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The test reached a positive conclusion.
pub const TEST_PASSED: i32 = 1;
/// The test reached a negative conclusion.
pub const TEST_FAILED: i32 = -1;
/// Something prevented the test from taking a definitive stand.
pub const TEST_INCONCLUSIVE: i32 = 0;

/// One test's evidence record.
///
/// `result_code` semantics: > 0 passed, 0 inconclusive, < 0 failed.
/// Timestamps are RFC 3339 UTC with sub-second precision and are kept as
/// strings so they survive persistence and forwarding byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_name: String,
    pub test_description: String,
    pub result_code: i32,
    pub timestamp_start: String,
    pub timestamp_end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<Map<String, Value>>,
}

/// The current instant formatted the way every timestamp on the wire is.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_rfc3339_utc_with_subseconds() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('.'));
        chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
    }

    #[test]
    fn additional_info_is_omitted_when_absent() {
        let report = TestReport {
            test_name: "t".into(),
            test_description: "d".into(),
            result_code: TEST_PASSED,
            timestamp_start: "2024-01-01T00:00:00.000000Z".into(),
            timestamp_end: "2024-01-01T00:00:00.000001Z".into(),
            additional_info: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("additional_info"));
    }

    #[test]
    fn end_is_not_before_start() {
        let start = timestamp_now();
        let end = timestamp_now();
        assert!(end >= start);
    }
}

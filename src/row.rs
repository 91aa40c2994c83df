use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;

// Field bounds include one reserved terminator byte, so stored values are
// always strictly shorter than these limits.
pub const MAX_ID_LEN: usize = 256;
pub const MAX_SYMBOLS_LEN: usize = 256;
pub const MAX_USER_LEN: usize = 32;
pub const MAX_ADDR_LEN: usize = 48;

pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Outcome classification of a scanned message.
///
/// The integer codes are part of the persisted file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Reject,
    SoftReject,
    RewriteSubject,
    AddHeader,
    Greylist,
    #[default]
    NoAction,
}

impl Action {
    /// Ordered from the most to the least severe.
    pub const ALL: [Action; 6] = [
        Action::Reject,
        Action::SoftReject,
        Action::RewriteSubject,
        Action::AddHeader,
        Action::Greylist,
        Action::NoAction,
    ];

    pub fn code(self) -> i64 {
        match self {
            Action::Reject => 0,
            Action::SoftReject => 1,
            Action::RewriteSubject => 2,
            Action::AddHeader => 3,
            Action::Greylist => 4,
            Action::NoAction => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Action::ALL.iter().copied().find(|a| a.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Reject => "reject",
            Action::SoftReject => "soft reject",
            Action::RewriteSubject => "rewrite subject",
            Action::AddHeader => "add header",
            Action::Greylist => "greylist",
            Action::NoAction => "no action",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One completed request as kept in the history.
///
/// The readiness flag is not part of the row; it lives on the slot that owns
/// it (see [`crate::ring_buffer::RingBuffer`]).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Row {
    /// Seconds since the Unix epoch, with fraction.
    pub timestamp: f64,
    pub from_address: String,
    pub message_id: String,
    pub user: String,
    pub symbols: String,
    pub score: f64,
    pub required_score: f64,
    pub action: Action,
    pub scan_time: f64,
    pub length: u64,
}

impl Row {
    pub fn set_from_address(&mut self, value: &str) {
        self.from_address = bounded(value, MAX_ADDR_LEN);
    }

    pub fn set_message_id(&mut self, value: &str) {
        self.message_id = bounded(value, MAX_ID_LEN);
    }

    pub fn set_user(&mut self, value: &str) {
        self.user = bounded(value, MAX_USER_LEN);
    }

    pub fn set_symbols(&mut self, value: &str) {
        self.symbols = bounded(value, MAX_SYMBOLS_LEN);
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9) as u32;
        Utc.timestamp_opt(secs as i64, nanos.min(999_999_999)).single()
    }
}

/// Copies at most `limit - 1` bytes of `value`, cutting on a char boundary.
pub fn bounded(value: &str, limit: usize) -> String {
    let max = limit.saturating_sub(1);
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes_are_stable() {
        assert_eq!(Action::Reject.code(), 0);
        assert_eq!(Action::NoAction.code(), 5);
        for action in Action::ALL {
            assert_eq!(Action::from_code(action.code()), Some(action));
        }
        assert_eq!(Action::from_code(6), None);
        assert_eq!(Action::from_code(-1), None);
    }

    #[test]
    fn test_action_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(Action::SoftReject).unwrap(),
            serde_json::json!("soft_reject")
        );
        let row = serde_json::to_value(Row::default()).unwrap();
        assert_eq!(row["action"], "no_action");
    }

    #[test]
    fn test_default_row_is_no_action() {
        let row = Row::default();
        assert_eq!(row.action, Action::NoAction);
        assert!(row.symbols.is_empty());
        assert_eq!(row.score, 0.0);
    }

    #[test]
    fn test_bounded_truncates_below_limit() {
        let long = "a".repeat(100);
        let mut row = Row::default();
        row.set_user(&long);
        assert_eq!(row.user.len(), MAX_USER_LEN - 1);

        row.set_message_id("short-id");
        assert_eq!(row.message_id, "short-id");
    }

    #[test]
    fn test_bounded_respects_char_boundaries() {
        // 'é' is two bytes; a limit of 4 leaves room for 3 bytes
        let value = "éééé";
        let cut = bounded(value, 4);
        assert_eq!(cut, "é");
        assert!(cut.len() < 4);
    }

    #[test]
    fn test_received_at_converts_fractional_seconds() {
        let row = Row {
            timestamp: 1_700_000_000.5,
            ..Default::default()
        };
        let when = row.received_at().unwrap();
        assert_eq!(when.timestamp(), 1_700_000_000);
        assert_eq!(when.timestamp_subsec_millis(), 500);
    }
}

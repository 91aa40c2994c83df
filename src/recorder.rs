use crate::ring_buffer::RingBuffer;
use crate::row::{Action, Row, MAX_SYMBOLS_LEN, UNKNOWN_ADDRESS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A rule or feature that fired while scoring a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub score: f64,
}

impl Symbol {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Scoring outcome of one message. Symbols keep the order they fired in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    pub score: f64,
    pub symbols: Vec<Symbol>,
}

/// Everything the history needs to know about one finished request.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub received_at: SystemTime,
    pub started: Instant,
    pub from_address: Option<String>,
    pub message_id: String,
    pub user: Option<String>,
    pub length: u64,
    pub result: Option<ScanResult>,
}

impl Default for ScanEvent {
    fn default() -> Self {
        Self {
            received_at: SystemTime::now(),
            started: Instant::now(),
            from_address: None,
            message_id: String::new(),
            user: None,
            length: 0,
            result: None,
        }
    }
}

/// Maps a score to the action taken and the threshold that applied.
pub trait ActionClassifier: Send + Sync {
    fn classify(&self, result: &ScanResult) -> (Action, f64);
}

/// Score thresholds per action. Unset actions are never selected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_reject: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_subject: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_header: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greylist: Option<f64>,
}

impl ActionThresholds {
    pub fn threshold(&self, action: Action) -> Option<f64> {
        match action {
            Action::Reject => self.reject,
            Action::SoftReject => self.soft_reject,
            Action::RewriteSubject => self.rewrite_subject,
            Action::AddHeader => self.add_header,
            Action::Greylist => self.greylist,
            Action::NoAction => None,
        }
    }
}

impl ActionClassifier for ActionThresholds {
    fn classify(&self, result: &ScanResult) -> (Action, f64) {
        let mut selected = Action::NoAction;
        let mut best: Option<f64> = None;

        for action in Action::ALL {
            if let Some(threshold) = self.threshold(action) {
                if result.score >= threshold && best.map_or(true, |b| threshold > b) {
                    selected = action;
                    best = Some(threshold);
                }
            }
        }

        (selected, self.reject.unwrap_or(0.0))
    }
}

/// Writes finished requests into the shared history.
pub struct HistoryRecorder {
    buffer: Arc<RingBuffer>,
    classifier: Arc<dyn ActionClassifier>,
}

impl HistoryRecorder {
    pub fn new(buffer: Arc<RingBuffer>, classifier: Arc<dyn ActionClassifier>) -> Self {
        Self { buffer, classifier }
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    /// Records one event. Never fails: losing the wraparound race drops this
    /// update, nothing else does.
    pub fn record(&self, event: &ScanEvent) {
        let Some(index) = self.buffer.claim_slot() else {
            return;
        };

        self.buffer.mark_in_progress(index);

        let written = self
            .buffer
            .write_row(index, |row| self.populate(row, event));

        if written {
            self.buffer.mark_complete(index);
        }
    }

    fn populate(&self, row: &mut Row, event: &ScanEvent) {
        *row = Row::default();

        row.set_from_address(event.from_address.as_deref().unwrap_or(UNKNOWN_ADDRESS));
        row.timestamp = event
            .received_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        row.set_message_id(&event.message_id);
        row.set_user(event.user.as_deref().unwrap_or(""));

        match &event.result {
            None => {
                row.action = Action::NoAction;
            }
            Some(result) => {
                let (action, required_score) = self.classifier.classify(result);
                row.score = result.score;
                row.action = action;
                row.required_score = required_score;
                row.set_symbols(&join_symbols(&result.symbols, MAX_SYMBOLS_LEN));
            }
        }

        row.scan_time = event.started.elapsed().as_secs_f64();
        row.length = event.length;
    }
}

/// Joins symbol names with `", "` while the result stays shorter than
/// `limit` bytes. Stops at the first name that does not fit.
pub fn join_symbols(symbols: &[Symbol], limit: usize) -> String {
    let max = limit.saturating_sub(1);
    let mut joined = String::new();

    for symbol in symbols {
        let extra = if joined.is_empty() {
            symbol.name.len()
        } else {
            symbol.name.len() + 2
        };
        if joined.len() + extra > max {
            break;
        }
        if !joined.is_empty() {
            joined.push_str(", ");
        }
        joined.push_str(&symbol.name);
    }

    joined
}

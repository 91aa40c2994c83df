//! Saving and restoring the history as a JSON array of row objects.

use crate::error::HistoryError;
use crate::ring_buffer::RingBuffer;
use crate::row::{Action, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Marker at the start of files written by the old binary format.
pub const LEGACY_MAGIC: [u8; 4] = *b"rsh1";

#[derive(Serialize)]
struct StoredRow<'a> {
    time: f64,
    id: &'a str,
    symbols: &'a str,
    user: &'a str,
    from: &'a str,
    len: u64,
    scan_time: f64,
    score: f64,
    required_score: f64,
    action: i64,
}

impl<'a> From<&'a Row> for StoredRow<'a> {
    fn from(row: &'a Row) -> Self {
        Self {
            time: row.timestamp,
            id: &row.message_id,
            symbols: &row.symbols,
            user: &row.user,
            from: &row.from_address,
            len: row.length,
            scan_time: row.scan_time,
            score: row.score,
            required_score: row.required_score,
            action: row.action.code(),
        }
    }
}

/// Writes every completed row to `path`, replacing its contents.
///
/// The document goes to a temporary file next to `path` that is renamed
/// over it, so a failed save leaves the previous checkpoint intact.
/// Returns the number of rows written.
pub fn save(buffer: &RingBuffer, path: impl AsRef<Path>) -> Result<usize, HistoryError> {
    let path = path.as_ref();

    let rows = buffer.snapshot();
    let stored: Vec<StoredRow<'_>> = rows.iter().map(StoredRow::from).collect();
    let encoded = serde_json::to_vec(&stored)
        .map_err(|e| HistoryError::format(path, format!("cannot encode history: {e}")))?;

    let mut file = create_temp_beside(path)?;
    file.write_all(&encoded)
        .and_then(|_| file.flush())
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| HistoryError::io(path, e))?;
    file.persist(path)
        .map_err(|e| HistoryError::io(path, e.error))?;

    log::debug!("Saved {} history rows to {}", stored.len(), path.display());
    Ok(stored.len())
}

fn create_temp_beside(path: &Path) -> Result<NamedTempFile, HistoryError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = NamedTempFile::new_in(dir).map_err(|e| HistoryError::io(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| HistoryError::io(path, e))?;
    }
    Ok(file)
}

/// Restores rows from `path` into `buffer` and moves the cursor past them.
///
/// Must run before any recorder writes to `buffer`. On error the buffer is
/// left exactly as it was.
pub fn load(buffer: &RingBuffer, path: impl AsRef<Path>) -> Result<usize, HistoryError> {
    let path = path.as_ref();

    fs::metadata(path).map_err(|e| HistoryError::io(path, e))?;
    let mut file = File::open(path).map_err(|e| HistoryError::io(path, e))?;

    let mut content = Vec::new();
    (&mut file)
        .take(LEGACY_MAGIC.len() as u64)
        .read_to_end(&mut content)
        .map_err(|e| HistoryError::io(path, e))?;

    if content[..] == LEGACY_MAGIC[..] {
        log::warn!(
            "Cannot read history from old format {}, it will be replaced on next save",
            path.display()
        );
        return Err(HistoryError::LegacyFormat {
            path: path.to_path_buf(),
        });
    }

    file.read_to_end(&mut content)
        .map_err(|e| HistoryError::io(path, e))?;

    let top: Value = serde_json::from_slice(&content).map_err(|e| {
        log::warn!("Cannot parse history file {}: {e}", path.display());
        HistoryError::format(path, e.to_string())
    })?;

    let Value::Array(elements) = top else {
        log::warn!("Invalid object type read from {}", path.display());
        return Err(HistoryError::format(path, "top-level value is not an array"));
    };

    let capacity = buffer.capacity();
    if elements.len() > capacity {
        log::warn!(
            "Stored history is larger than the current one: {} (file) vs {} (history)",
            elements.len(),
            capacity
        );
    } else if elements.len() < capacity {
        log::info!(
            "Stored history is smaller than the current one: {} (file) vs {} (history)",
            elements.len(),
            capacity
        );
    }

    let n = elements.len().min(capacity);
    for (index, element) in elements.iter().take(n).enumerate() {
        let restored = element.as_object().map(row_from_object);
        buffer.restore_row(index, restored);
    }
    buffer.set_cursor(n);

    log::info!("Loaded {n} history rows from {}", path.display());
    Ok(n)
}

/// Builds a row from the known keys of `object`. Missing keys and values of
/// the wrong type are ignored.
fn row_from_object(object: &Map<String, Value>) -> Row {
    let float = |key: &str| object.get(key).filter(|v| v.is_f64()).and_then(Value::as_f64);
    let string = |key: &str| object.get(key).and_then(Value::as_str);

    let mut row = Row::default();

    if let Some(time) = float("time") {
        row.timestamp = time;
    }
    if let Some(id) = string("id") {
        row.set_message_id(id);
    }
    if let Some(symbols) = string("symbols") {
        row.set_symbols(symbols);
    }
    if let Some(user) = string("user") {
        row.set_user(user);
    }
    if let Some(from) = string("from") {
        row.set_from_address(from);
    }
    if let Some(len) = object.get("len").and_then(Value::as_u64) {
        row.length = len;
    }
    if let Some(scan_time) = float("scan_time") {
        row.scan_time = scan_time;
    }
    if let Some(score) = float("score") {
        row.score = score;
    }
    if let Some(required_score) = float("required_score") {
        row.required_score = required_score;
    }
    if let Some(action) = object
        .get("action")
        .and_then(Value::as_i64)
        .and_then(Action::from_code)
    {
        row.action = action;
    }

    row
}

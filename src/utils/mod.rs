// schemarestore/src/utils/mod.rs
use chrono::Local;

/// Timestamp fragment for generated artifact names
/// (`import_errors_2025-03-14_10_30_00.jsonl`).
pub fn filename_timestamp() -> String {
    Local::now().format("%Y-%m-%d_%H_%M_%S").to_string()
}

/// Human timestamp for console lines and attempt records.
pub fn now_display() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// First line of a (possibly multi-line) server error, for one-line console
/// reporting. The full text still goes into the error log.
pub fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim_end()
}

// schemarestore/src/engine/mod.rs
pub mod mssql;
pub mod policy;

use async_trait::async_trait;
use thiserror::Error;

use crate::secrets::strip;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The server rejected the batch. Carries the SQL Server error number
    /// the retry policy classifies on.
    #[error("server error {number}: {message}")]
    Server { number: u32, message: String },

    /// The session itself is gone; no further batch can run on it.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One logical connection executing batches sequentially. The executor only
/// ever talks to this trait; production uses [`mssql::MssqlEngine`], tests
/// script their own.
#[async_trait]
pub trait ScriptEngine: Send {
    async fn run_batch(&mut self, sql: &str) -> Result<(), EngineError>;
}

/// Splits a script on `GO` separator lines into the batches the server
/// actually accepts. `GO` is a client-side convention: it must sit alone on
/// a line (an optional repeat count is recognized and treated as a plain
/// separator), comparison happens on comment-stripped text so `GO -- note`
/// still separates, and empty batches are dropped.
pub fn split_batches(sql: &str) -> Vec<String> {
    let stripped = strip::strip_sql_comments(sql);
    let mut batches = Vec::new();
    let mut current = String::new();
    // The stripper preserves line structure, so the two iterators stay
    // aligned.
    for (original_line, stripped_line) in sql.lines().zip(stripped.lines()) {
        if is_go_line(stripped_line) {
            push_batch(&mut batches, &mut current);
        } else {
            current.push_str(original_line);
            current.push('\n');
        }
    }
    push_batch(&mut batches, &mut current);
    batches
}

fn is_go_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return false;
    };
    if !head.eq_ignore_ascii_case("GO") {
        return false;
    }
    match parts.next() {
        None => true,
        Some(count) => {
            !count.is_empty()
                && count.chars().all(|c| c.is_ascii_digit())
                && parts.next().is_none()
        }
    }
}

fn push_batch(batches: &mut Vec<String>, current: &mut String) {
    if current.trim().is_empty() {
        current.clear();
    } else {
        batches.push(std::mem::take(current));
    }
}

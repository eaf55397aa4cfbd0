//! Deadlines for blocking calls and trimming of captured output.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const LINE_LIMIT: usize = 200;
const TOTAL_LIMIT: usize = 1000;

/// Run `operation` on its own thread, waiting at most `limit`.
///
/// `None` means the deadline passed or the operation panicked. A timed out
/// operation keeps running detached.
pub fn with_timeout<F, T>(limit: Duration, operation: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (done, outcome) = mpsc::sync_channel(1);
    thread::spawn(move || done.send(operation()));
    outcome.recv_timeout(limit).ok()
}

/// Keep the first `max_lines` lines of `output`, each cut to 200 chars,
/// and at most about 1000 chars overall.
pub fn sanitize_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.trim().lines().collect();
    let mut kept: Vec<String> = Vec::new();
    let mut size = 0;

    for line in lines.iter().take(max_lines) {
        let shortened = match line.char_indices().nth(LINE_LIMIT) {
            Some((cut, _)) => format!("{}...", &line[..cut]),
            None => line.to_string(),
        };
        size += shortened.len() + 1;
        if size > TOTAL_LIMIT {
            return kept.join("\n") + "...[truncated]";
        }
        kept.push(shortened);
    }

    let mut trimmed = kept.join("\n");
    if lines.len() > max_lines {
        trimmed.push_str("\n...[additional output truncated]");
    }
    trimmed
}

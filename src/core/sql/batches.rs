use regex::Regex;
use std::sync::LazyLock;

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*GO\s*;?\s*$").expect("separator pattern is valid"));

/// True when `line` is a batch separator (`GO`, optionally followed by `;`).
pub fn is_separator(line: &str) -> bool {
    SEPARATOR.is_match(line)
}

/// Split a script on `GO` lines. Empty batches are dropped; a script without
/// any separator comes back as a single batch.
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        let batch = current.join("\n");
        let batch = batch.trim();
        if !batch.is_empty() {
            batches.push(batch.to_string());
        }
        current.clear();
    };

    for line in script.split('\n') {
        if is_separator(line) {
            flush(&mut current);
        } else {
            current.push(line);
        }
    }
    flush(&mut current);

    batches
}

//! Global directive extraction for reload-vs-restart decisions.

use std::collections::BTreeMap;

/// Values of `keys` set at global scope in an INI-style config.
///
/// Global scope is anything before the first section header, plus a
/// `[global]` section. Keys are matched case-insensitively with whitespace
/// collapsed, so `Bind Interfaces  Only` matches `bind interfaces only`.
pub fn global_directives(text: &str, keys: &[&str]) -> BTreeMap<String, String> {
    let wanted: Vec<String> = keys.iter().map(|k| normalize(k)).collect();
    let mut found = BTreeMap::new();
    let mut in_global = true;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_global = section.trim().eq_ignore_ascii_case("global");
            continue;
        }
        if !in_global {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = normalize(key);
            if wanted.contains(&key) {
                found.insert(key, value.trim().to_string());
            }
        }
    }

    found
}

/// Whether any of `keys` differs between two config texts.
pub fn restart_required(previous: &str, next: &str, keys: &[&str]) -> bool {
    !keys.is_empty() && global_directives(previous, keys) != global_directives(next, keys)
}

fn normalize(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

//! Shared helpers for logging untrusted text and quoting script arguments.

use std::env;
use std::path::Path;

const DEFAULT_LOG_LIMIT: usize = 160;
const DIAGNOSTIC_LOG_LIMIT: usize = 512;

/// Check whether a program exists in $PATH.
pub fn program_in_path(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(program).is_file();
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Returns true when diagnostics are explicitly enabled via environment.
pub fn diagnostic_mode() -> bool {
    diagnostic_mode_from(env::var("TWINAOS_DIAGNOSTIC").ok().as_deref())
}

fn diagnostic_mode_from(value: Option<&str>) -> bool {
    matches!(
        value
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Returns the effective log snippet limit for the current mode.
pub fn log_limit() -> usize {
    if diagnostic_mode() {
        DIAGNOSTIC_LOG_LIMIT
    } else {
        DEFAULT_LOG_LIMIT
    }
}

/// Strips newlines and caps length so command output stays on one log line.
pub fn sanitize_log_value(value: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    let mut cleaned = String::with_capacity(max_len.min(value.len()));
    let mut truncated = false;
    for (count, ch) in value.chars().enumerate() {
        if count >= max_len {
            truncated = true;
            break;
        }
        cleaned.push(if ch == '\n' || ch == '\r' { ' ' } else { ch });
    }
    let trimmed = cleaned.trim();
    if truncated {
        format!("{trimmed}...")
    } else {
        trimmed.to_string()
    }
}

/// Produces a safe log snippet honoring diagnostic mode limits.
pub fn log_snippet(value: &str) -> String {
    sanitize_log_value(value, log_limit())
}

/// Quote a value for a POSIX shell script as a single literal word.
pub fn shell_quote(value: &str) -> String {
    let plain = |ch: char| {
        ch.is_ascii_alphanumeric()
            || matches!(ch, '/' | '_' | '-' | '.' | '=' | '%' | ':' | '+' | ',' | '@')
    };
    if !value.is_empty() && value.chars().all(plain) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_log_value_strips_newlines_and_caps() {
        assert_eq!(sanitize_log_value("ab\ncd\rEF", 5), "ab cd...");
        assert_eq!(sanitize_log_value("ok", 5), "ok");
        assert_eq!(sanitize_log_value("anything", 0), "");
    }

    #[test]
    fn diagnostic_mode_parses_expected_values() {
        assert!(diagnostic_mode_from(Some("1")));
        assert!(diagnostic_mode_from(Some("YES")));
        assert!(diagnostic_mode_from(Some("on")));
        assert!(!diagnostic_mode_from(Some("off")));
        assert!(!diagnostic_mode_from(None));
    }

    #[test]
    fn shell_quote_leaves_plain_words_and_wraps_the_rest() {
        assert_eq!(shell_quote("alice"), "alice");
        assert_eq!(shell_quote("/bin/bash"), "/bin/bash");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("Alice Liddell"), "'Alice Liddell'");
        assert_eq!(shell_quote("O'Hara"), r"'O'\''Hara'");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }
}

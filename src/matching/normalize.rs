//! Text normalization for embedding input.
//!
//! Prepares extracted document text for the embedding model:
//! 1. Drop control characters
//! 2. Collapse whitespace runs into a single space
//! 3. Trim
//!
//! Truncation to the model budget happens separately, so the normalized text
//! (and therefore the content hash) does not depend on which model is loaded.

/// Normalize raw document text.
///
/// Control characters other than whitespace are removed; whitespace (including
/// newlines, tabs and non-breaking spaces) collapses to one ASCII space.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() || ch == '\u{FEFF}' {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out
}

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers the last word boundary inside the budget so the model never sees a
/// half word. Returns the (possibly shortened) text and whether it was cut.
pub fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    let byte_end = match text.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return (text.to_string(), false),
    };

    let head = &text[..byte_end];
    let cut = if text[byte_end..].starts_with(char::is_whitespace) {
        head
    } else {
        match head.rfind(' ') {
            Some(space) if space > 0 => &head[..space],
            _ => head,
        }
    };

    (cut.trim_end().to_string(), true)
}

/// Hash of the normalized text, used to decide whether a stored embedding is
/// still valid. Stable across builds (SHA-256 prefix), so it can be persisted.
pub fn content_hash(normalized: &str) -> u64 {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(normalized.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t  "), "");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(
            normalize("  Senior\tRust\n\nEngineer  "),
            "Senior Rust Engineer"
        );
    }

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(normalize("Data\u{0}base\u{7} admin"), "Database admin");
        assert_eq!(normalize("\u{FEFF}Resume"), "Resume");
    }

    #[test]
    fn test_non_breaking_space_is_whitespace() {
        assert_eq!(normalize("machine\u{00A0}learning"), "machine learning");
    }

    #[test]
    fn test_idempotent() {
        let once = normalize(" a \r\n b\u{1}c ");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        let (text, truncated) = truncate("short text", 100);
        assert_eq!(text, "short text");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_exact_budget_untouched() {
        let (text, truncated) = truncate("abcd", 4);
        assert_eq!(text, "abcd");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_on_word_boundary() {
        let (text, truncated) = truncate("alpha beta gamma", 12);
        assert_eq!(text, "alpha beta");
        assert!(truncated);
    }

    #[test]
    fn test_truncate_budget_ending_on_word() {
        let (text, truncated) = truncate("rust tokio axum", 10);
        assert_eq!(text, "rust tokio");
        assert!(truncated);
    }

    #[test]
    fn test_truncate_single_long_word() {
        let (text, truncated) = truncate(&"x".repeat(50), 10);
        assert_eq!(text, "x".repeat(10));
        assert!(truncated);
    }

    #[test]
    fn test_truncate_respects_utf8() {
        let (text, truncated) = truncate("ééééé", 3);
        assert_eq!(text, "ééé");
        assert!(truncated);
    }

    #[test]
    fn test_truncate_is_deterministic() {
        let input = "word ".repeat(100);
        assert_eq!(truncate(&input, 37), truncate(&input, 37));
    }

    #[test]
    fn test_content_hash_consistency() {
        assert_eq!(content_hash("Rust developer"), content_hash("Rust developer"));
        assert_ne!(content_hash("Rust developer"), content_hash("Go developer"));
    }
}

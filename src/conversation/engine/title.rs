//! Conversation titles derived from the first user message.

use crate::conversation::core::records::DEFAULT_TITLE;

/// Number of leading words kept in a derived title.
pub const TITLE_WORDS: usize = 5;

/// Marker appended when the message was cut short.
pub const TITLE_ELLIPSIS: &str = "...";

/// First [`TITLE_WORDS`] words joined by single spaces, with [`TITLE_ELLIPSIS`] when the
/// message is longer; shorter messages are kept verbatim.
#[must_use]
pub fn derive_title(message: &str) -> String {
    if message.trim().is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    let words: Vec<&str> = message.split_whitespace().take(TITLE_WORDS + 1).collect();
    if words.len() > TITLE_WORDS {
        format!("{}{TITLE_ELLIPSIS}", words[..TITLE_WORDS].join(" "))
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_message_is_truncated() {
        assert_eq!(
            derive_title("how do I parse json in rust quickly"),
            "how do I parse json..."
        );
    }

    #[test]
    fn test_short_message_is_verbatim() {
        assert_eq!(derive_title("Hello there"), "Hello there");
        assert_eq!(derive_title("one  two\tthree"), "one  two\tthree");
    }

    #[test]
    fn test_exactly_five_words_is_not_truncated() {
        assert_eq!(derive_title("a b c d e"), "a b c d e");
        assert_eq!(derive_title("a b c d e f"), "a b c d e...");
    }

    #[test]
    fn test_blank_message_keeps_default_title() {
        assert_eq!(derive_title("   "), DEFAULT_TITLE);
    }
}

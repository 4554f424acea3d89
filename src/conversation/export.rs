//! Plain-text transcripts of a conversation.

use crate::conversation::core::records::Message;
use crate::conversation::core::role::Role;

/// Render non-system messages as `ROLE: content` blocks separated by blank lines.
#[must_use]
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| {
            format!(
                "{}: {}\n\n",
                message.role.as_str().to_uppercase(),
                message.content
            )
        })
        .collect()
}

/// File name offered for a downloaded transcript.
#[must_use]
pub fn transcript_file_name(identifier: &str) -> String {
    format!("conversation_{identifier}.txt")
}

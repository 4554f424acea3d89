//! Completion API clients.

pub mod groq_client;

pub use groq_client::{GroqCompletionClient, StreamAccumulator};

use std::future::Future;
use std::pin::Pin;

use crate::conversation::core::errors::ChatResult;
use crate::conversation::core::records::ChatTurn;

/// Boxed future type for completion calls.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Text completion over a full role/content history.
pub trait CompletionClient: Send + Sync {
    /// Produce the assistant reply for `messages`, buffered into one string.
    ///
    /// # Errors
    /// Returns `ChatError::Upstream` if the API call fails.
    fn complete(&self, messages: Vec<ChatTurn>) -> CompletionFuture<'_, ChatResult<String>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{CompletionClient, CompletionFuture};
    use crate::conversation::core::errors::{ChatError, ChatResult};
    use crate::conversation::core::records::ChatTurn;

    /// Replies `echo: <last turn>` and records every history it was given.
    #[derive(Default)]
    pub struct EchoCompletion {
        pub seen: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl EchoCompletion {
        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl CompletionClient for EchoCompletion {
        fn complete(&self, messages: Vec<ChatTurn>) -> CompletionFuture<'_, ChatResult<String>> {
            Box::pin(async move {
                let reply = format!(
                    "echo: {}",
                    messages.last().map(|t| t.content.as_str()).unwrap_or_default()
                );
                self.seen.lock().unwrap().push(messages);
                Ok(reply)
            })
        }
    }

    /// Always fails like an unreachable API.
    pub struct FailingCompletion;

    impl CompletionClient for FailingCompletion {
        fn complete(&self, _messages: Vec<ChatTurn>) -> CompletionFuture<'_, ChatResult<String>> {
            Box::pin(async { Err(ChatError::Upstream("service unavailable".to_string())) })
        }
    }
}

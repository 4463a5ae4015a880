//! ChatMemory trait: the conversation context carried between turns.
//!
//! Only completed turns are remembered: the user's input and the agent's
//! final answer. Tool calls made while producing that answer are scratch
//! work and never enter memory.

use crate::error::MemoryError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub input: String,
    pub output: String,
}

impl Turn {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// The turn as a user message followed by an assistant message.
    pub fn to_messages(&self) -> [Message; 2] {
        [Message::user(&self.input), Message::assistant(&self.output)]
    }
}

#[async_trait]
pub trait ChatMemory: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Remembered turns as messages, oldest first.
    async fn history(&self) -> Result<Vec<Message>, MemoryError>;

    /// Record a completed turn.
    async fn save_turn(&self, input: &str, output: &str) -> Result<(), MemoryError>;

    /// Forget everything.
    async fn clear(&self) -> Result<(), MemoryError>;
}

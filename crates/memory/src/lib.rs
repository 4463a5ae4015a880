//! Conversation memory for mcpchat.
//!
//! Implements [`mcpchat_core::ChatMemory`]. The chat loop uses a
//! [`ConversationWindow`]: the last N completed turns, nothing older.

pub mod window;

pub use window::ConversationWindow;

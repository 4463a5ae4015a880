//! Rolling window of recent turns.

use async_trait::async_trait;
use mcpchat_core::error::MemoryError;
use mcpchat_core::memory::{ChatMemory, Turn};
use mcpchat_core::message::Message;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::trace;

/// Keeps the last `window_size` completed turns; older ones fall off the front.
pub struct ConversationWindow {
    window_size: usize,
    turns: RwLock<VecDeque<Turn>>,
}

impl ConversationWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            turns: RwLock::new(VecDeque::new()),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Snapshot of the remembered turns, oldest first.
    pub async fn turns(&self) -> Vec<Turn> {
        self.turns.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.read().await.is_empty()
    }
}

#[async_trait]
impl ChatMemory for ConversationWindow {
    fn name(&self) -> &str {
        "window"
    }

    async fn history(&self) -> Result<Vec<Message>, MemoryError> {
        Ok(self
            .turns
            .read()
            .await
            .iter()
            .flat_map(Turn::to_messages)
            .collect())
    }

    async fn save_turn(&self, input: &str, output: &str) -> Result<(), MemoryError> {
        if self.window_size == 0 {
            return Ok(());
        }
        let mut turns = self.turns.write().await;
        while turns.len() >= self.window_size {
            turns.pop_front();
        }
        turns.push_back(Turn::new(input, output));
        trace!(turns = turns.len(), window = self.window_size, "Saved turn");
        Ok(())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.turns.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpchat_core::message::Role;

    #[tokio::test]
    async fn history_alternates_user_and_assistant() {
        let memory = ConversationWindow::new(6);
        memory.save_turn("hi", "hello").await.unwrap();
        memory.save_turn("latest 4.16?", "4.16.1").await.unwrap();

        let history = memory.history().await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(history[2].content, "latest 4.16?");
        assert_eq!(history[3].content, "4.16.1");
    }

    #[tokio::test]
    async fn oldest_turns_are_evicted() {
        let memory = ConversationWindow::new(2);
        for i in 1..=4 {
            memory
                .save_turn(&format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }
        assert_eq!(
            memory.turns().await,
            vec![Turn::new("q3", "a3"), Turn::new("q4", "a4")]
        );
    }

    #[tokio::test]
    async fn zero_window_keeps_nothing() {
        let memory = ConversationWindow::new(0);
        memory.save_turn("q", "a").await.unwrap();
        assert!(memory.is_empty().await);
        assert!(memory.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn huge_window_size_allocates_lazily() {
        let memory = ConversationWindow::new(usize::MAX);
        memory.save_turn("q1", "a1").await.unwrap();
        memory.save_turn("q2", "a2").await.unwrap();
        assert_eq!(memory.window_size(), usize::MAX);
        assert_eq!(memory.len().await, 2);
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let memory = ConversationWindow::new(3);
        memory.save_turn("q", "a").await.unwrap();
        assert_eq!(memory.len().await, 1);
        memory.clear().await.unwrap();
        assert!(memory.is_empty().await);
        assert_eq!(memory.name(), "window");
    }
}

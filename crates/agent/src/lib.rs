//! The conversational agent for mcpchat.
//!
//! Each user turn runs a bounded **Think → Act → Observe** loop:
//!
//! 1. **Build context**: system prompt + remembered turns + the new input
//! 2. **Ask the model** via the configured provider, offering every tool
//! 3. **If tool calls**: run them, feed the observations back, loop to 2
//! 4. **If text**: that is the final answer; remember the turn
//!
//! The loop gives up after `max_iterations` model calls.

pub mod executor;
pub mod prompt;

pub use executor::{AgentExecutor, AgentStep, RunOutcome};
pub use prompt::DEFAULT_SYSTEM_PROMPT;

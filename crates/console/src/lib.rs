//! The interactive chat session.
//!
//! Reads one line per turn, hands it to the agent and prints the reply.
//! Generic over the reader and writer so the session runs equally against
//! stdin/stdout and in-memory buffers.

use mcpchat_agent::AgentExecutor;
use mcpchat_core::error::{AgentError, Error};
use std::borrow::Cow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const PROMPT: &str = "\nYou: ";
pub const EXIT_COMMAND: &str = "exit";
pub const GOODBYE: &str = "Agent: Goodbye!";

/// What the user typed, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Exit,
    Blank,
    Prompt(String),
}

pub fn parse_line(line: &str) -> ConsoleInput {
    match line.trim() {
        EXIT_COMMAND => ConsoleInput::Exit,
        "" => ConsoleInput::Blank,
        text => ConsoleInput::Prompt(text.to_string()),
    }
}

/// The text shown for a failed turn. Unparseable model output is shown as
/// the raw text the model produced.
pub fn describe_error(err: &Error) -> String {
    match err {
        Error::Agent(AgentError::UnparseableOutput(raw)) => raw.clone(),
        other => other.to_string(),
    }
}

/// Counters for a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Turns that produced an answer
    pub turns: usize,
    /// Turns that failed
    pub errors: usize,
}

/// Run the read-answer loop until `exit` or end of input.
pub async fn run_session<R, W>(
    agent: &AgentExecutor,
    mut reader: R,
    mut writer: W,
) -> std::io::Result<SessionStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut stats = SessionStats::default();

    loop {
        writer.write_all(PROMPT.as_bytes()).await?;
        writer.flush().await?;

        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            debug!("End of input");
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Cow::Owned(_) = line {
            warn!("Input line was not valid UTF-8; invalid bytes replaced");
        }

        let input = match parse_line(&line) {
            ConsoleInput::Exit => break,
            ConsoleInput::Blank => continue,
            ConsoleInput::Prompt(input) => input,
        };

        let reply = match agent.run(&input).await {
            Ok(answer) => {
                stats.turns += 1;
                answer
            }
            Err(e) => {
                stats.errors += 1;
                warn!(error = %e, "Agent turn failed");
                describe_error(&e)
            }
        };
        writer
            .write_all(format!("Agent: {reply}\n").as_bytes())
            .await?;
    }

    writer.write_all(format!("{GOODBYE}\n").as_bytes()).await?;
    writer.flush().await?;

    info!(turns = stats.turns, errors = stats.errors, "Session ended");
    Ok(stats)
}

//! Text-mode session transport: stdin lines stand in for transcribed speech
//! and stdout for text-to-speech.

use parley_core::{Command, SessionEvent};
use std::io::BufRead;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Typing this line ends the session.
pub const QUIT: &str = "/quit";

/// Maps one console line to a session event. Blank lines are ignored.
pub fn event_for_line(line: &str) -> Option<SessionEvent> {
    match line.trim() {
        "" => None,
        QUIT => Some(SessionEvent::ParticipantLeft {
            reason: Some("quit".to_string()),
        }),
        text => Some(SessionEvent::UserMessage { text: text.to_string() }),
    }
}

/// Forwards lines from `reader` as session events until quit or end of input.
///
/// Blocking: run it on a dedicated thread, not on the async runtime.
pub fn forward_lines<R: BufRead>(reader: R, events: &mpsc::Sender<SessionEvent>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                break;
            }
        };
        let Some(event) = event_for_line(&line) else {
            continue;
        };
        let leaving = matches!(event, SessionEvent::ParticipantLeft { .. });
        if events.blocking_send(event).is_err() {
            debug!("Session ended; no longer reading input");
            return;
        }
        if leaving {
            return;
        }
    }
    let _ = events.blocking_send(SessionEvent::ParticipantLeft {
        reason: Some("end of input".to_string()),
    });
}

/// Reads stdin on its own thread so a pending read never blocks shutdown.
pub fn spawn_stdin_reader(events: mpsc::Sender<SessionEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), &events))
}

/// Writes commands to `out` until the conversation ends or the session drops
/// its sender. Returns true when the flow ended the conversation itself.
pub async fn print_commands<W>(mut commands: mpsc::Receiver<Command>, mut out: W) -> std::io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        match command {
            Command::SpeakText(text) => out.write_all(format!("bot> {text}\n").as_bytes()).await?,
            Command::ReportError(message) => out.write_all(format!("[error] {message}\n").as_bytes()).await?,
            Command::EndConversation => {
                out.write_all(b"[conversation ended]\n").await?;
                out.flush().await?;
                return Ok(true);
            }
        }
        out.flush().await?;
    }
    Ok(false)
}

//! Plain-text rendering of session updates.

use std::io::{self, Write};

use sparkchat_client::{SessionUpdate, timeline};
use sparkchat_core::{ConnectionState, DeliveryState, Message};

/// Writes session updates as lines of text.
///
/// The timeline is redrawn whenever the reconciled list changes.
pub struct Renderer<W> {
    out: W,
    self_id: String,
    last: Vec<Message>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, self_id: impl Into<String>) -> Self {
        Self { out, self_id: self_id.into(), last: Vec::new() }
    }

    pub fn render(&mut self, update: SessionUpdate) -> io::Result<()> {
        match update {
            SessionUpdate::Messages(messages) => {
                if messages == self.last {
                    return Ok(());
                }
                self.timeline(&messages)?;
                self.last = messages;
            },
            SessionUpdate::Typing(Some(peer)) => writeln!(self.out, "  {peer} is typing...")?,
            SessionUpdate::Typing(None) => {},
            SessionUpdate::Connection(state) => {
                writeln!(self.out, "[{}]", describe(state))?;
            },
            SessionUpdate::Alert(message) => writeln!(self.out, "! {message}")?,
        }
        self.out.flush()
    }

    fn timeline(&mut self, messages: &[Message]) -> io::Result<()> {
        writeln!(self.out)?;
        for group in timeline::group_by_day(messages, &self.self_id) {
            writeln!(self.out, "-- {} --", group.date.format("%A, %B %-d, %Y"))?;
            for entry in group.entries {
                let message = entry.message;
                let author = if entry.own { "you" } else { message.sender_id.as_str() };
                let time = message.created_at.format("%H:%M");
                let marker = match message.delivery {
                    DeliveryState::Pending => " (sending)",
                    DeliveryState::Failed => " (failed)",
                    DeliveryState::Confirmed => "",
                };
                if entry.sequential {
                    writeln!(self.out, "        {}{marker}", message.text)?;
                } else {
                    writeln!(self.out, "{time} {author}: {}{marker}", message.text)?;
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

fn describe(state: ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "offline".to_string(),
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Connected => "connected".to_string(),
        ConnectionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
        ConnectionState::Failed => "connection lost".to_string(),
        ConnectionState::Closed => "closed".to_string(),
    }
}

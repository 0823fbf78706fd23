//! Sparkchat terminal client.
//!
//! Opens one conversation, prints the reconciled timeline as it changes and
//! sends every stdin line as a message. `/quit` leaves the conversation.
//!
//! Input is read a whole line at a time, so keystrokes are never seen and no
//! typing signal is sent to the peer. Embedders with per-keystroke input feed
//! [`Command::Typing`] to the runtime instead. Incoming typing signals are
//! still shown.
//!
//! # Usage
//!
//! ```bash
//! SPARKCHAT_TOKEN=... SPARKCHAT_USER_ID=u1 sparkchat <match-id>
//!
//! # Explicit endpoints
//! sparkchat <match-id> --api-url https://api.example.com --ws-url wss://api.example.com/ws
//! ```

#![forbid(unsafe_code)]

mod render;

use std::sync::Arc;

use clap::Parser;
use sparkchat_client::{
    ChatConfig, Command, Runtime, SessionIdentity, SystemEnv,
    transport::{HttpBackend, WsTransport},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::render::Renderer;

/// Sparkchat terminal client
#[derive(Parser, Debug)]
#[command(name = "sparkchat")]
#[command(about = "Chat with a match from the terminal")]
#[command(version)]
struct Args {
    /// Conversation (match) to open
    conversation: String,

    /// REST API base URL
    #[arg(long, env = "SPARKCHAT_API_URL", default_value = "http://localhost:5000")]
    api_url: String,

    /// Live channel URL (derived from the API URL when omitted)
    #[arg(long, env = "SPARKCHAT_WS_URL")]
    ws_url: Option<String>,

    /// Bearer token for the API and the live channel
    #[arg(long, env = "SPARKCHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Id of the signed-in user
    #[arg(long, env = "SPARKCHAT_USER_ID")]
    user_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// `http(s)://host` becomes `ws(s)://host/ws`.
fn live_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

/// Command for one line of stdin. `None` at end of input.
fn command_for_line(line: Option<String>) -> Command {
    match line {
        Some(line) if line.trim() == "/quit" => Command::Close,
        Some(line) => Command::Send(line),
        None => Command::Close,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ws_url = args.ws_url.clone().unwrap_or_else(|| live_url(&args.api_url));
    tracing::info!(conversation_id = %args.conversation, api = %args.api_url, live = %ws_url, "opening conversation");

    let (update_tx, mut updates) = mpsc::unbounded_channel();
    let (command_tx, commands) = mpsc::channel(32);

    let identity = SessionIdentity {
        conversation_id: args.conversation,
        user_id: args.user_id.clone(),
        auth_token: args.token,
    };
    let runtime = Runtime::new(
        SystemEnv::new(),
        &ChatConfig::default(),
        identity,
        Arc::new(HttpBackend::new(args.api_url)),
        WsTransport::new(ws_url),
        update_tx,
    );

    let mut renderer = Renderer::new(std::io::stdout(), args.user_id);
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if let Err(error) = renderer.render(update) {
                tracing::warn!(%error, "stdout closed");
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let command = match lines.next_line().await {
                Ok(line) => command_for_line(line),
                Err(error) => {
                    tracing::warn!(%error, "stdin read failed");
                    Command::Close
                },
            };
            let done = command == Command::Close;
            if command_tx.send(command).await.is_err() || done {
                break;
            }
        }
    });

    runtime.run(commands).await?;
    printer.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_url_swaps_scheme() {
        assert_eq!(live_url("http://localhost:5000"), "ws://localhost:5000/ws");
        assert_eq!(live_url("https://api.example.com/"), "wss://api.example.com/ws");
    }

    #[test]
    fn stdin_lines_map_to_send_and_close() {
        assert_eq!(command_for_line(Some("hey".to_string())), Command::Send("hey".to_string()));
        assert_eq!(command_for_line(Some(" /quit ".to_string())), Command::Close);
        assert_eq!(command_for_line(None), Command::Close);
    }

    #[test]
    fn args_read_identity_from_flags() {
        let args = Args::try_parse_from([
            "sparkchat",
            "m1",
            "--user-id",
            "u1",
            "--token",
            "tok",
            "--api-url",
            "https://api.example.com",
        ])
        .unwrap();

        assert_eq!(args.conversation, "m1");
        assert_eq!(args.user_id, "u1");
        assert_eq!(args.token.as_deref(), Some("tok"));
        assert_eq!(args.ws_url, None);
    }
}

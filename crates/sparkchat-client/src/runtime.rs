//! Async runtime for one chat session.
//!
//! The runtime drives the session event loop, coordinating between:
//! - [`ChatSession`]: the pure state machine
//! - [`ChatBackend`]: REST calls, run concurrently as in-flight futures
//! - [`LiveTransport`]: the live channel
//! - the UI, through a command channel in and an update channel out
//!
//! Every iteration waits on exactly one source, turns it into a
//! [`SessionEvent`], and executes the resulting actions. Executing an action
//! never waits on the network, so a hanging connect cannot hold up sends or
//! close. Live events are fed to the session strictly in arrival order.
//! Dropping the loop drops every in-flight request, so responses arriving
//! after close are never applied.

use std::{sync::Arc, time::Duration};

use futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered};
use sparkchat_core::{ChatConfig, env::Environment};
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    backend::{ChatBackend, LiveTransport},
    error::SessionError,
    event::{SessionAction, SessionEvent, SessionUpdate},
    live::{LiveLink, LiveNotice, LiveRequest},
    session::{ChatSession, SessionIdentity},
};

/// How often timers are checked.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// User intents sent to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit a message.
    Send(String),
    /// Local input changed.
    Typing,
    /// Leave the conversation.
    Close,
}

/// One unit of work picked by the loop.
enum Step {
    Command(Option<Command>),
    Live(Option<LiveNotice>),
    Completed(SessionEvent),
    Tick,
}

/// Drives a [`ChatSession`] against real collaborators.
pub struct Runtime<E, B, T>
where
    E: Environment,
    B: ChatBackend,
    T: LiveTransport + 'static,
{
    session: ChatSession<E>,
    backend: Arc<B>,
    transport: T,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl<E, B, T> Runtime<E, B, T>
where
    E: Environment,
    B: ChatBackend,
    T: LiveTransport + 'static,
{
    /// Create a runtime. UI updates are sent to `updates`.
    pub fn new(
        env: E,
        config: &ChatConfig,
        identity: SessionIdentity,
        backend: Arc<B>,
        transport: T,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        Self { session: ChatSession::new(env, config, identity), backend, transport, updates }
    }

    /// The session being driven.
    pub fn session(&self) -> &ChatSession<E> {
        &self.session
    }

    /// Run until [`Command::Close`] or the command channel closes.
    ///
    /// The transport is moved into its own task, so the loop keeps serving
    /// commands, REST completions and timers while a connect is outstanding.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session cannot start (no auth token).
    pub async fn run(self, commands: mpsc::Receiver<Command>) -> Result<(), SessionError> {
        let Self { session, backend, transport, updates } = self;
        let mut session_loop = SessionLoop {
            session,
            backend,
            link: LiveLink::spawn(transport),
            live: false,
            link_running: true,
            generation: 0,
            in_flight: FuturesUnordered::new(),
            updates,
        };

        let result = session_loop.run(commands).await;
        session_loop.link.shutdown().await;
        result
    }
}

/// The running event loop. Owns everything except the transport, which lives
/// in the task behind `link`.
struct SessionLoop<E: Environment, B: ChatBackend> {
    session: ChatSession<E>,
    backend: Arc<B>,
    link: LiveLink,
    /// A connection of the current generation is open.
    live: bool,
    link_running: bool,
    generation: u64,
    in_flight: FuturesUnordered<BoxFuture<'static, SessionEvent>>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl<E: Environment, B: ChatBackend> SessionLoop<E, B> {
    async fn run(&mut self, mut commands: mpsc::Receiver<Command>) -> Result<(), SessionError> {
        self.dispatch(SessionEvent::Start)?;

        let mut ticker = time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                notice = self.link.next(), if self.link_running => Step::Live(notice),
                Some(done) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    Step::Completed(done)
                },
                _ = ticker.tick() => Step::Tick,
            };

            let event = match step {
                Step::Command(Some(Command::Send(text))) => SessionEvent::SendText { text },
                Step::Command(Some(Command::Typing)) => SessionEvent::LocalTyping,
                Step::Command(Some(Command::Close) | None) => break,
                Step::Live(Some(notice)) => match self.accept(notice) {
                    Some(event) => event,
                    None => continue,
                },
                Step::Live(None) => {
                    warn!("live transport task stopped");
                    self.link_running = false;
                    if !self.live {
                        continue;
                    }
                    self.live = false;
                    SessionEvent::TransportClosed { reason: "transport task stopped".to_string() }
                },
                Step::Completed(event) => event,
                Step::Tick => SessionEvent::Tick,
            };

            if let Err(error) = self.dispatch(event) {
                warn!(%error, "session rejected event");
            }
        }

        self.dispatch(SessionEvent::Close)
    }

    /// Turn a transport notice into a session event. Notices from an
    /// abandoned connection are dropped.
    fn accept(&mut self, notice: LiveNotice) -> Option<SessionEvent> {
        if notice.generation() != self.generation {
            debug!(
                generation = notice.generation(),
                current = self.generation,
                "stale live notice dropped"
            );
            return None;
        }

        match notice {
            LiveNotice::Opened { .. } => {
                self.live = true;
                Some(SessionEvent::TransportOpened)
            },
            LiveNotice::Closed { reason, .. } => {
                self.live = false;
                Some(SessionEvent::TransportClosed { reason })
            },
            LiveNotice::Received { event, .. } => Some(SessionEvent::LiveReceived(event)),
        }
    }

    /// Feed one event to the session and execute the resulting actions.
    /// Live events are handled strictly in the order they were received.
    fn dispatch(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        for action in self.session.handle(event)? {
            self.execute(action);
        }
        Ok(())
    }

    /// Execute one action. Nothing here waits on the network: REST calls
    /// become in-flight futures and transport work is queued to its task.
    fn execute(&mut self, action: SessionAction) {
        match action {
            SessionAction::FetchBootstrap { conversation_id, auth_token } => {
                let backend = Arc::clone(&self.backend);
                self.in_flight.push(
                    async move {
                        let (metadata, history) = tokio::join!(
                            backend.fetch_metadata(&conversation_id, &auth_token),
                            backend.fetch_history(&conversation_id, &auth_token),
                        );
                        SessionEvent::BootstrapLoaded { metadata, history }
                    }
                    .boxed(),
                );
            },
            SessionAction::PostMessage { handle, request, auth_token } => {
                let backend = Arc::clone(&self.backend);
                self.in_flight.push(
                    async move {
                        let result = backend.post_message(&request, &auth_token).await;
                        SessionEvent::SendCompleted { handle, result }
                    }
                    .boxed(),
                );
            },
            SessionAction::Connect { conversation_id, auth_token, attempt } => {
                self.generation += 1;
                self.live = false;
                debug!(attempt, generation = self.generation, "connecting live transport");
                self.link.request(LiveRequest::Connect {
                    generation: self.generation,
                    conversation_id,
                    auth_token,
                });
            },
            SessionAction::Emit(event) => {
                if self.live {
                    self.link.request(LiveRequest::Send(event));
                } else {
                    debug!(event = event.name(), "live transport down, event dropped");
                }
            },
            SessionAction::Disconnect => {
                self.generation += 1;
                self.live = false;
                self.link.request(LiveRequest::Disconnect);
            },
            SessionAction::MessagesChanged => {
                self.publish(SessionUpdate::Messages(self.session.messages().to_vec()));
            },
            SessionAction::TypingChanged { peer } => self.publish(SessionUpdate::Typing(peer)),
            SessionAction::ConnectionChanged(state) => {
                self.publish(SessionUpdate::Connection(state));
            },
            SessionAction::Alert { message } => self.publish(SessionUpdate::Alert(message)),
        }
    }

    fn publish(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!("update receiver gone");
        }
    }
}

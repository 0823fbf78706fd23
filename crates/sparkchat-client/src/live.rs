//! Live transport task.
//!
//! The [`LiveTransport`] runs in its own task and talks to the runtime over
//! channels, so a connect or send that hangs on the network never stalls the
//! session loop. Requests flow in, notices flow out.
//!
//! Every connect is tagged with a generation. Notices carry the generation of
//! the connection they belong to, which lets the runtime drop notices from a
//! connection it has already abandoned.

use std::time::Duration;

use sparkchat_proto::LiveEvent;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, warn};

use crate::backend::LiveTransport;

/// How long shutdown waits for the transport to close cleanly.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Work for the transport task.
#[derive(Debug)]
pub(crate) enum LiveRequest {
    /// Open a connection. Supersedes any connection or connect in progress.
    Connect {
        generation: u64,
        conversation_id: String,
        auth_token: String,
    },
    /// Send one event on the open connection. Dropped if not connected.
    Send(LiveEvent),
    /// Tear the connection down, abandoning a connect in progress.
    Disconnect,
}

/// Reports from the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LiveNotice {
    /// Connect succeeded.
    Opened { generation: u64 },
    /// Connect failed, or an open connection dropped.
    Closed { generation: u64, reason: String },
    /// Inbound event.
    Received { generation: u64, event: LiveEvent },
}

impl LiveNotice {
    pub(crate) fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation }
            | Self::Closed { generation, .. }
            | Self::Received { generation, .. } => *generation,
        }
    }
}

/// Handle to a running transport task.
///
/// Dropping the handle aborts the task.
pub(crate) struct LiveLink {
    requests: Option<mpsc::UnboundedSender<LiveRequest>>,
    notices: mpsc::UnboundedReceiver<LiveNotice>,
    task: JoinHandle<()>,
}

impl LiveLink {
    /// Move `transport` into a new task.
    pub(crate) fn spawn<T>(transport: T) -> Self
    where
        T: LiveTransport + 'static,
    {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_transport(transport, request_rx, notice_tx));

        Self { requests: Some(requests), notices, task }
    }

    /// Queue a request. Returns immediately.
    pub(crate) fn request(&self, request: LiveRequest) {
        let delivered = self.requests.as_ref().is_some_and(|tx| tx.send(request).is_ok());
        if !delivered {
            debug!("live transport task gone, request dropped");
        }
    }

    /// Next notice. `None` once the task has stopped. Cancel-safe.
    pub(crate) async fn next(&mut self) -> Option<LiveNotice> {
        self.notices.recv().await
    }

    /// Ask the task to disconnect and stop, aborting it if it does not finish
    /// within a short grace period.
    pub(crate) async fn shutdown(&mut self) {
        self.requests = None;
        if time::timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            debug!("live transport did not stop in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What woke the transport task.
enum Wake {
    Request(Option<LiveRequest>),
    Inbound(Option<LiveEvent>),
}

async fn run_transport<T: LiveTransport>(
    mut transport: T,
    mut requests: mpsc::UnboundedReceiver<LiveRequest>,
    notices: mpsc::UnboundedSender<LiveNotice>,
) {
    let notify = move |notice: LiveNotice| {
        if notices.send(notice).is_err() {
            debug!("live notice receiver gone");
        }
    };

    // `Some(generation)` while a connection is open
    let mut open: Option<u64> = None;
    let mut carried: Option<LiveRequest> = None;

    loop {
        let wake = match (carried.take(), open) {
            (Some(request), _) => Wake::Request(Some(request)),
            (None, Some(_)) => tokio::select! {
                request = requests.recv() => Wake::Request(request),
                inbound = transport.recv() => Wake::Inbound(inbound),
            },
            (None, None) => Wake::Request(requests.recv().await),
        };

        let request = match wake {
            Wake::Inbound(Some(event)) => {
                if let Some(generation) = open {
                    notify(LiveNotice::Received { generation, event });
                }
                continue;
            },
            Wake::Inbound(None) => {
                if let Some(generation) = open.take() {
                    notify(LiveNotice::Closed { generation, reason: "closed by server".to_string() });
                }
                continue;
            },
            Wake::Request(None) => break,
            Wake::Request(Some(request)) => request,
        };

        match request {
            LiveRequest::Connect { generation, conversation_id, auth_token } => {
                open = None;
                let outcome = tokio::select! {
                    result = transport.connect(&conversation_id, &auth_token) => Ok(result),
                    later = requests.recv() => Err(later),
                };
                match outcome {
                    Ok(Ok(())) => {
                        open = Some(generation);
                        notify(LiveNotice::Opened { generation });
                    },
                    Ok(Err(error)) => {
                        notify(LiveNotice::Closed { generation, reason: error.to_string() });
                    },
                    Err(later) => {
                        debug!(generation, "connect abandoned");
                        transport.disconnect().await;
                        match later {
                            Some(request) => carried = Some(request),
                            None => break,
                        }
                    },
                }
            },
            LiveRequest::Send(event) => {
                let Some(generation) = open else {
                    debug!(event = event.name(), "not connected, event dropped");
                    continue;
                };
                if let Err(error) = transport.send(event).await {
                    warn!(%error, "live send failed");
                    open = None;
                    transport.disconnect().await;
                    notify(LiveNotice::Closed { generation, reason: error.to_string() });
                }
            },
            LiveRequest::Disconnect => {
                open = None;
                transport.disconnect().await;
            },
        }
    }

    transport.disconnect().await;
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use sparkchat_proto::TypingSignal;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("refused")]
    struct Refused;

    #[derive(Clone, Copy)]
    enum Connect {
        Accept,
        Hang,
        Refuse,
    }

    struct Scripted {
        connect: Connect,
        fail_sends: bool,
        inbound: mpsc::UnboundedReceiver<LiveEvent>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl LiveTransport for Scripted {
        type Error = Refused;

        async fn connect(&mut self, _: &str, _: &str) -> Result<(), Refused> {
            self.log.lock().unwrap().push("connect".to_string());
            match self.connect {
                Connect::Accept => Ok(()),
                Connect::Hang => std::future::pending().await,
                Connect::Refuse => Err(Refused),
            }
        }

        async fn send(&mut self, event: LiveEvent) -> Result<(), Refused> {
            self.log.lock().unwrap().push(format!("send {}", event.name()));
            if self.fail_sends { Err(Refused) } else { Ok(()) }
        }

        async fn recv(&mut self) -> Option<LiveEvent> {
            self.inbound.recv().await
        }

        async fn disconnect(&mut self) {
            self.log.lock().unwrap().push("disconnect".to_string());
        }
    }

    fn link(
        connect: Connect,
        fail_sends: bool,
    ) -> (LiveLink, mpsc::UnboundedSender<LiveEvent>, Arc<Mutex<Vec<String>>>) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = Scripted { connect, fail_sends, inbound, log: Arc::clone(&log) };
        (LiveLink::spawn(transport), inbound_tx, log)
    }

    fn connect(generation: u64) -> LiveRequest {
        LiveRequest::Connect {
            generation,
            conversation_id: "m1".to_string(),
            auth_token: "tok".to_string(),
        }
    }

    fn typing() -> LiveEvent {
        LiveEvent::Typing(TypingSignal { chat_id: "m1".to_string(), user_id: "me".to_string() })
    }

    #[tokio::test(start_paused = true)]
    async fn open_connection_forwards_inbound_events() {
        let (mut link, inbound, _) = link(Connect::Accept, false);
        link.request(connect(1));
        assert_eq!(link.next().await, Some(LiveNotice::Opened { generation: 1 }));

        inbound.send(LiveEvent::UserTyping("A".to_string())).unwrap();
        assert_eq!(
            link.next().await,
            Some(LiveNotice::Received { generation: 1, event: LiveEvent::UserTyping("A".to_string()) })
        );

        drop(inbound);
        assert_eq!(
            link.next().await,
            Some(LiveNotice::Closed { generation: 1, reason: "closed by server".to_string() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_reports_closed() {
        let (mut link, _inbound, _) = link(Connect::Refuse, false);
        link.request(connect(3));
        assert_eq!(
            link.next().await,
            Some(LiveNotice::Closed { generation: 3, reason: "refused".to_string() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_abandons_hanging_connect() {
        let (mut link, _inbound, log) = link(Connect::Hang, false);
        link.request(connect(1));
        time::sleep(Duration::from_secs(60)).await;
        assert!(link.notices.try_recv().is_err());
        assert_eq!(log.lock().unwrap().as_slice(), ["connect"]);

        link.request(LiveRequest::Disconnect);
        link.shutdown().await;

        assert!(link.task.is_finished());
        assert!(link.next().await.is_none());
        assert!(log.lock().unwrap().iter().any(|entry| entry == "disconnect"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_closes_the_connection() {
        let (mut link, _inbound, log) = link(Connect::Accept, true);
        link.request(connect(2));
        assert_eq!(link.next().await, Some(LiveNotice::Opened { generation: 2 }));

        link.request(LiveRequest::Send(typing()));
        assert_eq!(
            link.next().await,
            Some(LiveNotice::Closed { generation: 2, reason: "refused".to_string() })
        );

        // not connected any more: dropped without reaching the transport
        link.request(LiveRequest::Send(typing()));
        link.shutdown().await;
        let sends = log.lock().unwrap().iter().filter(|e| e.starts_with("send")).count();
        assert_eq!(sends, 1);
    }
}

//! Push subscription driver.
//!
//! Executes the steps decided by [`PushSubscriptionManager`]: prompts through
//! [`PermissionPrompt`], registers through [`ChatBackend`], and hands accepted
//! notifications to a [`NotificationSink`]. The manager is process-wide and
//! shared by every session, so it sits behind an async mutex that is never
//! held across a network call.

use std::{future::Future, sync::Arc};

use sparkchat_core::{
    ClickRoute, ConversationView, Permission, PushStep, PushSubscription, PushSubscriptionManager,
    route_click,
};
use sparkchat_proto::{NotificationPayload, PushData, PushPayload, PushSubscriptionRequest};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::ChatBackend;

/// Platform permission prompt.
pub trait PermissionPrompt: Send + Sync {
    /// Permission as currently known to the platform.
    fn current(&self) -> Permission;

    /// Ask the user. Resolves to [`Permission::Default`] if the prompt was
    /// dismissed.
    fn request(&self) -> impl Future<Output = Permission> + Send;
}

/// Platform notification facility.
pub trait NotificationSink: Send + Sync {
    /// Show an alert.
    fn show(&self, notification: NotificationPayload);
}

/// Push endpoint owned by the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEndpoint {
    /// Endpoint URL issued by the push service.
    pub endpoint: String,
    /// Local user.
    pub user_id: String,
    /// Bearer token.
    pub auth_token: String,
}

/// Drives a shared [`PushSubscriptionManager`].
pub struct PushClient<B, P, S> {
    manager: Arc<Mutex<PushSubscriptionManager>>,
    backend: Arc<B>,
    prompt: P,
    sink: S,
    endpoint: PushEndpoint,
}

impl<B, P, S> PushClient<B, P, S>
where
    B: ChatBackend,
    P: PermissionPrompt,
    S: NotificationSink,
{
    /// Create a driver with a fresh manager seeded from the prompt's current
    /// permission.
    pub fn new(backend: Arc<B>, prompt: P, sink: S, endpoint: PushEndpoint) -> Self {
        let manager = Arc::new(Mutex::new(PushSubscriptionManager::new(prompt.current())));
        Self { manager, backend, prompt, sink, endpoint }
    }

    /// Create a driver around an existing shared manager.
    pub fn with_manager(
        manager: Arc<Mutex<PushSubscriptionManager>>,
        backend: Arc<B>,
        prompt: P,
        sink: S,
        endpoint: PushEndpoint,
    ) -> Self {
        Self { manager, backend, prompt, sink, endpoint }
    }

    /// The shared manager.
    pub fn manager(&self) -> Arc<Mutex<PushSubscriptionManager>> {
        Arc::clone(&self.manager)
    }

    /// Make sure permission is granted and the endpoint registered.
    ///
    /// Idempotent. Performs at most one prompt and one registration per call,
    /// and none if another call already has one in flight.
    pub async fn ensure_subscribed(&self) -> PushSubscription {
        let mut step = self.manager.lock().await.ensure_subscribed();

        loop {
            step = match step {
                PushStep::RequestPermission => {
                    let answer = self.prompt.request().await;
                    self.manager.lock().await.permission_resolved(answer)
                },
                PushStep::Register => {
                    let request = PushSubscriptionRequest {
                        endpoint: self.endpoint.endpoint.clone(),
                        user_id: self.endpoint.user_id.clone(),
                    };
                    let result = self.backend.register_push(&request, &self.endpoint.auth_token).await;
                    return self.manager.lock().await.registration_finished(result.map(|_| ()));
                },
                PushStep::Ready | PushStep::Denied | PushStep::Undecided | PushStep::InFlight => {
                    break;
                },
            };
        }

        self.manager.lock().await.subscription()
    }

    /// Handle a raw push message. Returns true if a notification was shown.
    ///
    /// `view` is the conversation currently open in the app, if any.
    pub async fn handle_push(&self, body: &[u8], view: Option<ConversationView<'_>>) -> bool {
        let payload = match PushPayload::decode(body) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "discarding push");
                return false;
            },
        };

        let notification = self.manager.lock().await.handle_inbound_push(&payload, view);
        match notification {
            Some(notification) => {
                debug!(tag = %notification.tag, "showing notification");
                self.sink.show(notification);
                true
            },
            None => false,
        }
    }

    /// Route a click on a shown notification.
    pub fn handle_click<W: AsRef<str>>(
        &self,
        action: Option<&str>,
        data: &PushData,
        open_windows: &[W],
    ) -> ClickRoute {
        route_click(action, data, open_windows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use sparkchat_proto::{MatchInfo, PushAck, SendMessageRequest, WireMessage};

    use super::*;
    use crate::backend::BackendError;

    #[derive(Default)]
    struct CountingBackend {
        registrations: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        async fn fetch_metadata(&self, _: &str, _: &str) -> Result<MatchInfo, BackendError> {
            Err(BackendError::Unauthorized)
        }

        async fn fetch_history(&self, _: &str, _: &str) -> Result<Vec<WireMessage>, BackendError> {
            Ok(Vec::new())
        }

        async fn post_message(
            &self,
            _: &SendMessageRequest,
            _: &str,
        ) -> Result<WireMessage, BackendError> {
            Err(BackendError::Unauthorized)
        }

        async fn register_push(
            &self,
            _: &PushSubscriptionRequest,
            _: &str,
        ) -> Result<PushAck, BackendError> {
            let n = self.registrations.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                Err(BackendError::Http { status: 503, reason: "busy".to_string() })
            } else {
                Ok(PushAck::default())
            }
        }
    }

    struct FixedPrompt {
        initial: Permission,
        answer: Permission,
        asked: AtomicUsize,
    }

    impl PermissionPrompt for FixedPrompt {
        fn current(&self) -> Permission {
            self.initial
        }

        async fn request(&self) -> Permission {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[derive(Default)]
    struct RecordingSink(StdMutex<Vec<NotificationPayload>>);

    impl NotificationSink for RecordingSink {
        fn show(&self, notification: NotificationPayload) {
            self.0.lock().unwrap().push(notification);
        }
    }

    fn client(
        backend: CountingBackend,
        initial: Permission,
        answer: Permission,
    ) -> PushClient<CountingBackend, FixedPrompt, RecordingSink> {
        PushClient::new(
            Arc::new(backend),
            FixedPrompt { initial, answer, asked: AtomicUsize::new(0) },
            RecordingSink::default(),
            PushEndpoint {
                endpoint: "https://push.test/abc".to_string(),
                user_id: "me".to_string(),
                auth_token: "tok".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn grant_registers_exactly_once() {
        let push = client(CountingBackend::default(), Permission::Default, Permission::Granted);

        let first = push.ensure_subscribed().await;
        let second = push.ensure_subscribed().await;

        assert!(first.endpoint_registered);
        assert_eq!(second, first);
        assert_eq!(push.backend.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(push.prompt.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_never_prompts_again() {
        let push = client(CountingBackend::default(), Permission::Default, Permission::Denied);

        let sub = push.ensure_subscribed().await;
        push.ensure_subscribed().await;

        assert_eq!(sub.permission, Permission::Denied);
        assert_eq!(push.prompt.asked.load(Ordering::SeqCst), 1);
        assert_eq!(push.backend.registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_registration_retries_on_next_call_only() {
        let backend = CountingBackend { fail_first: true, ..CountingBackend::default() };
        let push = client(backend, Permission::Granted, Permission::Granted);

        let first = push.ensure_subscribed().await;
        assert!(!first.endpoint_registered);
        assert_eq!(push.backend.registrations.load(Ordering::SeqCst), 1);

        let second = push.ensure_subscribed().await;
        assert!(second.endpoint_registered);
        assert_eq!(push.backend.registrations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn push_is_shown_when_granted() {
        let push = client(CountingBackend::default(), Permission::Granted, Permission::Granted);
        let body = br#"{"title":"Sam","body":"hey","data":{"chatId":"m1","url":"/chat/m1"}}"#;

        assert!(push.handle_push(body, None).await);
        assert!(!push.handle_push(b"", None).await);

        let shown = push.sink.0.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag, "chat-m1");
    }
}

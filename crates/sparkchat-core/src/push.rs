//! Push subscription manager.
//!
//! Process-wide: one manager outlives every conversation session. It tracks
//! notification permission and endpoint registration, and decides whether an
//! inbound push becomes a system notification.
//!
//! [`PushSubscriptionManager::ensure_subscribed`] is idempotent. It returns
//! the next [`PushStep`] for the driver: prompt for permission, register the
//! endpoint, or nothing. While a prompt or registration is outstanding further
//! calls return [`PushStep::InFlight`], so the backend sees at most one
//! registration call at a time and none after success.
//!
//! Permission denial is terminal. A failed registration is logged and only
//! retried by the next `ensure_subscribed` call.

use sparkchat_proto::{NotificationAction, NotificationPayload, PushData, PushPayload};
use tracing::{debug, info, warn};

use crate::{message::Message, reconciler::Reconciler};

/// Notification icon.
pub const NOTIFICATION_ICON: &str = "/logo192.png";

/// Notification badge.
pub const NOTIFICATION_BADGE: &str = "/badge.png";

/// Vibration pattern in milliseconds.
pub const NOTIFICATION_VIBRATE: [u32; 3] = [100, 50, 100];

/// Action id that opens the conversation.
pub const ACTION_VIEW: &str = "view";

/// Action id that dismisses the alert.
pub const ACTION_DISMISS: &str = "dismiss";

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Permission {
    /// Not yet asked, or the prompt was dismissed.
    #[default]
    Default,
    /// User allowed notifications.
    Granted,
    /// User refused notifications.
    Denied,
}

/// Snapshot of the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushSubscription {
    /// Current permission.
    pub permission: Permission,
    /// Whether the backend acknowledged the endpoint.
    pub endpoint_registered: bool,
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStep {
    /// Ask the user for notification permission, then report the answer via
    /// [`PushSubscriptionManager::permission_resolved`].
    RequestPermission,
    /// Register the push endpoint with the backend, then report via
    /// [`PushSubscriptionManager::registration_finished`].
    Register,
    /// Permission granted and endpoint registered.
    Ready,
    /// Permission refused. Nothing more will happen this session.
    Denied,
    /// Prompt dismissed without a decision. The next `ensure_subscribed`
    /// call asks again.
    Undecided,
    /// A prompt or registration is already outstanding.
    InFlight,
}

/// Where a notification click leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickRoute {
    /// Focus the already-open window at this index.
    Focus {
        /// Index into the window list passed to [`route_click`].
        window: usize,
    },
    /// Open a new window at this URL.
    Open {
        /// Conversation URL.
        url: String,
    },
    /// Only close the notification.
    Close,
}

/// The conversation currently open in the app, if any.
#[derive(Debug, Clone, Copy)]
pub struct ConversationView<'a> {
    /// Whether the conversation is visible and focused.
    pub visible: bool,
    /// Its message list.
    pub reconciler: &'a Reconciler,
}

/// Permission and registration lifecycle.
#[derive(Debug, Clone, Default)]
pub struct PushSubscriptionManager {
    permission: Permission,
    endpoint_registered: bool,
    prompting: bool,
    registering: bool,
}

impl PushSubscriptionManager {
    /// Create a manager starting from the platform's current permission.
    pub fn new(permission: Permission) -> Self {
        Self { permission, ..Self::default() }
    }

    /// Current snapshot.
    pub fn subscription(&self) -> PushSubscription {
        PushSubscription {
            permission: self.permission,
            endpoint_registered: self.endpoint_registered,
        }
    }

    /// Next step towards a registered subscription.
    pub fn ensure_subscribed(&mut self) -> PushStep {
        if self.prompting || self.registering {
            return PushStep::InFlight;
        }

        match self.permission {
            Permission::Denied => PushStep::Denied,
            Permission::Granted if self.endpoint_registered => PushStep::Ready,
            Permission::Granted => {
                self.registering = true;
                debug!("registering push endpoint");
                PushStep::Register
            },
            Permission::Default => {
                self.prompting = true;
                debug!("requesting notification permission");
                PushStep::RequestPermission
            },
        }
    }

    /// Record the user's answer to a permission prompt.
    pub fn permission_resolved(&mut self, permission: Permission) -> PushStep {
        self.prompting = false;
        self.permission = permission;

        match permission {
            Permission::Granted => self.ensure_subscribed(),
            Permission::Denied => {
                info!("notification permission denied");
                PushStep::Denied
            },
            Permission::Default => PushStep::Undecided,
        }
    }

    /// Record the outcome of an endpoint registration.
    pub fn registration_finished<E: std::fmt::Display>(
        &mut self,
        result: Result<(), E>,
    ) -> PushSubscription {
        self.registering = false;
        match result {
            Ok(()) => {
                self.endpoint_registered = true;
                info!("push endpoint registered");
            },
            Err(error) => {
                warn!(%error, "push registration failed");
            },
        }
        self.subscription()
    }

    /// Decide whether `payload` becomes a system notification.
    ///
    /// Suppressed when permission is not granted, when the payload's
    /// conversation is the visible one, or when the payload's message is
    /// already in that conversation's list.
    pub fn handle_inbound_push(
        &self,
        payload: &PushPayload,
        view: Option<ConversationView<'_>>,
    ) -> Option<NotificationPayload> {
        if self.permission != Permission::Granted {
            debug!(permission = ?self.permission, "push ignored without permission");
            return None;
        }

        let chat_id = payload.data.chat_id.as_str();
        if let Some(view) = view.filter(|v| v.reconciler.conversation_id() == chat_id) {
            if view.visible {
                debug!(chat_id, "push suppressed for visible conversation");
                return None;
            }
            let already_listed = payload
                .data
                .message
                .clone()
                .map(Message::from_wire)
                .is_some_and(|m| view.reconciler.contains_equivalent(&m));
            if already_listed {
                debug!(chat_id, "push suppressed for delivered message");
                return None;
            }
        }

        Some(build_notification(payload))
    }
}

/// Display payload for an inbound push.
///
/// Alerts for the same conversation share a tag, so a newer one replaces the
/// older one and re-alerts.
pub fn build_notification(payload: &PushPayload) -> NotificationPayload {
    NotificationPayload {
        title: payload.title.clone(),
        body: payload.body.clone(),
        icon: NOTIFICATION_ICON.to_string(),
        badge: NOTIFICATION_BADGE.to_string(),
        vibrate: NOTIFICATION_VIBRATE.to_vec(),
        data: payload.data.clone(),
        actions: vec![
            NotificationAction {
                action: ACTION_VIEW.to_string(),
                title: "View Chat".to_string(),
                icon: "/view-icon.png".to_string(),
            },
            NotificationAction {
                action: ACTION_DISMISS.to_string(),
                title: "Dismiss".to_string(),
                icon: "/dismiss-icon.png".to_string(),
            },
        ],
        tag: format!("chat-{}", payload.data.chat_id),
        renotify: true,
    }
}

/// Route a notification click.
///
/// The notification itself is always closed. `view` focuses the first open
/// window whose URL contains the conversation URL, or opens a new one.
pub fn route_click<S: AsRef<str>>(
    action: Option<&str>,
    data: &PushData,
    open_windows: &[S],
) -> ClickRoute {
    if action != Some(ACTION_VIEW) || data.url.is_empty() {
        return ClickRoute::Close;
    }

    open_windows
        .iter()
        .position(|url| url.as_ref().contains(data.url.as_str()))
        .map_or_else(|| ClickRoute::Open { url: data.url.clone() }, |window| ClickRoute::Focus {
            window,
        })
}

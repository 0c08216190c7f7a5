//! MCP method and notification names bridged by the relay.

/// `initialize` — protocol handshake.
pub const INITIALIZE: &str = "initialize";
/// `ping` — liveness round-trip.
pub const PING: &str = "ping";
/// `tools/list` — enumerate tools.
pub const TOOLS_LIST: &str = "tools/list";
/// `tools/call` — invoke a tool.
pub const TOOLS_CALL: &str = "tools/call";
/// `sampling/createMessage` — sampling request.
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
/// `roots/list` — enumerate roots.
pub const ROOTS_LIST: &str = "roots/list";
/// `logging/setLevel` — adjust the server's log level.
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// `resources/list` — enumerate resources.
pub const RESOURCES_LIST: &str = "resources/list";
/// `resources/read` — read a resource.
pub const RESOURCES_READ: &str = "resources/read";
/// `resources/subscribe` — subscribe to resource updates.
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// `resources/unsubscribe` — cancel a resource subscription.
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// `resources/templates/list` — enumerate resource templates.
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// `prompts/list` — enumerate prompts.
pub const PROMPTS_LIST: &str = "prompts/list";
/// `prompts/get` — retrieve a prompt.
pub const PROMPTS_GET: &str = "prompts/get";

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// `notifications/initialized`.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
/// `notifications/tools/list_changed`.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// `notifications/resources/list_changed`.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// `notifications/resources/updated`.
pub const NOTIF_RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// `notifications/prompts/list_changed`.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// `notifications/roots/list_changed`.
pub const NOTIF_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
/// `notifications/message` — server log message.
pub const NOTIF_MESSAGE: &str = "notifications/message";
/// `notifications/cancelled`.
pub const NOTIF_CANCELLED: &str = "notifications/cancelled";
/// `notifications/progress`.
pub const NOTIF_PROGRESS: &str = "notifications/progress";

/// The fixed set of upstream notification kinds the relay re-emits
/// downstream. Anything outside this set is dropped.
pub const BRIDGED_NOTIFICATIONS: &[&str] = &[
    NOTIF_TOOLS_LIST_CHANGED,
    NOTIF_RESOURCES_LIST_CHANGED,
    NOTIF_RESOURCES_UPDATED,
    NOTIF_PROMPTS_LIST_CHANGED,
    NOTIF_ROOTS_LIST_CHANGED,
    NOTIF_MESSAGE,
    NOTIF_CANCELLED,
    NOTIF_PROGRESS,
    NOTIF_INITIALIZED,
];

/// Whether an upstream notification kind is bridged downstream.
#[must_use]
pub fn is_bridged_notification(method: &str) -> bool {
    BRIDGED_NOTIFICATIONS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridged_notification_set() {
        assert!(is_bridged_notification("notifications/tools/list_changed"));
        assert!(is_bridged_notification("notifications/resources/updated"));
        assert!(is_bridged_notification("notifications/initialized"));
        assert!(!is_bridged_notification("notifications/unknown"));
        assert!(!is_bridged_notification("tools/list"));
        assert!(!is_bridged_notification(""));
    }

    #[test]
    fn test_bridged_notification_count() {
        assert_eq!(BRIDGED_NOTIFICATIONS.len(), 9);
    }
}

//! Session metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT_TOTAL: &str = "huddle_messages_sent_total";
    pub const MESSAGES_RECEIVED_TOTAL: &str = "huddle_messages_received_total";
    pub const PRESENCE_EVENTS_TOTAL: &str = "huddle_presence_events_total";
    pub const USERS_ONLINE: &str = "huddle_users_online";
    pub const HISTORY_SEARCHES_TOTAL: &str = "huddle_history_searches_total";
    pub const SESSIONS_ACTIVE: &str = "huddle_sessions_active";
}

/// Register descriptions for every session metric.
pub fn describe() {
    metrics::describe_counter!(names::MESSAGES_SENT_TOTAL, "Messages published by local sessions");
    metrics::describe_counter!(
        names::MESSAGES_RECEIVED_TOTAL,
        "Messages received by local sessions"
    );
    metrics::describe_counter!(
        names::PRESENCE_EVENTS_TOTAL,
        "Presence changes applied, by kind"
    );
    metrics::describe_gauge!(
        names::USERS_ONLINE,
        "Users online as seen by each local session, by session user"
    );
    metrics::describe_counter!(
        names::HISTORY_SEARCHES_TOTAL,
        "History searches, by answering source"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Currently joined local sessions");
}

pub(crate) fn record_message_sent() {
    counter!(names::MESSAGES_SENT_TOTAL).increment(1);
}

pub(crate) fn record_messages_received(count: usize) {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(count as u64);
}

pub(crate) fn record_presence_events(kind: &'static str, count: usize) {
    counter!(names::PRESENCE_EVENTS_TOTAL, "kind" => kind).increment(count as u64);
}

pub(crate) fn set_users_online(user: &str, count: usize) {
    gauge!(names::USERS_ONLINE, "user" => user.to_string()).set(count as f64);
}

pub(crate) fn record_history_search(source: &str) {
    counter!(names::HISTORY_SEARCHES_TOTAL, "source" => source.to_string()).increment(1);
}

pub(crate) fn session_started() {
    gauge!(names::SESSIONS_ACTIVE).increment(1.0);
}

pub(crate) fn session_ended() {
    gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
}

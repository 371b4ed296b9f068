//! Background monitors.
//!
//! A session runs two tasks: one turns presence samples into registry
//! updates, the other moves received messages into history. Each task waits
//! on its own wait set, bounded by the configured timeout, and exits as soon
//! as the shared cancellation token fires. Pending samples are not drained
//! on exit.

use crate::handler::SessionHandler;
use crate::history::{History, HistoryEntry};
use crate::metrics;
use crate::presence::PresenceRegistry;
use crate::substrate::SubstrateAdapter;
use huddle_bus::{WaitOutcome, WaitSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Everything the monitor tasks need.
pub struct MonitorContext {
    /// Substrate entities of the session.
    pub adapter: Arc<SubstrateAdapter>,
    /// Registry updated by the presence task.
    pub registry: Arc<Mutex<PresenceRegistry>>,
    /// History appended to by the message task.
    pub history: Arc<History>,
    /// Receives session events.
    pub handler: Arc<dyn SessionHandler>,
    /// The session's current group, for unaddressed messages.
    pub group: watch::Receiver<String>,
    /// Upper bound on a single wait.
    pub wait_timeout: Duration,
}

/// Handle to a session's two monitor tasks.
pub struct SessionMonitor {
    token: CancellationToken,
    presence: Option<JoinHandle<()>>,
    messages: Option<JoinHandle<()>>,
}

impl SessionMonitor {
    /// Spawn both monitor tasks on the current runtime.
    #[must_use]
    pub fn spawn(ctx: MonitorContext, username: &str) -> Self {
        let token = CancellationToken::new();

        let presence = tokio::spawn(
            run_presence(
                ctx.adapter.presence_waitset(token.clone()),
                Arc::clone(&ctx.adapter),
                Arc::clone(&ctx.registry),
                Arc::clone(&ctx.handler),
                username.to_string(),
                ctx.wait_timeout,
            )
            .instrument(tracing::info_span!("presence_monitor", user = %username)),
        );

        let messages = tokio::spawn(
            run_messages(
                ctx.adapter.message_waitset(token.clone()),
                ctx.adapter,
                ctx.history,
                ctx.handler,
                ctx.group,
                ctx.wait_timeout,
            )
            .instrument(tracing::info_span!("message_monitor", user = %username)),
        );

        Self {
            token,
            presence: Some(presence),
            messages: Some(messages),
        }
    }

    /// Whether both tasks are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        [&self.presence, &self.messages]
            .iter()
            .all(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
    }

    /// Cancel both tasks and wait for them to exit.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        for (name, task) in [("presence", self.presence.take()), ("messages", self.messages.take())] {
            let Some(task) = task else { continue };
            if let Err(e) = task.await {
                error!(monitor = name, error = %e, "Monitor task failed");
            }
        }
        debug!("Monitors stopped");
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_presence(
    waitset: WaitSet,
    adapter: Arc<SubstrateAdapter>,
    registry: Arc<Mutex<PresenceRegistry>>,
    handler: Arc<dyn SessionHandler>,
    username: String,
    wait_timeout: Duration,
) {
    info!("Presence monitor started");
    loop {
        match waitset.wait(wait_timeout).await {
            WaitOutcome::Cancelled => break,
            WaitOutcome::TimedOut => continue,
            WaitOutcome::Ready(_) => {
                process_presence(&adapter, &registry, handler.as_ref(), &username);
            }
        }
    }
    info!("Presence monitor stopped");
}

fn process_presence(
    adapter: &SubstrateAdapter,
    registry: &Mutex<PresenceRegistry>,
    handler: &dyn SessionHandler,
    username: &str,
) {
    let fresh = adapter.fresh_users().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to read presence samples");
        Vec::new()
    });
    let dropped = adapter.dropped_users().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to take dropped presence samples");
        Vec::new()
    });
    if fresh.is_empty() && dropped.is_empty() {
        return;
    }

    let (delta, online) = {
        let mut registry = registry.lock();
        let delta = registry.handle_notify(fresh, dropped);
        (delta, registry.count())
    };
    metrics::set_users_online(username, online);

    if !delta.joined.is_empty() {
        debug!(count = delta.joined.len(), "Users joined or updated");
        metrics::record_presence_events("joined", delta.joined.len());
        handler.on_users_joined_or_updated(&delta.joined);
    }
    if !delta.dropped.is_empty() {
        debug!(count = delta.dropped.len(), "Users dropped");
        metrics::record_presence_events("dropped", delta.dropped.len());
        handler.on_users_dropped(&delta.dropped);
    }
}

async fn run_messages(
    waitset: WaitSet,
    adapter: Arc<SubstrateAdapter>,
    history: Arc<History>,
    handler: Arc<dyn SessionHandler>,
    group: watch::Receiver<String>,
    wait_timeout: Duration,
) {
    info!("Message monitor started");
    loop {
        match waitset.wait(wait_timeout).await {
            WaitOutcome::Cancelled => break,
            WaitOutcome::TimedOut => continue,
            WaitOutcome::Ready(_) => match adapter.take_messages() {
                Ok(messages) => deliver_messages(messages, &history, handler.as_ref(), &group).await,
                Err(e) => warn!(error = %e, "Failed to take messages"),
            },
        }
    }
    info!("Message monitor stopped");
}

/// Append received messages to history and notify the handler.
pub(crate) async fn deliver_messages(
    messages: Vec<huddle_protocol::MessageRecord>,
    history: &History,
    handler: &dyn SessionHandler,
    group: &watch::Receiver<String>,
) {
    if messages.is_empty() {
        return;
    }

    let entries: Vec<HistoryEntry> = {
        let own_group = group.borrow();
        messages
            .iter()
            .map(|m| HistoryEntry::new(m.clone(), &own_group))
            .collect()
    };
    history.append_batch(&entries).await;

    debug!(count = messages.len(), "Messages received");
    metrics::record_messages_received(messages.len());
    handler.on_messages_received(&messages);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ChannelHandler, SessionEvent};
    use crate::router::MessageRouter;
    use crate::session::SessionConfig;
    use huddle_bus::Domain;
    use huddle_protocol::{MessageRecord, UserRecord};

    struct Fixture {
        adapter: Arc<SubstrateAdapter>,
        registry: Arc<Mutex<PresenceRegistry>>,
        history: Arc<History>,
        monitor: SessionMonitor,
        events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn start(domain: &Arc<Domain>, user: &UserRecord, wait_timeout: Duration) -> Fixture {
        let params = MessageRouter::new().build_filter_parameters(user);
        let adapter = Arc::new(
            SubstrateAdapter::open(Arc::clone(domain), &SessionConfig::default(), user, &params)
                .unwrap(),
        );
        let registry = Arc::new(Mutex::new(PresenceRegistry::new()));
        let history = Arc::new(History::new(16));
        let (handler, events) = ChannelHandler::new();
        let (_tx, group) = watch::channel(user.group.clone());

        let monitor = SessionMonitor::spawn(
            MonitorContext {
                adapter: Arc::clone(&adapter),
                registry: Arc::clone(&registry),
                history: Arc::clone(&history),
                handler: Arc::new(handler),
                group,
                wait_timeout,
            },
            &user.username,
        );

        Fixture {
            adapter,
            registry,
            history,
            monitor,
            events,
        }
    }

    #[tokio::test]
    async fn test_presence_and_messages_flow() {
        let domain = Domain::new(0);
        let alice = UserRecord::new("alice", "teamA");
        let mut fx = start(&domain, &alice, Duration::from_secs(1));
        assert!(fx.monitor.is_running());

        fx.adapter.announce(&alice).unwrap();
        let event = fx.events.recv().await.unwrap();
        assert_eq!(event, SessionEvent::UsersJoinedOrUpdated(vec![alice.clone()]));
        assert_eq!(fx.registry.lock().list(), vec![alice.clone()]);

        fx.adapter
            .publish(&MessageRecord::group("alice", "teamA", "hi"))
            .unwrap();
        match fx.events.recv().await.unwrap() {
            SessionEvent::MessagesReceived(messages) => assert_eq!(messages[0].message, "hi"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(fx.history.all(None)[0].destination, "teamA");

        fx.monitor.shutdown().await;
        assert!(!fx.monitor.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt() {
        let domain = Domain::new(0);
        let alice = UserRecord::new("alice", "teamA");
        let mut fx = start(&domain, &alice, Duration::from_secs(60));

        let started = std::time::Instant::now();
        fx.monitor.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        // A second shutdown has nothing left to wait for
        fx.monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_user_reported_once() {
        let domain = Domain::new(0);
        let alice = UserRecord::new("alice", "teamA");
        let bob = UserRecord::new("bob", "teamA");
        let mut fx = start(&domain, &bob, Duration::from_millis(200));

        let params = MessageRouter::new().build_filter_parameters(&alice);
        let other =
            SubstrateAdapter::open(Arc::clone(&domain), &SessionConfig::default(), &alice, &params)
                .unwrap();
        other.announce(&alice).unwrap();
        assert_eq!(
            fx.events.recv().await.unwrap(),
            SessionEvent::UsersJoinedOrUpdated(vec![alice.clone()])
        );

        other.close();
        assert_eq!(
            fx.events.recv().await.unwrap(),
            SessionEvent::UsersDropped(vec![alice])
        );
        assert!(fx.registry.lock().is_empty());

        fx.monitor.shutdown().await;
    }
}

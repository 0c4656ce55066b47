// crates/core/src/notice/bus.rs
//! Per-user presence and per-client message delivery.
//!
//! Every online user has a set of opened message types and one conduit per
//! connected client. `send` delivers to a conduit only when the user is
//! present, the message type is open and the target client is connected;
//! each failed condition has its own error.
//!
//! Conduits are bounded (capacity 1 by default), so `send` waits for the
//! reader. Run it from a cancellable worker, not from a request the client is
//! waiting on. The user map lock is only held to look up conduits, never
//! while waiting on one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::message::Message;
use crate::config::NoticeConfig;
use crate::error::NoticeError;

/// Callback fired with the user id when a user comes online or is removed.
pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Message>>>;

/// One client's delivery path. The map owns it; readers hold a
/// [`ClientStream`] sharing the receiver.
struct Conduit {
    tx: mpsc::Sender<Message>,
    rx: SharedReceiver,
    closed: CancellationToken,
}

impl Conduit {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: CancellationToken::new(),
        }
    }

    fn stream(&self, user: &str, client_id: &str) -> ClientStream {
        ClientStream {
            user: user.to_string(),
            client_id: client_id.to_string(),
            rx: Arc::clone(&self.rx),
            closed: self.closed.clone(),
        }
    }
}

/// Consumer half of a client conduit.
#[derive(Clone)]
pub struct ClientStream {
    user: String,
    client_id: String,
    rx: SharedReceiver,
    closed: CancellationToken,
}

impl ClientStream {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for the next message. `None` once the client has been closed.
    pub async fn recv(&self) -> Option<Message> {
        let mut rx = tokio::select! {
            guard = self.rx.lock() => guard,
            _ = self.closed.cancelled() => return None,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            msg = rx.recv() => msg,
        }
    }

    pub async fn recv_json(&self) -> Option<Result<String, NoticeError>> {
        self.recv().await.map(|msg| msg.to_json())
    }

    pub async fn recv_xml(&self) -> Option<Result<String, NoticeError>> {
        self.recv().await.map(|msg| msg.to_xml())
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStream")
            .field("user", &self.user)
            .field("client_id", &self.client_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Default)]
struct OnlineUser {
    types: HashMap<String, bool>,
    clients: HashMap<String, Conduit>,
}

impl OnlineUser {
    fn accepts(&self, kind: &str) -> bool {
        self.types.get(kind).copied().unwrap_or(false)
    }

    fn has_open_type(&self) -> bool {
        self.types.values().any(|open| *open)
    }

    fn info(&self, user: &str) -> OnlineUserInfo {
        let mut types: Vec<String> = self
            .types
            .iter()
            .filter(|(_, open)| **open)
            .map(|(kind, _)| kind.clone())
            .collect();
        types.sort();
        let mut clients: Vec<String> = self.clients.keys().cloned().collect();
        clients.sort();
        OnlineUserInfo {
            user: user.to_string(),
            types,
            clients,
        }
    }
}

/// Snapshot of one user's presence.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUserInfo {
    pub user: String,
    /// Open message types, sorted.
    pub types: Vec<String>,
    /// Connected client ids, sorted.
    pub clients: Vec<String>,
}

struct Target {
    client_id: String,
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
}

/// In-memory notification bus for one server instance.
pub struct Bus {
    config: NoticeConfig,
    users: RwLock<HashMap<String, OnlineUser>>,
    on_open: RwLock<Vec<Hook>>,
    on_close: RwLock<Vec<Hook>>,
}

impl Bus {
    pub fn new(config: NoticeConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
            on_open: RwLock::new(Vec::new()),
            on_close: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &NoticeConfig {
        &self.config
    }

    /// Register a hook fired when a user gets their first client.
    pub fn on_open(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        write_lock(&self.on_open, "open hooks").push(Arc::new(hook));
    }

    /// Register a hook fired when a user's entry is removed.
    pub fn on_close(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        write_lock(&self.on_close, "close hooks").push(Arc::new(hook));
    }

    /// Deliver `message` to `message.client_id`, or to every client of the
    /// user when the id is empty. Waits until each conduit accepts it.
    pub async fn send(&self, user: &str, message: Message) -> Result<(), NoticeError> {
        let result = self.deliver(user, message, None).await;
        record_send(&result);
        result
    }

    /// Like [`Bus::send`], but gives up with [`NoticeError::ForcedExit`] when
    /// `token` is cancelled while waiting on a conduit.
    pub async fn send_with_cancel(
        &self,
        user: &str,
        message: Message,
        token: &CancellationToken,
    ) -> Result<(), NoticeError> {
        let result = self.deliver(user, message, Some(token)).await;
        record_send(&result);
        result
    }

    async fn deliver(
        &self,
        user: &str,
        message: Message,
        token: Option<&CancellationToken>,
    ) -> Result<(), NoticeError> {
        let targets = match self.targets(user, &message) {
            Ok(targets) => targets,
            Err(err) => {
                if matches!(err, NoticeError::UserNotOnline { .. }) {
                    self.mirror_to_console(user, &message);
                }
                return Err(err);
            }
        };

        // A broadcast still reaches the remaining clients after one fails.
        let mut first_err = None;
        for target in targets {
            let mut msg = message.clone();
            msg.client_id.clone_from(&target.client_id);
            if let Err(err) = push(user, target, msg, token).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Resolve the conduits for `message` under the read lock.
    fn targets(&self, user: &str, message: &Message) -> Result<Vec<Target>, NoticeError> {
        let users = self.read();
        let online = users.get(user).ok_or_else(|| NoticeError::UserNotOnline {
            user: user.to_string(),
        })?;
        if !online.accepts(&message.kind) {
            return Err(NoticeError::MessageTypeNotAccepted {
                user: user.to_string(),
                kind: message.kind.clone(),
            });
        }

        let target = |client_id: &str, conduit: &Conduit| Target {
            client_id: client_id.to_string(),
            tx: conduit.tx.clone(),
            closed: conduit.closed.clone(),
        };
        let not_online = || NoticeError::ClientNotOnline {
            user: user.to_string(),
            client_id: message.client_id.clone(),
        };

        if message.client_id.is_empty() {
            let mut targets: Vec<Target> = online
                .clients
                .iter()
                .map(|(id, conduit)| target(id, conduit))
                .collect();
            if targets.is_empty() {
                return Err(not_online());
            }
            targets.sort_by(|a, b| a.client_id.cmp(&b.client_id));
            Ok(targets)
        } else {
            online
                .clients
                .get(&message.client_id)
                .map(|conduit| vec![target(&message.client_id, conduit)])
                .ok_or_else(not_online)
        }
    }

    fn mirror_to_console(&self, user: &str, message: &Message) {
        if !self.config.console_fallback {
            return;
        }
        tracing::info!(
            target: "toolbox::notice",
            user,
            kind = %message.kind,
            title = %message.title,
            status = message.status,
            content = %message.content,
            "Notice for offline user"
        );
    }

    /// Conduit for `(user, client_id)`, created along with the user if absent,
    /// so a client can listen before any message type is opened.
    pub fn recv(&self, user: &str, client_id: &str) -> ClientStream {
        let (stream, came_online) = {
            let mut users = self.write();
            let online = users.entry(user.to_string()).or_default();
            let came_online = online.clients.is_empty();
            let capacity = self.config.capacity();
            let conduit = online
                .clients
                .entry(client_id.to_string())
                .or_insert_with(|| Conduit::new(capacity));
            let stream = conduit.stream(user, client_id);
            (stream, came_online)
        };
        if came_online {
            self.user_came_online(user);
        }
        stream
    }

    /// Connect a new client for `user` under a fresh time-based id.
    pub fn open_client(&self, user: &str) -> ClientStream {
        let (stream, came_online) = {
            let mut users = self.write();
            let online = users.entry(user.to_string()).or_default();
            let came_online = online.clients.is_empty();
            let mut stamp = Utc::now().timestamp_micros();
            while online.clients.contains_key(&stamp.to_string()) {
                stamp += 1;
            }
            let client_id = stamp.to_string();
            let conduit = Conduit::new(self.config.capacity());
            let stream = conduit.stream(user, &client_id);
            online.clients.insert(client_id, conduit);
            (stream, came_online)
        };
        if came_online {
            self.user_came_online(user);
        }
        tracing::debug!(user, client_id = stream.client_id(), "Opened notice client");
        stream
    }

    /// Close one client. Returns true when the user's entry is gone
    /// afterwards: the last client closed and no message type is open, or the
    /// user was never online.
    pub fn close_client(&self, user: &str, client_id: &str) -> bool {
        let removed = {
            let mut users = self.write();
            let Some(online) = users.get_mut(user) else {
                return true;
            };
            if let Some(conduit) = online.clients.remove(client_id) {
                conduit.closed.cancel();
            }
            if online.clients.is_empty() && !online.has_open_type() {
                users.remove(user);
                true
            } else {
                false
            }
        };
        tracing::debug!(user, client_id, removed, "Closed notice client");
        if removed {
            self.user_removed(user);
        }
        removed
    }

    /// Open message types for `user`. With no types, reopen every type the
    /// user has known.
    pub fn open_message<I, S>(&self, user: &str, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut users = self.write();
        let online = users.entry(user.to_string()).or_default();
        let mut kinds = kinds.into_iter().peekable();
        if kinds.peek().is_none() {
            online.types.values_mut().for_each(|open| *open = true);
        } else {
            for kind in kinds {
                online.types.insert(kind.into(), true);
            }
        }
    }

    /// Close message types for `user`. With no types, forget them all.
    pub fn close_message<I, S>(&self, user: &str, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut users = self.write();
        let Some(online) = users.get_mut(user) else {
            return;
        };
        let mut kinds = kinds.into_iter().peekable();
        if kinds.peek().is_none() {
            online.types.clear();
        } else {
            for kind in kinds {
                if let Some(open) = online.types.get_mut(kind.as_ref()) {
                    *open = false;
                }
            }
        }
    }

    pub fn get_ok(&self, user: &str) -> Option<OnlineUserInfo> {
        self.read().get(user).map(|online| online.info(user))
    }

    pub fn is_message_type_open(&self, user: &str, kind: &str) -> bool {
        self.read().get(user).is_some_and(|online| online.accepts(kind))
    }

    pub fn count_clients(&self, user: &str) -> usize {
        self.read().get(user).map_or(0, |online| online.clients.len())
    }

    /// Connected clients across every user.
    pub fn total_clients(&self) -> usize {
        self.read().values().map(|online| online.clients.len()).sum()
    }

    /// Users with an entry on the bus, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.read().keys().cloned().collect();
        users.sort();
        users
    }

    /// Close every conduit and drop every user.
    pub fn close(&self) {
        let drained: Vec<(String, OnlineUser)> = self.write().drain().collect();
        for (user, online) in &drained {
            for conduit in online.clients.values() {
                conduit.closed.cancel();
            }
            self.fire(&self.on_close, "close hooks", user);
        }
        gauge!("toolbox_notice_online_users").set(0.0);
        if !drained.is_empty() {
            tracing::info!(users = drained.len(), "Closed notification bus");
        }
    }

    fn user_came_online(&self, user: &str) {
        gauge!("toolbox_notice_online_users").set(self.read().len() as f64);
        tracing::info!(user, "User came online");
        self.fire(&self.on_open, "open hooks", user);
    }

    fn user_removed(&self, user: &str) {
        gauge!("toolbox_notice_online_users").set(self.read().len() as f64);
        tracing::info!(user, "User went offline");
        self.fire(&self.on_close, "close hooks", user);
    }

    fn fire(&self, hooks: &RwLock<Vec<Hook>>, what: &str, user: &str) {
        let hooks: Vec<Hook> = read_lock(hooks, what).clone();
        for hook in hooks {
            hook(user);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, OnlineUser>> {
        read_lock(&self.users, "online users")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, OnlineUser>> {
        write_lock(&self.users, "online users")
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(NoticeConfig::default())
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("config", &self.config)
            .field("users", &self.read().len())
            .finish()
    }
}

/// Wait for one conduit to accept `msg`.
async fn push(
    user: &str,
    target: Target,
    msg: Message,
    token: Option<&CancellationToken>,
) -> Result<(), NoticeError> {
    let not_online = || NoticeError::ClientNotOnline {
        user: user.to_string(),
        client_id: target.client_id.clone(),
    };
    let cancelled = async {
        match token {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        sent = target.tx.send(msg) => sent.map_err(|_| not_online()),
        _ = target.closed.cancelled() => Err(not_online()),
        _ = cancelled => Err(NoticeError::ForcedExit),
    }
}

fn record_send(result: &Result<(), NoticeError>) {
    let label = match result {
        Ok(()) => "ok",
        Err(err) => err.metric_label(),
    };
    counter!("toolbox_notice_sent_total", "result" => label).increment(1);
}

fn read_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|e| {
        tracing::error!("RwLock poisoned reading {what}: {e}");
        e.into_inner()
    })
}

fn write_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|e| {
        tracing::error!("RwLock poisoned writing {what}: {e}");
        e.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_send_to_unknown_user() {
        let bus = Bus::default();
        let err = bus.send("alice", Message::new("export")).await.unwrap_err();
        assert!(matches!(err, NoticeError::UserNotOnline { .. }));
    }

    /// Log lines written while `f` runs on this thread.
    async fn capture_logs<F: std::future::Future>(f: F) -> String {
        #[derive(Clone)]
        struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Capture {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = Capture(Arc::new(std::sync::Mutex::new(Vec::new())));
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        {
            let _default = tracing::subscriber::set_default(subscriber);
            f.await;
        }
        let bytes = buf.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_offline_notice_is_mirrored_to_console() {
        let bus = Bus::default();
        let logs = capture_logs(async {
            let msg = Message::new("export")
                .with_title("Nightly export")
                .with_content("disk full");
            let err = bus.send("alice", msg).await.unwrap_err();
            assert!(matches!(err, NoticeError::UserNotOnline { .. }));
        })
        .await;

        assert!(logs.contains("toolbox::notice"), "{logs}");
        assert!(logs.contains("Notice for offline user"), "{logs}");
        assert!(logs.contains("user=\"alice\""), "{logs}");
        assert!(logs.contains("Nightly export"), "{logs}");
        assert!(logs.contains("disk full"), "{logs}");
    }

    #[tokio::test]
    async fn test_console_fallback_can_be_disabled() {
        let bus = Bus::new(NoticeConfig {
            console_fallback: false,
            ..NoticeConfig::default()
        });
        let logs = capture_logs(async {
            assert!(bus.send("alice", Message::new("export")).await.is_err());
        })
        .await;
        assert!(!logs.contains("Notice for offline user"), "{logs}");
    }

    #[tokio::test]
    async fn test_send_to_closed_type() {
        let bus = Bus::default();
        let client = bus.open_client("alice");
        let msg = Message::new("export").with_client_id(client.client_id());

        let err = bus.send("alice", msg).await.unwrap_err();
        assert!(matches!(err, NoticeError::MessageTypeNotAccepted { .. }));
    }

    #[tokio::test]
    async fn test_send_to_missing_client() {
        let bus = Bus::default();
        bus.open_message("alice", ["export"]);
        let msg = Message::new("export").with_client_id("nope");

        let err = bus.send("alice", msg).await.unwrap_err();
        assert!(matches!(err, NoticeError::ClientNotOnline { .. }));
    }

    #[tokio::test]
    async fn test_send_and_recv() {
        let bus = Bus::default();
        let client = bus.open_client("alice");
        bus.open_message("alice", ["export"]);

        let msg = Message::new("export")
            .with_client_id(client.client_id())
            .with_status(1)
            .with_content("50% done");
        bus.send("alice", msg).await.unwrap();

        let got = timeout(WAIT, client.recv()).await.unwrap().unwrap();
        assert_eq!(got.kind, "export");
        assert_eq!(got.status, 1);
        assert_eq!(got.content, "50% done");
    }

    #[tokio::test]
    async fn test_recv_creates_conduit_before_types() {
        let bus = Bus::default();
        let stream = bus.recv("bob", "tab-1");
        assert_eq!(bus.count_clients("bob"), 1);
        assert!(!bus.is_message_type_open("bob", "restart"));

        // Same id returns the same conduit.
        let again = bus.recv("bob", "tab-1");
        assert_eq!(bus.count_clients("bob"), 1);

        bus.open_message("bob", ["restart"]);
        bus.send("bob", Message::new("restart").with_client_id("tab-1"))
            .await
            .unwrap();
        let got = timeout(WAIT, again.recv()).await.unwrap().unwrap();
        assert_eq!(got.kind, "restart");
        drop(stream);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_send_order() {
        let bus = Arc::new(Bus::default());
        let client = bus.open_client("alice");
        bus.open_message("alice", ["export"]);

        let producer = {
            let bus = Arc::clone(&bus);
            let client_id = client.client_id().to_string();
            tokio::spawn(async move {
                for status in 1..=5 {
                    let msg = Message::new("export")
                        .with_client_id(&client_id)
                        .with_status(status);
                    bus.send("alice", msg).await.unwrap();
                }
            })
        };

        for expected in 1..=5 {
            let got = timeout(WAIT, client.recv()).await.unwrap().unwrap();
            assert_eq!(got.status, expected);
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_blocks_until_read() {
        let bus = Bus::default();
        let client = bus.open_client("alice");
        bus.open_message("alice", ["export"]);
        let msg = || Message::new("export").with_client_id(client.client_id());

        // Capacity 1: the first send is accepted, the second waits.
        bus.send("alice", msg()).await.unwrap();
        assert!(timeout(Duration::from_millis(50), bus.send("alice", msg()))
            .await
            .is_err());

        client.recv().await.unwrap();
        timeout(WAIT, bus.send("alice", msg())).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_blocked_send_honours_cancel() {
        let bus = Arc::new(Bus::default());
        let client = bus.open_client("alice");
        bus.open_message("alice", ["export"]);
        let msg = Message::new("export").with_client_id(client.client_id());
        bus.send("alice", msg.clone()).await.unwrap();

        let token = CancellationToken::new();
        let blocked = {
            let bus = Arc::clone(&bus);
            let token = token.clone();
            tokio::spawn(async move { bus.send_with_cancel("alice", msg, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = timeout(WAIT, blocked).await.unwrap().unwrap();
        assert!(matches!(result, Err(NoticeError::ForcedExit)));
    }

    #[tokio::test]
    async fn test_close_client_wakes_reader_and_sender() {
        let bus = Arc::new(Bus::default());
        let client = bus.open_client("alice");
        let client_id = client.client_id().to_string();
        bus.open_message("alice", ["export"]);
        bus.send("alice", Message::new("export").with_client_id(&client_id))
            .await
            .unwrap();

        let blocked = {
            let bus = Arc::clone(&bus);
            let msg = Message::new("export").with_client_id(&client_id);
            tokio::spawn(async move { bus.send("alice", msg).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!bus.close_client("alice", &client_id));
        let result = timeout(WAIT, blocked).await.unwrap().unwrap();
        assert!(matches!(result, Err(NoticeError::ClientNotOnline { .. })));
        assert!(timeout(WAIT, client.recv()).await.unwrap().is_none());
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_presence_gc() {
        let bus = Bus::default();
        let client = bus.open_client("alice");
        assert!(bus.get_ok("alice").is_some());

        assert!(bus.close_client("alice", client.client_id()));
        assert!(bus.get_ok("alice").is_none());
        assert!(bus.online_users().is_empty());
    }

    #[tokio::test]
    async fn test_open_types_keep_user_after_last_client() {
        let bus = Bus::default();
        let client = bus.open_client("alice");
        bus.open_message("alice", ["export"]);

        assert!(!bus.close_client("alice", client.client_id()));
        let info = bus.get_ok("alice").unwrap();
        assert_eq!(info.types, vec!["export".to_string()]);
        assert!(info.clients.is_empty());

        bus.close_message("alice", Vec::<String>::new());
        assert!(bus.close_client("alice", "already-gone"));
        assert!(bus.get_ok("alice").is_none());
    }

    #[test]
    fn test_close_client_unknown_user() {
        let bus = Bus::default();
        assert!(bus.close_client("ghost", "c1"));
    }

    #[test]
    fn test_open_and_close_message_types() {
        let bus = Bus::default();
        bus.open_message("alice", ["export", "restart"]);
        assert!(bus.is_message_type_open("alice", "export"));

        bus.close_message("alice", ["export"]);
        assert!(!bus.is_message_type_open("alice", "export"));
        assert!(bus.is_message_type_open("alice", "restart"));

        // No types: reopen everything known.
        bus.open_message("alice", Vec::<String>::new());
        assert!(bus.is_message_type_open("alice", "export"));

        // No types: forget everything.
        bus.close_message("alice", Vec::<String>::new());
        assert!(!bus.is_message_type_open("alice", "restart"));
        bus.open_message("alice", Vec::<String>::new());
        assert!(!bus.is_message_type_open("alice", "restart"));
    }

    #[tokio::test]
    async fn test_empty_client_id_broadcasts_to_user() {
        let bus = Bus::default();
        let a = bus.recv("alice", "a");
        let b = bus.recv("alice", "b");
        bus.open_message("alice", ["restart"]);

        bus.send("alice", Message::new("restart").with_status(1))
            .await
            .unwrap();

        let got_a = timeout(WAIT, a.recv()).await.unwrap().unwrap();
        let got_b = timeout(WAIT, b.recv()).await.unwrap().unwrap();
        assert_eq!(got_a.client_id, "a");
        assert_eq!(got_b.client_id, "b");
    }

    #[tokio::test]
    async fn test_broadcast_returns_first_error_and_still_delivers() {
        let bus = Arc::new(Bus::default());
        let a = bus.recv("alice", "a");
        let b = bus.recv("alice", "b");
        bus.open_message("alice", ["restart"]);

        // Fill "a" so the broadcast blocks on it, then close it.
        bus.send("alice", Message::new("restart").with_client_id("a"))
            .await
            .unwrap();
        let broadcast = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.send("alice", Message::new("restart")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.close_client("alice", "a");
        assert!(a.is_closed());

        let got_b = timeout(WAIT, b.recv()).await.unwrap().unwrap();
        assert_eq!(got_b.client_id, "b");
        let result = timeout(WAIT, broadcast).await.unwrap().unwrap();
        assert!(
            matches!(result, Err(NoticeError::ClientNotOnline { ref client_id, .. }) if client_id == "a")
        );
    }

    #[tokio::test]
    async fn test_broadcast_without_clients() {
        let bus = Bus::default();
        bus.open_message("alice", ["restart"]);
        let err = bus.send("alice", Message::new("restart")).await.unwrap_err();
        assert!(matches!(err, NoticeError::ClientNotOnline { .. }));
    }

    #[test]
    fn test_open_client_ids_are_unique() {
        let bus = Bus::default();
        let ids: std::collections::HashSet<String> = (0..50)
            .map(|_| bus.open_client("alice").client_id().to_string())
            .collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(bus.count_clients("alice"), 50);

        bus.open_client("bob");
        bus.open_message("carol", ["export"]);
        assert_eq!(bus.total_clients(), 51);
    }

    #[test]
    fn test_hooks_fire_on_transitions() {
        let bus = Bus::default();
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let opened = Arc::clone(&opened);
            bus.on_open(move |_| {
                opened.fetch_add(1, Ordering::SeqCst);
            });
            let closed = Arc::clone(&closed);
            bus.on_close(move |user| {
                assert_eq!(user, "alice");
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }

        let first = bus.open_client("alice");
        let second = bus.open_client("alice");
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        assert!(!bus.close_client("alice", first.client_id()));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert!(bus.close_client("alice", second.client_id()));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_bus() {
        let bus = Bus::default();
        let client = bus.open_client("alice");
        bus.open_message("bob", ["export"]);

        bus.close();
        assert!(bus.online_users().is_empty());
        assert!(client.recv().await.is_none());
    }
}

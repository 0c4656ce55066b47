// crates/core/src/notice/noticer.rs
//! Senders bound to one (user, message type, client) target.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::bus::Bus;
use super::message::{DisplayMode, Message};
use super::progress::{ExitCheck, PercentFeed, Progress, TimeoutCheck};
use super::proxy::{ProxyReader, ProxyWriter};
use crate::error::NoticeError;

/// What a [`Noticer`] sends to and how it decides the work should stop.
#[derive(Clone, Default)]
pub struct NoticerConfig {
    user: String,
    kind: String,
    client_id: String,
    display_id: String,
    title: String,
    mode: DisplayMode,
    exit_check: Option<Arc<dyn ExitCheck>>,
    timeout: Option<Duration>,
}

impl NoticerConfig {
    /// An empty `user` yields a console noticer.
    pub fn new(user: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn display_id(mut self, display_id: impl Into<String>) -> Self {
        self.display_id = display_id.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }

    /// Explicit exit check for the shared progress. Takes precedence over
    /// [`NoticerConfig::timeout`].
    pub fn exit_check(mut self, check: Arc<dyn ExitCheck>) -> Self {
        self.exit_check = Some(check);
        self
    }

    /// Flip the exit check once `timeout` elapses or the parent token is
    /// cancelled.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Debug for NoticerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoticerConfig")
            .field("user", &self.user)
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .field("display_id", &self.display_id)
            .field("mode", &self.mode)
            .field("has_exit_check", &self.exit_check.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

enum Target {
    Console,
    Bus {
        bus: Arc<Bus>,
        user: String,
        token: CancellationToken,
        deadline: Option<TimeoutCheck>,
    },
}

/// Composes messages with a progress snapshot and pushes them to the bus.
pub struct Noticer {
    target: Target,
    template: Message,
    progress: Arc<Progress>,
}

impl Noticer {
    /// Build a noticer on `bus`. Opens `config.kind` for the user right away
    /// so the first send is not rejected for a closed type.
    pub fn new(bus: &Arc<Bus>, parent: &CancellationToken, config: NoticerConfig) -> Self {
        if config.user.is_empty() {
            return Self::console_with(config);
        }

        let timeout = config.timeout.or(bus.config().default_timeout);
        let deadline = timeout.map(|t| TimeoutCheck::new(parent, t));
        let token = match &deadline {
            Some(check) => check.token().clone(),
            None => parent.clone(),
        };
        let check: Arc<dyn ExitCheck> = match (&config.exit_check, &deadline) {
            (Some(check), _) => Arc::clone(check),
            (None, Some(deadline)) => Arc::new(deadline.clone()),
            (None, None) => Arc::new(token.clone()),
        };

        bus.open_message(&config.user, [config.kind.as_str()]);
        tracing::debug!(
            user = %config.user,
            kind = %config.kind,
            client_id = %config.client_id,
            "Created noticer"
        );

        Self {
            template: template(&config),
            progress: Arc::new(Progress::new().with_exit_check(check)),
            target: Target::Bus {
                bus: Arc::clone(bus),
                user: config.user,
                token,
                deadline,
            },
        }
    }

    /// A noticer that writes to the log and never fails.
    pub fn console() -> Self {
        Self::console_with(NoticerConfig::default())
    }

    fn console_with(config: NoticerConfig) -> Self {
        let progress = match &config.exit_check {
            Some(check) => Progress::new().with_exit_check(Arc::clone(check)),
            None => Progress::new(),
        };
        Self {
            template: template(&config),
            progress: Arc::new(progress),
            target: Target::Console,
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self.target, Target::Console)
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn is_exited(&self) -> bool {
        self.progress.is_exited()
    }

    /// Send `content` with the shared progress attached.
    pub async fn send(
        &self,
        content: impl Into<serde_json::Value>,
        status: i32,
    ) -> Result<(), NoticeError> {
        self.send_progress(content, status, &self.progress).await
    }

    /// Send `content` with a snapshot of `progress` instead of the shared one.
    pub async fn send_progress(
        &self,
        content: impl Into<serde_json::Value>,
        status: i32,
        progress: &Progress,
    ) -> Result<(), NoticeError> {
        let message = self
            .template
            .clone()
            .with_status(status)
            .with_content(content)
            .with_progress(progress);

        match &self.target {
            Target::Console => {
                log_to_console(&message);
                Ok(())
            }
            Target::Bus {
                bus,
                user,
                token,
                deadline: None,
            } => bus.send_with_cancel(user, message, token).await,
            Target::Bus {
                bus,
                user,
                token,
                deadline: Some(deadline),
            } => {
                tokio::select! {
                    sent = bus.send_with_cancel(user, message, token) => sent,
                    _ = deadline.exited() => Err(NoticeError::ForcedExit),
                }
            }
        }
    }

    /// Pair this noticer with explicit progress controls.
    pub fn with_progress(self) -> NoticeAndProgress {
        NoticeAndProgress { noticer: self }
    }
}

impl Default for Noticer {
    fn default() -> Self {
        Self::console()
    }
}

impl fmt::Debug for Noticer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = match &self.target {
            Target::Console => "",
            Target::Bus { user, .. } => user.as_str(),
        };
        f.debug_struct("Noticer")
            .field("user", &user)
            .field("kind", &self.template.kind)
            .field("client_id", &self.template.client_id)
            .field("progress", &self.progress)
            .finish()
    }
}

fn template(config: &NoticerConfig) -> Message {
    Message::new(config.kind.clone())
        .with_client_id(config.client_id.clone())
        .with_id(config.display_id.clone())
        .with_title(config.title.clone())
        .with_mode(config.mode)
}

fn log_to_console(message: &Message) {
    let percent = message.progress.map(|p| p.percent);
    tracing::info!(
        target: "toolbox::notice",
        kind = %message.kind,
        title = %message.title,
        status = message.status,
        content = %message.content,
        percent,
        "Notice"
    );
}

/// A [`Noticer`] plus the progress mutations a work loop needs.
#[derive(Debug)]
pub struct NoticeAndProgress {
    noticer: Noticer,
}

impl NoticeAndProgress {
    pub fn noticer(&self) -> &Noticer {
        &self.noticer
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.noticer.progress
    }

    pub fn is_exited(&self) -> bool {
        self.noticer.is_exited()
    }

    pub fn add(&self, n: i64) {
        self.noticer.progress.add(n);
    }

    pub fn done(&self, n: i64) -> i64 {
        self.noticer.progress.done(n)
    }

    pub fn complete(&self) {
        self.noticer.progress.complete();
    }

    pub fn callback<T, E>(
        &self,
        total: u64,
        exec: impl FnOnce(&mut dyn FnMut(u64)) -> Result<T, E>,
    ) -> Result<T, E> {
        self.noticer.progress.callback(total, exec)
    }

    pub async fn callback_async<F, Fut, T, E>(&self, total: u64, exec: F) -> Result<T, E>
    where
        F: FnOnce(PercentFeed) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.noticer.progress.callback_async(total, exec).await
    }

    pub fn proxy_reader<R>(&self, reader: R) -> ProxyReader<R> {
        ProxyReader::new(reader, Arc::clone(&self.noticer.progress))
    }

    pub fn proxy_writer<W>(&self, writer: W) -> ProxyWriter<W> {
        ProxyWriter::new(writer, Arc::clone(&self.noticer.progress))
    }

    pub async fn send(
        &self,
        content: impl Into<serde_json::Value>,
        status: i32,
    ) -> Result<(), NoticeError> {
        self.noticer.send(content, status).await
    }
}

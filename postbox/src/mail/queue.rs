use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::mailer::Mailer;
use super::message::Message;
use super::transport::Transport;
use super::MailError;
use crate::config::{MailerConfig, DEFAULT_SEND_BUFFER_LEN};

/// What the dispatcher does after a message fails to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and move on to the next message.
    #[default]
    Continue,
    /// Log the failure and terminate the dispatcher. Messages still buffered
    /// are dropped and later enqueues fail with [`EnqueueError::Stopped`].
    Stop,
}

/// Lifecycle of the dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for a message.
    Idle,
    /// A message is being transmitted.
    Sending,
    /// Ended after a failed send under [`FailurePolicy::Stop`].
    Terminated,
    /// Ended by [`MailQueue::stop`] after draining the buffer.
    Stopped,
}

impl DispatchState {
    pub fn is_finished(self) -> bool {
        matches!(self, DispatchState::Terminated | DispatchState::Stopped)
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sending => write!(f, "sending"),
            Self::Terminated => write!(f, "terminated"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A message the queue did not accept. The message is handed back.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("mail queue is full")]
    Full(Box<Message>),

    #[error("mail queue is stopped")]
    Stopped(Box<Message>),

    #[error("timed out waiting for mail queue capacity")]
    Timeout(Box<Message>),
}

impl EnqueueError {
    pub fn into_message(self) -> Message {
        match self {
            Self::Full(m) | Self::Stopped(m) | Self::Timeout(m) => *m,
        }
    }
}

impl From<mpsc::error::TrySendError<Message>> for EnqueueError {
    fn from(err: mpsc::error::TrySendError<Message>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(m) => Self::Full(Box::new(m)),
            mpsc::error::TrySendError::Closed(m) => Self::Stopped(Box::new(m)),
        }
    }
}

impl From<mpsc::error::SendTimeoutError<Message>> for EnqueueError {
    fn from(err: mpsc::error::SendTimeoutError<Message>) -> Self {
        match err {
            mpsc::error::SendTimeoutError::Timeout(m) => Self::Timeout(Box::new(m)),
            mpsc::error::SendTimeoutError::Closed(m) => Self::Stopped(Box::new(m)),
        }
    }
}

/// Single consumer of a bounded mail queue.
///
/// Messages are sent one at a time, in the order they were enqueued.
///
/// ```ignore
/// let queue = Dispatcher::new(mailer)
///     .capacity(32)
///     .enqueue_timeout(Duration::from_secs(5))
///     .start()?;
///
/// queue.try_enqueue(message)?;
/// // ...
/// queue.stop().await;
/// ```
pub struct Dispatcher<T: Transport> {
    mailer: Mailer<T>,
    capacity: usize,
    failure_policy: FailurePolicy,
    enqueue_timeout: Option<Duration>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(mailer: Mailer<T>) -> Self {
        Self {
            mailer,
            capacity: DEFAULT_SEND_BUFFER_LEN,
            failure_policy: FailurePolicy::default(),
            enqueue_timeout: None,
        }
    }

    /// Number of messages buffered before enqueueing pushes back (default: 10).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Upper bound for [`MailQueue::enqueue`] to wait for capacity.
    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = Some(timeout);
        self
    }

    /// Apply the queue settings from `config`: `send_buffer_len`,
    /// `stop_on_failure` and `enqueue_timeout_ms`.
    pub fn with_config(mut self, config: &MailerConfig) -> Self {
        self.capacity = config.send_buffer_len;
        self.failure_policy = config.failure_policy();
        self.enqueue_timeout = config.enqueue_timeout();
        self
    }

    pub fn mailer(&self) -> &Mailer<T> {
        &self.mailer
    }

    /// Spawn the dispatch task and return a handle to its queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<MailQueue, MailError> {
        if self.capacity == 0 {
            return Err(MailError::Config("queue capacity must be positive".into()));
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (state, state_rx) = watch::channel(DispatchState::Idle);

        let task = tokio::spawn(
            dispatch(self.mailer, receiver, shutdown_rx, state, self.failure_policy)
                .instrument(tracing::info_span!("mail_dispatch")),
        );

        tracing::info!(capacity = self.capacity, policy = ?self.failure_policy, "mail dispatcher running");

        Ok(MailQueue {
            inner: Arc::new(Inner {
                sender,
                shutdown,
                state: state_rx,
                task: Mutex::new(Some(task)),
                enqueue_timeout: self.enqueue_timeout,
            }),
        })
    }
}

async fn dispatch<T: Transport>(
    mailer: Mailer<T>,
    mut receiver: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<DispatchState>,
    policy: FailurePolicy,
) {
    let mut closing = false;

    loop {
        let next = if closing {
            receiver.recv().await
        } else {
            tokio::select! {
                next = receiver.recv() => next,
                _ = shutdown.changed() => {
                    // Refuse new messages but deliver what is already buffered.
                    closing = true;
                    receiver.close();
                    continue;
                }
            }
        };

        let Some(message) = next else {
            break;
        };

        state.send_replace(DispatchState::Sending);
        let result = mailer.send(&message).await;
        let recipients = message.recipients();
        let info = message.info.as_deref().unwrap_or_default();

        match result {
            Ok(delivered) => {
                tracing::trace!(delivered, %recipients, info, "async mail sent");
            }
            Err(e) => {
                tracing::error!(
                    delivered = e.delivered,
                    %recipients,
                    info,
                    error = %e.error,
                    "async mail failed"
                );
                if policy == FailurePolicy::Stop {
                    receiver.close();
                    state.send_replace(DispatchState::Terminated);
                    tracing::warn!("mail dispatcher terminated after failed send");
                    return;
                }
            }
        }
        state.send_replace(DispatchState::Idle);
    }

    state.send_replace(DispatchState::Stopped);
    tracing::info!("mail dispatcher stopped");
}

struct Inner {
    sender: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<DispatchState>,
    task: Mutex<Option<JoinHandle<()>>>,
    enqueue_timeout: Option<Duration>,
}

/// Handle to a running [`Dispatcher`]. Cheap to clone.
#[derive(Clone)]
pub struct MailQueue {
    inner: Arc<Inner>,
}

impl MailQueue {
    /// Enqueue without waiting.
    ///
    /// Fails with [`EnqueueError::Full`] when the buffer is at capacity and with
    /// [`EnqueueError::Stopped`] once the dispatcher has stopped or terminated.
    pub fn try_enqueue(&self, message: Message) -> Result<(), EnqueueError> {
        if self.is_closing() {
            return Err(EnqueueError::Stopped(Box::new(message)));
        }
        self.inner.sender.try_send(message)?;
        tracing::trace!(pending = self.pending(), "mail enqueued");
        Ok(())
    }

    /// Enqueue, waiting for capacity when the buffer is full.
    ///
    /// Only the awaiting task is suspended. The wait is bounded by the
    /// dispatcher's enqueue timeout when one is configured.
    pub async fn enqueue(&self, message: Message) -> Result<(), EnqueueError> {
        if self.is_closing() {
            return Err(EnqueueError::Stopped(Box::new(message)));
        }
        match self.inner.enqueue_timeout {
            Some(timeout) => self.inner.sender.send_timeout(message, timeout).await?,
            None => self
                .inner
                .sender
                .send(message)
                .await
                .map_err(|e| EnqueueError::Stopped(Box::new(e.0)))?,
        }
        tracing::trace!(pending = self.pending(), "mail enqueued");
        Ok(())
    }

    /// Messages buffered and not yet picked up by the dispatcher.
    pub fn pending(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.inner.sender.max_capacity()
    }

    pub fn state(&self) -> DispatchState {
        *self.inner.state.borrow()
    }

    /// Watch dispatcher state changes.
    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.inner.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.is_closing() && !self.state().is_finished()
    }

    /// Stop accepting messages, deliver those already buffered and wait for the
    /// dispatch task to finish.
    ///
    /// Concurrent callers all wait for the same task. Once it has finished,
    /// further calls return immediately.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);

        // The guard is held across the join so no caller returns early. The
        // handle is only cleared after it completes, in case a caller is
        // cancelled mid-wait.
        let mut task = self.inner.task.lock().await;
        if let Some(handle) = task.as_mut() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "mail dispatcher task failed");
            }
            *task = None;
        }
    }

    fn is_closing(&self) -> bool {
        *self.inner.shutdown.borrow() || self.inner.sender.is_closed()
    }
}

//! Historical and live container logs.
//!
//! A live stream is backed by a pump task that forwards frames from the
//! runtime feed into a bounded channel. The feed itself is owned by the
//! [`LogSubscription`]. Whatever ends the stream (consumer cancellation,
//! feed completion or a feed error), the feed is dropped exactly once and
//! before the end of the stream becomes observable to the consumer.

use crate::config::ServiceConfig;
use crate::docker::classify;
use crate::runtime::{ContainerRuntime, LogFeed};
use bollard::container::{LogOutput, LogsOptions};
use bollard::errors::Error as BollardError;
use dsm_common::{LogLine, OutputStream, Result, ServiceError};
use futures::{future, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument};

pub const MAX_TAIL_LINES: u32 = 10_000;

/// Returned by a historical read that was interrupted before completion.
pub const LOGS_UNAVAILABLE: &str = "Error fetching logs";

pub const DEFAULT_STREAM_BUFFER: usize = 256;

pub struct LogStreamBridge {
    runtime: Arc<dyn ContainerRuntime>,
    buffer: usize,
    read_timeout: Option<Duration>,
}

impl LogStreamBridge {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            buffer: DEFAULT_STREAM_BUFFER,
            read_timeout: None,
        }
    }

    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &ServiceConfig) -> Self {
        Self::new(runtime)
            .with_buffer(config.log_stream_buffer)
            .with_read_timeout(config.log_read_timeout)
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Capacity of the queue between the feed and a live stream's consumer.
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Reads the last `tail_lines` lines of combined stdout/stderr.
    ///
    /// An interrupted read yields [`LOGS_UNAVAILABLE`] instead of partial output.
    #[instrument(skip(self))]
    pub async fn get_logs(&self, id: &str, tail_lines: u32) -> Result<String> {
        if !(1..=MAX_TAIL_LINES).contains(&tail_lines) {
            return Err(ServiceError::InvalidArgument(format!(
                "tail must be between 1 and {MAX_TAIL_LINES}, got {tail_lines}"
            )));
        }

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail_lines.to_string(),
            ..Default::default()
        };
        let read = collect_frames(self.runtime.read_logs(id, options));

        let outcome = match self.read_timeout {
            Some(deadline) => tokio::time::timeout(deadline, read)
                .await
                .unwrap_or_else(|_| {
                    Err(ServiceError::Interrupted(format!(
                        "log read exceeded {}s",
                        deadline.as_secs_f64()
                    )))
                }),
            None => read.await,
        };

        match outcome {
            Ok(logs) => Ok(logs),
            Err(ServiceError::Interrupted(reason)) => {
                error!(container_id = %id, %reason, "Error fetching logs for container");
                Ok(LOGS_UNAVAILABLE.to_string())
            }
            Err(e) => {
                error!(container_id = %id, error = %e, "Error fetching logs for container");
                Err(e)
            }
        }
    }

    /// Opens a live log stream with timestamps. The runtime read starts
    /// immediately, so this must be called from within a Tokio runtime.
    #[instrument(skip(self))]
    pub fn stream_logs(&self, id: &str, follow: bool) -> LogStream {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let feed = self.runtime.read_logs(id, options);

        let (tx, rx) = mpsc::channel(self.buffer);
        let subscription = Arc::new(LogSubscription::new(id, feed));
        let handle = tokio::spawn(pump(tx, subscription.clone()));
        subscription.attach(handle.abort_handle());

        info!(container_id = %id, follow, "Started log stream");
        LogStream {
            lines: ReceiverStream::new(rx),
            subscription,
            cancelled: false,
        }
    }
}

async fn collect_frames(mut feed: LogFeed) -> Result<String> {
    let mut logs = Vec::new();
    while let Some(frame) = feed.next().await {
        logs.extend_from_slice(&frame.map_err(classify)?.into_bytes());
    }
    Ok(String::from_utf8_lossy(&logs).into_owned())
}

fn to_line(output: LogOutput) -> LogLine {
    let (stream, message) = match output {
        LogOutput::StdOut { message } => (OutputStream::Stdout, message),
        LogOutput::StdErr { message } => (OutputStream::Stderr, message),
        LogOutput::Console { message } | LogOutput::StdIn { message } => {
            (OutputStream::Console, message)
        }
    };
    LogLine {
        stream,
        text: String::from_utf8_lossy(&message).into_owned(),
    }
}

async fn pump(tx: mpsc::Sender<Result<LogLine>>, subscription: Arc<LogSubscription>) {
    let container_id = subscription.container_id.clone();
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(%container_id, "Log consumer detached");
                break;
            }
            frame = subscription.next_frame() => match frame {
                Some(Ok(output)) => {
                    let line = to_line(output);
                    if line.text.is_empty() {
                        continue;
                    }
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(%container_id, error = %e, "Error streaming logs for container");
                    // released before the consumer can observe the failure
                    subscription.release();
                    let _ = tx.send(Err(classify(e))).await;
                    break;
                }
                None => {
                    info!(%container_id, "Log stream completed for container");
                    break;
                }
            }
        }
    }
    subscription.release();
}

/// Handle on the runtime side of one live log stream. Owns the feed, so
/// releasing the subscription drops it on the calling thread.
pub struct LogSubscription {
    container_id: String,
    closed: AtomicBool,
    feed: Mutex<Option<LogFeed>>,
    pump: Mutex<Option<AbortHandle>>,
}

impl LogSubscription {
    fn new(container_id: &str, feed: LogFeed) -> Self {
        Self {
            container_id: container_id.to_string(),
            closed: AtomicBool::new(false),
            feed: Mutex::new(Some(feed)),
            pump: Mutex::new(None),
        }
    }

    fn attach(&self, handle: AbortHandle) {
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        // closed before the handle arrived
        if self.is_closed() {
            self.abort_pump();
        }
    }

    /// Next frame of the feed; `None` once the feed ended or was released.
    /// The lock is only held while polling, never across a suspension.
    async fn next_frame(&self) -> Option<std::result::Result<LogOutput, BollardError>> {
        future::poll_fn(|cx| {
            let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
            match feed.as_mut() {
                Some(frames) => frames.poll_next_unpin(cx),
                None => Poll::Ready(None),
            }
        })
        .await
    }

    /// Releases the subscription and stops forwarding. The feed is dropped
    /// before this returns. Returns false if it was already released.
    pub fn close(&self) -> bool {
        let released = self.release();
        self.abort_pump();
        released
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops the feed exactly once, without touching the pump task.
    fn release(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let feed = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(feed);
        debug!(container_id = %self.container_id, "Closed log subscription");
        true
    }

    fn abort_pump(&self) {
        let handle = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Live log lines of one container. Dropping the stream cancels it.
pub struct LogStream {
    lines: ReceiverStream<Result<LogLine>>,
    subscription: Arc<LogSubscription>,
    cancelled: bool,
}

impl LogStream {
    pub fn container_id(&self) -> &str {
        &self.subscription.container_id
    }

    /// Whether the runtime subscription has been released.
    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// Cancels the stream; no further lines are yielded, buffered ones included.
    pub fn close(&mut self) {
        self.cancelled = true;
        self.lines.close();
        self.subscription.close();
    }
}

impl Stream for LogStream {
    type Item = Result<LogLine>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        Pin::new(&mut this.lines).poll_next(cx)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.subscription.close();
    }
}

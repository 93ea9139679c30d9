use crate::llm::ModelError;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Buffered fragments per stream before the reader task waits
const FRAGMENT_BUFFER: usize = 256;

/// One item delivered by a model stream
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Next piece of reply text
    Text(String),
    /// Stream failed; nothing follows
    Failed(ModelError),
}

/// Result of a non-blocking pull
#[derive(Debug, PartialEq)]
pub enum Pull {
    Ready(Fragment),
    /// Nothing buffered yet, stream still open
    Pending,
    /// Sender is gone; the stream ended
    Closed,
}

/// Lazy sequence of reply fragments.
///
/// Closing without a [`Fragment::Failed`] item is normal completion.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<Fragment>,
}

/// Producer half held by whoever reads the provider response
#[derive(Debug, Clone)]
pub struct FragmentSender {
    tx: mpsc::Sender<Fragment>,
}

impl FragmentStream {
    pub fn channel() -> (FragmentSender, FragmentStream) {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        (FragmentSender { tx }, FragmentStream { rx })
    }

    /// Stream whose first and only item is `error`
    pub fn failed(error: ModelError) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // capacity 1 with a single send cannot be full
        let _ = tx.try_send(Fragment::Failed(error));
        Self { rx }
    }

    /// Wait for the next fragment; `None` once the stream has ended
    pub async fn next_fragment(&mut self) -> Option<Fragment> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Pull {
        match self.rx.try_recv() {
            Ok(fragment) => Pull::Ready(fragment),
            Err(mpsc::error::TryRecvError::Empty) => Pull::Pending,
            Err(mpsc::error::TryRecvError::Disconnected) => Pull::Closed,
        }
    }
}

impl Stream for FragmentStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl FragmentSender {
    /// Returns false when the consumer has gone away
    pub async fn text(&self, text: impl Into<String>) -> bool {
        self.tx.send(Fragment::Text(text.into())).await.is_ok()
    }

    pub async fn fail(&self, error: ModelError) {
        let _ = self.tx.send(Fragment::Failed(error)).await;
    }
}

/// Splits a server-sent-events byte stream into `data:` payloads
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every payload completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            match std::str::from_utf8(&line) {
                Ok(line) => {
                    if let Some(payload) = data_payload(line) {
                        payloads.push(payload.to_string());
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping non-UTF-8 line in event stream");
                }
            }
        }
        payloads
    }

    /// Flush a final line that arrived without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        match String::from_utf8(rest) {
            Ok(line) => data_payload(&line).map(str::to_string),
            Err(err) => {
                tracing::warn!(error = %err, "dropping non-UTF-8 tail of event stream");
                None
            }
        }
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let payload = line.trim().strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

//! Channel-backed stream types shared by every streaming call.
//!
//! Both directions end with an explicit terminal status. A stream whose
//! producer disappears without reporting one is treated as a failure, so a
//! truncated transfer is never mistaken for a complete one.

use tokio::sync::{mpsc, oneshot};

use crate::error::RemoteError;
use crate::service::UploadFrame;

/// Capacity of the upload frame channel.
///
/// One slot means the producer waits for the transport to take a frame
/// before it can hand over the next one.
pub const UPLOAD_CHANNEL_CAPACITY: usize = 1;

// ---------------------------------------------------------------------------
// Client-streamed uploads
// ---------------------------------------------------------------------------

/// Producer side of a client-streamed upload.
///
/// Dropping the sink without calling [`UploadSink::finish`] aborts the
/// upload instead of completing it with the frames sent so far.
pub struct UploadSink {
    frames: mpsc::Sender<UploadFrame>,
    status: Option<oneshot::Receiver<Result<(), RemoteError>>>,
    // Never sent on; dropping it signals an abort.
    abort: oneshot::Sender<()>,
}

/// Transport side of a client-streamed upload.
pub struct UploadSource {
    frames: mpsc::Receiver<UploadFrame>,
    completion: UploadCompletion,
}

/// Reports the terminal status of an upload back to its [`UploadSink`].
pub struct UploadCompletion {
    status: oneshot::Sender<Result<(), RemoteError>>,
    abort: oneshot::Receiver<()>,
}

/// Create a connected upload sink/source pair.
pub fn upload_channel() -> (UploadSink, UploadSource) {
    let (frame_tx, frame_rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
    let (status_tx, status_rx) = oneshot::channel();
    let (abort_tx, abort_rx) = oneshot::channel();
    (
        UploadSink {
            frames: frame_tx,
            status: Some(status_rx),
            abort: abort_tx,
        },
        UploadSource {
            frames: frame_rx,
            completion: UploadCompletion {
                status: status_tx,
                abort: abort_rx,
            },
        },
    )
}

impl UploadSink {
    /// Hand one frame to the transport, waiting until it has room.
    ///
    /// If the transport has already stopped, returns the error from its
    /// terminal status.
    pub async fn send(&mut self, frame: UploadFrame) -> Result<(), RemoteError> {
        if self.frames.send(frame).await.is_ok() {
            return Ok(());
        }
        let status = self.status.take();
        match wait_for_status(status).await {
            Err(e) => Err(e),
            Ok(()) => Err(RemoteError::StreamClosed("upload")),
        }
    }

    /// Close the stream and wait for the transport's terminal status.
    pub async fn finish(self) -> Result<(), RemoteError> {
        let UploadSink {
            frames,
            status,
            abort,
        } = self;
        drop(frames);
        let result = wait_for_status(status).await;
        drop(abort);
        result
    }
}

async fn wait_for_status(
    status: Option<oneshot::Receiver<Result<(), RemoteError>>>,
) -> Result<(), RemoteError> {
    match status {
        Some(rx) => rx
            .await
            .unwrap_or(Err(RemoteError::StreamClosed("upload"))),
        None => Err(RemoteError::StreamClosed("upload")),
    }
}

impl UploadSource {
    /// Next frame, or `None` once the sink has closed the stream.
    pub async fn recv(&mut self) -> Option<UploadFrame> {
        self.frames.recv().await
    }

    /// Report the terminal status. Dropping the source without calling
    /// this is reported to the sink as a closed stream.
    pub fn complete(self, result: Result<(), RemoteError>) {
        self.completion.complete(result);
    }

    /// Split into the raw frame receiver and the completion handle.
    pub fn into_parts(self) -> (mpsc::Receiver<UploadFrame>, UploadCompletion) {
        (self.frames, self.completion)
    }
}

impl UploadCompletion {
    pub fn complete(self, result: Result<(), RemoteError>) {
        let _ = self.status.send(result);
    }

    /// Resolves once the sink has been dropped without finishing.
    ///
    /// Pending forever while the sink is alive or finishing.
    pub async fn aborted(&mut self) {
        let _ = (&mut self.abort).await;
    }
}

// ---------------------------------------------------------------------------
// Server-streamed responses
// ---------------------------------------------------------------------------

enum StreamEvent<T> {
    Item(T),
    End(Result<(), RemoteError>),
}

/// Producer side of a server-streamed response.
pub struct FrameSender<T> {
    tx: mpsc::Sender<StreamEvent<T>>,
}

/// Consumer side of a server-streamed response.
pub struct FrameStream<T> {
    rx: mpsc::Receiver<StreamEvent<T>>,
    finished: bool,
}

/// Create a connected frame sender/stream pair buffering up to
/// `capacity` items.
pub fn frame_channel<T>(capacity: usize) -> (FrameSender<T>, FrameStream<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameSender { tx },
        FrameStream {
            rx,
            finished: false,
        },
    )
}

impl<T> FrameSender<T> {
    /// Push one item. Returns `false` if the consumer has gone away.
    pub async fn send(&self, item: T) -> bool {
        self.tx.send(StreamEvent::Item(item)).await.is_ok()
    }

    /// Report the terminal status, ending the stream.
    pub async fn finish(self, result: Result<(), RemoteError>) {
        let _ = self.tx.send(StreamEvent::End(result)).await;
    }
}

impl<T> FrameStream<T> {
    /// Next item.
    ///
    /// `Ok(None)` means the stream ended with a success status; an error
    /// status or a producer that vanished yields `Err`.
    pub async fn next(&mut self) -> Result<Option<T>, RemoteError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(StreamEvent::Item(item)) => Ok(Some(item)),
            Some(StreamEvent::End(result)) => {
                self.finished = true;
                result.map(|()| None)
            }
            None => {
                self.finished = true;
                Err(RemoteError::StreamClosed("response"))
            }
        }
    }

    /// Drain the stream into a vector. Succeeds only on a success status.
    pub async fn collect_all(mut self) -> Result<Vec<T>, RemoteError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}

impl<T: Send + 'static> FrameStream<T> {
    /// A stream that yields `items` and then ends successfully.
    ///
    /// Useful for services that already hold the whole response.
    pub fn from_items(items: Vec<T>) -> Self {
        Self::from_items_then(items, Ok(()))
    }

    /// A stream that yields `items` and then ends with `result`.
    pub fn from_items_then(items: Vec<T>, result: Result<(), RemoteError>) -> Self {
        let (tx, stream) = frame_channel(items.len() + 1);
        for item in items {
            if tx.tx.try_send(StreamEvent::Item(item)).is_err() {
                unreachable!("channel sized for every item");
            }
        }
        let _ = tx.tx.try_send(StreamEvent::End(result));
        stream
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn frame(n: u8) -> UploadFrame {
        UploadFrame {
            payload_id: "p".into(),
            file_name: "f".into(),
            file_size: 1,
            data: vec![n],
        }
    }

    #[tokio::test]
    async fn upload_finish_returns_terminal_status() {
        let (mut sink, mut source) = upload_channel();
        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(frame) = source.recv().await {
                seen.push(frame.data[0]);
            }
            source.complete(Ok(()));
            seen
        });

        for n in 0..3 {
            sink.send(frame(n)).await.unwrap();
        }
        sink.finish().await.unwrap();
        assert_eq!(reader.await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn upload_send_surfaces_transport_failure() {
        let (mut sink, source) = upload_channel();
        source.complete(Err(RemoteError::Protocol("payload rejected".into())));

        let err = sink.send(frame(0)).await.unwrap_err();
        assert_matches!(err, RemoteError::Protocol(msg) if msg == "payload rejected");
    }

    #[tokio::test]
    async fn upload_without_terminal_status_is_an_error() {
        let (sink, source) = upload_channel();
        drop(source);
        assert_matches!(sink.finish().await, Err(RemoteError::StreamClosed("upload")));
    }

    #[tokio::test]
    async fn dropped_sink_signals_abort() {
        let (mut sink, source) = upload_channel();
        let (_frames, mut completion) = source.into_parts();
        sink.send(frame(0)).await.unwrap();
        drop(sink);
        tokio::time::timeout(std::time::Duration::from_secs(1), completion.aborted())
            .await
            .expect("abort observed");
    }

    #[tokio::test]
    async fn frame_stream_collects_until_success() {
        let stream = FrameStream::from_items(vec![1, 2, 3]);
        assert_eq!(stream.collect_all().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn frame_stream_error_status_fails_collection() {
        let stream = FrameStream::from_items_then(
            vec![1],
            Err(RemoteError::NegativeCode {
                operation: "Payloads.Details",
                code: -1,
            }),
        );
        assert_matches!(
            stream.collect_all().await,
            Err(RemoteError::NegativeCode { code: -1, .. })
        );
    }

    #[tokio::test]
    async fn vanished_producer_is_not_success() {
        let (tx, mut stream) = frame_channel::<u8>(4);
        assert!(tx.send(7).await);
        drop(tx);
        assert_eq!(stream.next().await.unwrap(), Some(7));
        assert_matches!(stream.next().await, Err(RemoteError::StreamClosed(_)));
        // Once finished, the stream stays finished.
        assert_eq!(stream.next().await.unwrap(), None);
    }
}

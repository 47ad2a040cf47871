use crate::decoder::FrameDecoder;
use chatwire_core::{ChatError, ChatResult, ProtocolFrame};
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The frames of one response, in arrival order.
///
/// Frames are produced by a reader task that owns the network body. Dropping
/// the stream (or calling [`FrameStream::abort`]) stops that task, which
/// releases the connection. A transport failure mid-stream is delivered as a
/// final `Err` item.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<ChatResult<ProtocolFrame>>,
    reader: Option<JoinHandle<()>>,
}

impl FrameStream {
    /// Wraps a receiver fed by `reader`.
    pub fn new(rx: mpsc::Receiver<ChatResult<ProtocolFrame>>, reader: JoinHandle<()>) -> Self {
        Self {
            rx,
            reader: Some(reader),
        }
    }

    /// Wraps a receiver whose sender is owned elsewhere.
    pub fn from_receiver(rx: mpsc::Receiver<ChatResult<ProtocolFrame>>) -> Self {
        Self { rx, reader: None }
    }

    /// A stream that yields `frames` and ends.
    pub fn ready(frames: Vec<ProtocolFrame>) -> Self {
        let (tx, rx) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            // Capacity matches the frame count, so this never fails.
            let _ = tx.try_send(Ok(frame));
        }
        Self::from_receiver(rx)
    }

    /// Next frame, or `None` once the response has ended.
    pub async fn next(&mut self) -> Option<ChatResult<ProtocolFrame>> {
        self.rx.recv().await
    }

    /// Stops the reader and discards anything not yet received.
    pub fn abort(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.rx.close();
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Spawns a task that decodes `body` into frames.
///
/// Every JSON value produced by the [`FrameDecoder`] is passed to `translate`,
/// which maps it to at most one frame. The task ends when the body ends, when
/// a read fails, or when the returned stream is dropped.
pub fn spawn_frame_reader<S, B, E, F>(body: S, capacity: usize, mut translate: F) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    F: FnMut(serde_json::Value) -> Option<ProtocolFrame> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<ChatResult<ProtocolFrame>>(capacity.max(1));

    let reader = tokio::spawn(async move {
        let mut body = Box::pin(body);
        let mut decoder = FrameDecoder::new();

        while let Some(chunk_result) = body.next().await {
            let chunk = match chunk_result {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Stream read error");
                    let _ = tx
                        .send(Err(ChatError::Http(format!("Stream read error: {e}"))))
                        .await;
                    return;
                }
            };

            for value in decoder.push(chunk) {
                let Some(frame) = translate(value) else {
                    continue;
                };
                if tx.send(Ok(frame)).await.is_err() {
                    debug!("Frame receiver dropped, stopping reader");
                    return;
                }
            }
        }

        let dropped = decoder.finish();
        if dropped > 0 {
            warn!(bytes = dropped, "Stream ended inside an unterminated line; tail dropped");
        }
    });

    FrameStream::new(rx, reader)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn token_only(value: serde_json::Value) -> Option<ProtocolFrame> {
        value["data"].as_str().map(|s| ProtocolFrame::Token(s.to_string()))
    }

    #[tokio::test]
    async fn test_reader_yields_frames_in_order() {
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
            Ok("data: {\"event\":\"to"),
            Ok("ken\",\"data\":\"Hi\"}\n\ndata: {\"event\":\"token\",\"data\":\" there\"}\n"),
        ];
        let mut frames = spawn_frame_reader(stream::iter(chunks), 8, token_only);

        let mut text = String::new();
        while let Some(frame) = frames.next().await {
            if let ProtocolFrame::Token(t) = frame.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn test_read_error_is_last_item() {
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
            Ok("data: {\"data\":\"a\"}\n"),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok("data: {\"data\":\"b\"}\n"),
        ];
        let mut frames = spawn_frame_reader(stream::iter(chunks), 8, token_only);

        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            ProtocolFrame::Token("a".to_string())
        );
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("reset"));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_ready_stream() {
        let mut frames = FrameStream::ready(vec![ProtocolFrame::Token("x".to_string())]);
        assert!(frames.next().await.is_some());
        assert!(frames.next().await.is_none());
    }
}

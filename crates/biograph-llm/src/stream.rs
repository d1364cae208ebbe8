//! The answer stream handed to callers.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Sleep;

use crate::error::ModelError;
use crate::handle::ChunkStream;

/// A lazy, finite, non-restartable sequence of answer chunks.
///
/// The concatenated `Ok` items form the answer. A failure is delivered as
/// the final item, after which the stream yields `None`: receiving chunks
/// does not mean the answer is complete unless the stream ended without an
/// error. Each chunk must arrive within the configured timeout.
///
/// Dropping the stream (or calling [`TokenStream::cancel`]) drops the
/// underlying response body.
pub struct TokenStream {
    inner: Option<ChunkStream>,
    chunk_timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
    delivered: usize,
    failed: bool,
}

impl TokenStream {
    pub fn new(inner: ChunkStream, chunk_timeout: Option<Duration>) -> Self {
        Self {
            inner: Some(inner),
            chunk_timeout,
            deadline: None,
            delivered: 0,
            failed: false,
        }
    }

    /// Number of chunks handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// The stream has ended, cleanly or not.
    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }

    /// The stream ended with an error.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Stop generation and release the response.
    pub fn cancel(&mut self) {
        if self.inner.take().is_some() {
            self.deadline = None;
            tracing::debug!(delivered = self.delivered, "Token stream cancelled");
        }
    }

    /// Drain the stream into the full answer. Partial output is discarded
    /// when the stream fails.
    pub async fn collect_text(mut self) -> Result<String, ModelError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }

    fn finish(&mut self, failed: bool) {
        self.inner = None;
        self.deadline = None;
        self.failed = failed;
    }
}

impl Stream for TokenStream {
    type Item = Result<String, ModelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.delivered += 1;
                this.deadline = None;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(true);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(false);
                Poll::Ready(None)
            }
            Poll::Pending => {
                let Some(timeout) = this.chunk_timeout else {
                    return Poll::Pending;
                };
                let deadline = this
                    .deadline
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                if deadline.as_mut().poll(cx).is_ready() {
                    this.finish(true);
                    return Poll::Ready(Some(Err(ModelError::timed_out(timeout))));
                }
                Poll::Pending
            }
        }
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("delivered", &self.delivered)
            .field("finished", &self.is_finished())
            .field("failed", &self.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(items: Vec<Result<String, ModelError>>) -> ChunkStream {
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_collects_full_answer() {
        let stream = TokenStream::new(
            chunks(vec![Ok("DNA ".into()), Ok("is ".into()), Ok("a molecule".into())]),
            None,
        );
        assert_eq!(stream.collect_text().await.unwrap(), "DNA is a molecule");
    }

    #[tokio::test]
    async fn test_error_is_final_item() {
        let mut stream = TokenStream::new(
            chunks(vec![
                Ok("a".into()),
                Err(ModelError::Unavailable("reset".into())),
                Ok("never".into()),
            ]),
            None,
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert!(stream.failed());
        assert_eq!(stream.delivered(), 1);
    }

    #[tokio::test]
    async fn test_chunk_timeout() {
        let inner = futures::stream::pending::<Result<String, ModelError>>().boxed();
        let mut stream = TokenStream::new(inner, Some(Duration::from_millis(20)));
        let item = stream.next().await.unwrap();
        assert!(matches!(item, Err(ModelError::Unavailable(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let mut stream = TokenStream::new(chunks(vec![Ok("a".into()), Ok("b".into())]), None);
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        stream.cancel();
        assert!(stream.is_finished());
        assert!(!stream.failed());
        assert!(stream.next().await.is_none());
    }
}

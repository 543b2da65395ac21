//! Request body model.
//!
//! A [`RequestBody`] is a lazy byte sequence. In-memory bodies can be sent any
//! number of times; streamed bodies are one-shot unless they are wrapped with
//! [`RequestBody::into_replayable`], which records chunks as they are read so
//! a later replay yields the same bytes without polling the producer again.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http_body::Frame;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;

use crate::error::HttpError;

/// Error type carried by streamed bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stream of body chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Body type handed to hyper by the terminal transport
pub type TransportBody = UnsyncBoxBody<Bytes, BoxError>;

/// Body of an outgoing request
pub struct RequestBody {
    kind: BodyKind,
}

enum BodyKind {
    Empty,
    Full(Bytes),
    Stream {
        stream: ByteStream,
        length: Option<u64>,
    },
    Replayable {
        tee: Arc<Tee>,
        length: Option<u64>,
    },
}

impl RequestBody {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    /// In-memory body
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: BodyKind::Full(bytes.into()),
        }
    }

    /// One-shot streamed body with an optional known length
    #[must_use]
    pub fn from_stream<S>(stream: S, length: Option<u64>) -> Self
    where
        S: futures::Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        Self {
            kind: BodyKind::Stream {
                stream: stream.boxed(),
                length,
            },
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            BodyKind::Empty => true,
            BodyKind::Full(bytes) => bytes.is_empty(),
            BodyKind::Stream { length, .. } | BodyKind::Replayable { length, .. } => {
                *length == Some(0)
            }
        }
    }

    /// Known length in bytes, if any
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match &self.kind {
            BodyKind::Empty => Some(0),
            BodyKind::Full(bytes) => Some(bytes.len() as u64),
            BodyKind::Stream { length, .. } | BodyKind::Replayable { length, .. } => *length,
        }
    }

    /// The body bytes when they are held in memory
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            BodyKind::Full(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Whether [`try_clone`](Self::try_clone) will succeed
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, BodyKind::Stream { .. })
    }

    /// Produce a second body yielding the same bytes.
    ///
    /// Returns `None` for one-shot streams.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        let kind = match &self.kind {
            BodyKind::Empty => BodyKind::Empty,
            BodyKind::Full(bytes) => BodyKind::Full(bytes.clone()),
            BodyKind::Stream { .. } => return None,
            BodyKind::Replayable { tee, length } => BodyKind::Replayable {
                tee: Arc::clone(tee),
                length: *length,
            },
        };
        Some(Self { kind })
    }

    /// Make a one-shot stream replayable by teeing its chunks into memory.
    ///
    /// Other body kinds are returned unchanged.
    #[must_use]
    pub fn into_replayable(self) -> Self {
        match self.kind {
            BodyKind::Stream { stream, length } => Self {
                kind: BodyKind::Replayable {
                    tee: Arc::new(Tee::new(stream)),
                    length,
                },
            },
            kind => Self { kind },
        }
    }

    /// Consume the body as a stream of chunks of at most `chunk_size` bytes.
    #[must_use]
    pub fn into_stream(self, chunk_size: usize) -> ByteStream {
        let chunk_size = chunk_size.max(1);
        match self.kind {
            BodyKind::Empty => stream::empty().boxed(),
            BodyKind::Full(bytes) => stream::iter(split_chunks(bytes, chunk_size).map(Ok)).boxed(),
            BodyKind::Stream { stream, .. } => rechunk(stream, chunk_size),
            BodyKind::Replayable { tee, .. } => rechunk(Tee::reader(tee), chunk_size),
        }
    }

    /// Read the whole body into memory.
    ///
    /// # Errors
    /// Returns `HttpError::Transport` if the producer fails.
    pub async fn collect(self) -> Result<Bytes, HttpError> {
        if let BodyKind::Full(bytes) = self.kind {
            return Ok(bytes);
        }
        let mut stream = self.into_stream(usize::MAX);
        let mut buf = bytes::BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk.map_err(HttpError::Transport)?);
        }
        Ok(buf.freeze())
    }

    /// Convert into the boxed body type used by hyper.
    #[must_use]
    pub fn into_transport_body(self, chunk_size: usize) -> TransportBody {
        match self.kind {
            BodyKind::Empty => http_body_util::Empty::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
            BodyKind::Full(bytes) if bytes.len() <= chunk_size => http_body_util::Full::new(bytes)
                .map_err(|never| match never {})
                .boxed_unsync(),
            kind => {
                let frames = Self { kind }
                    .into_stream(chunk_size)
                    .map(|chunk| chunk.map(Frame::data));
                http_body_util::StreamBody::new(frames).boxed_unsync()
            }
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "empty",
            BodyKind::Full(_) => "full",
            BodyKind::Stream { .. } => "stream",
            BodyKind::Replayable { .. } => "replayable",
        };
        f.debug_struct("RequestBody")
            .field("kind", &kind)
            .field("content_length", &self.content_length())
            .finish()
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        Self::from_bytes(value)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::from_bytes(value)
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::from_bytes(value)
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(value: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(value))
    }
}

impl From<&'static str> for RequestBody {
    fn from(value: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(value.as_bytes()))
    }
}

fn split_chunks(mut bytes: Bytes, chunk_size: usize) -> impl Iterator<Item = Bytes> + Send {
    std::iter::from_fn(move || {
        if bytes.is_empty() {
            None
        } else {
            let at = chunk_size.min(bytes.len());
            Some(bytes.split_to(at))
        }
    })
}

fn rechunk(stream: ByteStream, chunk_size: usize) -> ByteStream {
    stream
        .flat_map(move |chunk| match chunk {
            Ok(bytes) => stream::iter(split_chunks(bytes, chunk_size).map(Ok).collect::<Vec<_>>()),
            Err(e) => stream::iter(vec![Err(e)]),
        })
        .boxed()
}

/// Shared recording of a one-shot stream.
///
/// Readers first replay recorded chunks, then pull from the source while
/// recording. The source is polled at most once per chunk overall. A source
/// error is terminal: it is recorded after the last chunk and every reader
/// reaching that point fails with the same message.
struct Tee {
    source: tokio::sync::Mutex<Option<ByteStream>>,
    recorded: parking_lot::Mutex<Vec<Bytes>>,
    failure: parking_lot::Mutex<Option<String>>,
}

impl Tee {
    fn new(source: ByteStream) -> Self {
        Self {
            source: tokio::sync::Mutex::new(Some(source)),
            recorded: parking_lot::Mutex::new(Vec::new()),
            failure: parking_lot::Mutex::new(None),
        }
    }

    fn recorded_at(&self, index: usize) -> Option<Result<Bytes, BoxError>> {
        if let Some(chunk) = self.recorded.lock().get(index) {
            return Some(Ok(chunk.clone()));
        }
        self.failure
            .lock()
            .as_ref()
            .map(|message| Err(BoxError::from(message.clone())))
    }

    fn reader(tee: Arc<Tee>) -> ByteStream {
        stream::try_unfold((tee, 0usize), |(tee, index)| async move {
            if let Some(item) = tee.recorded_at(index) {
                return item.map(|chunk| Some((chunk, (tee, index + 1))));
            }

            let mut source = tee.source.lock().await;
            // Another reader may have reached this point while we waited.
            if let Some(item) = tee.recorded_at(index) {
                drop(source);
                return item.map(|chunk| Some((chunk, (tee, index + 1))));
            }

            let pulled = match source.as_mut() {
                Some(inner) => inner.next().await,
                None => return Ok(None),
            };
            match pulled {
                Some(Ok(chunk)) => {
                    tee.recorded.lock().push(chunk.clone());
                    drop(source);
                    Ok(Some((chunk, (tee, index + 1))))
                }
                Some(Err(e)) => {
                    *tee.failure.lock() = Some(e.to_string());
                    *source = None;
                    Err(e)
                }
                None => {
                    *source = None;
                    Ok(None)
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_stream(chunks: &[&'static str], polls: Arc<AtomicUsize>) -> ByteStream {
        let chunks: Vec<Bytes> = chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect();
        stream::iter(chunks)
            .map(move |chunk| {
                polls.fetch_add(1, Ordering::SeqCst);
                Ok(chunk)
            })
            .boxed()
    }

    #[tokio::test]
    async fn test_full_body_is_replayable() {
        let body = RequestBody::from("hello");
        let copy = body.try_clone().unwrap();
        assert_eq!(body.collect().await.unwrap(), "hello");
        assert_eq!(copy.collect().await.unwrap(), "hello");
    }

    #[test]
    fn test_stream_is_one_shot() {
        let polls = Arc::new(AtomicUsize::new(0));
        let body = RequestBody::from_stream(counted_stream(&["a"], polls), None);
        assert!(!body.is_replayable());
        assert!(body.try_clone().is_none());
    }

    #[tokio::test]
    async fn test_replayable_stream_does_not_repoll_producer() {
        let polls = Arc::new(AtomicUsize::new(0));
        let body = RequestBody::from_stream(
            counted_stream(&["abc", "def", "gh"], Arc::clone(&polls)),
            Some(8),
        )
        .into_replayable();

        let replay = body.try_clone().unwrap();
        let first = body.collect().await.unwrap();
        assert_eq!(first, "abcdefgh");
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        let second = replay.collect().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(polls.load(Ordering::SeqCst), 3, "producer must not be polled again");
    }

    #[tokio::test]
    async fn test_replay_after_partial_read_continues_from_source() {
        let polls = Arc::new(AtomicUsize::new(0));
        let body = RequestBody::from_stream(counted_stream(&["ab", "cd"], Arc::clone(&polls)), None)
            .into_replayable();
        let replay = body.try_clone().unwrap();

        let mut first = body.into_stream(1024);
        assert_eq!(first.next().await.unwrap().unwrap(), "ab");
        drop(first);

        assert_eq!(replay.collect().await.unwrap(), "abcd");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_producer_error_is_replayed_without_repolling() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let items: Vec<Result<Bytes, BoxError>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Err("producer failed".into()),
            Ok(Bytes::from_static(b"never")),
        ];
        let source = stream::iter(items)
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .boxed();
        let body = RequestBody::from_stream(source, None).into_replayable();
        let replay = body.try_clone().unwrap();

        let err = body.collect().await.unwrap_err();
        assert!(err.to_string().contains("producer failed"), "{err}");
        assert_eq!(polls.load(Ordering::SeqCst), 2);

        let mut chunks = replay.into_stream(1024);
        assert_eq!(chunks.next().await.unwrap().unwrap(), "ab");
        let err = chunks.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "producer failed");
        assert!(chunks.next().await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 2, "producer must not be polled again");
    }

    #[tokio::test]
    async fn test_full_body_is_split_into_chunks() {
        let body = RequestBody::from_bytes(Bytes::from_static(b"0123456789"));
        let chunks: Vec<Bytes> = body
            .into_stream(4)
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(chunks, vec!["0123", "4567", "89"]);
    }

    #[tokio::test]
    async fn test_stream_is_rechunked() {
        let polls = Arc::new(AtomicUsize::new(0));
        let body = RequestBody::from_stream(counted_stream(&["abcdef"], polls), Some(6));
        let chunks: Vec<Bytes> = body
            .into_stream(4)
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(chunks, vec!["abcd", "ef"]);
    }

    #[test]
    fn test_content_length() {
        assert_eq!(RequestBody::empty().content_length(), Some(0));
        assert_eq!(RequestBody::from("abc").content_length(), Some(3));
        let polls = Arc::new(AtomicUsize::new(0));
        assert_eq!(
            RequestBody::from_stream(counted_stream(&["a"], polls), None).content_length(),
            None
        );
    }

    #[tokio::test]
    async fn test_transport_body_carries_all_bytes() {
        let body = RequestBody::from_bytes(Bytes::from(vec![7u8; 10_000]));
        let collected = body
            .into_transport_body(1024)
            .collect()
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(collected.len(), 10_000);
    }
}

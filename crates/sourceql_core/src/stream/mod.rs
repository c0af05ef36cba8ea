//! Lazily evaluated, cancellable sequences of rows.
//!
//! A [`RowSequence`] wraps a boxed fallible stream. Consumers either pull rows
//! one at a time with [`RowSequence::advance`] and [`RowSequence::current`],
//! drain everything with [`RowSequence::materialize`], or use the sequence as
//! a [`Stream`]. Operators consume a sequence and return a new one without
//! pulling anything until the result is advanced.

pub mod rows;

use std::cmp::Ordering;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, Stream, StreamExt, TryStreamExt, future};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::errors::{Result, SourceQlError};

pub struct RowSequence<T> {
    /// `None` once the sequence finished, failed or was cancelled.
    inner: Option<BoxStream<'static, Result<T>>>,
    current: Option<T>,
    cancel: Option<CancellationToken>,
}

// `current` is never pinned.
impl<T> Unpin for RowSequence<T> {}

impl<T> fmt::Debug for RowSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSequence")
            .field("finished", &self.inner.is_none())
            .field("has_current", &self.current.is_some())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl<T> RowSequence<T>
where
    T: Send + 'static,
{
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        RowSequence {
            inner: Some(stream.boxed()),
            current: None,
            cancel: None,
        }
    }

    /// Sequence producing the given rows in order.
    pub fn from_rows(rows: Vec<T>) -> Self {
        Self::from_stream(stream::iter(rows.into_iter().map(Ok)))
    }

    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Sequence that fails on the first advance.
    pub fn failed(error: SourceQlError) -> Self {
        Self::from_stream(stream::once(future::ready(Err(error))))
    }

    /// Create a sequence fed by a sender.
    ///
    /// The sender waits when `buffer` rows are queued. Dropping the sequence
    /// closes the channel and further sends fail.
    pub fn channel(buffer: usize) -> (RowSender<T>, Self) {
        let (sender, recv) = mpsc::channel(buffer);
        (RowSender { sender }, Self::from_stream(recv))
    }

    /// Stop producing rows once `token` is cancelled.
    ///
    /// A cancelled advance returns `Ok(false)` and the underlying producer is
    /// dropped. Rows already consumed are unaffected.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        if let Some(inner) = self.inner.take() {
            self.inner = Some(inner.take_until(token.clone().cancelled_owned()).boxed());
        }
        self.cancel = Some(token);
        self
    }

    /// Move to the next row.
    ///
    /// Returns `false` when there are no more rows. An error from the
    /// producer is returned here, after which the sequence is finished.
    pub async fn advance(&mut self) -> Result<bool> {
        self.current = None;
        let item = match self.inner.as_mut() {
            Some(inner) => inner.next().await,
            None => return Ok(false),
        };
        match self.handle_item(item) {
            Some(Ok(row)) => {
                self.current = Some(row);
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }

    /// Row produced by the last successful advance.
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<T> {
        self.current.take()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Drain the sequence into a vector.
    ///
    /// Cancellation ends the drain early without an error.
    pub async fn materialize(mut self) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        while self.advance().await? {
            if let Some(row) = self.take_current() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn map<U, F>(self, mut func: F) -> RowSequence<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        RowSequence::from_stream(self.into_stream().map(move |item| item.and_then(&mut func)))
    }

    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> Result<bool> + Send + 'static,
    {
        let stream = self.into_stream().filter_map(move |item| {
            let out = match item {
                Ok(row) => match predicate(&row) {
                    Ok(true) => Some(Ok(row)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            };
            future::ready(out)
        });
        Self::from_stream(stream)
    }

    pub fn take(self, n: usize) -> Self {
        Self::from_stream(self.into_stream().take(n))
    }

    pub fn inspect<F>(self, mut func: F) -> Self
    where
        F: FnMut(&T) + Send + 'static,
    {
        Self::from_stream(self.into_stream().inspect(move |item| {
            if let Ok(row) = item {
                func(row)
            }
        }))
    }

    /// Sort all rows by a computed key.
    ///
    /// The input is drained on the first advance. The sort is stable.
    pub fn order_by<K, F, C>(self, mut key: F, mut compare: C) -> Self
    where
        K: Send + 'static,
        F: FnMut(&T) -> Result<K> + Send + 'static,
        C: FnMut(&K, &K) -> Ordering + Send + 'static,
    {
        let input = self.into_stream();
        let sorted = stream::once(async move {
            let rows: Vec<T> = input.try_collect().await?;
            let mut keyed = rows
                .into_iter()
                .map(|row| Ok((key(&row)?, row)))
                .collect::<Result<Vec<_>>>()?;
            keyed.sort_by(|a, b| compare(&a.0, &b.0));
            trace!(rows = keyed.len(), "sorted rows");
            Ok::<_, SourceQlError>(stream::iter(keyed.into_iter().map(|(_, row)| Ok(row))))
        })
        .try_flatten();
        Self::from_stream(sorted)
    }

    /// Nested loop join against `build`.
    ///
    /// `func` is called for every pair of rows and returns the joined row, or
    /// `None` to skip the pair. The build side is drained concurrently with
    /// the first advance of this sequence.
    pub fn join<U, V, F>(self, build: RowSequence<U>, mut func: F) -> RowSequence<V>
    where
        U: Send + 'static,
        V: Send + 'static,
        F: FnMut(&T, &U) -> Result<Option<V>> + Send + 'static,
    {
        let outer = self.into_stream();
        let build = build.into_stream();

        let joined = stream::once(async move {
            let (build_rows, (first, rest)) =
                future::join(build.try_collect::<Vec<U>>(), outer.into_future()).await;
            let build_rows = build_rows?;
            trace!(build_rows = build_rows.len(), "join build side complete");

            let output = stream::iter(first)
                .chain(rest)
                .flat_map(move |outer_row| {
                    let items: Vec<Result<V>> = match outer_row {
                        Ok(outer_row) => build_rows
                            .iter()
                            .filter_map(|build_row| func(&outer_row, build_row).transpose())
                            .collect(),
                        Err(e) => vec![Err(e)],
                    };
                    stream::iter(items)
                });
            Ok::<_, SourceQlError>(output)
        })
        .try_flatten();

        RowSequence::from_stream(joined)
    }

    /// Read up to `buffer` rows ahead on a separate task.
    ///
    /// The reader is spawned on the first advance and stops after the first
    /// error or when the returned sequence is dropped. Dropping the sequence
    /// also drops the input, even while the reader waits on it.
    pub fn prefetch(self, buffer: usize) -> Self {
        let input = self.into_stream();
        let started = stream::once(async move {
            let (mut sender, output) = Self::channel(buffer);
            let stop = CancellationToken::new();
            let guard = stop.clone().drop_guard();

            tokio::spawn(async move {
                let mut input = input;
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        item = input.next() => item,
                    };
                    let Some(item) = item else { break };
                    let failed = item.is_err();
                    if sender.sender.send(item).await.is_err() || failed {
                        break;
                    }
                }
                trace!("prefetch reader stopped");
            });

            // The guard lives as long as the output stream.
            output.into_stream().map(move |item| {
                let _ = &guard;
                item
            })
        })
        .flatten();
        Self::from_stream(started)
    }

    /// Convert into the underlying stream, keeping cancellation.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        match self.inner {
            Some(inner) => inner,
            None => stream::empty().boxed(),
        }
    }

    /// Update state for an item pulled from the inner stream.
    fn handle_item(&mut self, item: Option<Result<T>>) -> Option<Result<T>> {
        match item {
            Some(Ok(row)) => Some(Ok(row)),
            Some(Err(e)) => {
                self.inner = None;
                Some(Err(e))
            }
            None => {
                if self.is_cancelled() {
                    trace!("row sequence cancelled");
                }
                self.inner = None;
                None
            }
        }
    }
}

impl<T> Stream for RowSequence<T>
where
    T: Send + 'static,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = match this.inner.as_mut() {
            Some(inner) => match inner.poll_next_unpin(cx) {
                Poll::Ready(item) => item,
                Poll::Pending => return Poll::Pending,
            },
            None => return Poll::Ready(None),
        };
        Poll::Ready(this.handle_item(item))
    }
}

/// Producer side of [`RowSequence::channel`].
pub struct RowSender<T> {
    sender: mpsc::Sender<Result<T>>,
}

impl<T> Clone for RowSender<T> {
    fn clone(&self) -> Self {
        RowSender {
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for RowSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSender")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<T> RowSender<T> {
    /// Send a row, waiting for buffer space.
    ///
    /// Errors with [`SourceQlError::Cancelled`] if the sequence was dropped.
    pub async fn send(&mut self, row: T) -> Result<()> {
        self.sender
            .send(Ok(row))
            .await
            .map_err(|_| SourceQlError::Cancelled)
    }

    /// Fail the sequence with an error.
    pub async fn fail(&mut self, error: SourceQlError) -> Result<()> {
        self.sender
            .send(Err(error))
            .await
            .map_err(|_| SourceQlError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn materialize_finite() {
        let seq = RowSequence::from_rows(vec![1, 2, 3]);
        assert_eq!(vec![1, 2, 3], seq.materialize().await.unwrap());
    }

    #[tokio::test]
    async fn advance_and_current() {
        let mut seq = RowSequence::from_rows(vec!["a", "b"]);
        assert_eq!(None, seq.current());
        assert!(seq.advance().await.unwrap());
        assert_eq!(Some(&"a"), seq.current());
        assert!(seq.advance().await.unwrap());
        assert_eq!(Some(&"b"), seq.current());
        assert!(!seq.advance().await.unwrap());
        assert_eq!(None, seq.current());
        assert!(seq.is_finished());
        assert!(!seq.advance().await.unwrap());
    }

    #[tokio::test]
    async fn error_surfaces_at_advance_and_finishes() {
        let items = vec![
            Ok(1),
            Err(SourceQlError::source_failure("test", "boom")),
            Ok(3),
        ];
        let mut seq = RowSequence::from_stream(stream::iter(items));
        assert!(seq.advance().await.unwrap());
        let consumed = seq.take_current();
        assert!(seq.advance().await.is_err());
        assert!(!seq.advance().await.unwrap());
        assert_eq!(Some(1), consumed);
    }

    #[tokio::test]
    async fn operators_are_lazy() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let seq = RowSequence::from_rows((1..=100).collect::<Vec<i32>>())
            .inspect(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .map(|v: i32| Ok(v * 10))
            .filter(|v| Ok(v % 20 == 0))
            .take(2);

        assert_eq!(0, pulled.load(AtomicOrdering::SeqCst));
        assert_eq!(vec![20, 40], seq.materialize().await.unwrap());
        assert_eq!(4, pulled.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn prefetch_keeps_order_and_errors() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let seq = RowSequence::from_rows(vec![1, 2, 3, 4, 5])
            .inspect(move |_| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .prefetch(2);
        tokio::task::yield_now().await;
        assert_eq!(0, pulled.load(AtomicOrdering::SeqCst));
        assert_eq!(vec![1, 2, 3, 4, 5], seq.materialize().await.unwrap());

        let items = vec![Ok(1), Err(SourceQlError::source_failure("test", "boom")), Ok(3)];
        let mut seq = RowSequence::from_stream(stream::iter(items)).prefetch(4);
        assert!(seq.advance().await.unwrap());
        assert!(seq.advance().await.is_err());
        assert!(!seq.advance().await.unwrap());
    }

    /// Sets the flag when dropped.
    struct ReleaseFlag(Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, AtomicOrdering::SeqCst);
        }
    }

    #[tokio::test]
    async fn prefetch_releases_input_on_cancel_and_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = ReleaseFlag(released.clone());
        let input = stream::iter(vec![Ok(1)])
            .chain(stream::pending())
            .map(move |item: Result<i32>| {
                let _ = &flag;
                item
            });

        let token = CancellationToken::new();
        let mut seq = RowSequence::from_stream(input)
            .prefetch(4)
            .with_cancellation(token.clone());
        assert!(seq.advance().await.unwrap());
        assert_eq!(Some(&1), seq.current());

        token.cancel();
        drop(seq);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(released.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn prefetch_releases_input_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = ReleaseFlag(released.clone());
        let input = stream::pending().map(move |item: Result<i32>| {
            let _ = &flag;
            item
        });

        let mut seq = RowSequence::from_stream(input).prefetch(4);
        let advanced = tokio::time::timeout(Duration::from_millis(5), seq.advance()).await;
        assert!(advanced.is_err());
        assert!(!released.load(AtomicOrdering::SeqCst));

        drop(seq);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(released.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn order_by_is_stable() {
        let seq = RowSequence::from_rows(vec![(2, "a"), (1, "b"), (2, "c"), (1, "d")])
            .order_by(|row| Ok(row.0), |a, b| a.cmp(b));
        assert_eq!(
            vec![(1, "b"), (1, "d"), (2, "a"), (2, "c")],
            seq.materialize().await.unwrap()
        );
    }

    #[tokio::test]
    async fn join_pairs_rows() {
        let left = RowSequence::from_rows(vec![1, 2, 3]);
        let right = RowSequence::from_rows(vec![2, 3, 4]);
        let joined = left.join(right, |l, r| Ok((l == r).then_some((*l, *r))));
        assert_eq!(vec![(2, 2), (3, 3)], joined.materialize().await.unwrap());
    }

    #[tokio::test]
    async fn join_build_failure_propagates() {
        let left = RowSequence::from_rows(vec![1]);
        let right: RowSequence<i32> =
            RowSequence::failed(SourceQlError::source_failure("right", "unavailable"));
        let joined = left.join(right, |l, r| Ok(Some(l + r)));
        assert!(joined.materialize().await.is_err());
    }

    #[tokio::test]
    async fn cancel_in_flight_advance() {
        let (mut sender, seq) = RowSequence::channel(1);
        let token = CancellationToken::new();
        let mut seq = seq.with_cancellation(token.clone());

        let producer = tokio::spawn(async move {
            sender.send(1).await.unwrap();
            // Never sends another row, wait until the consumer goes away.
            loop {
                if sender.is_closed() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        assert!(seq.advance().await.unwrap());
        assert_eq!(Some(&1), seq.current());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        // Blocks until cancelled, then ends without an error.
        assert!(!seq.advance().await.unwrap());
        assert!(seq.is_cancelled());
        assert!(seq.is_finished());

        // Producer observes the closed channel.
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sequence_fails_sends() {
        let (mut sender, seq) = RowSequence::<i32>::channel(4);
        drop(seq);
        assert!(matches!(sender.send(1).await, Err(SourceQlError::Cancelled)));
    }

    #[tokio::test]
    async fn usable_as_stream() {
        let seq = RowSequence::from_rows(vec![1, 2, 3]);
        let out: Vec<i32> = seq.try_collect().await.unwrap();
        assert_eq!(vec![1, 2, 3], out);
    }
}

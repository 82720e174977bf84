//! In-flight fetch deduplication
//!
//! Concurrent `fetch_messages` calls with the same filter share one upstream
//! request. Entries live only while the request is in flight; completed
//! results are not cached.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use nocta_note::MessageKind;

use crate::error::UpstreamError;
use crate::services::{MessageFilter, MessagePage, MessagingRelay, PostAck};

type SharedFetch = Shared<BoxFuture<'static, Result<MessagePage, UpstreamError>>>;

pub struct DedupRelay<R> {
    inner: Arc<R>,
    in_flight: DashMap<MessageFilter, SharedFetch>,
}

impl<R> DedupRelay<R>
where
    R: MessagingRelay + 'static,
{
    pub fn new(inner: Arc<R>) -> Self {
        Self {
            inner,
            in_flight: DashMap::new(),
        }
    }

    /// Number of fetches currently awaited
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn shared_fetch(&self, filter: &MessageFilter) -> SharedFetch {
        // Entry guard is dropped at the end of this function, before any await
        self.in_flight
            .entry(filter.clone())
            .or_insert_with(|| {
                let inner = Arc::clone(&self.inner);
                let filter = filter.clone();
                async move { inner.fetch_messages(&filter).await }.boxed().shared()
            })
            .clone()
    }
}

#[async_trait]
impl<R> MessagingRelay for DedupRelay<R>
where
    R: MessagingRelay + 'static,
{
    async fn fetch_messages(&self, filter: &MessageFilter) -> Result<MessagePage, UpstreamError> {
        let fetch = self.shared_fetch(filter);
        let result = fetch.clone().await;

        // Only the waiter that still sees its own future removes the entry
        let removed = self
            .in_flight
            .remove_if(filter, |_, current| current.ptr_eq(&fetch))
            .is_some();
        if !removed {
            debug!("Shared in-flight fetch for offset {}", filter.offset);
        }
        result
    }

    async fn post_message(
        &self,
        recipient_key: &str,
        envelope: &str,
        kind: MessageKind,
    ) -> Result<PostAck, UpstreamError> {
        self.inner.post_message(recipient_key, envelope, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowRelay {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MessagingRelay for SlowRelay {
        async fn fetch_messages(
            &self,
            filter: &MessageFilter,
        ) -> Result<MessagePage, UpstreamError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if filter.offset > 0 {
                return Err(UpstreamError::Transport {
                    service: "relay",
                    message: "connection reset".to_string(),
                });
            }
            Ok(MessagePage {
                messages: vec![],
                total: 7,
            })
        }

        async fn post_message(
            &self,
            _recipient_key: &str,
            _envelope: &str,
            _kind: MessageKind,
        ) -> Result<PostAck, UpstreamError> {
            Ok(PostAck { id: "posted".to_string() })
        }
    }

    fn relay() -> (Arc<SlowRelay>, DedupRelay<SlowRelay>) {
        let inner = Arc::new(SlowRelay {
            fetches: AtomicUsize::new(0),
        });
        (Arc::clone(&inner), DedupRelay::new(inner))
    }

    #[tokio::test]
    async fn test_identical_fetches_share_one_request() {
        let (inner, dedup) = relay();
        let filter = MessageFilter::for_recipient("alice", 50);

        let (a, b, c) = tokio::join!(
            dedup.fetch_messages(&filter),
            dedup.fetch_messages(&filter),
            dedup.fetch_messages(&filter)
        );
        assert_eq!(a.unwrap().total, 7);
        assert_eq!(b.unwrap().total, 7);
        assert_eq!(c.unwrap().total, 7);
        assert_eq!(inner.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_filters_are_not_merged() {
        let (inner, dedup) = relay();
        let first = MessageFilter::for_recipient("alice", 50);
        let other = MessageFilter::for_recipient("bob", 50);

        let (a, b) = tokio::join!(dedup.fetch_messages(&first), dedup.fetch_messages(&other));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(inner.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_cached() {
        let (inner, dedup) = relay();
        let filter = MessageFilter::for_recipient("alice", 50).with_offset(50);

        let (a, b) = tokio::join!(dedup.fetch_messages(&filter), dedup.fetch_messages(&filter));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(inner.fetches.load(Ordering::SeqCst), 1);

        // A later call goes upstream again
        assert!(dedup.fetch_messages(&filter).await.is_err());
        assert_eq!(inner.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_posts_pass_through() {
        let (_, dedup) = relay();
        let ack = dedup
            .post_message("alice", "envelope", MessageKind::Deposit)
            .await
            .unwrap();
        assert_eq!(ack.id, "posted");
    }
}

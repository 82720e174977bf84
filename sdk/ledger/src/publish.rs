//! Note publication
//!
//! Seals a note for its owner and posts it to the relay. A note nobody
//! receives is lost value, so posting is awaited and retried with backoff
//! instead of fired and forgotten. The envelope is sealed once and the same
//! ciphertext is re-posted on every attempt.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::{debug, warn};

use nocta_keypair::KEY_SIZE;
use nocta_note::{MessageKind, Note};
use nocta_privacy::encrypt_note_payload;

use crate::error::PublishError;
use crate::services::{MessagingRelay, PostAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every failure
    pub base_backoff: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl PublishPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

pub struct NotePublisher<R> {
    relay: Arc<R>,
    policy: PublishPolicy,
}

impl<R> Clone for NotePublisher<R> {
    fn clone(&self) -> Self {
        Self {
            relay: Arc::clone(&self.relay),
            policy: self.policy,
        }
    }
}

impl<R: MessagingRelay> NotePublisher<R> {
    pub fn new(relay: Arc<R>, policy: PublishPolicy) -> Self {
        Self { relay, policy }
    }

    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }

    /// Seal `note` to `recipient_pk` and post it
    pub async fn publish(
        &self,
        note: &Note,
        recipient_pk: &[u8; KEY_SIZE],
        kind: MessageKind,
    ) -> Result<PostAck, PublishError> {
        let envelope = encrypt_note_payload(recipient_pk, note)?;
        let recipient_key = BASE64.encode(recipient_pk);
        self.post_with_retry(&recipient_key, &envelope, kind).await
    }

    /// Post an already sealed envelope
    pub async fn post_with_retry(
        &self,
        recipient_key: &str,
        envelope: &str,
        kind: MessageKind,
    ) -> Result<PostAck, PublishError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.relay.post_message(recipient_key, envelope, kind).await {
                Ok(ack) => {
                    debug!(
                        "Published {} note as message {} (attempt {})",
                        kind.as_str(),
                        ack.id,
                        attempt
                    );
                    return Ok(ack);
                }
                Err(e) => {
                    warn!("Note publication attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt >= attempts {
                        return Err(PublishError::Exhausted { attempts, last: e });
                    }
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::services::{MessageFilter, MessagePage};
    use async_trait::async_trait;
    use nocta_keypair::EncryptionKeypair;
    use nocta_note::{FieldElement, NoteRandomness};
    use nocta_privacy::decrypt_note_payload;
    use std::sync::Mutex;

    /// Fails the first `failures` posts, then accepts
    struct FlakyRelay {
        failures: u32,
        posts: Mutex<Vec<(String, String)>>,
    }

    impl FlakyRelay {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                posts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessagingRelay for FlakyRelay {
        async fn fetch_messages(
            &self,
            _filter: &MessageFilter,
        ) -> Result<MessagePage, UpstreamError> {
            Ok(MessagePage::default())
        }

        async fn post_message(
            &self,
            recipient_key: &str,
            envelope: &str,
            _kind: MessageKind,
        ) -> Result<PostAck, UpstreamError> {
            let mut posts = self.posts.lock().unwrap();
            posts.push((recipient_key.to_string(), envelope.to_string()));
            if posts.len() as u32 <= self.failures {
                return Err(UpstreamError::Status {
                    service: "relay",
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(PostAck {
                id: format!("msg-{}", posts.len()),
            })
        }
    }

    fn policy(max_attempts: u32) -> PublishPolicy {
        PublishPolicy {
            max_attempts,
            base_backoff: Duration::ZERO,
        }
    }

    fn note() -> Note {
        Note::with_randomness(
            25,
            FieldElement::from_u64(1),
            FieldElement::from_u64(9),
            NoteRandomness {
                r: FieldElement::from_u64(4),
                s: None,
            },
        )
    }

    #[tokio::test]
    async fn test_retries_until_accepted() {
        let relay = Arc::new(FlakyRelay::new(2));
        let publisher = NotePublisher::new(Arc::clone(&relay), policy(3));
        let owner = EncryptionKeypair::random();

        let ack = publisher
            .publish(&note(), owner.public_key(), MessageKind::Transfer)
            .await
            .unwrap();
        assert_eq!(ack.id, "msg-3");

        let posts = relay.posts.lock().unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|p| p == &posts[0]), "same envelope on every attempt");
        assert_eq!(posts[0].0, BASE64.encode(owner.public_key()));
        assert_eq!(decrypt_note_payload(&posts[0].1, owner.secret_key()), Some(note()));
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let relay = Arc::new(FlakyRelay::new(10));
        let publisher = NotePublisher::new(Arc::clone(&relay), policy(2));
        let owner = EncryptionKeypair::random();

        let err = publisher
            .publish(&note(), owner.public_key(), MessageKind::Transfer)
            .await
            .unwrap_err();
        match err {
            PublishError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last, UpstreamError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(relay.posts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = PublishPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }
}

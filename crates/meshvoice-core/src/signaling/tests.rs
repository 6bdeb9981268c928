use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshvoice_common::{MailboxError, ParticipantId, SignalingError};
use tokio::sync::mpsc;

use super::*;
use crate::protocol::{EntryId, MailboxEntry, MailboxField, SignalPayload, SignalingMessage};
use crate::test_support::{candidate, offer, wait_for, FlakyMailbox, RecordingHandler};

fn pid(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn publish_addresses_entry() {
    let mailbox = MemoryMailbox::new();
    let relay = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));

    relay.publish(&pid("u2"), &offer()).await.unwrap();

    let entries = mailbox.query(MailboxField::To, "u2").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message.from, pid("u1"));
    assert_eq!(entries[0].message.payload().unwrap(), offer());
}

#[tokio::test]
async fn publish_failure_is_reported() {
    let mailbox = FlakyMailbox::new();
    mailbox.fail_appends.store(true, Ordering::SeqCst);
    let relay = SignalingRelay::new(pid("u1"), mailbox);

    let err = relay.publish(&pid("u2"), &offer()).await.unwrap_err();
    assert!(matches!(err, SignalingError::PublishFailed(_)));
}

#[tokio::test]
async fn subscribe_delivers_then_deletes() {
    let mailbox = MemoryMailbox::new();
    let sender = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    let receiver = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let handler = RecordingHandler::new();

    receiver.subscribe(handler.clone()).await.unwrap();
    sender.publish(&pid("u2"), &offer()).await.unwrap();
    sender.publish(&pid("u3"), &offer()).await.unwrap();

    wait_for!(handler.count() == 1);
    wait_for!(mailbox.query(MailboxField::To, "u2").await.unwrap().is_empty());
    assert_eq!(handler.received()[0], (pid("u1"), offer()));
    // Entries for other participants are untouched.
    assert_eq!(mailbox.query(MailboxField::To, "u3").await.unwrap().len(), 1);
}

#[tokio::test]
async fn pending_entries_are_delivered_on_subscribe() {
    let mailbox = MemoryMailbox::new();
    let sender = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    sender.publish(&pid("u2"), &offer()).await.unwrap();

    let receiver = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let handler = RecordingHandler::new();
    receiver.subscribe(handler.clone()).await.unwrap();

    wait_for!(handler.count() == 1);
    wait_for!(mailbox.is_empty().await);
}

#[tokio::test]
async fn delivery_preserves_publish_order() {
    let mailbox = MemoryMailbox::new();
    let sender = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    let receiver = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let handler = RecordingHandler::new();
    receiver.subscribe(handler.clone()).await.unwrap();

    sender.publish(&pid("u2"), &offer()).await.unwrap();
    for n in 0..5 {
        sender.publish(&pid("u2"), &candidate(n)).await.unwrap();
    }

    wait_for!(handler.count() == 6);
    let payloads: Vec<SignalPayload> = handler.received().into_iter().map(|(_, p)| p).collect();
    let mut expected = vec![offer()];
    expected.extend((0..5).map(candidate));
    assert_eq!(payloads, expected);
}

#[tokio::test]
async fn modified_entries_are_not_redelivered() {
    let mailbox = FlakyMailbox::new();
    mailbox.fail_deletes.store(true, Ordering::SeqCst);
    let receiver = SignalingRelay::new(pid("u2"), mailbox.clone());
    let handler = RecordingHandler::new();
    receiver.subscribe(handler.clone()).await.unwrap();

    let message = SignalingMessage::new(pid("u1"), pid("u2"), &offer());
    let id = mailbox.inner.append(message.clone()).await.unwrap();
    wait_for!(handler.count() == 1);

    mailbox.inner.update(&id, message).await.unwrap();
    settle().await;

    assert_eq!(handler.count(), 1);
    // The failed delete left the entry behind.
    assert_eq!(mailbox.inner.len().await, 1);
}

#[tokio::test]
async fn unparseable_payload_is_dropped_and_deleted() {
    let mailbox = MemoryMailbox::new();
    let receiver = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let handler = RecordingHandler::new();
    receiver.subscribe(handler.clone()).await.unwrap();

    let mut garbage = SignalingMessage::new(pid("u1"), pid("u2"), &offer());
    garbage.signal = "{truncated".into();
    mailbox.append(garbage).await.unwrap();
    let relay = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    relay.publish(&pid("u2"), &offer()).await.unwrap();

    wait_for!(handler.count() == 1);
    wait_for!(mailbox.is_empty().await);
    assert_eq!(handler.received()[0].1, offer());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let mailbox = MemoryMailbox::new();
    let sender = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    let receiver = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let handler = RecordingHandler::new();

    receiver.subscribe(handler.clone()).await.unwrap();
    assert!(receiver.is_subscribed().await);
    receiver.unsubscribe().await;
    assert!(!receiver.is_subscribed().await);

    sender.publish(&pid("u2"), &offer()).await.unwrap();
    settle().await;
    assert_eq!(handler.count(), 0);
    assert_eq!(mailbox.len().await, 1);

    // A later subscription picks up what was left.
    receiver.subscribe(handler.clone()).await.unwrap();
    wait_for!(handler.count() == 1);
}

#[tokio::test]
async fn unsubscribe_without_subscription_is_noop() {
    let relay = SignalingRelay::new(pid("u1"), Arc::new(MemoryMailbox::new()));
    relay.unsubscribe().await;
    assert!(!relay.is_subscribed().await);
}

#[tokio::test]
async fn second_subscribe_keeps_single_delivery() {
    let mailbox = MemoryMailbox::new();
    let receiver = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let handler = RecordingHandler::new();
    receiver.subscribe(handler.clone()).await.unwrap();
    receiver.subscribe(handler.clone()).await.unwrap();

    SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()))
        .publish(&pid("u2"), &offer())
        .await
        .unwrap();

    wait_for!(handler.count() == 1);
    settle().await;
    assert_eq!(handler.count(), 1);
    assert_eq!(mailbox.watcher_count().await, 1);
}

#[tokio::test]
async fn purge_removes_own_entries_only() {
    let mailbox = MemoryMailbox::new();
    let u1 = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    let u2 = SignalingRelay::new(pid("u2"), Arc::new(mailbox.clone()));
    let u3 = SignalingRelay::new(pid("u3"), Arc::new(mailbox.clone()));
    u1.publish(&pid("u2"), &offer()).await.unwrap();
    u2.publish(&pid("u1"), &offer()).await.unwrap();
    u3.publish(&pid("u2"), &offer()).await.unwrap();

    assert_eq!(u1.purge_own_messages().await, 2);

    let left = mailbox.entries().await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].message.from, pid("u3"));
}

#[tokio::test]
async fn purge_counts_self_addressed_entry_once() {
    let mailbox = MemoryMailbox::new();
    let u1 = SignalingRelay::new(pid("u1"), Arc::new(mailbox.clone()));
    u1.publish(&pid("u1"), &offer()).await.unwrap();

    assert_eq!(u1.purge_own_messages().await, 1);
    assert!(mailbox.is_empty().await);
}

#[tokio::test]
async fn purge_failures_are_skipped() {
    let mailbox = FlakyMailbox::new();
    let u1 = SignalingRelay::new(pid("u1"), mailbox.clone());
    u1.publish(&pid("u2"), &offer()).await.unwrap();

    mailbox.fail_deletes.store(true, Ordering::SeqCst);
    assert_eq!(u1.purge_own_messages().await, 0);

    mailbox.fail_deletes.store(false, Ordering::SeqCst);
    mailbox.fail_queries.store(true, Ordering::SeqCst);
    assert_eq!(u1.purge_own_messages().await, 0);
    assert_eq!(mailbox.inner.len().await, 1);
}

/// Store whose watch streams end right away.
#[derive(Default)]
struct EndingWatches {
    watches: AtomicUsize,
}

#[async_trait]
impl MailboxStore for EndingWatches {
    async fn append(&self, _message: SignalingMessage) -> Result<EntryId, MailboxError> {
        Ok("e1".into())
    }

    async fn watch(&self, _field: MailboxField, _value: &str) -> Result<ChangeReceiver, MailboxError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn query(
        &self,
        _field: MailboxField,
        _value: &str,
    ) -> Result<Vec<MailboxEntry>, MailboxError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: &str) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[tokio::test]
async fn ended_watch_allows_resubscribe() {
    let store = Arc::new(EndingWatches::default());
    let relay = SignalingRelay::new(pid("u1"), store.clone());

    relay.subscribe(RecordingHandler::new()).await.unwrap();
    wait_for!(!relay.is_subscribed().await);

    relay.subscribe(RecordingHandler::new()).await.unwrap();
    assert_eq!(store.watches.load(Ordering::SeqCst), 2);
    relay.unsubscribe().await;
}

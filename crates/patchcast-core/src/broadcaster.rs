//! Single-topic state broadcaster.
//!
//! A [`Broadcaster`] owns the authoritative [`StateStore`] and the registry
//! of subscriber sinks, both behind one mutex. Every operation that touches
//! either takes that lock, which gives the ordering guarantees the wire
//! protocol depends on:
//!
//! - a new subscriber's snapshot frame is written before any patch can reach
//!   it, and reflects every publish that completed before it registered;
//! - concurrent publishes are serialized, so each patch is diffed against
//!   the state the previous patch produced;
//! - every subscriber sees the same patches in the same order.
//!
//! Sinks are non-blocking by contract, so holding the lock during fan-out
//! never waits on a slow reader. A sink that refuses a frame is removed from
//! the registry on the spot and closed once the lock is released. Sinks
//! still registered when the last clone of a broadcaster is dropped are
//! closed as well.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::diff::diff;
use crate::error::{PublishError, SubscribeError};
use crate::frame::{self, FrameError};
use crate::ids::{SubscriberId, Topic};
use crate::sink::{Sink, SinkError};
use crate::store::StateStore;

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOutcome {
    /// Number of operations in the computed patch.
    pub ops: usize,
    /// Subscribers the patch frame was written to.
    pub delivered: usize,
    /// Subscribers dropped because their sink refused the frame.
    pub dropped: usize,
}

/// Counters describing broadcaster activity since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastStats {
    /// Successful publishes, including ones that produced no change.
    pub publishes: u64,
    /// Publishes whose patch was empty and sent nowhere.
    pub empty_publishes: u64,
    /// Snapshot frames written to new subscribers.
    pub snapshots_sent: u64,
    /// Patch frames written, counted per subscriber.
    pub patches_sent: u64,
    /// Subscribers removed because a write to their sink failed.
    pub subscribers_dropped: u64,
    /// Subscribers currently registered.
    pub active_subscribers: usize,
}

/// Publish/subscribe hub for one topic.
///
/// Cloning is cheap and every clone refers to the same state and registry.
pub struct Broadcaster<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Broadcaster<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> core::fmt::Debug for Broadcaster<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("topic", &self.shared.topic)
            .finish_non_exhaustive()
    }
}

struct Shared<S> {
    topic: Topic,
    inner: Mutex<Inner<S>>,
}

struct Inner<S> {
    store: StateStore<S>,
    subscribers: BTreeMap<SubscriberId, Arc<dyn Sink>>,
    next_id: SubscriberId,
    stats: BroadcastStats,
}

type Dropped = Vec<(SubscriberId, Arc<dyn Sink>)>;

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for sink in core::mem::take(&mut inner.subscribers).into_values() {
            sink.close();
        }
    }
}

impl<S> Inner<S> {
    fn register(&mut self, sink: Arc<dyn Sink>) -> SubscriberId {
        let id = self.next_id;
        self.next_id = id.next();
        self.subscribers.insert(id, sink);
        self.stats.active_subscribers = self.subscribers.len();
        id
    }

    fn deregister(&mut self, id: SubscriberId) -> Option<Arc<dyn Sink>> {
        let sink = self.subscribers.remove(&id);
        self.stats.active_subscribers = self.subscribers.len();
        sink
    }

    /// Write `frame` to every registered sink, removing the ones that fail.
    fn fan_out(&mut self, frame: &Bytes, topic: &Topic) -> (usize, Dropped) {
        let mut delivered: usize = 0;
        let mut failed = Vec::new();
        for (id, sink) in &self.subscribers {
            match sink.write(frame.clone()) {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(e) => {
                    log_sink_failure(topic, *id, &e);
                    failed.push(*id);
                }
            }
        }

        let dropped: Dropped = failed
            .into_iter()
            .filter_map(|id| self.deregister(id).map(|sink| (id, sink)))
            .collect();

        self.stats.patches_sent = self
            .stats
            .patches_sent
            .saturating_add(u64::try_from(delivered).unwrap_or(u64::MAX));
        self.stats.subscribers_dropped = self
            .stats
            .subscribers_dropped
            .saturating_add(u64::try_from(dropped.len()).unwrap_or(u64::MAX));
        (delivered, dropped)
    }
}

impl<S: Serialize> Inner<S> {
    fn publish(
        &mut self,
        next: S,
        topic: &Topic,
    ) -> Result<(PublishOutcome, Dropped), PublishError> {
        let before = frame::to_document(self.store.peek())?;
        let after = frame::to_document(&next)?;
        let patch = diff(&before, &after);
        let encoded = if patch.is_empty() {
            None
        } else {
            Some(frame::encode_patch(&patch)?)
        };

        self.store.set(next);
        self.stats.publishes = self.stats.publishes.saturating_add(1);

        let Some(encoded) = encoded else {
            self.stats.empty_publishes = self.stats.empty_publishes.saturating_add(1);
            trace!(%topic, "publish produced no change");
            return Ok((PublishOutcome::default(), Vec::new()));
        };

        let (delivered, dropped) = self.fan_out(&encoded, topic);
        trace!(%topic, ops = patch.len(), delivered, dropped = dropped.len(), "patch published");
        Ok((
            PublishOutcome {
                ops: patch.len(),
                delivered,
                dropped: dropped.len(),
            },
            dropped,
        ))
    }
}

fn log_sink_failure(topic: &Topic, id: SubscriberId, error: &SinkError) {
    match error {
        SinkError::Full => warn!(%topic, subscriber = %id, "subscriber too slow, dropping"),
        SinkError::Closed => debug!(%topic, subscriber = %id, "subscriber sink closed, dropping"),
    }
}

/// Close sinks removed from the registry. Runs without the broadcaster lock.
fn close_dropped(dropped: Dropped) {
    for (_, sink) in dropped {
        sink.close();
    }
}

impl<S> Broadcaster<S>
where
    S: Serialize + Clone + Send + 'static,
{
    /// Create a broadcaster for `topic` holding `initial` as its state.
    pub fn new(topic: impl Into<Topic>, initial: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                topic: topic.into(),
                inner: Mutex::new(Inner {
                    store: StateStore::new(initial),
                    subscribers: BTreeMap::new(),
                    next_id: SubscriberId(0),
                    stats: BroadcastStats::default(),
                }),
            }),
        }
    }

    /// The topic this broadcaster serves.
    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    /// A copy of the current state.
    pub fn state(&self) -> S {
        self.shared.lock().store.get()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Activity counters.
    pub fn stats(&self) -> BroadcastStats {
        self.shared.lock().stats
    }

    /// Register `sink` and send it a snapshot of the current state.
    ///
    /// Every later publish reaches the sink as a patch frame until the
    /// returned [`Subscription`] is dropped or the sink fails.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] if the snapshot cannot be encoded or the
    /// sink refuses it. The sink is not registered in that case.
    pub fn subscribe(&self, sink: Arc<dyn Sink>) -> Result<Subscription, SubscribeError> {
        self.register_with(sink, frame::encode_snapshot::<S>)
    }

    /// Like [`subscribe`](Self::subscribe), but the snapshot frame carries
    /// the value produced by `bootstrap` instead of the stored state.
    ///
    /// `bootstrap` runs while the broadcaster lock is held and must not call
    /// back into this broadcaster. Later patches are still diffed against
    /// the stored state.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_with<F>(
        &self,
        sink: Arc<dyn Sink>,
        bootstrap: F,
    ) -> Result<Subscription, SubscribeError>
    where
        F: FnOnce() -> S,
    {
        self.register_with(sink, |_| frame::encode_snapshot(&bootstrap()))
    }

    fn register_with<F>(
        &self,
        sink: Arc<dyn Sink>,
        snapshot: F,
    ) -> Result<Subscription, SubscribeError>
    where
        F: FnOnce(&S) -> Result<Bytes, FrameError>,
    {
        let topic = &self.shared.topic;
        let mut inner = self.shared.lock();
        let id = inner.register(Arc::clone(&sink));

        let encoded = match snapshot(inner.store.peek()) {
            Ok(encoded) => encoded,
            Err(e) => {
                inner.deregister(id);
                return Err(e.into());
            }
        };

        if let Err(e) = sink.write(encoded) {
            inner.deregister(id);
            drop(inner);
            sink.close();
            debug!(%topic, subscriber = %id, error = %e, "snapshot write failed");
            return Err(e.into());
        }

        inner.stats.snapshots_sent = inner.stats.snapshots_sent.saturating_add(1);
        let active = inner.subscribers.len();
        drop(inner);

        debug!(%topic, subscriber = %id, active, "subscriber registered");
        let registry: Weak<dyn Registry> = Arc::downgrade(&self.shared) as Weak<dyn Registry>;
        Ok(Subscription { id, registry })
    }

    /// Remove a subscriber and close its sink.
    ///
    /// Returns `false` if `id` was not registered (already removed, dropped
    /// after a failed write, or never issued). Calling it repeatedly is
    /// harmless.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.shared.remove(id)
    }

    /// Replace the state with `next` and send the resulting patch to every
    /// subscriber.
    ///
    /// An unchanged state still replaces the stored value but sends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encode`] if either the stored or the new state
    /// cannot be serialized. Nothing is stored or sent in that case.
    pub fn publish(&self, next: S) -> Result<PublishOutcome, PublishError> {
        let mut inner = self.shared.lock();
        let (outcome, dropped) = inner.publish(next, &self.shared.topic)?;
        drop(inner);
        close_dropped(dropped);
        Ok(outcome)
    }

    /// Derive the next state from the current one and publish it, without
    /// letting any other publish run in between.
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish); the stored state is unchanged on
    /// error even though `apply` already ran against a copy.
    pub fn update<F>(&self, apply: F) -> Result<PublishOutcome, PublishError>
    where
        F: FnOnce(&mut S),
    {
        let mut inner = self.shared.lock();
        let mut next = inner.store.get();
        apply(&mut next);
        let (outcome, dropped) = inner.publish(next, &self.shared.topic)?;
        drop(inner);
        close_dropped(dropped);
        Ok(outcome)
    }

    /// Remove every subscriber and close its sink.
    ///
    /// The broadcaster stays usable: the state is kept and new subscribers
    /// may still register. Returns the number of subscribers removed.
    pub fn shutdown(&self) -> usize {
        let mut inner = self.shared.lock();
        let drained = core::mem::take(&mut inner.subscribers);
        inner.stats.active_subscribers = 0;
        drop(inner);

        let count = drained.len();
        for sink in drained.into_values() {
            sink.close();
        }
        debug!(topic = %self.shared.topic, closed = count, "broadcaster shut down");
        count
    }
}

/// Type-erased view of a broadcaster's registry, held weakly by
/// [`Subscription`] so handles don't need the state type.
trait Registry: Send + Sync {
    fn remove(&self, id: SubscriberId) -> bool;
    fn contains(&self, id: SubscriberId) -> bool;
}

impl<S: Send> Registry for Shared<S> {
    fn remove(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let sink = inner.deregister(id);
        let active = inner.subscribers.len();
        drop(inner);

        let Some(sink) = sink else {
            return false;
        };
        sink.close();
        debug!(topic = %self.topic, subscriber = %id, active, "subscriber removed");
        true
    }

    fn contains(&self, id: SubscriberId) -> bool {
        self.lock().subscribers.contains_key(&id)
    }
}

/// Handle for one registration.
///
/// Dropping it unregisters the subscriber and closes its sink, so tying it
/// to the lifetime of a connection makes remote close, remote abort and
/// local close all converge on the same idempotent cleanup.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    registry: Weak<dyn Registry>,
}

impl Subscription {
    /// The registration handle.
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the subscriber is still registered.
    ///
    /// Becomes `false` after a failed write, [`Broadcaster::unsubscribe`],
    /// [`Broadcaster::shutdown`], or once the broadcaster is dropped.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.id))
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Barrier;
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::frame::Frame;
    use crate::sink::MemorySink;

    fn decoded(sink: &MemorySink) -> Vec<Frame> {
        sink.frames()
            .iter()
            .map(|b| Frame::decode(b).unwrap())
            .collect()
    }

    #[test]
    fn subscriber_gets_snapshot_first() {
        let hub = Broadcaster::new("todos", json!([]));
        let sink = Arc::new(MemorySink::new());
        let _sub = hub.subscribe(sink.clone()).unwrap();

        assert_eq!(sink.frames(), vec![Bytes::from_static(b"{\"data\":[]}\n")]);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn publish_sends_patch_relative_to_wrapper() {
        let hub = Broadcaster::new("todos", json!([]));
        let sink = Arc::new(MemorySink::new());
        let _sub = hub.subscribe(sink.clone()).unwrap();

        let outcome = hub.publish(json!([{"id": "1"}])).unwrap();
        assert_eq!(
            outcome,
            PublishOutcome {
                ops: 1,
                delivered: 1,
                dropped: 0
            }
        );
        assert_eq!(
            sink.frames()[1],
            Bytes::from_static(b"[{\"op\":\"add\",\"path\":\"/data/0\",\"value\":{\"id\":\"1\"}}]\n")
        );
    }

    #[test]
    fn unchanged_publish_sends_nothing() {
        let hub = Broadcaster::new("t", json!({"n": 1}));
        let sink = Arc::new(MemorySink::new());
        let _sub = hub.subscribe(sink.clone()).unwrap();

        let outcome = hub.publish(json!({"n": 1})).unwrap();
        assert_eq!(outcome, PublishOutcome::default());
        assert_eq!(sink.len(), 1);
        assert_eq!(hub.state(), json!({"n": 1}));

        let stats = hub.stats();
        assert_eq!(stats.publishes, 1);
        assert_eq!(stats.empty_publishes, 1);
    }

    #[test]
    fn failed_sink_is_dropped_and_closed_once() {
        let hub = Broadcaster::new("t", 0_u32);
        let healthy = Arc::new(MemorySink::new());
        let broken = Arc::new(MemorySink::new());
        let _a = hub.subscribe(healthy.clone()).unwrap();
        let b = hub.subscribe(broken.clone()).unwrap();

        broken.fail_writes();
        let outcome = hub.publish(1).unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.dropped, 1);
        assert!(!b.is_active());
        assert_eq!(broken.close_calls(), 1);

        // Dropping the stale handle must not close the sink a second time.
        drop(b);
        assert_eq!(broken.close_calls(), 1);
        assert_eq!(healthy.len(), 2);
        assert_eq!(hub.stats().subscribers_dropped, 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = Broadcaster::new("t", 0_u32);
        let sink = Arc::new(MemorySink::new());
        let sub = hub.subscribe(sink.clone()).unwrap();
        let id = sub.id();

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert!(!hub.unsubscribe(SubscriberId(999)));
        drop(sub);
        assert_eq!(sink.close_calls(), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn racing_teardown_paths_close_sink_once() {
        for round in 0..50_u32 {
            let hub = Broadcaster::new("t", round);
            let sink = Arc::new(MemorySink::new());
            let sub = hub.subscribe(sink.clone()).unwrap();
            let id = sub.id();
            sink.fail_writes();
            let barrier = &Barrier::new(5);

            thread::scope(|scope| {
                for _ in 0..3 {
                    scope.spawn(|| {
                        barrier.wait();
                        hub.unsubscribe(id);
                    });
                }
                scope.spawn(move || {
                    barrier.wait();
                    drop(sub);
                });
                scope.spawn(|| {
                    barrier.wait();
                    hub.publish(round.saturating_add(1)).unwrap();
                });
            });

            assert_eq!(sink.close_calls(), 1, "round {round}");
            assert_eq!(hub.subscriber_count(), 0);
            assert_eq!(hub.state(), round.saturating_add(1));
        }
    }

    #[test]
    fn bootstrap_overrides_snapshot_only() {
        let hub = Broadcaster::new("t", json!([1]));
        let sink = Arc::new(MemorySink::new());
        let _sub = hub
            .subscribe_with(sink.clone(), || json!(["boot"]))
            .unwrap();
        hub.publish(json!([1, 2])).unwrap();

        assert_eq!(
            decoded(&sink),
            vec![
                Frame::Snapshot(json!(["boot"])),
                Frame::Patch(vec![crate::diff::PatchOp::Add {
                    path: String::from("/data/1"),
                    value: json!(2),
                }]),
            ]
        );
    }

    #[test]
    fn rejected_snapshot_leaves_registry_empty() {
        let hub = Broadcaster::new("t", 0_u32);
        let sink = Arc::new(MemorySink::new());
        sink.fail_writes();

        let err = hub.subscribe(sink.clone()).unwrap_err();
        assert!(matches!(
            err,
            SubscribeError::Sink {
                source: SinkError::Closed
            }
        ));
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(sink.close_calls(), 1);
    }

    #[test]
    fn unencodable_state_is_not_stored() {
        let hub: Broadcaster<BTreeMap<Vec<u8>, u8>> = Broadcaster::new("t", BTreeMap::new());
        let sink = Arc::new(MemorySink::new());
        let _sub = hub.subscribe(sink.clone()).unwrap();

        let mut bad = BTreeMap::new();
        bad.insert(vec![1_u8], 1_u8);
        assert!(matches!(hub.publish(bad), Err(PublishError::Encode { .. })));
        assert!(hub.state().is_empty());
        assert_eq!(sink.len(), 1);
        assert_eq!(hub.stats().publishes, 0);
    }

    #[test]
    fn update_applies_against_current_state() {
        let hub = Broadcaster::new("t", vec![1_u32]);
        let sink = Arc::new(MemorySink::new());
        let _sub = hub.subscribe(sink.clone()).unwrap();

        hub.update(|items| items.push(2)).unwrap();
        hub.update(|items| items.push(3)).unwrap();
        assert_eq!(hub.state(), vec![1, 2, 3]);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn shutdown_closes_every_sink() {
        let hub = Broadcaster::new("t", 0_u32);
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let sub_a = hub.subscribe(a.clone()).unwrap();
        let _sub_b = hub.subscribe(b.clone()).unwrap();

        assert_eq!(hub.shutdown(), 2);
        assert!(!sub_a.is_active());
        assert_eq!(a.close_calls(), 1);
        assert_eq!(b.close_calls(), 1);

        hub.publish(5).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(hub.state(), 5);
    }

    #[test]
    fn dropping_broadcaster_closes_remaining_sinks() {
        let hub = Broadcaster::new("t", 0_u32);
        let sink = Arc::new(MemorySink::new());
        let sub = hub.subscribe(sink.clone()).unwrap();
        drop(hub);

        assert!(!sub.is_active());
        assert_eq!(sink.close_calls(), 1);
        drop(sub);
        assert_eq!(sink.close_calls(), 1);
    }
}

//! Typed publish/subscribe scoped to a root scope's lifetime.
//!
//! Each payload type gets its own [`tokio::sync::broadcast`] channel, keyed
//! by `TypeId` behind a `parking_lot::Mutex`-guarded map. Broadcast channels
//! already provide the semantics the distilled spec describes informally as
//! a "linked future" chain: per-subscriber FIFO cursors, invisibility of
//! events published before subscription, and automatic cleanup once every
//! subscriber has dropped — the spec's design notes call this an explicitly
//! acceptable equivalent to hand-rolling the chain.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use futures::{Stream, StreamExt as _};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::CoreError;

const DEFAULT_CAPACITY: usize = 1024;

type AnyPayload = Arc<dyn Any + Send + Sync>;

struct Head {
    sender: broadcast::Sender<AnyPayload>,
}

/// A root scope's event bus. Cheap to clone (an `Arc` around the head map).
#[derive(Clone)]
pub struct EventsBus {
    heads: Arc<Mutex<HashMap<TypeId, Head>>>,
    capacity: usize,
}

impl EventsBus {
    pub fn new() -> Self {
        EventsBus {
            heads: Arc::new(Mutex::new(HashMap::new())),
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EventsBus {
            heads: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish `payload`. If no head exists yet for this type (nobody has
    /// ever subscribed), the send is discarded without allocating a head —
    /// mirroring "no-subscriber sends retain no memory".
    pub fn send<T: Any + Send + Sync + 'static>(&self, payload: T) {
        let type_id = TypeId::of::<T>();
        let heads = self.heads.lock();
        if let Some(head) = heads.get(&type_id) {
            let _ = head.sender.send(Arc::new(payload));
        }
    }

    /// Subscribe to payloads of type `T`, lazily creating the head if this
    /// is the first subscriber ever seen for `T`.
    pub fn subscribe<T: Any + Send + Sync + Clone + 'static>(
        &self,
    ) -> impl Stream<Item = Result<T, CoreError>> + use<T> {
        let type_id = TypeId::of::<T>();
        let mut heads = self.heads.lock();
        let head = heads
            .entry(type_id)
            .or_insert_with(|| Head {
                sender: broadcast::channel(self.capacity).0,
            });
        let receiver = head.sender.subscribe();
        drop(heads);
        BroadcastStream::new(receiver).map(|result| match result {
            Ok(payload) => Ok((*payload
                .downcast::<T>()
                .expect("TypeId lookup guarantees matching concrete type"))
            .clone()),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(CoreError::InvariantViolation(format!(
                "event subscriber fell {skipped} messages behind; increase the bus capacity"
            ))),
        })
    }
}

impl Default for EventsBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[derive(Clone, Debug, PartialEq)]
    struct OrderCreated {
        id: &'static str,
    }

    #[tokio::test]
    async fn subscriber_sees_fifo_order() {
        let bus = EventsBus::new();
        let mut stream = Box::pin(bus.subscribe::<OrderCreated>());
        bus.send(OrderCreated { id: "1" });
        bus.send(OrderCreated { id: "2" });
        bus.send(OrderCreated { id: "3" });
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(stream.next().await.unwrap().unwrap().id);
        }
        assert_eq!(seen, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventsBus::new();
        bus.send(OrderCreated { id: "1" }); // no subscriber yet, discarded
        let mut stream = Box::pin(bus.subscribe::<OrderCreated>());
        bus.send(OrderCreated { id: "2" });
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id, "2");
    }

    #[tokio::test]
    async fn send_without_subscriber_is_a_no_op() {
        let bus = EventsBus::new();
        bus.send(OrderCreated { id: "ignored" });
        // No panic, no retained state: subscribing afterwards sees nothing
        // published before it.
        let mut stream = Box::pin(bus.subscribe::<OrderCreated>());
        bus.send(OrderCreated { id: "visible" });
        assert_eq!(stream.next().await.unwrap().unwrap().id, "visible");
    }
}

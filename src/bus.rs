//! In-process broadcast of captured exchanges to live subscribers

use crate::capture::CapturedExchange;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// Per-subscriber buffer capacity. A subscriber that falls more than this
/// many events behind starts losing events; it never blocks the engine or
/// other subscribers.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Fans captured exchanges out to every registered subscriber with bounded
/// per-subscriber memory and a drop-on-slow policy.
#[derive(Default)]
pub struct EventBus {
  subscribers: RwLock<HashMap<u64, mpsc::Sender<Bytes>>>,
  next_id: AtomicU64,
}

/// A live event handle returned by [`EventBus::subscribe`].
///
/// Events arrive in broadcast order as JSON-encoded [`CapturedExchange`]
/// payloads. After [`EventBus::unsubscribe`], any buffered events can still
/// be drained and then [`Subscription::recv`] yields `None`.
pub struct Subscription {
  id: u64,
  receiver: mpsc::Receiver<Bytes>,
}

impl Subscription {
  /// Receives the next event, or `None` once the subscription is closed
  /// and its buffer drained.
  pub async fn recv(&mut self) -> Option<Bytes> {
    self.receiver.recv().await
  }

  /// Non-blocking receive, for callers polling from a select loop.
  pub fn try_recv(&mut self) -> Option<Bytes> {
    self.receiver.try_recv().ok()
  }

  /// The subscription's identity on the bus.
  pub fn id(&self) -> u64 {
    self.id
  }
}

impl EventBus {
  /// Create an empty bus.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a new subscriber with a buffer of [`SUBSCRIBER_BUFFER`]
  /// events.
  pub async fn subscribe(&self) -> Subscription {
    let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self.subscribers.write().await.insert(id, sender);
    Subscription { id, receiver }
  }

  /// Removes a subscriber and closes its channel. Idempotent for an
  /// already-removed handle.
  pub async fn unsubscribe(&self, subscription: &Subscription) {
    self.subscribers.write().await.remove(&subscription.id);
  }

  /// Delivers one exchange to every subscriber. Full buffers drop the
  /// event for that subscriber only; delivery to the others proceeds.
  pub async fn broadcast(&self, exchange: &CapturedExchange) {
    let Ok(payload) = serde_json::to_vec(exchange) else {
      return;
    };
    let payload = Bytes::from(payload);

    let subscribers = self.subscribers.read().await;
    for (id, sender) in subscribers.iter() {
      if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(payload.clone()) {
        tracing::trace!(subscriber = id, "dropping event for slow subscriber");
      }
    }
  }

  /// Number of live subscribers.
  pub async fn subscriber_count(&self) -> usize {
    self.subscribers.read().await.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes as RawBytes;
  use std::collections::HashMap as StdHashMap;
  use time::OffsetDateTime;

  fn exchange(id: &str) -> CapturedExchange {
    CapturedExchange {
      id: id.to_string(),
      timestamp: OffsetDateTime::UNIX_EPOCH,
      method: "POST".to_string(),
      url: "https://api.example.com/graphql".to_string(),
      host: "api.example.com".to_string(),
      headers: StdHashMap::new(),
      operation_name: String::new(),
      query: "{ me { id } }".to_string(),
      variables: None,
      response_code: 200,
      response_body: RawBytes::from_static(br#"{"data":{"me":{"id":"1"}}}"#),
      fingerprint: String::new(),
      project_tag: None,
    }
  }

  #[tokio::test]
  async fn delivers_to_all_subscribers_in_order() {
    let bus = EventBus::new();
    let mut a = bus.subscribe().await;
    let mut b = bus.subscribe().await;

    for i in 0..10 {
      bus.broadcast(&exchange(&format!("trf_{}", i))).await;
    }

    for i in 0..10 {
      for sub in [&mut a, &mut b] {
        let event = sub.recv().await.expect("missing event");
        let parsed: CapturedExchange = serde_json::from_slice(&event).unwrap();
        assert_eq!(parsed.id, format!("trf_{}", i));
      }
    }
  }

  #[tokio::test]
  async fn slow_subscriber_drops_but_never_blocks() {
    let bus = EventBus::new();
    let mut fast = bus.subscribe().await;
    let mut slow = bus.subscribe().await;

    // The fast subscriber drains as we go; the slow one never reads.
    let mut fast_seen = 0;
    for i in 0..200 {
      bus.broadcast(&exchange(&format!("trf_{}", i))).await;
      while let Some(event) = fast.try_recv() {
        let parsed: CapturedExchange = serde_json::from_slice(&event).unwrap();
        assert_eq!(parsed.id, format!("trf_{}", fast_seen));
        fast_seen += 1;
      }
    }
    while let Some(event) = fast.try_recv() {
      let parsed: CapturedExchange = serde_json::from_slice(&event).unwrap();
      assert_eq!(parsed.id, format!("trf_{}", fast_seen));
      fast_seen += 1;
    }
    assert_eq!(fast_seen, 200, "prompt subscriber must receive every event");

    let mut slow_seen = 0;
    while slow.try_recv().is_some() {
      slow_seen += 1;
    }
    assert!(slow_seen <= SUBSCRIBER_BUFFER, "slow subscriber kept at most one buffer");
    assert!(slow_seen > 0);
  }

  #[tokio::test]
  async fn unsubscribe_signals_end_of_stream() {
    let bus = EventBus::new();
    let mut sub = bus.subscribe().await;
    bus.broadcast(&exchange("trf_last")).await;
    bus.unsubscribe(&sub).await;
    bus.unsubscribe(&sub).await; // idempotent

    // Buffered event is still drained, then the stream ends.
    let event = sub.recv().await.expect("buffered event survives unsubscribe");
    let parsed: CapturedExchange = serde_json::from_slice(&event).unwrap();
    assert_eq!(parsed.id, "trf_last");
    assert!(sub.recv().await.is_none());
    assert_eq!(bus.subscriber_count().await, 0);
  }
}

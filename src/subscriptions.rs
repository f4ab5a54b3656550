use {
  super::*,
  serde_json::{Value, json},
};

/// A push subscription bound to one client connection. The sink is the
/// sending half of the connection's outbound channel; a send error means the
/// connection is gone.
pub struct PushSubscription {
  kind: EventKind,
  sink: mpsc::Sender<Value>,
}

impl PushSubscription {
  pub fn new(kind: EventKind, sink: mpsc::Sender<Value>) -> Self {
    Self { kind, sink }
  }

  pub fn kind(&self) -> EventKind {
    self.kind
  }
}

/// Named push subscriptions with broadcast fan-out. Each broadcast completes
/// before the next event is processed, which preserves event order per sink;
/// subscriptions whose sink fails are pruned and never tried again.
pub struct SubscriptionRegistry {
  subscriptions: tokio::sync::RwLock<HashMap<String, PushSubscription>>,
  next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl SubscriptionRegistry {
  pub fn new() -> Self {
    Self {
      subscriptions: tokio::sync::RwLock::new(HashMap::new()),
      next_id: AtomicU64::new(0),
    }
  }

  pub async fn add(&self, subscription: PushSubscription) -> String {
    let id = format!("{:#x}", self.next_id.fetch_add(1, atomic::Ordering::Relaxed));

    self
      .subscriptions
      .write()
      .await
      .insert(id.clone(), subscription);

    id
  }

  pub async fn delete(&self, id: &str) -> bool {
    self.subscriptions.write().await.remove(id).is_some()
  }

  pub async fn len(&self) -> usize {
    self.subscriptions.read().await.len()
  }

  /// Deliver `data` to every subscription of the given kind, one short-lived
  /// task per sink, and prune the sinks that failed.
  pub async fn broadcast(&self, kind: EventKind, data: &Value) {
    let tasks = {
      let subscriptions = self.subscriptions.read().await;

      subscriptions
        .iter()
        .filter(|(_, subscription)| subscription.kind == kind)
        .map(|(id, subscription)| {
          let id = id.clone();
          let sink = subscription.sink.clone();
          let frame = notification(&id, data.clone());

          tokio::spawn(async move { (id, sink.send(frame).await.is_err()) })
        })
        .collect::<Vec<_>>()
    };

    let mut failed = Vec::new();
    for task in tasks {
      if let Ok((id, errored)) = task.await
        && errored
      {
        failed.push(id);
      }
    }

    if !failed.is_empty() {
      let mut subscriptions = self.subscriptions.write().await;
      for id in failed {
        log::info!("pruning subscription {id}: sink closed");
        subscriptions.remove(&id);
      }
    }
  }
}

/// The server-initiated frame pushed for a subscription match.
fn notification(id: &str, result: Value) -> Value {
  json!({
    "jsonrpc": "2.0",
    "method": "subscription",
    "params": {
      "id": id,
      "result": result,
    },
  })
}

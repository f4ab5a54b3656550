use {
  super::*,
  derive_more::Display,
  serde_with::{DeserializeFromStr, SerializeDisplay},
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, SerializeDisplay, DeserializeFromStr,
)]
pub enum EventKind {
  #[display("newBlock")]
  NewBlock,
  #[display("newHeads")]
  NewHeads,
  #[display("newTransactions")]
  NewTransactions,
  #[display("newGasPrice")]
  NewGasPrice,
}

impl FromStr for EventKind {
  type Err = Error;

  fn from_str(input: &str) -> Result<Self> {
    match input {
      "newBlock" => Ok(Self::NewBlock),
      "newHeads" => Ok(Self::NewHeads),
      "newTransactions" => Ok(Self::NewTransactions),
      "newGasPrice" => Ok(Self::NewGasPrice),
      _ => Err(anyhow!("unknown event kind `{input}`")),
    }
  }
}

/// A freshly committed block with its tx results. Shared behind an `Arc`
/// because every subscriber receives the same payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlock {
  pub block: Block,
  pub results: Vec<TxResult>,
}

#[derive(Debug, Clone)]
pub enum Event {
  NewBlock(Arc<NewBlock>),
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::NewBlock(_) => EventKind::NewBlock,
    }
  }
}

struct BusSubscription {
  kinds: Vec<EventKind>,
  staging: Arc<Mutex<VecDeque<Event>>>,
  notify: mpsc::Sender<()>,
  done: CancellationToken,
}

/// The receiving half handed to a subscriber. Dropping it does not remove
/// the registration; call `EventBus::cancel` for that.
pub struct Subscription {
  pub id: u64,
  pub events: mpsc::Receiver<Event>,
}

/// In-process fan-out of committed blocks.
///
/// Each subscription owns an unbounded staging queue drained by a dedicated
/// delivery task into a capacity-1 output channel. `publish` only appends and
/// pokes, so a subscriber that never reads cannot block the publisher or any
/// other subscriber, while per-subscription delivery order always equals
/// publish order.
pub struct EventBus {
  subscriptions: RwLock<HashMap<u64, BusSubscription>>,
  next_id: AtomicU64,
  done: CancellationToken,
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

impl EventBus {
  pub fn new() -> Self {
    Self {
      subscriptions: RwLock::new(HashMap::new()),
      next_id: AtomicU64::new(0),
      done: CancellationToken::new(),
    }
  }

  pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
    let id = self.next_id.fetch_add(1, atomic::Ordering::Relaxed);

    let staging = Arc::new(Mutex::new(VecDeque::new()));
    let (notify, mut poked) = mpsc::channel::<()>(1);
    let (output, events) = mpsc::channel::<Event>(1);
    let done = self.done.child_token();

    {
      let staging = staging.clone();
      let done = done.clone();
      tokio::spawn(async move {
        loop {
          tokio::select! {
            _ = done.cancelled() => break,
            poke = poked.recv() => if poke.is_none() {
              break;
            },
          }

          loop {
            let event = staging.lock().unwrap().pop_front();
            let Some(event) = event else {
              break;
            };

            tokio::select! {
              _ = done.cancelled() => return,
              sent = output.send(event) => if sent.is_err() {
                return;
              },
            }
          }
        }
      });
    }

    self.subscriptions.write().unwrap().insert(
      id,
      BusSubscription {
        kinds: kinds.to_vec(),
        staging,
        notify,
        done,
      },
    );

    Subscription { id, events }
  }

  pub fn publish(&self, event: &Event) {
    let subscriptions = self.subscriptions.read().unwrap();

    for subscription in subscriptions.values() {
      if !subscription.kinds.contains(&event.kind()) {
        continue;
      }

      subscription
        .staging
        .lock()
        .unwrap()
        .push_back(event.clone());

      // drop the poke if one is already pending; the task re-drains anyway
      let _ = subscription.notify.try_send(());
    }
  }

  /// Remove a subscription. Its output channel closes and the subscriber
  /// observes end-of-stream.
  pub fn cancel(&self, id: u64) -> bool {
    match self.subscriptions.write().unwrap().remove(&id) {
      Some(subscription) => {
        subscription.done.cancel();
        true
      }
      None => false,
    }
  }

  pub fn close(&self) {
    self.subscriptions.write().unwrap().clear();
    self.done.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn new_block(height: u64) -> Event {
    Event::NewBlock(Arc::new(NewBlock {
      block: Block {
        header: BlockHeader {
          height,
          ..Default::default()
        },
        txs: Vec::new(),
      },
      results: Vec::new(),
    }))
  }

  fn height(event: &Event) -> u64 {
    match event {
      Event::NewBlock(inner) => inner.block.height(),
    }
  }

  async fn recv(subscription: &mut Subscription) -> Option<Event> {
    tokio::time::timeout(Duration::from_secs(5), subscription.events.recv())
      .await
      .expect("timed out waiting for event")
  }

  #[tokio::test]
  async fn delivery_preserves_publish_order() {
    let bus = EventBus::new();
    let mut subscription = bus.subscribe(&[EventKind::NewBlock]);

    for h in 1..=50 {
      bus.publish(&new_block(h));
    }

    for h in 1..=50 {
      assert_eq!(height(&recv(&mut subscription).await.unwrap()), h);
    }
  }

  #[tokio::test]
  async fn kinds_filter_events() {
    let bus = EventBus::new();
    let mut subscription = bus.subscribe(&[EventKind::NewHeads]);

    bus.publish(&new_block(1));

    assert!(
      tokio::time::timeout(Duration::from_millis(100), subscription.events.recv())
        .await
        .is_err()
    );
  }

  #[tokio::test]
  async fn a_slow_subscriber_does_not_block_the_others() {
    let bus = EventBus::new();
    let _slow = bus.subscribe(&[EventKind::NewBlock]);
    let mut healthy = bus.subscribe(&[EventKind::NewBlock]);

    for h in 1..=20 {
      bus.publish(&new_block(h));
    }

    for h in 1..=20 {
      assert_eq!(height(&recv(&mut healthy).await.unwrap()), h);
    }
  }

  #[tokio::test]
  async fn cancel_closes_the_output() {
    let bus = EventBus::new();
    let mut subscription = bus.subscribe(&[EventKind::NewBlock]);

    bus.publish(&new_block(1));
    assert_eq!(height(&recv(&mut subscription).await.unwrap()), 1);

    assert!(bus.cancel(subscription.id));
    assert!(!bus.cancel(subscription.id));

    bus.publish(&new_block(2));
    assert!(recv(&mut subscription).await.is_none());
  }

  #[tokio::test]
  async fn close_cancels_every_subscription() {
    let bus = EventBus::new();
    let mut a = bus.subscribe(&[EventKind::NewBlock]);
    let mut b = bus.subscribe(&[EventKind::NewBlock]);

    bus.close();

    assert!(recv(&mut a).await.is_none());
    assert!(recv(&mut b).await.is_none());
  }
}

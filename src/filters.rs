use super::*;

/// Bounds a tx filter matches against. All bounds are inclusive; absent
/// bounds match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterOptions {
  pub min_height: Option<u64>,
  pub max_height: Option<u64>,
  pub min_index: Option<u32>,
  pub max_index: Option<u32>,
  pub min_gas_used: Option<u64>,
  pub max_gas_used: Option<u64>,
  pub min_gas_wanted: Option<u64>,
  pub max_gas_wanted: Option<u64>,
}

/// Ascending rank of selectivity; conditions run highest-rank first so the
/// cheapest-to-prove-false check gets the earliest chance to short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
  Height,
  Index,
  GasUsed,
  GasWanted,
}

struct Condition {
  priority: Priority,
  predicate: Box<dyn Fn(&TxResult) -> bool + Send + Sync>,
}

#[derive(Default)]
pub struct BlockFilter {
  headers: Vec<BlockHeader>,
}

pub struct TxFilter {
  conditions: Vec<Condition>,
  matches: Vec<TxResult>,
}

impl TxFilter {
  fn new(options: FilterOptions) -> Self {
    let mut filter = Self {
      conditions: Vec::new(),
      matches: Vec::new(),
    };

    if options.min_height.is_some() || options.max_height.is_some() {
      let (min, max) = (options.min_height, options.max_height);
      filter.add_condition(Priority::Height, move |tx: &TxResult| {
        min.is_none_or(|min| tx.height >= min) && max.is_none_or(|max| tx.height <= max)
      });
    }

    if options.min_index.is_some() || options.max_index.is_some() {
      let (min, max) = (options.min_index, options.max_index);
      filter.add_condition(Priority::Index, move |tx: &TxResult| {
        min.is_none_or(|min| tx.index >= min) && max.is_none_or(|max| tx.index <= max)
      });
    }

    if options.min_gas_used.is_some() || options.max_gas_used.is_some() {
      let (min, max) = (options.min_gas_used, options.max_gas_used);
      filter.add_condition(Priority::GasUsed, move |tx: &TxResult| {
        min.is_none_or(|min| tx.response.gas_used >= min)
          && max.is_none_or(|max| tx.response.gas_used <= max)
      });
    }

    if options.min_gas_wanted.is_some() || options.max_gas_wanted.is_some() {
      let (min, max) = (options.min_gas_wanted, options.max_gas_wanted);
      filter.add_condition(Priority::GasWanted, move |tx: &TxResult| {
        min.is_none_or(|min| tx.response.gas_wanted >= min)
          && max.is_none_or(|max| tx.response.gas_wanted <= max)
      });
    }

    filter
  }

  fn add_condition(
    &mut self,
    priority: Priority,
    predicate: impl Fn(&TxResult) -> bool + Send + Sync + 'static,
  ) {
    let position = self
      .conditions
      .iter()
      .position(|condition| condition.priority > priority)
      .unwrap_or(self.conditions.len());

    self.conditions.insert(
      position,
      Condition {
        priority,
        predicate: Box::new(predicate),
      },
    );
  }

  /// Conjunction over the condition chain; a filter with no conditions
  /// accepts every tx.
  fn matches(&self, tx: &TxResult) -> bool {
    self.conditions.iter().all(|condition| (condition.predicate)(tx))
  }
}

pub enum Filter {
  Block(BlockFilter),
  Tx(TxFilter),
}

impl Filter {
  pub fn update_with_block(&mut self, block: &Block) {
    match self {
      Self::Block(filter) => filter.headers.push(block.header.clone()),
      Self::Tx(_) => {}
    }
  }

  pub fn update_with_tx(&mut self, tx: &TxResult) {
    match self {
      Self::Block(_) => {}
      Self::Tx(filter) => {
        if filter.matches(tx) {
          filter.matches.push(tx.clone());
        }
      }
    }
  }

  /// Hand out everything accumulated since the last drain and reset the
  /// buffer.
  pub fn get_changes(&mut self) -> FilterChanges {
    match self {
      Self::Block(filter) => FilterChanges::Blocks(mem::take(&mut filter.headers)),
      Self::Tx(filter) => FilterChanges::Txs(mem::take(&mut filter.matches)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterChanges {
  Blocks(Vec<BlockHeader>),
  Txs(Vec<TxResult>),
}

impl FilterChanges {
  pub fn len(&self) -> usize {
    match self {
      Self::Blocks(headers) => headers.len(),
      Self::Txs(txs) => txs.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

struct FilterEntry {
  filter: Mutex<Filter>,
  last_used: Mutex<Instant>,
}

/// Named polling filters. Event delivery takes the registry read lock and
/// each entry's own mutex, so installs and uninstalls never contend with the
/// hot path for long.
pub struct FilterRegistry {
  filters: RwLock<HashMap<String, Arc<FilterEntry>>>,
  next_id: AtomicU64,
}

impl Default for FilterRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl FilterRegistry {
  pub fn new() -> Self {
    Self {
      filters: RwLock::new(HashMap::new()),
      next_id: AtomicU64::new(0),
    }
  }

  pub fn new_block_filter(&self) -> String {
    self.install(Filter::Block(BlockFilter::default()))
  }

  pub fn new_tx_filter(&self, options: FilterOptions) -> String {
    self.install(Filter::Tx(TxFilter::new(options)))
  }

  /// Drain a filter's buffer, refreshing its idle clock. `None` for an
  /// unknown id.
  pub fn get_changes(&self, id: &str) -> Option<FilterChanges> {
    let entry = self.filters.read().unwrap().get(id).cloned()?;

    *entry.last_used.lock().unwrap() = Instant::now();

    Some(entry.filter.lock().unwrap().get_changes())
  }

  pub fn uninstall(&self, id: &str) -> bool {
    self.filters.write().unwrap().remove(id).is_some()
  }

  pub fn range_apply(&self, mut f: impl FnMut(&mut Filter)) {
    let entries = self
      .filters
      .read()
      .unwrap()
      .values()
      .cloned()
      .collect::<Vec<Arc<FilterEntry>>>();

    for entry in entries {
      f(&mut entry.filter.lock().unwrap());
    }
  }

  /// Feed a committed block and its tx results to every live filter.
  pub fn update(&self, new_block: &NewBlock) {
    self.range_apply(|filter| {
      filter.update_with_block(&new_block.block);
      for tx in &new_block.results {
        filter.update_with_tx(tx);
      }
    });
  }

  /// Remove filters idle for longer than `threshold`. Returns how many went.
  pub fn cleanup(&self, threshold: Duration) -> usize {
    let mut filters = self.filters.write().unwrap();
    let before = filters.len();

    filters.retain(|_, entry| entry.last_used.lock().unwrap().elapsed() < threshold);

    before - filters.len()
  }

  pub fn len(&self) -> usize {
    self.filters.read().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn install(&self, filter: Filter) -> String {
    let id = format!("{:#x}", self.next_id.fetch_add(1, atomic::Ordering::Relaxed));

    self.filters.write().unwrap().insert(
      id.clone(),
      Arc::new(FilterEntry {
        filter: Mutex::new(filter),
        last_used: Mutex::new(Instant::now()),
      }),
    );

    id
  }
}

/// Periodically evict idle filters until cancelled.
pub async fn cleanup_task(
  registry: Arc<FilterRegistry>,
  threshold: Duration,
  cancel: CancellationToken,
) {
  let mut ticker = tokio::time::interval(threshold);
  ticker.tick().await;

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = ticker.tick() => {
        let removed = registry.cleanup(threshold);
        if removed > 0 {
          log::debug!("evicted {removed} idle filters");
        }
      }
    }
  }
}

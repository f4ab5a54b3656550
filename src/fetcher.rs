use {
  super::*,
  indicatif::{ProgressBar, ProgressStyle},
  tokio::task::JoinHandle,
};

struct WorkerInfo {
  range: ChunkRange,
  sink: mpsc::Sender<WorkerReport>,
}

struct WorkerReport {
  range: ChunkRange,
  chunk: Chunk,
  error: Option<FetchError>,
}

#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
  /// Upper bound on concurrently reserved chunks, one worker each.
  pub max_slots: usize,
  /// Upper bound on heights per chunk.
  pub max_chunk_size: u64,
  /// How long to sleep when storage has caught up with the chain tip.
  pub query_interval: Duration,
  /// First height of the chain; fetching starts here on an empty store.
  pub origin: u64,
}

impl Default for FetcherConfig {
  fn default() -> Self {
    Self {
      max_slots: 16,
      max_chunk_size: 100,
      query_interval: Duration::from_secs(1),
      origin: 1,
    }
  }
}

/// Drives catch-up: discovers the gap between storage and the chain tip,
/// reserves it as chunks, fetches them concurrently, and commits strictly in
/// ascending order, publishing one `NewBlock` per committed block.
///
/// Workers may complete in any order; because commits only ever happen at the
/// front of the `from`-ordered slot set, neither storage nor the event bus
/// observes heights out of order.
pub struct Fetcher<C: Client> {
  client: Arc<C>,
  storage: Arc<Storage>,
  events: Arc<EventBus>,
  config: FetcherConfig,
}

impl<C: Client> Fetcher<C> {
  pub fn new(
    client: Arc<C>,
    storage: Arc<Storage>,
    events: Arc<EventBus>,
    config: FetcherConfig,
  ) -> Self {
    Self {
      client,
      storage,
      events,
      config,
    }
  }

  pub async fn run(self, cancel: CancellationToken) -> Result {
    let mut next = match self.storage.latest_height() {
      Ok(height) => height + 1,
      Err(StorageError::NotFound) => self.config.origin,
      Err(err) => return Err(err.into()),
    };

    let (sink, mut completions) = mpsc::channel::<WorkerReport>(self.config.max_slots);

    let mut slots = SlotSet::default();
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut worker_cancel = cancel.child_token();
    let mut tip_errors = 0u32;
    let mut fetch_errors = 0u32;
    let mut progress_bar: Option<ProgressBar> = None;

    let result = 'driving: loop {
      if cancel.is_cancelled() {
        break 'driving Ok(());
      }

      let tip = match self.client.latest_block_height().await {
        Ok(tip) => {
          tip_errors = 0;
          tip
        }
        Err(err) => {
          tip_errors += 1;
          let seconds = 1u64 << tip_errors.min(6);
          log::warn!("failed to fetch chain tip, retrying in {seconds}s: {err}");
          tokio::select! {
            _ = cancel.cancelled() => break 'driving Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
          }
          continue;
        }
      };

      if next > tip && slots.is_empty() {
        if let Some(bar) = progress_bar.take() {
          bar.finish_and_clear();
        }
        tokio::select! {
          _ = cancel.cancelled() => break 'driving Ok(()),
          _ = tokio::time::sleep(self.config.query_interval) => {}
        }
        continue;
      }

      if progress_bar.is_none()
        && !cfg!(test)
        && !log::log_enabled!(log::Level::Info)
        && tip > next
      {
        let bar = ProgressBar::new(tip);
        bar.set_position(next.saturating_sub(1));
        bar.set_style(
          ProgressStyle::with_template("[indexing blocks] {wide_bar} {pos}/{len}").unwrap(),
        );
        progress_bar = Some(bar);
      }

      if let Some(bar) = &progress_bar
        && bar.length() < Some(tip)
      {
        bar.set_length(tip);
      }

      if next <= tip {
        for range in slots.reserve(next, tip, self.config.max_chunk_size, self.config.max_slots) {
          log::debug!("reserved chunk {range}");
          workers.push(Self::spawn_worker(
            self.client.clone(),
            WorkerInfo {
              range,
              sink: sink.clone(),
            },
            worker_cancel.clone(),
          ));
        }
      }

      workers.retain(|worker| !worker.is_finished());

      let report = tokio::select! {
        _ = cancel.cancelled() => break 'driving Ok(()),
        report = completions.recv() => {
          report.expect("the coordinator holds a sender, so the channel cannot close")
        }
      };

      let Some(index) = slots.index_of(report.range) else {
        // report from before a flush; its range is no longer reserved
        continue;
      };

      if let Some(error) = report.error {
        if error.is_fatal() {
          break 'driving Err(
            anyhow!(error).context(format!("fetching chunk {} failed", report.range)),
          );
        }

        log::warn!(
          "chunk {} failed, refetching from height {next}: {error}",
          report.range
        );

        worker_cancel.cancel();
        for worker in workers.drain(..) {
          worker.await.ok();
        }
        while completions.try_recv().is_ok() {}
        slots.clear();
        worker_cancel = cancel.child_token();

        let delay = match error {
          FetchError::MissingHeight { .. } => self.config.query_interval,
          _ => {
            fetch_errors += 1;
            Duration::from_secs(1u64 << fetch_errors.min(6))
          }
        };

        tokio::select! {
          _ = cancel.cancelled() => break 'driving Ok(()),
          _ = tokio::time::sleep(delay) => {}
        }
        continue;
      }

      slots.set_chunk(index, report.chunk);
      fetch_errors = 0;

      while slots.front_ready() {
        let slot = slots.pop_front().unwrap();
        let chunk = slot.chunk.unwrap();

        if let Err(err) = self.commit(slot.range, &chunk) {
          break 'driving Err(err);
        }

        next = slot.range.to + 1;

        if let Some(bar) = &progress_bar {
          bar.set_position(slot.range.to);
        }

        for (block, results) in chunk.blocks {
          self
            .events
            .publish(&Event::NewBlock(Arc::new(NewBlock { block, results })));
        }
      }
    };

    if let Some(bar) = progress_bar.take() {
      bar.finish_and_clear();
    }

    worker_cancel.cancel();
    for worker in workers.drain(..) {
      worker.await.ok();
    }
    while completions.try_recv().is_ok() {}

    result
  }

  /// Write every block and tx result of the chunk, plus the new latest
  /// height, in one durable batch.
  fn commit(&self, range: ChunkRange, chunk: &Chunk) -> Result {
    let mut batch = self.storage.write_batch()?;

    for (block, results) in &chunk.blocks {
      batch.set_block(block)?;
      for tx in results {
        batch.set_tx(tx)?;
      }
    }

    batch.set_latest_height(range.to)?;
    batch.commit()?;

    log::info!("committed blocks {range}");

    Ok(())
  }

  fn spawn_worker(client: Arc<C>, info: WorkerInfo, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
      tokio::select! {
        // on cancellation the in-flight report is dropped
        _ = cancel.cancelled() => {}
        report = Self::fetch_chunk(client, info.range) => {
          info.sink.send(report).await.ok();
        }
      }
    })
  }

  async fn fetch_chunk(client: Arc<C>, range: ChunkRange) -> WorkerReport {
    match Self::try_fetch_chunk(client, range).await {
      Ok(chunk) => WorkerReport {
        range,
        chunk,
        error: None,
      },
      Err((partial, error)) => WorkerReport {
        range,
        chunk: partial,
        error: Some(error),
      },
    }
  }

  /// Fetch every block of the range in one round trip, then the results of
  /// every non-empty block in a second. On failure the work done so far
  /// comes back alongside the error.
  async fn try_fetch_chunk(
    client: Arc<C>,
    range: ChunkRange,
  ) -> Result<Chunk, (Chunk, FetchError)> {
    let mut chunk = Chunk::default();

    let mut batch = client.new_batch();
    for height in range.from..=range.to {
      batch.add_block(height);
    }

    let blocks = match batch.execute().await {
      Ok(results) => results
        .into_iter()
        .filter_map(BatchResult::into_block)
        .collect::<Vec<Block>>(),
      Err(error) => return Err((chunk, error)),
    };

    if blocks.len() as u64 != range.len() {
      return Err((
        chunk,
        FetchError::Invariant {
          message: format!("requested {} blocks, received {}", range.len(), blocks.len()),
        },
      ));
    }

    let mut batch = client.new_batch();
    for block in &blocks {
      if !block.txs.is_empty() {
        batch.add_block_results(block.height());
      }
    }

    let results = if batch.is_empty() {
      Vec::new()
    } else {
      match batch.execute().await {
        Ok(results) => results,
        Err(error) => {
          for block in blocks {
            if !block.txs.is_empty() {
              break;
            }
            chunk.blocks.push((block, Vec::new()));
          }
          return Err((chunk, error));
        }
      }
    };

    let mut results = results.into_iter().filter_map(BatchResult::into_block_results);

    for block in blocks {
      let block_results = if block.txs.is_empty() {
        Vec::new()
      } else {
        match results.next() {
          Some(results) => results,
          None => {
            return Err((
              chunk,
              FetchError::Invariant {
                message: format!("no results for non-empty block {}", block.height()),
              },
            ));
          }
        }
      };

      if block_results.len() != block.txs.len() {
        return Err((
          chunk,
          FetchError::Invariant {
            message: format!(
              "block {} has {} txs but {} results",
              block.height(),
              block.txs.len(),
              block_results.len()
            ),
          },
        ));
      }

      chunk.blocks.push((block, block_results));
    }

    Ok(chunk)
  }
}

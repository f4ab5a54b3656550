use {super::*, pretty_assertions::assert_eq as pretty_assert_eq};

#[tokio::test]
async fn cold_start_indexes_the_whole_chain() {
  let mut indexer = TestIndexer::new(MockClient::new(3, 5));
  let mut subscription = indexer.events.subscribe(&[EventKind::NewBlock]);
  indexer.start(test_config());

  indexer.wait_for_height(3).await;

  assert_eq!(indexer.storage.latest_height().unwrap(), 3);
  pretty_assert_eq!(indexer.storage.tx(2, 3).unwrap(), tx_result(2, 3));

  for expected in 1..=3 {
    assert_eq!(next_height(&mut subscription).await, Some(expected));
  }

  // every height is fully persisted, point lookups and hash lookups agree
  for height in 1..=3 {
    let stored = indexer.storage.block(height).unwrap();
    pretty_assert_eq!(stored, block(height, 5));
    for index in 0..stored.header.num_txs {
      let tx = indexer.storage.tx(height, index).unwrap();
      let by_hash = indexer.storage.tx_by_hash(tx.hash()).unwrap();
      assert_eq!((by_hash.height, by_hash.index), (height, index));
    }
  }

  indexer.shutdown().await;
}

#[tokio::test]
async fn resume_fetches_only_the_gap() {
  let dir = TempDir::new().unwrap();
  let storage = Arc::new(Storage::open(&dir.path().into()).unwrap());

  let mut batch = storage.write_batch().unwrap();
  for height in 1..=10 {
    batch.set_block(&block(height, 0)).unwrap();
  }
  batch.set_latest_height(10).unwrap();
  batch.commit().unwrap();

  let config = FetcherConfig {
    max_chunk_size: 1,
    ..test_config()
  };

  let mut indexer = TestIndexer::with_storage(MockClient::new(15, 0), dir, storage);
  let mut subscription = indexer.events.subscribe(&[EventKind::NewBlock]);
  indexer.start(config);

  indexer.wait_for_height(15).await;

  // exactly the five missing heights were fetched, and nothing below 11
  assert_eq!(indexer.client.fetched_heights(), vec![11, 12, 13, 14, 15]);

  for expected in 11..=15 {
    assert_eq!(next_height(&mut subscription).await, Some(expected));
  }

  indexer.shutdown().await;
}

#[tokio::test]
async fn out_of_order_completions_commit_in_ascending_order() {
  let client = MockClient::new(4, 1);
  client.delay(1, Duration::from_millis(80));
  client.delay(2, Duration::from_millis(20));
  client.delay(3, Duration::from_millis(60));
  client.delay(4, Duration::from_millis(40));

  let config = FetcherConfig {
    max_slots: 4,
    max_chunk_size: 1,
    ..test_config()
  };

  let mut indexer = TestIndexer::new(client);
  let mut subscription = indexer.events.subscribe(&[EventKind::NewBlock]);
  indexer.start(config);

  indexer.wait_for_height(4).await;

  // workers finished 2, 4, 3, 1; subscribers still observe 1, 2, 3, 4
  for expected in 1..=4 {
    assert_eq!(next_height(&mut subscription).await, Some(expected));
  }

  indexer.shutdown().await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_the_chunk_lands() {
  let client = MockClient::new(3, 1);
  client.fail_block(2, 1);

  let config = FetcherConfig {
    max_chunk_size: 1,
    ..test_config()
  };

  let mut indexer = TestIndexer::new(client);
  indexer.start(config);

  indexer.wait_for_height(3).await;

  pretty_assert_eq!(indexer.storage.block(2).unwrap(), block(2, 1));
  pretty_assert_eq!(indexer.storage.tx(2, 0).unwrap(), tx_result(2, 0));

  indexer.shutdown().await;
}

#[tokio::test]
async fn empty_blocks_skip_the_results_fetch() {
  let mut indexer = TestIndexer::new(MockClient::new(3, 0));
  indexer.start(test_config());

  indexer.wait_for_height(3).await;

  assert_eq!(indexer.storage.block(2).unwrap().txs.len(), 0);
  assert!(indexer.storage.tx(2, 0).unwrap_err().is_not_found());

  indexer.shutdown().await;
}

#[tokio::test]
async fn the_indexer_follows_a_growing_chain() {
  let mut indexer = TestIndexer::new(MockClient::new(2, 1));
  indexer.start(test_config());

  indexer.wait_for_height(2).await;

  {
    let mut blocks = indexer.client.blocks.lock().unwrap();
    blocks.insert(3, (block(3, 1), vec![tx_result(3, 0)]));
    blocks.insert(4, (block(4, 1), vec![tx_result(4, 0)]));
  }
  indexer.client.tip.store(4, Ordering::Relaxed);

  indexer.wait_for_height(4).await;

  assert_eq!(indexer.storage.latest_height().unwrap(), 4);

  indexer.shutdown().await;
}

use {super::*, retriever::server, serde_json::json};

/// Drives the full polling path: events flow from the bus through the pump
/// into the registry, and clients drain them over JSON-RPC.
#[tokio::test]
async fn filters_accumulate_between_polls_and_drain_on_read() {
  let mut indexer = TestIndexer::new(MockClient::new(0, 0));

  let filters = Arc::new(FilterRegistry::new());
  let subscriptions = Arc::new(SubscriptionRegistry::new());

  let pump = tokio::spawn(server::run_event_pump(
    indexer.events.subscribe(&[EventKind::NewBlock]),
    filters.clone(),
    subscriptions.clone(),
    indexer.cancel.clone(),
  ));

  indexer.start(test_config());

  let server = Arc::new(server::Server {
    storage: indexer.storage.clone(),
    filters: filters.clone(),
    subscriptions,
  });

  let call = |method: &str, params: serde_json::Value| {
    let server = server.clone();
    let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    async move { server.handle_payload(&payload.to_string(), None).await }
  };

  let id = call("newBlockFilter", json!({})).await["result"]
    .as_str()
    .unwrap()
    .to_owned();

  // a filter polled before any block arrives drains to nothing
  assert_eq!(
    call("getFilterChanges", json!({ "id": id })).await["result"],
    json!([]),
  );

  {
    let mut blocks = indexer.client.blocks.lock().unwrap();
    for height in 1..=3 {
      blocks.insert(height, (block(height, 0), Vec::new()));
    }
  }
  indexer.client.tip.store(3, Ordering::Relaxed);
  indexer.wait_for_height(3).await;

  let mut drained = Vec::new();
  let start = Instant::now();
  while drained.len() < 3 {
    assert!(start.elapsed() < Duration::from_secs(5), "filter never filled");
    let changes = call("getFilterChanges", json!({ "id": id })).await;
    for header in changes["result"].as_array().unwrap() {
      drained.push(header["height"].as_u64().unwrap());
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  assert_eq!(drained, vec![1, 2, 3]);

  // the drain reset the buffer
  assert_eq!(
    call("getFilterChanges", json!({ "id": id })).await["result"],
    json!([]),
  );

  {
    let mut blocks = indexer.client.blocks.lock().unwrap();
    for height in 4..=5 {
      blocks.insert(height, (block(height, 0), Vec::new()));
    }
  }
  indexer.client.tip.store(5, Ordering::Relaxed);
  indexer.wait_for_height(5).await;

  let mut drained = Vec::new();
  let start = Instant::now();
  while drained.len() < 2 {
    assert!(start.elapsed() < Duration::from_secs(5), "filter never refilled");
    let changes = call("getFilterChanges", json!({ "id": id })).await;
    for header in changes["result"].as_array().unwrap() {
      drained.push(header["height"].as_u64().unwrap());
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  assert_eq!(drained, vec![4, 5]);

  indexer.shutdown().await;
  pump.await.unwrap();
}

#[tokio::test]
async fn tx_filters_only_accumulate_matching_results() {
  let mut indexer = TestIndexer::new(MockClient::new(2, 3));

  let filters = Arc::new(FilterRegistry::new());
  let subscriptions = Arc::new(SubscriptionRegistry::new());

  let id = filters.new_tx_filter(retriever::FilterOptions {
    min_index: Some(1),
    ..Default::default()
  });

  let pump = tokio::spawn(server::run_event_pump(
    indexer.events.subscribe(&[EventKind::NewBlock]),
    filters.clone(),
    subscriptions,
    indexer.cancel.clone(),
  ));

  indexer.start(test_config());

  indexer.wait_for_height(2).await;

  let mut matched = Vec::new();
  let start = Instant::now();
  while matched.len() < 4 {
    assert!(start.elapsed() < Duration::from_secs(5), "filter never filled");
    if let Some(retriever::FilterChanges::Txs(txs)) = filters.get_changes(&id) {
      matched.extend(txs.into_iter().map(|tx| (tx.height, tx.index)));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  // index 0 of both blocks was filtered out
  assert_eq!(matched, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);

  indexer.shutdown().await;
  pump.await.unwrap();
}

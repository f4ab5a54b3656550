use {super::*, retriever::server, serde_json::{Value, json}};

async fn spawn_server(indexer: &TestIndexer) -> String {
  let server = Arc::new(server::Server {
    storage: indexer.storage.clone(),
    filters: Arc::new(FilterRegistry::new()),
    subscriptions: Arc::new(SubscriptionRegistry::new()),
  });

  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();

  tokio::spawn(async move {
    axum::serve(listener, server.router()).await.unwrap();
  });

  format!("http://{address}")
}

async fn rpc(url: &str, method: &str, params: Value) -> Value {
  reqwest::Client::new()
    .post(url)
    .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap()
}

#[tokio::test]
async fn the_indexed_chain_is_served_over_http() {
  let mut indexer = TestIndexer::new(MockClient::new(3, 2));
  indexer.start(test_config());
  indexer.wait_for_height(3).await;

  let url = spawn_server(&indexer).await;

  let response = rpc(&url, "getLatestHeight", json!({})).await;
  assert_eq!(response["result"], 3);

  let response = rpc(&url, "getBlock", json!({ "height": 2 })).await;
  assert_eq!(response["result"]["header"]["height"], 2);
  assert_eq!(response["result"]["header"]["num_txs"], 2);
  assert_eq!(response["result"]["header"]["chain_id"], "dev");

  let response = rpc(&url, "getTxResult", json!({ "height": 2, "index": 1 })).await;
  assert_eq!(response["result"]["gas_used"], 60_001);
  let hash = response["result"]["hash"].as_str().unwrap().to_owned();

  let response = rpc(&url, "getTxResultByHash", json!({ "hash": hash })).await;
  assert_eq!(response["result"]["height"], 2);
  assert_eq!(response["result"]["index"], 1);

  let response = rpc(&url, "getBlock", json!({ "height": 42 })).await;
  assert_eq!(response["result"], Value::Null);

  let response = rpc(&url, "getGasPrice", json!({})).await;
  assert_eq!(response["result"][0]["denom"], "ugnot");

  indexer.shutdown().await;
}

#[tokio::test]
async fn malformed_requests_get_structured_errors() {
  let mut indexer = TestIndexer::new(MockClient::new(0, 0));
  indexer.start(test_config());
  let url = spawn_server(&indexer).await;

  let response = reqwest::Client::new()
    .post(&url)
    .body("this is not json")
    .send()
    .await
    .unwrap()
    .json::<Value>()
    .await
    .unwrap();
  assert_eq!(response["error"]["code"], -32700);

  let response = rpc(&url, "noSuchMethod", json!({})).await;
  assert_eq!(response["error"]["code"], -32601);

  let response = rpc(&url, "getBlock", json!({ "height": -5 })).await;
  assert_eq!(response["error"]["code"], -32602);

  indexer.shutdown().await;
}

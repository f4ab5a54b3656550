use {
  super::*,
  axum::{
    Json, Router,
    extract::{
      State, WebSocketUpgrade,
      ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::{get, post},
  },
  futures::{SinkExt, StreamExt},
  serde::de::DeserializeOwned,
  serde_json::Value,
  tokio_stream::wrappers::ReceiverStream,
  tower_http::cors::CorsLayer,
};

/// Hard cap on rows a single range query may touch.
const MAX_QUERY_ROWS: usize = 10_000;

/// Per-connection outbound buffer; responses and subscription notifications
/// share it, so a single writer keeps frame order.
const OUTBOUND_BUFFER: usize = 64;

type MethodResult = Result<Value, (i64, String)>;

/// State a live WebSocket connection carries: its outbound sink and the push
/// subscriptions it installed, which die with it.
pub struct Connection {
  sink: mpsc::Sender<Value>,
  subscription_ids: Vec<String>,
}

/// The JSON-RPC transport adapter: one HTTP endpoint for request/response
/// calls and one WebSocket endpoint that additionally carries subscriptions.
pub struct Server {
  pub storage: Arc<Storage>,
  pub filters: Arc<FilterRegistry>,
  pub subscriptions: Arc<SubscriptionRegistry>,
}

impl Server {
  pub fn router(self: &Arc<Self>) -> Router {
    Router::new()
      .route("/", post(handle_http))
      .route("/ws", get(handle_ws))
      .layer(CorsLayer::permissive())
      .with_state(self.clone())
  }

  pub async fn serve(self: Arc<Self>, address: SocketAddr, cancel: CancellationToken) -> Result {
    let handle = axum_server::Handle::new();

    {
      let handle = handle.clone();
      tokio::spawn(async move {
        cancel.cancelled().await;
        handle.graceful_shutdown(Some(Duration::from_secs(5)));
      });
    }

    log::info!("listening on {address}");

    axum_server::bind(address)
      .handle(handle)
      .serve(self.router().into_make_service())
      .await?;

    Ok(())
  }

  /// Handle a raw JSON-RPC payload: a single request or a batch array.
  pub async fn handle_payload(&self, payload: &str, mut connection: Option<&mut Connection>) -> Value {
    let payload = match serde_json::from_str::<Value>(payload) {
      Ok(payload) => payload,
      Err(err) => {
        return serde_json::to_value(api::Response::error(
          Value::Null,
          api::PARSE_ERROR,
          format!("parse error: {err}"),
        ))
        .unwrap();
      }
    };

    match payload {
      Value::Array(requests) => {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
          responses.push(self.handle_request(request, connection.as_deref_mut()).await);
        }
        Value::Array(responses)
      }
      request => self.handle_request(request, connection).await,
    }
  }

  async fn handle_request(&self, request: Value, connection: Option<&mut Connection>) -> Value {
    let request = match serde_json::from_value::<api::Request>(request) {
      Ok(request) => request,
      Err(err) => {
        return serde_json::to_value(api::Response::error(
          Value::Null,
          api::INVALID_REQUEST,
          format!("invalid request: {err}"),
        ))
        .unwrap();
      }
    };

    let id = request.id.unwrap_or(Value::Null);

    let response = match self
      .dispatch(&request.method, request.params, connection)
      .await
    {
      Ok(result) => api::Response::result(id, result),
      Err((code, message)) => api::Response::error(id, code, message),
    };

    serde_json::to_value(response).unwrap()
  }

  async fn dispatch(
    &self,
    method: &str,
    params: Value,
    connection: Option<&mut Connection>,
  ) -> MethodResult {
    match method {
      "getLatestHeight" => maybe(self.storage.latest_height()),
      "getBlock" => {
        let HeightParams { height } = parse(params)?;
        maybe(self.storage.block(height).map(|block| api::Block::from(&block)))
      }
      "getTxResult" => {
        let TxParams { height, index } = parse(params)?;
        maybe(
          self
            .storage
            .tx(height, index)
            .map(|tx| api::TxResult::from(&tx)),
        )
      }
      "getTxResultByHash" => {
        let HashParams { hash } = parse(params)?;
        let hash = decode_hash(&hash)?;
        maybe(
          self
            .storage
            .tx_by_hash(hash)
            .map(|tx| api::TxResult::from(&tx)),
        )
      }
      "getGasPrice" => {
        let GasParams {
          from_height,
          to_height,
        } = parse(params)?;
        self.gas_price(from_height, to_height)
      }
      "newBlockFilter" => Ok(Value::from(self.filters.new_block_filter())),
      "newTxFilter" => {
        let options = parse::<FilterOptions>(params)?;
        Ok(Value::from(self.filters.new_tx_filter(options)))
      }
      "getFilterChanges" => {
        let IdParams { id } = parse(params)?;
        self
          .filters
          .get_changes(&id)
          .map(Value::from)
          .ok_or_else(|| (api::INVALID_PARAMS, format!("no filter with id {id}")))
      }
      "uninstallFilter" => {
        let IdParams { id } = parse(params)?;
        Ok(Value::from(self.filters.uninstall(&id)))
      }
      "subscribe" => {
        let connection = connection.ok_or_else(subscriptions_need_a_socket)?;
        let KindParams { kind } = parse(params)?;

        let id = self
          .subscriptions
          .add(PushSubscription::new(kind, connection.sink.clone()))
          .await;
        connection.subscription_ids.push(id.clone());

        Ok(Value::from(id))
      }
      "unsubscribe" => {
        let connection = connection.ok_or_else(subscriptions_need_a_socket)?;
        let IdParams { id } = parse(params)?;

        connection.subscription_ids.retain(|existing| *existing != id);

        Ok(Value::from(self.subscriptions.delete(&id).await))
      }
      _ => Err((
        api::METHOD_NOT_FOUND,
        format!("method `{method}` not found"),
      )),
    }
  }

  fn gas_price(&self, from_height: Option<u64>, to_height: Option<u64>) -> MethodResult {
    let to_height = match to_height {
      Some(to_height) => to_height,
      None => match self.storage.latest_height() {
        Ok(latest) => latest,
        Err(StorageError::NotFound) => return Ok(Value::Array(Vec::new())),
        Err(err) => return Err((api::INTERNAL_ERROR, err.to_string())),
      },
    };

    let txs = self
      .storage
      .txs(from_height.unwrap_or(1), to_height + 1, 0, u32::MAX)
      .map_err(|err| (api::INTERNAL_ERROR, err.to_string()))?
      .take(MAX_QUERY_ROWS)
      .collect::<Result<Vec<TxResult>, StorageError>>()
      .map_err(|err| (api::INTERNAL_ERROR, err.to_string()))?;

    Ok(serde_json::to_value(gas::aggregate(&txs)).unwrap())
  }

  async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
    let (mut writer, mut reader) = socket.split();
    let (sink, outbound) = mpsc::channel::<Value>(OUTBOUND_BUFFER);

    let writer_task = tokio::spawn(async move {
      let mut frames = ReceiverStream::new(outbound)
        .map(|frame| Ok::<Message, axum::Error>(Message::Text(frame.to_string().into())));
      writer.send_all(&mut frames).await.ok();
    });

    let mut connection = Connection {
      sink,
      subscription_ids: Vec::new(),
    };

    while let Some(message) = reader.next().await {
      let Ok(message) = message else {
        break;
      };

      match message {
        Message::Text(text) => {
          let response = self.handle_payload(text.as_str(), Some(&mut connection)).await;
          if connection.sink.send(response).await.is_err() {
            break;
          }
        }
        Message::Close(_) => break,
        _ => {}
      }
    }

    // the connection is gone; its push subscriptions go with it
    for id in connection.subscription_ids {
      self.subscriptions.delete(&id).await;
    }

    drop(connection.sink);
    writer_task.await.ok();
  }
}

/// Bridge the event bus into the serving side: feed every committed block to
/// the polling filters, then fan it out to the push subscriptions.
pub async fn run_event_pump(
  mut subscription: Subscription,
  filters: Arc<FilterRegistry>,
  subscriptions: Arc<SubscriptionRegistry>,
  cancel: CancellationToken,
) {
  loop {
    let event = tokio::select! {
      _ = cancel.cancelled() => break,
      event = subscription.events.recv() => match event {
        Some(event) => event,
        None => break,
      },
    };

    let Event::NewBlock(new_block) = event;

    filters.update(&new_block);

    subscriptions
      .broadcast(
        EventKind::NewHeads,
        &serde_json::to_value(api::BlockHeader::from(&new_block.block.header)).unwrap(),
      )
      .await;

    for tx in &new_block.results {
      subscriptions
        .broadcast(
          EventKind::NewTransactions,
          &serde_json::to_value(api::TxResult::from(tx)).unwrap(),
        )
        .await;
    }

    let prices = gas::aggregate(&new_block.results);
    if !prices.is_empty() {
      subscriptions
        .broadcast(
          EventKind::NewGasPrice,
          &serde_json::to_value(prices).unwrap(),
        )
        .await;
    }
  }
}

async fn handle_http(State(server): State<Arc<Server>>, payload: String) -> Json<Value> {
  Json(server.handle_payload(&payload, None).await)
}

async fn handle_ws(
  State(server): State<Arc<Server>>,
  upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
  upgrade.on_upgrade(move |socket| server.handle_socket(socket))
}

#[derive(Deserialize)]
struct HeightParams {
  height: u64,
}

#[derive(Deserialize)]
struct TxParams {
  height: u64,
  index: u32,
}

#[derive(Deserialize)]
struct HashParams {
  hash: String,
}

#[derive(Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GasParams {
  from_height: Option<u64>,
  to_height: Option<u64>,
}

impl Default for GasParams {
  fn default() -> Self {
    Self {
      from_height: None,
      to_height: None,
    }
  }
}

#[derive(Deserialize)]
struct IdParams {
  id: String,
}

#[derive(Deserialize)]
struct KindParams {
  kind: EventKind,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, (i64, String)> {
  let params = if params.is_null() {
    // absent params parse like an empty object, so all-optional
    // parameter sets need not be spelled out
    Value::Object(serde_json::Map::new())
  } else {
    params
  };

  serde_json::from_value(params)
    .map_err(|err| (api::INVALID_PARAMS, format!("invalid params: {err}")))
}

fn maybe<T: Serialize>(result: Result<T, StorageError>) -> MethodResult {
  match result {
    Ok(value) => Ok(serde_json::to_value(value).unwrap()),
    Err(StorageError::NotFound) => Ok(Value::Null),
    Err(err) => Err((api::INTERNAL_ERROR, err.to_string())),
  }
}

fn decode_hash(hash: &str) -> Result<[u8; 32], (i64, String)> {
  hex::decode(hash)
    .ok()
    .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
    .ok_or_else(|| {
      (
        api::INVALID_PARAMS,
        "hash must be 32 hex-encoded bytes".into(),
      )
    })
}

fn subscriptions_need_a_socket() -> (i64, String) {
  (
    api::INVALID_REQUEST,
    "subscriptions require a websocket connection".into(),
  )
}

#[cfg(test)]
mod tests {
  use {super::*, serde_json::json, tempfile::TempDir};

  fn server() -> (TempDir, Arc<Server>) {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(Storage::open(&dir.path().into()).unwrap());

    let mut batch = storage.write_batch().unwrap();
    let block = Block {
      header: BlockHeader {
        height: 1,
        time: 1_700_000_000,
        chain_id: "dev".into(),
        proposer: "g1proposer".into(),
        num_txs: 1,
      },
      txs: vec![b"payload".to_vec()],
    };
    let tx = TxResult {
      height: 1,
      index: 0,
      tx: b"payload".to_vec(),
      response: TxResponse {
        fee: Coin {
          denom: "ugnot".into(),
          amount: 100,
        },
        ..Default::default()
      },
    };
    batch.set_block(&block).unwrap();
    batch.set_tx(&tx).unwrap();
    batch.set_latest_height(1).unwrap();
    batch.commit().unwrap();

    (
      dir,
      Arc::new(Server {
        storage,
        filters: Arc::new(FilterRegistry::new()),
        subscriptions: Arc::new(SubscriptionRegistry::new()),
      }),
    )
  }

  async fn call(server: &Arc<Server>, method: &str, params: Value) -> Value {
    let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    server.handle_payload(&payload.to_string(), None).await
  }

  #[tokio::test]
  async fn get_block_wraps_payloads() {
    let (_dir, server) = server();

    let response = call(&server, "getBlock", json!({ "height": 1 })).await;

    assert_eq!(response["result"]["header"]["height"], 1);
    assert_eq!(response["result"]["txs"][0], "cGF5bG9hZA==");
  }

  #[tokio::test]
  async fn absent_records_come_back_null() {
    let (_dir, server) = server();

    let response = call(&server, "getBlock", json!({ "height": 99 })).await;
    assert_eq!(response["result"], Value::Null);

    let response = call(&server, "getTxResult", json!({ "height": 1, "index": 9 })).await;
    assert_eq!(response["result"], Value::Null);
  }

  #[tokio::test]
  async fn tx_lookup_by_hash_round_trips() {
    let (_dir, server) = server();

    let response = call(&server, "getTxResult", json!({ "height": 1, "index": 0 })).await;
    let hash = response["result"]["hash"].as_str().unwrap().to_owned();

    let response = call(&server, "getTxResultByHash", json!({ "hash": hash })).await;
    assert_eq!(response["result"]["height"], 1);

    let response = call(&server, "getTxResultByHash", json!({ "hash": "zz" })).await;
    assert_eq!(response["error"]["code"], api::INVALID_PARAMS);
  }

  #[tokio::test]
  async fn filters_round_trip_over_rpc() {
    let (_dir, server) = server();

    let response = call(&server, "newBlockFilter", json!({})).await;
    let id = response["result"].as_str().unwrap().to_owned();

    let response = call(&server, "getFilterChanges", json!({ "id": id })).await;
    assert_eq!(response["result"], json!([]));

    let response = call(&server, "uninstallFilter", json!({ "id": id })).await;
    assert_eq!(response["result"], Value::Bool(true));

    let response = call(&server, "uninstallFilter", json!({ "id": id })).await;
    assert_eq!(response["result"], Value::Bool(false));
  }

  #[tokio::test]
  async fn malformed_requests_never_reach_core_state() {
    let (_dir, server) = server();

    let response = server.handle_payload("{not json", None).await;
    assert_eq!(response["error"]["code"], api::PARSE_ERROR);

    let response = call(&server, "definitelyNotAMethod", json!({})).await;
    assert_eq!(response["error"]["code"], api::METHOD_NOT_FOUND);

    let response = call(&server, "getBlock", json!({ "height": "one" })).await;
    assert_eq!(response["error"]["code"], api::INVALID_PARAMS);

    // subscriptions are a websocket-only capability
    let response = call(&server, "subscribe", json!({ "kind": "newHeads" })).await;
    assert_eq!(response["error"]["code"], api::INVALID_REQUEST);
  }

  #[tokio::test]
  async fn batch_requests_are_answered_positionally() {
    let (_dir, server) = server();

    let payload = json!([
      { "jsonrpc": "2.0", "id": 1, "method": "getLatestHeight", "params": {} },
      { "jsonrpc": "2.0", "id": 2, "method": "getBlock", "params": { "height": 1 } },
    ]);

    let response = server.handle_payload(&payload.to_string(), None).await;

    assert_eq!(response[0]["result"], 1);
    assert_eq!(response[1]["result"]["header"]["height"], 1);
  }

  #[tokio::test]
  async fn gas_price_aggregates_the_stored_window() {
    let (_dir, server) = server();

    let response = call(&server, "getGasPrice", json!({})).await;

    assert_eq!(
      response["result"],
      json!([{ "denom": "ugnot", "low": 100, "average": 100, "high": 100 }]),
    );
  }
}

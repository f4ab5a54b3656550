use {
  super::*,
  http_body_util::{BodyExt, Full},
  hyper::{Method, Request, Uri, body::Bytes, header},
  hyper_util::{client::legacy, rt::TokioExecutor},
  serde::de::DeserializeOwned,
  serde_json::{Value, json},
  snafu::Snafu,
  std::future::Future,
};

/// JSON-RPC error code with which the upstream reports a height past its tip.
const HEIGHT_NOT_AVAILABLE: i64 = -32001;

#[derive(Debug, Clone, Snafu)]
pub enum FetchError {
  #[snafu(display("height {height} not yet available: {message}"))]
  MissingHeight { height: u64, message: String },
  #[snafu(display("transient fetch failure: {message}"))]
  Transient { message: String },
  #[snafu(display("invariant violation: {message}"))]
  Invariant { message: String },
}

impl FetchError {
  pub(crate) fn transient(message: impl Display) -> Self {
    Self::Transient {
      message: message.to_string(),
    }
  }

  /// Fatal errors abort the pipeline; everything else is retried.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::Invariant { .. })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRequest {
  Block(u64),
  BlockResults(u64),
}

impl BatchRequest {
  fn height(self) -> u64 {
    match self {
      Self::Block(height) | Self::BlockResults(height) => height,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
  Block(Block),
  BlockResults(Vec<TxResult>),
}

impl BatchResult {
  pub fn into_block(self) -> Option<Block> {
    match self {
      Self::Block(block) => Some(block),
      Self::BlockResults(_) => None,
    }
  }

  pub fn into_block_results(self) -> Option<Vec<TxResult>> {
    match self {
      Self::Block(_) => None,
      Self::BlockResults(results) => Some(results),
    }
  }
}

/// Accumulates sub-calls and issues them in one upstream round trip.
/// Results come back positionally, in submission order.
pub struct Batch<'client, C: Client> {
  client: &'client C,
  requests: Vec<BatchRequest>,
}

impl<C: Client> Batch<'_, C> {
  pub fn add_block(&mut self, height: u64) {
    self.requests.push(BatchRequest::Block(height));
  }

  pub fn add_block_results(&mut self, height: u64) {
    self.requests.push(BatchRequest::BlockResults(height));
  }

  pub fn len(&self) -> usize {
    self.requests.len()
  }

  pub fn is_empty(&self) -> bool {
    self.requests.is_empty()
  }

  pub async fn execute(self) -> Result<Vec<BatchResult>, FetchError> {
    if self.requests.is_empty() {
      return Ok(Vec::new());
    }
    self.client.batch(self.requests).await
  }
}

/// Capability contract for the upstream consensus node. The indexer only
/// ever needs the tip height, single blocks, and their execution results.
pub trait Client: Send + Sync + 'static {
  fn latest_block_height(&self) -> impl Future<Output = Result<u64, FetchError>> + Send;

  fn block(&self, height: u64) -> impl Future<Output = Result<Block, FetchError>> + Send;

  fn block_results(
    &self,
    height: u64,
  ) -> impl Future<Output = Result<Vec<TxResult>, FetchError>> + Send;

  fn batch(
    &self,
    requests: Vec<BatchRequest>,
  ) -> impl Future<Output = Result<Vec<BatchResult>, FetchError>> + Send;

  fn new_batch(&self) -> Batch<'_, Self>
  where
    Self: Sized,
  {
    Batch {
      client: self,
      requests: Vec::new(),
    }
  }
}

#[derive(Debug, Deserialize)]
struct RpcError {
  code: i64,
  message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<RpcError>,
  id: usize,
}

impl RpcResponse {
  fn into_result(self, height: u64) -> Result<Value, FetchError> {
    if let Some(error) = self.error {
      if error.code == HEIGHT_NOT_AVAILABLE {
        return Err(FetchError::MissingHeight {
          height,
          message: error.message,
        });
      }
      return Err(FetchError::transient(format!(
        "upstream error {}: {}",
        error.code, error.message
      )));
    }

    self
      .result
      .ok_or_else(|| FetchError::transient("upstream response carries neither result nor error"))
  }
}

#[derive(Debug, Deserialize)]
struct StatusMessage {
  latest_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct HeaderMessage {
  height: u64,
  time: u64,
  chain_id: String,
  proposer: String,
}

#[derive(Debug, Deserialize)]
struct BlockMessage {
  header: HeaderMessage,
  #[serde(default)]
  txs: Vec<String>,
}

impl BlockMessage {
  fn into_block(self) -> Result<Block, FetchError> {
    use base64::Engine as _;

    let txs = self
      .txs
      .iter()
      .map(|tx| {
        base64::engine::general_purpose::STANDARD
          .decode(tx)
          .map_err(FetchError::transient)
      })
      .collect::<Result<Vec<Vec<u8>>, FetchError>>()?;

    Ok(Block {
      header: BlockHeader {
        height: self.header.height,
        time: self.header.time,
        chain_id: self.header.chain_id,
        proposer: self.header.proposer,
        num_txs: u32::try_from(txs.len()).unwrap(),
      },
      txs,
    })
  }
}

#[derive(Debug, Deserialize)]
struct CoinMessage {
  denom: String,
  amount: u64,
}

#[derive(Debug, Deserialize)]
struct TxEventMessage {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  attributes: Vec<AttributeMessage>,
}

#[derive(Debug, Deserialize)]
struct AttributeMessage {
  key: String,
  value: String,
}

#[derive(Debug, Deserialize)]
struct TxResultMessage {
  index: u32,
  tx: String,
  code: u32,
  gas_wanted: u64,
  gas_used: u64,
  #[serde(default)]
  log: String,
  #[serde(default)]
  events: Vec<TxEventMessage>,
  fee: CoinMessage,
}

impl TxResultMessage {
  fn into_tx_result(self, height: u64) -> Result<TxResult, FetchError> {
    use base64::Engine as _;

    Ok(TxResult {
      height,
      index: self.index,
      tx: base64::engine::general_purpose::STANDARD
        .decode(&self.tx)
        .map_err(FetchError::transient)?,
      response: TxResponse {
        code: self.code,
        gas_wanted: self.gas_wanted,
        gas_used: self.gas_used,
        log: self.log,
        events: self
          .events
          .into_iter()
          .map(|event| TxEvent {
            kind: event.kind,
            attributes: event
              .attributes
              .into_iter()
              .map(|attribute| (attribute.key, attribute.value))
              .collect(),
          })
          .collect(),
        fee: Coin {
          denom: self.fee.denom,
          amount: self.fee.amount,
        },
      },
    })
  }
}

#[derive(Debug, Deserialize)]
struct BlockResultsMessage {
  height: u64,
  #[serde(default)]
  results: Vec<TxResultMessage>,
}

impl BlockResultsMessage {
  fn into_tx_results(self) -> Result<Vec<TxResult>, FetchError> {
    let height = self.height;
    self
      .results
      .into_iter()
      .map(|result| result.into_tx_result(height))
      .collect()
  }
}

/// JSON-RPC 2.0 client over plain HTTP. Batch mode posts an array of
/// requests; the node answers each by id.
pub struct HttpClient {
  client: legacy::Client<legacy::connect::HttpConnector, Full<Bytes>>,
  url: Uri,
  timeout: Duration,
}

impl HttpClient {
  pub fn new(url: &str, timeout: Duration) -> Result<Self> {
    Ok(Self {
      client: legacy::Client::builder(TokioExecutor::new()).build_http(),
      url: url
        .parse::<Uri>()
        .with_context(|| format!("invalid node RPC URL `{url}`"))?,
      timeout,
    })
  }

  fn request(method: &str, params: Value, id: usize) -> Value {
    json!({
      "jsonrpc": "2.0",
      "id": id,
      "method": method,
      "params": params,
    })
  }

  async fn post(&self, body: Value) -> Result<Bytes, FetchError> {
    let request = Request::builder()
      .method(Method::POST)
      .uri(&self.url)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Full::new(Bytes::from(body.to_string())))
      .map_err(FetchError::transient)?;

    let response = tokio::time::timeout(self.timeout, self.client.request(request))
      .await
      .map_err(|_| FetchError::transient("upstream request timed out"))?
      .map_err(FetchError::transient)?;

    if !response.status().is_success() {
      return Err(FetchError::transient(format!(
        "upstream returned {}",
        response.status()
      )));
    }

    Ok(
      response
        .into_body()
        .collect()
        .await
        .map_err(FetchError::transient)?
        .to_bytes(),
    )
  }

  async fn call<T: DeserializeOwned>(
    &self,
    method: &str,
    params: Value,
    height: u64,
  ) -> Result<T, FetchError> {
    let body = self.post(Self::request(method, params, 0)).await?;

    let response = serde_json::from_slice::<RpcResponse>(&body).map_err(FetchError::transient)?;

    serde_json::from_value(response.into_result(height)?).map_err(FetchError::transient)
  }
}

impl Client for HttpClient {
  async fn latest_block_height(&self) -> Result<u64, FetchError> {
    Ok(
      self
        .call::<StatusMessage>("status", json!({}), 0)
        .await?
        .latest_block_height,
    )
  }

  async fn block(&self, height: u64) -> Result<Block, FetchError> {
    self
      .call::<BlockMessage>("block", json!({ "height": height }), height)
      .await?
      .into_block()
  }

  async fn block_results(&self, height: u64) -> Result<Vec<TxResult>, FetchError> {
    self
      .call::<BlockResultsMessage>("block_results", json!({ "height": height }), height)
      .await?
      .into_tx_results()
  }

  async fn batch(&self, requests: Vec<BatchRequest>) -> Result<Vec<BatchResult>, FetchError> {
    let body = Value::Array(
      requests
        .iter()
        .enumerate()
        .map(|(id, request)| match request {
          BatchRequest::Block(height) => {
            Self::request("block", json!({ "height": height }), id)
          }
          BatchRequest::BlockResults(height) => {
            Self::request("block_results", json!({ "height": height }), id)
          }
        })
        .collect(),
    );

    let body = self.post(body).await?;

    let mut responses =
      serde_json::from_slice::<Vec<RpcResponse>>(&body).map_err(FetchError::transient)?;

    if responses.len() != requests.len() {
      return Err(FetchError::transient(format!(
        "upstream answered {} of {} batched requests",
        responses.len(),
        requests.len()
      )));
    }

    // responses may arrive in any order; ids restore submission order
    responses.sort_by_key(|response| response.id);

    requests
      .iter()
      .zip(responses)
      .map(|(request, response)| {
        let result = response.into_result(request.height())?;
        match request {
          BatchRequest::Block(_) => Ok(BatchResult::Block(
            serde_json::from_value::<BlockMessage>(result)
              .map_err(FetchError::transient)?
              .into_block()?,
          )),
          BatchRequest::BlockResults(_) => Ok(BatchResult::BlockResults(
            serde_json::from_value::<BlockResultsMessage>(result)
              .map_err(FetchError::transient)?
              .into_tx_results()?,
          )),
        }
      })
      .collect()
  }
}

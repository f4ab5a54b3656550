use {super::*, serde_json::Value};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  pub jsonrpc: String,
  #[serde(default)]
  pub id: Option<Value>,
  pub method: String,
  #[serde(default)]
  pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
  pub code: i64,
  pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  pub jsonrpc: String,
  pub id: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<Error>,
}

impl Response {
  pub fn result(id: Value, result: Value) -> Self {
    Self {
      jsonrpc: "2.0".into(),
      id,
      result: Some(result),
      error: None,
    }
  }

  pub fn error(id: Value, code: i64, message: impl Display) -> Self {
    Self {
      jsonrpc: "2.0".into(),
      id,
      result: None,
      error: Some(Error {
        code,
        message: message.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
  pub height: u64,
  pub time: u64,
  pub chain_id: String,
  pub proposer: String,
  pub num_txs: u32,
}

impl From<&crate::BlockHeader> for BlockHeader {
  fn from(header: &crate::BlockHeader) -> Self {
    Self {
      height: header.height,
      time: header.time,
      chain_id: header.chain_id.clone(),
      proposer: header.proposer.clone(),
      num_txs: header.num_txs,
    }
  }
}

/// A block as served to clients; opaque payloads are base64-wrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
  pub header: BlockHeader,
  pub txs: Vec<String>,
}

impl From<&crate::Block> for Block {
  fn from(block: &crate::Block) -> Self {
    use base64::Engine as _;

    Self {
      header: BlockHeader::from(&block.header),
      txs: block
        .txs
        .iter()
        .map(|tx| base64::engine::general_purpose::STANDARD.encode(tx))
        .collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
  pub denom: String,
  pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
  pub key: String,
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEvent {
  #[serde(rename = "type")]
  pub kind: String,
  pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
  pub height: u64,
  pub index: u32,
  pub hash: String,
  pub tx: String,
  pub code: u32,
  pub gas_wanted: u64,
  pub gas_used: u64,
  pub log: String,
  pub events: Vec<TxEvent>,
  pub fee: Coin,
}

impl From<&crate::TxResult> for TxResult {
  fn from(tx: &crate::TxResult) -> Self {
    use base64::Engine as _;

    Self {
      height: tx.height,
      index: tx.index,
      hash: hex::encode(tx.hash()),
      tx: base64::engine::general_purpose::STANDARD.encode(&tx.tx),
      code: tx.response.code,
      gas_wanted: tx.response.gas_wanted,
      gas_used: tx.response.gas_used,
      log: tx.response.log.clone(),
      events: tx
        .response
        .events
        .iter()
        .map(|event| TxEvent {
          kind: event.kind.clone(),
          attributes: event
            .attributes
            .iter()
            .map(|(key, value)| Attribute {
              key: key.clone(),
              value: value.clone(),
            })
            .collect(),
        })
        .collect(),
      fee: Coin {
        denom: tx.response.fee.denom.clone(),
        amount: tx.response.fee.amount,
      },
    }
  }
}

impl From<FilterChanges> for Value {
  fn from(changes: FilterChanges) -> Self {
    match changes {
      FilterChanges::Blocks(headers) => serde_json::to_value(
        headers
          .iter()
          .map(BlockHeader::from)
          .collect::<Vec<BlockHeader>>(),
      )
      .unwrap(),
      FilterChanges::Txs(txs) => {
        serde_json::to_value(txs.iter().map(TxResult::from).collect::<Vec<TxResult>>()).unwrap()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn responses_serialize_without_the_unused_half() {
    let response = Response::result(Value::from(1), Value::from(7));
    assert_eq!(
      serde_json::to_value(&response).unwrap(),
      serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": 7 }),
    );

    let response = Response::error(Value::Null, METHOD_NOT_FOUND, "no such method");
    assert_eq!(
      serde_json::to_value(&response).unwrap(),
      serde_json::json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": { "code": METHOD_NOT_FOUND, "message": "no such method" },
      }),
    );
  }

  #[test]
  fn tx_results_are_wrapped_for_transport() {
    let tx = crate::TxResult {
      height: 3,
      index: 1,
      tx: b"payload".to_vec(),
      response: TxResponse {
        fee: crate::Coin {
          denom: "ugnot".into(),
          amount: 42,
        },
        ..Default::default()
      },
    };

    let wire = TxResult::from(&tx);

    assert_eq!(wire.tx, "cGF5bG9hZA==");
    assert_eq!(wire.hash, hex::encode(tx.hash()));
    assert_eq!(wire.fee.amount, 42);
  }
}

use {
  super::*,
  sha3::{Digest, Keccak256},
};

/// Header of an indexed block. `num_txs` is stored alongside the rest of the
/// header so that header-only consumers never need to load the tx payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
  pub height: u64,
  pub time: u64,
  pub chain_id: String,
  pub proposer: String,
  pub num_txs: u32,
}

/// A block as fetched from the upstream node: header plus the ordered opaque
/// transaction payloads. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
  pub header: BlockHeader,
  pub txs: Vec<Vec<u8>>,
}

impl Block {
  pub fn height(&self) -> u64 {
    self.header.height
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Coin {
  pub denom: String,
  pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxEvent {
  pub kind: String,
  pub attributes: Vec<(String, String)>,
}

/// Execution response reported by the node for a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxResponse {
  pub code: u32,
  pub gas_wanted: u64,
  pub gas_used: u64,
  pub log: String,
  pub events: Vec<TxEvent>,
  pub fee: Coin,
}

/// The result of a transaction at position `index` within block `height`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxResult {
  pub height: u64,
  pub index: u32,
  pub tx: Vec<u8>,
  pub response: TxResponse,
}

impl TxResult {
  /// Content hash of the raw payload, used for hash lookups.
  pub fn hash(&self) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(&self.tx);
    hasher.finalize().into()
  }
}

/// The fetched payload for a chunk range: blocks in ascending height order,
/// each paired with its ordered tx results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
  pub blocks: Vec<(Block, Vec<TxResult>)>,
}

impl Chunk {
  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }
}

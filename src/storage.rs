use {
  super::*,
  redb::{Database, ReadableDatabase, ReadableTable, TableDefinition},
  snafu::Snafu,
};

const INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index");

const LATEST_HEIGHT_KEY: &[u8] = b"LATEST_HEIGHT";
const BLOCK_PREFIX: &[u8] = b"BLOCK_";
const TX_PREFIX: &[u8] = b"TX_";
const TX_HASH_PREFIX: &[u8] = b"TXH_";

fn block_key(height: u64) -> Vec<u8> {
  let mut key = Vec::with_capacity(BLOCK_PREFIX.len() + 8);
  key.extend_from_slice(BLOCK_PREFIX);
  key.extend_from_slice(&height.to_be_bytes());
  key
}

fn tx_key(height: u64, index: u32) -> Vec<u8> {
  let mut key = Vec::with_capacity(TX_PREFIX.len() + 12);
  key.extend_from_slice(TX_PREFIX);
  key.extend_from_slice(&height.to_be_bytes());
  key.extend_from_slice(&index.to_be_bytes());
  key
}

fn tx_hash_key(hash: [u8; 32]) -> Vec<u8> {
  let mut key = Vec::with_capacity(TX_HASH_PREFIX.len() + 32);
  key.extend_from_slice(TX_HASH_PREFIX);
  key.extend_from_slice(&hash);
  key
}

fn tx_key_index(key: &[u8]) -> u32 {
  u32::from_be_bytes(key[TX_PREFIX.len() + 8..].try_into().unwrap())
}

#[derive(Debug, Snafu)]
pub enum StorageError {
  #[snafu(display("not found"))]
  NotFound,
  #[snafu(display("storage I/O error: {source}"), context(false))]
  Io { source: io::Error },
  #[snafu(display("storage engine error: {source}"), context(false))]
  Database { source: redb::Error },
  #[snafu(display("malformed record under key {key}: {message}"))]
  Corrupt { key: String, message: String },
}

impl StorageError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound)
  }

  fn corrupt(key: &[u8], err: Error) -> Self {
    Self::Corrupt {
      key: hex::encode(key),
      message: err.to_string(),
    }
  }
}

impl From<redb::DatabaseError> for StorageError {
  fn from(err: redb::DatabaseError) -> Self {
    Self::Database { source: err.into() }
  }
}

impl From<redb::TransactionError> for StorageError {
  fn from(err: redb::TransactionError) -> Self {
    Self::Database { source: err.into() }
  }
}

impl From<redb::TableError> for StorageError {
  fn from(err: redb::TableError) -> Self {
    Self::Database { source: err.into() }
  }
}

impl From<redb::StorageError> for StorageError {
  fn from(err: redb::StorageError) -> Self {
    Self::Database { source: err.into() }
  }
}

impl From<redb::CommitError> for StorageError {
  fn from(err: redb::CommitError) -> Self {
    Self::Database { source: err.into() }
  }
}

/// The embedded store. A single raw-byte table holds every record:
///
/// ```text
/// "LATEST_HEIGHT"          -> be64 height
/// "BLOCK_" || be64(h)      -> Block
/// "TX_" || be64(h) || be32(i) -> TxResult
/// "TXH_" || hash           -> be64(h) || be32(i)
/// ```
///
/// Big-endian heights make lexicographic key order equal numeric order, so
/// range cursors walk heights in the right direction without decoding.
pub struct Storage {
  database: Database,
}

impl Storage {
  pub fn open(directory: &PathBuf) -> Result<Self, StorageError> {
    fs::create_dir_all(directory)?;

    let database = Database::create(directory.join("index.redb"))?;

    let wtx = database.begin_write()?;
    wtx.open_table(INDEX)?;
    wtx.commit()?;

    Ok(Self { database })
  }

  /// The highest height whose block and tx results are all committed.
  /// `NotFound` before the genesis commit.
  pub fn latest_height(&self) -> Result<u64, StorageError> {
    self
      .get(LATEST_HEIGHT_KEY)?
      .ok_or(StorageError::NotFound)
      .and_then(|value| {
        u64::load(&value).map_err(|err| StorageError::corrupt(LATEST_HEIGHT_KEY, err))
      })
  }

  pub fn block(&self, height: u64) -> Result<Block, StorageError> {
    let key = block_key(height);
    self
      .get(&key)?
      .ok_or(StorageError::NotFound)
      .and_then(|value| Block::load(&value).map_err(|err| StorageError::corrupt(&key, err)))
  }

  pub fn tx(&self, height: u64, index: u32) -> Result<TxResult, StorageError> {
    let key = tx_key(height, index);
    self
      .get(&key)?
      .ok_or(StorageError::NotFound)
      .and_then(|value| TxResult::load(&value).map_err(|err| StorageError::corrupt(&key, err)))
  }

  pub fn tx_by_hash(&self, hash: [u8; 32]) -> Result<TxResult, StorageError> {
    let key = tx_hash_key(hash);
    let (height, index) = self
      .get(&key)?
      .ok_or(StorageError::NotFound)
      .and_then(|value| {
        <(u64, u32)>::load(&value).map_err(|err| StorageError::corrupt(&key, err))
      })?;

    self.tx(height, index)
  }

  /// Cursor over blocks with heights in `[from, to)`, ascending.
  pub fn blocks(&self, from: u64, to: u64) -> Result<Blocks, StorageError> {
    self.block_cursor(from, to, false)
  }

  /// Cursor over blocks with heights in `[from, to)`, descending.
  pub fn blocks_rev(&self, from: u64, to: u64) -> Result<Blocks, StorageError> {
    self.block_cursor(from, to, true)
  }

  /// Cursor over tx results with heights in `[from_height, to_height)` and
  /// indexes in `[from_index, to_index)`, ascending by `(height, index)`.
  pub fn txs(
    &self,
    from_height: u64,
    to_height: u64,
    from_index: u32,
    to_index: u32,
  ) -> Result<Txs, StorageError> {
    self.tx_cursor(from_height, to_height, from_index, to_index, false)
  }

  /// As `txs`, descending by `(height, index)`.
  pub fn txs_rev(
    &self,
    from_height: u64,
    to_height: u64,
    from_index: u32,
    to_index: u32,
  ) -> Result<Txs, StorageError> {
    self.tx_cursor(from_height, to_height, from_index, to_index, true)
  }

  /// An atomic multi-key write. Readers see either none or all of a batch.
  pub fn write_batch(&self) -> Result<Batch, StorageError> {
    Ok(Batch {
      wtx: self.database.begin_write()?,
    })
  }

  fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
    let rtx = self.database.begin_read()?;
    let table = rtx.open_table(INDEX)?;
    Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
  }

  fn block_cursor(&self, from: u64, to: u64, reverse: bool) -> Result<Blocks, StorageError> {
    Ok(Blocks {
      cursor: Cursor::open(self, block_key(from), block_key(to), reverse)?,
    })
  }

  fn tx_cursor(
    &self,
    from_height: u64,
    to_height: u64,
    from_index: u32,
    to_index: u32,
    reverse: bool,
  ) -> Result<Txs, StorageError> {
    Ok(Txs {
      cursor: Cursor::open(
        self,
        tx_key(from_height, from_index),
        tx_key(to_height, 0),
        reverse,
      )?,
      from_index,
      to_index,
    })
  }
}

pub struct Batch {
  wtx: redb::WriteTransaction,
}

impl Batch {
  pub fn set_latest_height(&mut self, height: u64) -> Result<(), StorageError> {
    self.insert(LATEST_HEIGHT_KEY.to_vec(), height.store())
  }

  pub fn set_block(&mut self, block: &Block) -> Result<(), StorageError> {
    self.insert(block_key(block.height()), block.store())
  }

  pub fn set_tx(&mut self, tx: &TxResult) -> Result<(), StorageError> {
    self.insert(tx_key(tx.height, tx.index), tx.store())?;
    self.insert(tx_hash_key(tx.hash()), (tx.height, tx.index).store())
  }

  pub fn commit(self) -> Result<(), StorageError> {
    self.wtx.commit()?;
    Ok(())
  }

  pub fn rollback(self) -> Result<(), StorageError> {
    self.wtx.abort()?;
    Ok(())
  }

  fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
    let mut table = self.wtx.open_table(INDEX)?;
    table.insert(key.as_slice(), value.as_slice())?;
    Ok(())
  }
}

/// A lazy restartable cursor over a raw key range. Pins a read snapshot at
/// open time, so a cursor never observes writes committed after it was
/// created. Each step re-seeks from the last returned key, which keeps the
/// cursor valid across arbitrarily long pauses between `next` calls.
struct Cursor {
  table: redb::ReadOnlyTable<&'static [u8], &'static [u8]>,
  lower: Vec<u8>,
  upper: Vec<u8>,
  reverse: bool,
}

impl Cursor {
  fn open(
    storage: &Storage,
    lower: Vec<u8>,
    upper: Vec<u8>,
    reverse: bool,
  ) -> Result<Self, StorageError> {
    let rtx = storage.database.begin_read()?;
    Ok(Self {
      table: rtx.open_table(INDEX)?,
      lower,
      upper,
      reverse,
    })
  }

  fn step(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
    if self.lower >= self.upper {
      return Ok(None);
    }

    let item = {
      let mut range = self
        .table
        .range::<&[u8]>(self.lower.as_slice()..self.upper.as_slice())?;

      let item = if self.reverse {
        range.next_back()
      } else {
        range.next()
      };

      match item {
        None => None,
        Some(item) => {
          let (key, value) = item?;
          Some((key.value().to_vec(), value.value().to_vec()))
        }
      }
    };

    match item {
      None => Ok(None),
      Some((key, value)) => {
        if self.reverse {
          self.upper = key.clone();
        } else {
          self.lower = key.clone();
          self.lower.push(0);
        }

        Ok(Some((key, value)))
      }
    }
  }
}

pub struct Blocks {
  cursor: Cursor,
}

impl Iterator for Blocks {
  type Item = Result<Block, StorageError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self.cursor.step() {
      Err(err) => Some(Err(err)),
      Ok(None) => None,
      Ok(Some((key, value))) => {
        Some(Block::load(&value).map_err(|err| StorageError::corrupt(&key, err)))
      }
    }
  }
}

pub struct Txs {
  cursor: Cursor,
  from_index: u32,
  to_index: u32,
}

impl Iterator for Txs {
  type Item = Result<TxResult, StorageError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.cursor.step() {
        Err(err) => return Some(Err(err)),
        Ok(None) => return None,
        Ok(Some((key, value))) => {
          let index = tx_key_index(&key);
          if index < self.from_index || index >= self.to_index {
            continue;
          }
          return Some(TxResult::load(&value).map_err(|err| StorageError::corrupt(&key, err)));
        }
      }
    }
  }
}

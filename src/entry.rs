use {
  super::*,
  byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
  std::io::{Cursor, Read},
};

/// Fixed binary schema for stored values. Fields are written in declaration
/// order; integers are big-endian; variable-length fields carry a u32 length
/// prefix. Heights inside keys are big-endian so that lexicographic key order
/// equals numeric order.
pub(crate) trait Entry: Sized {
  fn load(value: &[u8]) -> Result<Self>;

  fn store(&self) -> Vec<u8>;
}

fn put_bytes(buffer: &mut Vec<u8>, bytes: &[u8]) {
  buffer
    .write_u32::<BigEndian>(u32::try_from(bytes.len()).unwrap())
    .expect("in-memory writers don't error");
  buffer.extend_from_slice(bytes);
}

fn put_str(buffer: &mut Vec<u8>, value: &str) {
  put_bytes(buffer, value.as_bytes());
}

fn take_bytes(cursor: &mut impl Read) -> Result<Vec<u8>> {
  let len = cursor.read_u32::<BigEndian>()?;
  let mut bytes = vec![0; usize::try_from(len).unwrap()];
  cursor.read_exact(&mut bytes)?;
  Ok(bytes)
}

fn take_str(cursor: &mut impl Read) -> Result<String> {
  String::from_utf8(take_bytes(cursor)?).context("stored string is not utf-8")
}

impl Entry for u64 {
  fn load(value: &[u8]) -> Result<Self> {
    Ok(Cursor::new(value).read_u64::<BigEndian>()?)
  }

  fn store(&self) -> Vec<u8> {
    self.to_be_bytes().to_vec()
  }
}

/// `(height, index)` location of a tx result, the value under the hash index.
impl Entry for (u64, u32) {
  fn load(value: &[u8]) -> Result<Self> {
    let mut cursor = Cursor::new(value);
    Ok((
      cursor.read_u64::<BigEndian>()?,
      cursor.read_u32::<BigEndian>()?,
    ))
  }

  fn store(&self) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(12);
    buffer.extend_from_slice(&self.0.to_be_bytes());
    buffer.extend_from_slice(&self.1.to_be_bytes());
    buffer
  }
}

impl Entry for BlockHeader {
  fn load(value: &[u8]) -> Result<Self> {
    Self::read(&mut Cursor::new(value))
  }

  fn store(&self) -> Vec<u8> {
    let mut buffer = Vec::new();
    self.write(&mut buffer);
    buffer
  }
}

impl BlockHeader {
  fn read(cursor: &mut impl Read) -> Result<Self> {
    Ok(Self {
      height: cursor.read_u64::<BigEndian>()?,
      time: cursor.read_u64::<BigEndian>()?,
      chain_id: take_str(cursor)?,
      proposer: take_str(cursor)?,
      num_txs: cursor.read_u32::<BigEndian>()?,
    })
  }

  fn write(&self, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&self.height.to_be_bytes());
    buffer.extend_from_slice(&self.time.to_be_bytes());
    put_str(buffer, &self.chain_id);
    put_str(buffer, &self.proposer);
    buffer.extend_from_slice(&self.num_txs.to_be_bytes());
  }
}

impl Entry for Block {
  fn load(value: &[u8]) -> Result<Self> {
    let mut cursor = Cursor::new(value);

    let header = BlockHeader::read(&mut cursor)?;

    let count = cursor.read_u32::<BigEndian>()?;
    let mut txs = Vec::with_capacity(usize::try_from(count).unwrap());
    for _ in 0..count {
      txs.push(take_bytes(&mut cursor)?);
    }

    Ok(Self { header, txs })
  }

  fn store(&self) -> Vec<u8> {
    let mut buffer = Vec::new();
    self.header.write(&mut buffer);
    buffer.extend_from_slice(&u32::try_from(self.txs.len()).unwrap().to_be_bytes());
    for tx in &self.txs {
      put_bytes(&mut buffer, tx);
    }
    buffer
  }
}

impl Coin {
  fn read(cursor: &mut impl Read) -> Result<Self> {
    Ok(Self {
      denom: take_str(cursor)?,
      amount: cursor.read_u64::<BigEndian>()?,
    })
  }

  fn write(&self, buffer: &mut Vec<u8>) {
    put_str(buffer, &self.denom);
    buffer.extend_from_slice(&self.amount.to_be_bytes());
  }
}

impl TxEvent {
  fn read(cursor: &mut impl Read) -> Result<Self> {
    let kind = take_str(cursor)?;
    let count = cursor.read_u32::<BigEndian>()?;
    let mut attributes = Vec::with_capacity(usize::try_from(count).unwrap());
    for _ in 0..count {
      attributes.push((take_str(cursor)?, take_str(cursor)?));
    }
    Ok(Self { kind, attributes })
  }

  fn write(&self, buffer: &mut Vec<u8>) {
    put_str(buffer, &self.kind);
    buffer.extend_from_slice(&u32::try_from(self.attributes.len()).unwrap().to_be_bytes());
    for (key, value) in &self.attributes {
      put_str(buffer, key);
      put_str(buffer, value);
    }
  }
}

impl Entry for TxResult {
  fn load(value: &[u8]) -> Result<Self> {
    let mut cursor = Cursor::new(value);

    let height = cursor.read_u64::<BigEndian>()?;
    let index = cursor.read_u32::<BigEndian>()?;
    let tx = take_bytes(&mut cursor)?;

    let code = cursor.read_u32::<BigEndian>()?;
    let gas_wanted = cursor.read_u64::<BigEndian>()?;
    let gas_used = cursor.read_u64::<BigEndian>()?;
    let log = take_str(&mut cursor)?;

    let count = cursor.read_u32::<BigEndian>()?;
    let mut events = Vec::with_capacity(usize::try_from(count).unwrap());
    for _ in 0..count {
      events.push(TxEvent::read(&mut cursor)?);
    }

    let fee = Coin::read(&mut cursor)?;

    Ok(Self {
      height,
      index,
      tx,
      response: TxResponse {
        code,
        gas_wanted,
        gas_used,
        log,
        events,
        fee,
      },
    })
  }

  fn store(&self) -> Vec<u8> {
    let mut buffer = Vec::new();

    buffer.extend_from_slice(&self.height.to_be_bytes());
    buffer.extend_from_slice(&self.index.to_be_bytes());
    put_bytes(&mut buffer, &self.tx);

    buffer.extend_from_slice(&self.response.code.to_be_bytes());
    buffer.extend_from_slice(&self.response.gas_wanted.to_be_bytes());
    buffer.extend_from_slice(&self.response.gas_used.to_be_bytes());
    put_str(&mut buffer, &self.response.log);

    buffer.extend_from_slice(
      &u32::try_from(self.response.events.len())
        .unwrap()
        .to_be_bytes(),
    );
    for event in &self.response.events {
      event.write(&mut buffer);
    }

    self.response.fee.write(&mut buffer);

    buffer
  }
}

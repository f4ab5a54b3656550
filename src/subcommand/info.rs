use super::*;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Output {
  pub latest_height: Option<u64>,
  pub blocks: u64,
  pub txs: u64,
  pub store_bytes: u64,
}

pub(crate) fn run(settings: Settings) -> SubcommandResult {
  let storage = Storage::open(&settings.data_dir())?;

  let latest_height = match storage.latest_height() {
    Ok(height) => Some(height),
    Err(err) if err.is_not_found() => None,
    Err(err) => return Err(err.into()),
  };

  let mut blocks = 0;
  let mut txs = 0;
  if let Some(latest) = latest_height {
    for block in storage.blocks(0, latest + 1)? {
      blocks += 1;
      txs += u64::from(block?.header.num_txs);
    }
  }

  let store_bytes = fs::metadata(settings.data_dir().join("index.redb"))?.len();

  Ok(Some(Box::new(Output {
    latest_height,
    blocks,
    txs,
    store_bytes,
  })))
}

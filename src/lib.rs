use {
  self::entry::Entry,
  anyhow::{Context as _, Error, anyhow, bail},
  clap::Parser,
  serde::{Deserialize, Serialize},
  std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt::{self, Display, Formatter},
    fs, io, mem,
    net::SocketAddr,
    path::PathBuf,
    process,
    str::FromStr,
    sync::{
      Arc, LazyLock, Mutex, RwLock,
      atomic::{self, AtomicBool, AtomicU64},
    },
    time::{Duration, Instant},
  },
  tokio::sync::mpsc,
  tokio_util::sync::CancellationToken,
};

pub use self::{
  arguments::Arguments,
  client::{BatchRequest, BatchResult, Client, FetchError, HttpClient},
  events::{Event, EventBus, EventKind, NewBlock, Subscription},
  fetcher::{Fetcher, FetcherConfig},
  filters::{FilterChanges, FilterOptions, FilterRegistry},
  gas::GasPrice,
  options::Options,
  settings::Settings,
  slots::{ChunkRange, Slot, SlotSet},
  storage::{Storage, StorageError},
  subcommand::Subcommand,
  subscriptions::{PushSubscription, SubscriptionRegistry},
  types::{Block, BlockHeader, Chunk, Coin, TxEvent, TxResponse, TxResult},
};

pub mod api;
pub mod arguments;
pub mod client;
mod entry;
pub mod events;
pub mod fetcher;
pub mod filters;
pub mod gas;
pub mod options;
pub mod server;
pub mod settings;
pub mod slots;
pub mod storage;
pub mod subcommand;
pub mod subscriptions;
pub mod types;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) type SubcommandResult = Result<Option<Box<dyn Output>>>;

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

static SHUTDOWN: LazyLock<CancellationToken> = LazyLock::new(CancellationToken::new);

pub trait Output: Send {
  fn print(&self);
}

impl<T> Output for T
where
  T: Serialize + Send,
{
  fn print(&self) {
    serde_json::to_writer_pretty(io::stdout(), self).ok();
    println!();
  }
}

pub fn main() {
  env_logger::init();

  ctrlc::set_handler(|| {
    if SHUTTING_DOWN.fetch_or(true, atomic::Ordering::Relaxed) {
      process::exit(1);
    }

    eprintln!("Shutting down gracefully. Press <CTRL-C> again to shutdown immediately.");

    SHUTDOWN.cancel();
  })
  .expect("Error setting <CTRL-C> handler");

  match Arguments::parse().run() {
    Err(err) => {
      eprintln!("error: {err}");

      err
        .chain()
        .skip(1)
        .for_each(|cause| eprintln!("because: {cause}"));

      process::exit(1);
    }
    Ok(output) => {
      if let Some(output) = output {
        output.print();
      }
    }
  }
}

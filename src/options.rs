use super::*;

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
  #[arg(long, env = "RETRIEVER_CONFIG", help = "Load configuration from <CONFIG>.")]
  pub(crate) config: Option<PathBuf>,
  #[arg(
    long,
    alias = "datadir",
    env = "RETRIEVER_DATA_DIR",
    help = "Store the index in <DATA_DIR>."
  )]
  pub(crate) data_dir: Option<PathBuf>,
  #[arg(
    long,
    env = "RETRIEVER_FILTER_TTL",
    help = "Evict filters idle for <FILTER_TTL>. [default: 5m]"
  )]
  pub(crate) filter_ttl: Option<humantime::Duration>,
  #[arg(
    long,
    env = "RETRIEVER_LISTEN_ADDRESS",
    help = "Serve JSON-RPC on <LISTEN_ADDRESS>. [default: 127.0.0.1:8546]"
  )]
  pub(crate) listen_address: Option<SocketAddr>,
  #[arg(
    long,
    env = "RETRIEVER_MAX_CHUNK_SIZE",
    help = "Fetch at most <MAX_CHUNK_SIZE> blocks per chunk. [default: 100]"
  )]
  pub(crate) max_chunk_size: Option<u64>,
  #[arg(
    long,
    env = "RETRIEVER_MAX_SLOTS",
    help = "Run at most <MAX_SLOTS> concurrent chunk fetches. [default: 16]"
  )]
  pub(crate) max_slots: Option<usize>,
  #[arg(
    long,
    env = "RETRIEVER_NODE_RPC_URL",
    help = "Follow the node RPC at <NODE_RPC_URL>. [default: http://127.0.0.1:26657]"
  )]
  pub(crate) node_rpc_url: Option<String>,
  #[arg(
    long,
    env = "RETRIEVER_ORIGIN_HEIGHT",
    help = "Start indexing at <ORIGIN_HEIGHT>. [default: 1]"
  )]
  pub(crate) origin_height: Option<u64>,
  #[arg(
    long,
    env = "RETRIEVER_QUERY_INTERVAL",
    help = "Poll the chain tip every <QUERY_INTERVAL>. [default: 1s]"
  )]
  pub(crate) query_interval: Option<humantime::Duration>,
  #[arg(
    long,
    env = "RETRIEVER_REQUEST_TIMEOUT",
    help = "Abort node requests after <REQUEST_TIMEOUT>. [default: 10s]"
  )]
  pub(crate) request_timeout: Option<humantime::Duration>,
}

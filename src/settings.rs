use super::*;

/// Merged runtime configuration. Precedence per field: command-line flag (or
/// its `RETRIEVER_*` environment variable, which clap folds into the flag),
/// then the YAML config file, then the built-in default.
#[derive(Debug, Clone, Default)]
pub struct Settings {
  data_dir: Option<PathBuf>,
  filter_ttl: Option<Duration>,
  listen_address: Option<SocketAddr>,
  max_chunk_size: Option<u64>,
  max_slots: Option<usize>,
  node_rpc_url: Option<String>,
  origin_height: Option<u64>,
  query_interval: Option<Duration>,
  request_timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
struct Config {
  data_dir: Option<PathBuf>,
  filter_ttl: Option<String>,
  listen_address: Option<SocketAddr>,
  max_chunk_size: Option<u64>,
  max_slots: Option<usize>,
  node_rpc_url: Option<String>,
  origin_height: Option<u64>,
  query_interval: Option<String>,
  request_timeout: Option<String>,
}

impl Config {
  fn load(path: &PathBuf) -> Result<Self> {
    serde_yaml::from_str(
      &fs::read_to_string(path)
        .with_context(|| format!("failed to read config file `{}`", path.display()))?,
    )
    .with_context(|| format!("failed to parse config file `{}`", path.display()))
  }

  fn duration(value: Option<String>, field: &str) -> Result<Option<Duration>> {
    value
      .map(|value| {
        humantime::parse_duration(&value)
          .with_context(|| format!("invalid {field} `{value}` in config"))
      })
      .transpose()
  }
}

impl Settings {
  pub fn load(options: Options) -> Result<Settings> {
    let config = match &options.config {
      Some(path) => Config::load(path)?,
      None => Config::default(),
    };

    let settings = Settings {
      data_dir: options.data_dir.or(config.data_dir),
      filter_ttl: options
        .filter_ttl
        .map(Into::into)
        .or(Config::duration(config.filter_ttl, "filter-ttl")?),
      listen_address: options.listen_address.or(config.listen_address),
      max_chunk_size: options.max_chunk_size.or(config.max_chunk_size),
      max_slots: options.max_slots.or(config.max_slots),
      node_rpc_url: options.node_rpc_url.or(config.node_rpc_url),
      origin_height: options.origin_height.or(config.origin_height),
      query_interval: options
        .query_interval
        .map(Into::into)
        .or(Config::duration(config.query_interval, "query-interval")?),
      request_timeout: options
        .request_timeout
        .map(Into::into)
        .or(Config::duration(config.request_timeout, "request-timeout")?),
    };

    if settings.max_chunk_size() == 0 {
      bail!("max chunk size must be at least 1");
    }

    if settings.max_slots() == 0 {
      bail!("max slots must be at least 1");
    }

    if settings.origin_height() == 0 {
      bail!("origin height must be at least 1");
    }

    Ok(settings)
  }

  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(|| {
      dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retriever")
    })
  }

  pub fn filter_ttl(&self) -> Duration {
    self.filter_ttl.unwrap_or(Duration::from_secs(5 * 60))
  }

  pub fn listen_address(&self) -> SocketAddr {
    self
      .listen_address
      .unwrap_or_else(|| "127.0.0.1:8546".parse().unwrap())
  }

  pub fn max_chunk_size(&self) -> u64 {
    self.max_chunk_size.unwrap_or(100)
  }

  pub fn max_slots(&self) -> usize {
    self.max_slots.unwrap_or(16)
  }

  pub fn node_rpc_url(&self) -> String {
    self
      .node_rpc_url
      .clone()
      .unwrap_or_else(|| "http://127.0.0.1:26657".into())
  }

  pub fn origin_height(&self) -> u64 {
    self.origin_height.unwrap_or(1)
  }

  pub fn query_interval(&self) -> Duration {
    self.query_interval.unwrap_or(Duration::from_secs(1))
  }

  pub fn request_timeout(&self) -> Duration {
    self.request_timeout.unwrap_or(Duration::from_secs(10))
  }

  pub fn fetcher_config(&self) -> FetcherConfig {
    FetcherConfig {
      max_slots: self.max_slots(),
      max_chunk_size: self.max_chunk_size(),
      query_interval: self.query_interval(),
      origin: self.origin_height(),
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, tempfile::TempDir};

  #[test]
  fn defaults_apply_when_nothing_is_set() {
    let settings = Settings::load(Options::default()).unwrap();

    assert_eq!(settings.max_slots(), 16);
    assert_eq!(settings.max_chunk_size(), 100);
    assert_eq!(settings.query_interval(), Duration::from_secs(1));
    assert_eq!(settings.filter_ttl(), Duration::from_secs(300));
    assert_eq!(settings.origin_height(), 1);
    assert_eq!(settings.node_rpc_url(), "http://127.0.0.1:26657");
    assert_eq!(settings.listen_address().port(), 8546);
  }

  #[test]
  fn flags_override_the_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("retriever.yaml");
    fs::write(
      &config,
      "max-slots: 4\nmax-chunk-size: 25\nquery-interval: 30s\n",
    )
    .unwrap();

    let settings = Settings::load(Options {
      config: Some(config),
      max_slots: Some(8),
      ..Default::default()
    })
    .unwrap();

    assert_eq!(settings.max_slots(), 8);
    assert_eq!(settings.max_chunk_size(), 25);
    assert_eq!(settings.query_interval(), Duration::from_secs(30));
  }

  #[test]
  fn bad_config_values_are_rejected() {
    let dir = TempDir::new().unwrap();

    let config = dir.path().join("bad-duration.yaml");
    fs::write(&config, "query-interval: eventually\n").unwrap();
    assert!(
      Settings::load(Options {
        config: Some(config),
        ..Default::default()
      })
      .is_err()
    );

    let config = dir.path().join("unknown-field.yaml");
    fs::write(&config, "max-goats: 3\n").unwrap();
    assert!(
      Settings::load(Options {
        config: Some(config),
        ..Default::default()
      })
      .is_err()
    );

    assert!(
      Settings::load(Options {
        max_chunk_size: Some(0),
        ..Default::default()
      })
      .is_err()
    );
  }
}

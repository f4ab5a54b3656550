use super::*;

pub mod info;
pub mod start;

#[derive(Debug, Parser)]
pub enum Subcommand {
  #[command(about = "Print index statistics")]
  Info,
  #[command(about = "Run the indexer", alias = "run")]
  Start,
}

impl Subcommand {
  pub(crate) fn run(self, settings: Settings) -> SubcommandResult {
    match self {
      Self::Info => info::run(settings),
      Self::Start => start::run(settings),
    }
  }
}

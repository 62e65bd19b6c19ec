//! Command-line interface definition

use crate::config::IndexConfig;
use crate::error::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crystal-ingest")]
#[command(author, version, about = "Build a partitioned identifier index from a business-directory sitemap")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "CRYSTAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every stage: fetch, download, extract, sort, partition
    Build,

    /// Fetch the sitemap index and download its chunks
    Download,

    /// Extract identifiers from the chunk store into a file
    Extract {
        /// Output file (defaults to <work-dir>/identifiers.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sort and case-insensitively deduplicate an identifier file
    Sort {
        /// Unsorted identifier file
        #[arg(short, long)]
        input: PathBuf,

        /// Sorted output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Append a sorted identifier file to the shard directory
    Partition {
        /// Sorted identifier file
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// Flags that take precedence over the config file and environment
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Sitemap index URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Concurrent chunk downloads
    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Chunk store directory
    #[arg(long, global = true)]
    pub chunk_dir: Option<PathBuf>,

    /// Shard output directory
    #[arg(long, global = true)]
    pub shard_dir: Option<PathBuf>,

    /// Directory for intermediate files
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Retries per failed chunk
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Keep the chunk store after extraction
    #[arg(long, global = true)]
    pub keep_chunks: bool,

    /// Hide the download progress bar
    #[arg(long, global = true)]
    pub no_progress: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut IndexConfig) {
        if let Some(ref url) = self.base_url {
            config.base_url = url.clone();
        }
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if let Some(ref dir) = self.chunk_dir {
            config.chunk_store_path = dir.clone();
        }
        if let Some(ref dir) = self.shard_dir {
            config.shard_output_path = dir.clone();
        }
        if let Some(ref dir) = self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if self.keep_chunks {
            config.keep_chunks = true;
        }
        if self.no_progress {
            config.show_progress = false;
        }
    }
}

impl Cli {
    /// Defaults, then the config file, then environment, then flags.
    pub fn load_config(&self) -> Result<IndexConfig> {
        let mut config = match self.config {
            Some(ref path) => IndexConfig::from_file(path)?,
            None => IndexConfig::default(),
        };
        config.apply_env()?;
        self.overrides.apply(&mut config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crystal.toml");
        std::fs::write(&path, "max_workers = 2\nshard_output_path = \"from-file\"\n").unwrap();

        let cli = Cli::parse_from([
            "crystal-ingest",
            "--config",
            path.to_str().unwrap(),
            "build",
            "--max-workers",
            "9",
            "--keep-chunks",
        ]);
        let config = cli.load_config().unwrap();

        assert_eq!(config.max_workers, 9);
        assert_eq!(config.shard_output_path, PathBuf::from("from-file"));
        assert!(config.keep_chunks);
    }

    #[test]
    fn test_parse_sort_subcommand() {
        let cli = Cli::parse_from(["crystal-ingest", "sort", "-i", "raw.txt", "-o", "sorted.txt"]);
        match cli.command {
            Command::Sort { input, output } => {
                assert_eq!(input, PathBuf::from("raw.txt"));
                assert_eq!(output, PathBuf::from("sorted.txt"));
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_no_progress_flag() {
        let cli = Cli::parse_from(["crystal-ingest", "--no-progress", "download"]);
        let mut config = IndexConfig::default();
        cli.overrides.apply(&mut config);
        assert!(!config.show_progress);
    }
}

//! Crystal Ball Index Builder
//!
//! Crawls a paginated business-directory sitemap and turns it into a
//! directory of sorted, deduplicated, first-character shards suitable for
//! prefix lookup.
//!
//! # Stages
//!
//! - **Fetch**: [`fetcher::SitemapIndexFetcher`] lists the chunk locations
//! - **Download**: [`downloader::ChunkDownloader`] persists chunks concurrently
//! - **Extract**: [`extractor::IdentifierExtractor`] turns entries into identifiers
//! - **Sort**: [`sorter::ExternalSorter`] orders and deduplicates out of core
//! - **Partition**: [`partitioner::Partitioner`] appends to `index_<char>.txt`
//!
//! [`pipeline::IndexPipeline`] runs them in order.
//!
//! # Example
//!
//! ```no_run
//! use crystal_ingest::{IndexConfig, IndexPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IndexConfig::builder().shard_output_path("./indexes").build();
//!     let report = IndexPipeline::new(config)?.run().await?;
//!     println!("{} unique identifiers", report.sort.lines_written);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod http;
pub mod partitioner;
pub mod pipeline;
pub mod sitemap;
pub mod sorter;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use pipeline::{IndexPipeline, PipelineReport};

//! Index build orchestration
//!
//! Stages run strictly one after another:
//!
//! 1. fetch the sitemap index
//! 2. download chunks into the chunk store
//! 3. extract identifiers into a scratch file
//! 4. sort and deduplicate into a second scratch file
//! 5. partition into the shard directory
//! 6. remove the chunk store
//!
//! Only the download stage is concurrent. The file-bound stages run on the
//! blocking pool. Scratch files live in `work_dir` and are removed when their
//! stage is done, or on any error.

use crate::config::IndexConfig;
use crate::downloader::{ChunkDownloader, DownloadStats};
use crate::error::{IndexError, Result};
use crate::extractor::{ExtractStats, IdentifierExtractor};
use crate::fetcher::SitemapIndexFetcher;
use crate::http;
use crate::partitioner::{PartitionStats, Partitioner};
use crate::sitemap::SitemapLocation;
use crate::sorter::{ExternalSorter, SortStats};
use reqwest::Client;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Summary of a full pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Locations listed in the sitemap index
    pub locations: usize,
    pub download: DownloadStats,
    pub extract: ExtractStats,
    pub sort: SortStats,
    pub partition: PartitionStats,
    pub chunks_removed: bool,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn log_summary(&self) {
        info!(
            locations = self.locations,
            downloaded = self.download.downloaded,
            failed_chunks = self.download.failed,
            skipped_chunks = self.download.skipped,
            reused_chunks = self.download.skipped_existing,
            unreadable_chunks = self.extract.files_skipped,
            identifiers = self.extract.identifiers,
            unique = self.sort.lines_written,
            duplicates = self.sort.duplicates_removed,
            shards = self.partition.shards.len(),
            "Index build finished in {:.2}s",
            self.elapsed.as_secs_f64()
        );
    }
}

pub struct IndexPipeline {
    config: IndexConfig,
    client: Client,
}

impl IndexPipeline {
    /// Validate the config and build the shared HTTP client.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let client = http::build_client(&config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Run every stage end to end.
    pub async fn run(&self) -> Result<PipelineReport> {
        let start = Instant::now();
        let shard_dir = &self.config.shard_output_path;

        tokio::fs::create_dir_all(shard_dir)
            .await
            .map_err(|e| IndexError::partition(shard_dir, e))?;
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let locations = self.fetch_index().await?;
        let download = self.download(&locations).await?;

        let identifiers = self.scratch_file("identifiers-")?;
        let extract = self.extract(identifiers.path()).await?;

        let sorted = self.scratch_file("sorted-")?;
        let sort = self.sort(identifiers.path(), sorted.path()).await?;
        identifiers.close()?;

        let partition = self.partition(sorted.path()).await?;
        sorted.close()?;

        let chunks_removed = self.remove_chunks().await?;

        let report = PipelineReport {
            locations: locations.len(),
            download,
            extract,
            sort,
            partition,
            chunks_removed,
            elapsed: start.elapsed(),
        };
        report.log_summary();

        Ok(report)
    }

    /// Fetch the sitemap index. Any failure is fatal.
    pub async fn fetch_index(&self) -> Result<Vec<SitemapLocation>> {
        SitemapIndexFetcher::with_client(self.client.clone())
            .fetch(&self.config.base_url)
            .await
    }

    pub async fn download(&self, locations: &[SitemapLocation]) -> Result<DownloadStats> {
        let downloader = ChunkDownloader::with_client(self.client.clone(), &self.config);
        let stats = downloader.download_all(locations).await?;

        if stats.failed > 0 {
            warn!(
                failed = stats.failed,
                "Some chunks could not be downloaded; their entries will be missing"
            );
        }

        Ok(stats)
    }

    /// Extract identifiers from the chunk store into `output` (truncated).
    pub async fn extract(&self, output: &Path) -> Result<ExtractStats> {
        let chunk_dir = self.config.chunk_store_path.clone();
        let output = output.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let file = File::create(&output)?;
            IdentifierExtractor::new(chunk_dir).extract_all(file)
        })
        .await?
    }

    /// Sort and deduplicate `input` into `output`.
    ///
    /// The result is staged next to `output` and renamed over it once
    /// complete, so `output` may be the input file itself.
    pub async fn sort(&self, input: &Path, output: &Path) -> Result<SortStats> {
        let sorter = ExternalSorter::from_config(&self.config);
        let input = input.to_path_buf();
        let output = output.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let reader = File::open(&input).map(BufReader::new).map_err(IndexError::Sort)?;
            let staging_dir = match output.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let staged = tempfile::Builder::new()
                .prefix(".sorted-")
                .tempfile_in(&staging_dir)
                .map_err(IndexError::Sort)?;

            let stats = sorter.sort_unique(reader, staged.as_file())?;
            staged
                .persist(&output)
                .map_err(|e| IndexError::Sort(e.error))?;
            Ok(stats)
        })
        .await?
    }

    /// Append the lines of `sorted` to the shard directory.
    pub async fn partition(&self, sorted: &Path) -> Result<PartitionStats> {
        let partitioner = Partitioner::new(self.config.shard_output_path.clone());
        let sorted = sorted.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let reader = File::open(&sorted)
                .map(BufReader::new)
                .map_err(|e| IndexError::partition(&sorted, e))?;
            partitioner.partition(reader)
        })
        .await?
    }

    /// Remove the chunk store unless configured to keep it.
    async fn remove_chunks(&self) -> Result<bool> {
        let chunk_dir = &self.config.chunk_store_path;

        if self.config.keep_chunks {
            info!(dir = %chunk_dir.display(), "Keeping chunk store");
            return Ok(false);
        }

        match tokio::fs::remove_dir_all(chunk_dir).await {
            Ok(()) => {
                info!(dir = %chunk_dir.display(), "Removed chunk store");
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn scratch_file(&self, prefix: &str) -> Result<NamedTempFile> {
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".txt")
            .tempfile_in(&self.config.work_dir)?)
    }

    /// Default location for stage output written by the CLI
    pub fn work_path(&self, name: &str) -> PathBuf {
        self.config.work_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> IndexConfig {
        IndexConfig::builder()
            .chunk_store_path(root.join("chunks"))
            .shard_output_path(root.join("shards"))
            .work_dir(root.join("work"))
            .show_progress(false)
            .build()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_workers = 0;
        assert!(matches!(IndexPipeline::new(cfg), Err(IndexError::Config(_))));
    }

    #[tokio::test]
    async fn test_sort_then_partition_stages() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(&cfg.work_dir).unwrap();
        let pipeline = IndexPipeline::new(cfg).unwrap();

        let raw = pipeline.work_path("raw.txt");
        let sorted = pipeline.work_path("sorted.txt");
        std::fs::write(&raw, "beta\nAlpha\nalpha\nbanana\n").unwrap();

        let sort = pipeline.sort(&raw, &sorted).await.unwrap();
        assert_eq!(sort.lines_written, 3);

        let partition = pipeline.partition(&sorted).await.unwrap();
        assert_eq!(partition.lines, 3);

        let shards = dir.path().join("shards");
        assert_eq!(std::fs::read_to_string(shards.join("index_A.txt")).unwrap(), "Alpha\n");
        assert_eq!(
            std::fs::read_to_string(shards.join("index_b.txt")).unwrap(),
            "banana\nbeta\n"
        );
    }

    #[tokio::test]
    async fn test_sort_missing_input_is_sort_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IndexPipeline::new(config(dir.path())).unwrap();

        let err = pipeline
            .sort(&dir.path().join("absent.txt"), &dir.path().join("out.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "sort");
    }

    #[tokio::test]
    async fn test_sort_in_place_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IndexPipeline::new(config(dir.path())).unwrap();

        let file = dir.path().join("ids.txt");
        std::fs::write(&file, "b\na\nB\n").unwrap();

        let stats = pipeline.sort(&file, &file).await.unwrap();

        assert_eq!(stats.lines_read, 3);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a\nB\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_partition_missing_input_is_partition_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IndexPipeline::new(config(dir.path())).unwrap();

        let err = pipeline
            .partition(&dir.path().join("absent.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "partition");
        assert!(err.to_string().contains("absent.txt"));
    }

    #[tokio::test]
    async fn test_remove_chunks_honours_keep_flag() {
        let dir = tempfile::tempdir().unwrap();

        let mut cfg = config(dir.path());
        cfg.keep_chunks = true;
        std::fs::create_dir_all(&cfg.chunk_store_path).unwrap();
        let keep = IndexPipeline::new(cfg.clone()).unwrap();
        assert!(!keep.remove_chunks().await.unwrap());
        assert!(cfg.chunk_store_path.exists());

        cfg.keep_chunks = false;
        let remove = IndexPipeline::new(cfg.clone()).unwrap();
        assert!(remove.remove_chunks().await.unwrap());
        assert!(!cfg.chunk_store_path.exists());
        assert!(!remove.remove_chunks().await.unwrap());
    }
}

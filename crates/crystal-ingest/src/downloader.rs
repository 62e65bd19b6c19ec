//! Concurrent sitemap chunk downloader
//!
//! Chunks are independent, so they are fetched through a bounded
//! `buffer_unordered` pool. Each worker owns exactly one output file, which
//! is why no locking is needed: locations that would map to the same file
//! name are dropped before any worker starts.
//!
//! A failed chunk is logged and counted, never fatal. Bodies are streamed to
//! `<name>.part` and renamed on completion, so a failed chunk leaves nothing
//! behind in the store.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::http;
use crate::sitemap::SitemapLocation;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffix for chunk files that are still being written
pub const PARTIAL_SUFFIX: &str = ".part";

/// Outcome of [`ChunkDownloader::download_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Locations handed to the downloader
    pub requested: usize,
    pub downloaded: usize,
    pub failed: usize,
    /// Sentinel, unnamed, partial-suffixed, and duplicate-name locations
    pub skipped: usize,
    pub bytes: u64,
    /// The store was already populated and nothing was fetched
    pub skipped_existing: bool,
}

pub struct ChunkDownloader {
    client: Client,
    chunk_dir: PathBuf,
    sentinel_url: String,
    max_workers: usize,
    max_retries: u32,
    retry_backoff: Duration,
    show_progress: bool,
}

impl ChunkDownloader {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        Ok(Self::with_client(http::build_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &IndexConfig) -> Self {
        Self {
            client,
            chunk_dir: config.chunk_store_path.clone(),
            sentinel_url: config.sentinel_url.clone(),
            max_workers: config.max_workers.max(1),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            show_progress: config.show_progress,
        }
    }

    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    /// Download every chunk location into the chunk store.
    ///
    /// If the store already exists and holds anything, the whole step is
    /// skipped: freshness is judged for the directory, not per file.
    pub async fn download_all(&self, locations: &[SitemapLocation]) -> Result<DownloadStats> {
        if store_is_populated(&self.chunk_dir)? {
            info!(
                dir = %self.chunk_dir.display(),
                "Chunk store already populated, skipping download"
            );
            return Ok(DownloadStats {
                requested: locations.len(),
                skipped_existing: true,
                ..Default::default()
            });
        }

        tokio::fs::create_dir_all(&self.chunk_dir).await?;

        let start = Instant::now();
        let mut stats = DownloadStats {
            requested: locations.len(),
            ..Default::default()
        };

        let jobs = self.plan(locations, &mut stats);
        let total = jobs.len();

        info!(
            chunks = total,
            workers = self.max_workers,
            dir = %self.chunk_dir.display(),
            "Downloading sitemap chunks"
        );

        let progress = self.progress_bar(total as u64);

        let results: Vec<Result<u64>> = stream::iter(jobs)
            .map(|(location, target)| {
                let progress = progress.clone();
                async move {
                    let result = self.download_chunk(&location, &target).await;
                    if let Err(ref e) = result {
                        warn!(location = %location, error = %e, "Chunk download failed, skipping");
                    }
                    progress.inc(1);
                    result
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        progress.finish_and_clear();

        for result in results {
            match result {
                Ok(bytes) => {
                    stats.downloaded += 1;
                    stats.bytes += bytes;
                },
                Err(_) => stats.failed += 1,
            }
        }

        info!(
            downloaded = stats.downloaded,
            failed = stats.failed,
            skipped = stats.skipped,
            bytes = stats.bytes,
            "Chunk download complete in {:.2}s",
            start.elapsed().as_secs_f64()
        );

        Ok(stats)
    }

    /// Pair each downloadable location with its target file.
    fn plan(
        &self,
        locations: &[SitemapLocation],
        stats: &mut DownloadStats,
    ) -> Vec<(SitemapLocation, PathBuf)> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(locations.len());

        for location in locations {
            if location.as_str() == self.sentinel_url {
                debug!(location = %location, "Skipping sentinel location");
                stats.skipped += 1;
                continue;
            }

            let Some(name) = location.file_name() else {
                warn!(location = %location, "Location has no file name, skipping");
                stats.skipped += 1;
                continue;
            };

            // Reserved for in-flight downloads and ignored by extraction.
            if name.ends_with(PARTIAL_SUFFIX) {
                warn!(
                    location = %location,
                    file = %name,
                    "Location file name uses the partial-download suffix, skipping"
                );
                stats.skipped += 1;
                continue;
            }

            if !seen.insert(name.clone()) {
                warn!(
                    location = %location,
                    file = %name,
                    "Another location already targets this file, skipping"
                );
                stats.skipped += 1;
                continue;
            }

            jobs.push((location.clone(), self.chunk_dir.join(name)));
        }

        jobs
    }

    /// Download one chunk, retrying with exponential backoff when configured.
    async fn download_chunk(&self, location: &SitemapLocation, target: &Path) -> Result<u64> {
        let mut attempt: u32 = 0;

        loop {
            match self.fetch_to_file(location, target).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    debug!(
                        location = %location,
                        error = %e,
                        attempt,
                        "Retrying chunk in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_to_file(&self, location: &SitemapLocation, target: &Path) -> Result<u64> {
        let url = location.as_str();
        let response = http::get_ok(&self.client, url).await?;
        let partial = partial_path(target);

        let result = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut written = 0u64;
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| IndexError::retrieval(url, e))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }

            file.flush().await?;
            drop(file);
            tokio::fs::rename(&partial, target).await?;
            Ok::<u64, IndexError>(written)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }

        result
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks ({eta})")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}

/// Whether the chunk store exists and has at least one entry.
pub fn store_is_populated(dir: &Path) -> Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

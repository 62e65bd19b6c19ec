//! Identifier extraction from downloaded sitemap chunks
//!
//! Each chunk is a gzip-compressed `<urlset>`. Every entry location becomes
//! one identifier:
//!
//! ```text
//! https://www.dnb.com/business-directory/company-profiles.acme_corp.0a1b.html
//!  `---- 1 ---' `2' `------------------ 3 ------------------' `--- kept ---'
//! ```
//!
//! Chunks that cannot be read contribute nothing. The stream of identifiers
//! carries on with the next chunk.

use crate::downloader::PARTIAL_SUFFIX;
use crate::error::Result;
use crate::sitemap;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Leading `.`-separated segments of a location dropped before the identifier.
pub const DISCARDED_SEGMENTS: usize = 3;

/// Derive the identifier for one entry location.
///
/// Locations with fewer than `DISCARDED_SEGMENTS + 1` segments yield `""`.
pub fn derive_identifier(location: &str) -> String {
    let kept: Vec<&str> = location.split('.').skip(DISCARDED_SEGMENTS).collect();
    kept.join(".")
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

/// Decompress and parse one chunk file into its identifiers.
pub fn extract_file(path: &Path) -> Result<Vec<String>> {
    let source_name = path.display().to_string();
    let file = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(BufReader::new(file)));

    let locations = sitemap::parse_urlset(reader, &source_name)?;
    Ok(locations.iter().map(|loc| derive_identifier(loc)).collect())
}

/// Counters kept while iterating a chunk store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files_read: usize,
    /// Corrupt, empty, or unreadable chunks
    pub files_skipped: usize,
    pub identifiers: usize,
}

/// Lazy identifier stream over a set of chunk files.
///
/// Only one chunk's identifiers are held in memory at a time.
pub struct Identifiers {
    files: std::vec::IntoIter<PathBuf>,
    current: std::vec::IntoIter<String>,
    stats: ExtractStats,
}

impl Identifiers {
    fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files: files.into_iter(),
            current: Vec::new().into_iter(),
            stats: ExtractStats::default(),
        }
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }
}

impl Iterator for Identifiers {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(identifier) = self.current.next() {
                // Downstream stages are line oriented.
                if identifier.contains(['\n', '\r']) {
                    debug!(identifier = %identifier.escape_debug(), "Dropping identifier with line break");
                    continue;
                }
                self.stats.identifiers += 1;
                return Some(identifier);
            }

            let path = self.files.next()?;
            match extract_file(&path) {
                Ok(identifiers) => {
                    self.stats.files_read += 1;
                    self.current = identifiers.into_iter();
                },
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "Skipping unreadable chunk");
                    self.stats.files_skipped += 1;
                },
            }
        }
    }
}

/// Reads every chunk in a chunk store directory
pub struct IdentifierExtractor {
    chunk_dir: PathBuf,
}

impl IdentifierExtractor {
    pub fn new(chunk_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunk_dir: chunk_dir.into(),
        }
    }

    /// Chunk files in file-name order. Partial downloads and non-files are ignored.
    pub fn chunk_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&self.chunk_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let partial = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(PARTIAL_SUFFIX));
            if partial {
                continue;
            }
            files.push(path);
        }

        files.sort();
        Ok(files)
    }

    pub fn identifiers(&self) -> Result<Identifiers> {
        Ok(Identifiers::new(self.chunk_files()?))
    }

    /// Write every identifier, newline terminated, to `writer`.
    ///
    /// Chunk failures are absorbed by the iterator; only write errors surface.
    pub fn extract_all<W: Write>(&self, writer: W) -> Result<ExtractStats> {
        let start = Instant::now();
        let mut identifiers = self.identifiers()?;

        info!(
            dir = %self.chunk_dir.display(),
            chunks = identifiers.files.len(),
            "Extracting identifiers"
        );

        let mut writer = BufWriter::new(writer);
        for identifier in identifiers.by_ref() {
            writer.write_all(identifier.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        let stats = identifiers.stats().clone();
        info!(
            files_read = stats.files_read,
            files_skipped = stats.files_skipped,
            identifiers = stats.identifiers,
            "Extraction complete in {:.2}s",
            start.elapsed().as_secs_f64()
        );

        Ok(stats)
    }
}

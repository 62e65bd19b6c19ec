//! Shard writer
//!
//! Splits a sorted identifier stream into `index_<char>.txt` files keyed by
//! the leading character. Shards are opened in append mode, so re-running
//! against an existing directory adds to it rather than replacing it.

use crate::error::{IndexError, Result};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Shard file name for a leading character.
///
/// The empty identifier has no leading character and maps to `index_.txt`.
/// Path separators and control characters are written as `u<HEX4>`.
pub fn shard_file_name(leading: Option<char>) -> String {
    match leading {
        None => "index_.txt".to_string(),
        Some(c) if c == '/' || c == '\\' || c.is_control() => {
            format!("index_u{:04X}.txt", c as u32)
        },
        Some(c) => format!("index_{}.txt", c),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub lines: usize,
    /// Contiguous groups written (one shard open each)
    pub runs: usize,
    /// Shard file names touched by this call
    pub shards: BTreeSet<String>,
}

pub struct Partitioner {
    output_dir: PathBuf,
}

impl Partitioner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Append every line of `sorted` to the shard for its leading character.
    ///
    /// Lines are grouped into maximal runs with the same leading character;
    /// each run is streamed to its shard and flushed before the next begins.
    pub fn partition<R: BufRead>(&self, mut sorted: R) -> Result<PartitionStats> {
        let start = Instant::now();
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| IndexError::partition(&self.output_dir, e))?;

        let mut stats = PartitionStats::default();
        let mut shard: Option<ShardWriter> = None;
        let mut line = String::new();

        loop {
            line.clear();
            let read = sorted
                .read_line(&mut line)
                .map_err(|e| IndexError::partition(&self.output_dir, e))?;
            if read == 0 {
                break;
            }
            let entry = line.strip_suffix('\n').unwrap_or(&line);
            let entry = entry.strip_suffix('\r').unwrap_or(entry);
            let leading = entry.chars().next();

            if shard.as_ref().map(|s| s.leading) != Some(leading) {
                if let Some(done) = shard.take() {
                    done.finish()?;
                }
                let name = shard_file_name(leading);
                let opened = ShardWriter::open(&self.output_dir, &name, leading)?;
                stats.runs += 1;
                stats.shards.insert(name);
                shard = Some(opened);
            }

            if let Some(current) = shard.as_mut() {
                current.write_line(entry)?;
            }
            stats.lines += 1;
        }

        if let Some(done) = shard.take() {
            done.finish()?;
        }

        info!(
            dir = %self.output_dir.display(),
            lines = stats.lines,
            runs = stats.runs,
            shards = stats.shards.len(),
            "Partitioning complete in {:.2}s",
            start.elapsed().as_secs_f64()
        );

        Ok(stats)
    }
}

/// Open shard for the current run
struct ShardWriter {
    leading: Option<char>,
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl ShardWriter {
    fn open(dir: &Path, name: &str, leading: Option<char>) -> Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| IndexError::partition(&path, e))?;

        Ok(Self {
            leading,
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    fn write_line(&mut self, entry: &str) -> Result<()> {
        self.writer
            .write_all(entry.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| IndexError::partition(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| IndexError::partition(&self.path, e))?;
        debug!(shard = %self.path.display(), lines = self.lines, "Shard run written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap()
    }

    #[test]
    fn test_shard_file_names() {
        assert_eq!(shard_file_name(Some('a')), "index_a.txt");
        assert_eq!(shard_file_name(Some('Z')), "index_Z.txt");
        assert_eq!(shard_file_name(Some('0')), "index_0.txt");
        assert_eq!(shard_file_name(Some('é')), "index_é.txt");
        assert_eq!(shard_file_name(Some('/')), "index_u002F.txt");
        assert_eq!(shard_file_name(Some('\\')), "index_u005C.txt");
        assert_eq!(shard_file_name(Some('\t')), "index_u0009.txt");
        assert_eq!(shard_file_name(None), "index_.txt");
    }

    #[test]
    fn test_partition_groups_by_leading_char() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Partitioner::new(dir.path())
            .partition("alpha\napple\nbanana\n".as_bytes())
            .unwrap();

        assert_eq!(read(dir.path(), "index_a.txt"), "alpha\napple\n");
        assert_eq!(read(dir.path(), "index_b.txt"), "banana\n");
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.runs, 2);
        assert_eq!(
            stats.shards.into_iter().collect::<Vec<_>>(),
            vec!["index_a.txt", "index_b.txt"]
        );
    }

    #[test]
    fn test_second_run_appends() {
        let dir = tempfile::tempdir().unwrap();
        let partitioner = Partitioner::new(dir.path());

        partitioner.partition("cat\n".as_bytes()).unwrap();
        partitioner.partition("car\n".as_bytes()).unwrap();

        assert_eq!(read(dir.path(), "index_c.txt"), "cat\ncar\n");
    }

    #[test]
    fn test_empty_identifier_goes_to_bare_shard() {
        let dir = tempfile::tempdir().unwrap();
        Partitioner::new(dir.path())
            .partition("\n\nzeta".as_bytes())
            .unwrap();

        assert_eq!(read(dir.path(), "index_.txt"), "\n\n");
        assert_eq!(read(dir.path(), "index_z.txt"), "zeta\n");
    }

    #[test]
    fn test_case_variants_get_separate_shards() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Partitioner::new(dir.path())
            .partition("Acme\napex\n/root\n".as_bytes())
            .unwrap();

        assert_eq!(read(dir.path(), "index_A.txt"), "Acme\n");
        assert_eq!(read(dir.path(), "index_a.txt"), "apex\n");
        assert_eq!(read(dir.path(), "index_u002F.txt"), "/root\n");
        assert_eq!(stats.shards.len(), 3);
    }

    #[test]
    fn test_non_contiguous_runs_reopen_shard() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Partitioner::new(dir.path())
            .partition("a1\nb1\na2\n".as_bytes())
            .unwrap();

        assert_eq!(read(dir.path(), "index_a.txt"), "a1\na2\n");
        assert_eq!(stats.runs, 3);
        assert_eq!(stats.shards.len(), 2);
    }

    #[test]
    fn test_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("indexes").join("v1");
        Partitioner::new(&nested).partition("x\n".as_bytes()).unwrap();
        assert_eq!(read(&nested, "index_x.txt"), "x\n");
    }

    #[test]
    fn test_unreadable_input_is_partition_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Partitioner::new(dir.path())
            .partition(&b"ok\n\xff\n"[..])
            .unwrap_err();

        assert_eq!(err.stage(), "partition");
        assert_eq!(read(dir.path(), "index_o.txt"), "ok\n");
    }

    #[test]
    fn test_unwritable_output_is_partition_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let err = Partitioner::new(&blocker)
            .partition("x\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, IndexError::Partition { .. }));
    }
}

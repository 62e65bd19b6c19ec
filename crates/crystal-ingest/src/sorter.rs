//! External merge sort with case-insensitive deduplication
//!
//! Input is consumed in memory-bounded runs. Each run is sorted, deduplicated,
//! and spilled to a scratch directory; the runs are then combined with a
//! k-way heap merge that drops duplicates as they meet. When there are more
//! runs than the fan-in allows, intermediate passes collapse them first.
//!
//! Input that fits in a single run never touches the disk.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};

fn folded(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

/// Case-insensitive order, ties broken by raw bytes.
///
/// Two identifiers compare `Equal` only when they are byte-identical, so the
/// order is total and independent of input order.
pub fn compare_identifiers(a: &str, b: &str) -> Ordering {
    folded(a).cmp(folded(b)).then_with(|| a.cmp(b))
}

/// Whether two identifiers are the same entry once case is ignored.
pub fn same_identifier(a: &str, b: &str) -> bool {
    folded(a).eq(folded(b))
}

/// Sort in place and keep the first (byte-smallest) spelling of each entry.
fn sort_unique_in_memory(lines: &mut Vec<String>) {
    lines.sort_unstable_by(|a, b| compare_identifiers(a, b));
    lines.dedup_by(|later, earlier| same_identifier(earlier, later));
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortStats {
    pub lines_read: usize,
    pub lines_written: usize,
    pub duplicates_removed: usize,
    pub runs_spilled: usize,
    /// Merge passes over spilled runs, including the final one
    pub merge_passes: usize,
}

#[derive(Debug, Clone)]
pub struct ExternalSorter {
    run_capacity_bytes: usize,
    fan_in: usize,
    spill_dir: Option<PathBuf>,
}

impl Default for ExternalSorter {
    fn default() -> Self {
        Self {
            run_capacity_bytes: crate::config::DEFAULT_SORT_RUN_BYTES,
            fan_in: crate::config::DEFAULT_SORT_FAN_IN,
            spill_dir: None,
        }
    }
}

impl ExternalSorter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run size and fan-in from the config, spilling under `work_dir`.
    pub fn from_config(config: &IndexConfig) -> Self {
        Self::default()
            .with_run_capacity(config.sort_run_bytes)
            .with_fan_in(config.sort_fan_in)
            .with_spill_dir(config.work_dir.clone())
    }

    pub fn with_run_capacity(mut self, bytes: usize) -> Self {
        self.run_capacity_bytes = bytes.max(1);
        self
    }

    pub fn with_fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in.max(2);
        self
    }

    /// Parent directory for spill files (system temp dir otherwise)
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    /// Read newline-separated identifiers from `input` and write them to
    /// `output` sorted and deduplicated, one per line.
    pub fn sort_unique<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<SortStats> {
        let start = Instant::now();
        let stats = self.sort_inner(input, output).map_err(IndexError::Sort)?;

        info!(
            lines_read = stats.lines_read,
            lines_written = stats.lines_written,
            duplicates = stats.duplicates_removed,
            runs = stats.runs_spilled,
            passes = stats.merge_passes,
            "Sort complete in {:.2}s",
            start.elapsed().as_secs_f64()
        );

        Ok(stats)
    }

    fn sort_inner<R: BufRead, W: Write>(&self, mut input: R, output: W) -> io::Result<SortStats> {
        let mut stats = SortStats::default();
        let mut buffer: Vec<String> = Vec::new();
        let mut buffered_bytes = 0usize;
        // Created on first spill, removed when dropped.
        let mut spill: Option<SpillArea> = None;
        let mut runs: Vec<PathBuf> = Vec::new();

        while let Some(line) = read_entry(&mut input)? {
            stats.lines_read += 1;
            buffered_bytes += line.len() + std::mem::size_of::<String>();
            buffer.push(line);

            if buffered_bytes >= self.run_capacity_bytes {
                if spill.is_none() {
                    spill = Some(SpillArea::create(self.spill_dir.as_deref())?);
                }
                if let Some(area) = spill.as_mut() {
                    runs.push(area.spill(&mut buffer)?);
                    stats.runs_spilled += 1;
                }
                buffered_bytes = 0;
            }
        }

        let mut output = BufWriter::new(output);

        match spill.as_mut() {
            None => {
                sort_unique_in_memory(&mut buffer);
                for line in &buffer {
                    write_entry(&mut output, line)?;
                }
                stats.lines_written = buffer.len();
            },
            Some(area) => {
                if !buffer.is_empty() {
                    runs.push(area.spill(&mut buffer)?);
                    stats.runs_spilled += 1;
                }
                let written = self.merge_all(area, runs, &mut output, &mut stats)?;
                stats.lines_written = written;
            },
        }

        output.flush()?;
        stats.duplicates_removed = stats.lines_read - stats.lines_written;
        Ok(stats)
    }

    fn merge_all<W: Write>(
        &self,
        area: &mut SpillArea,
        mut runs: Vec<PathBuf>,
        output: &mut W,
        stats: &mut SortStats,
    ) -> io::Result<usize> {
        while runs.len() > self.fan_in {
            debug!(runs = runs.len(), fan_in = self.fan_in, "Intermediate merge pass");

            let mut merged = Vec::with_capacity(runs.len().div_ceil(self.fan_in));
            for group in runs.chunks(self.fan_in) {
                let (path, mut writer) = area.create_run()?;
                merge_runs(group, &mut writer)?;
                writer.flush()?;
                for consumed in group {
                    std::fs::remove_file(consumed)?;
                }
                merged.push(path);
            }

            runs = merged;
            stats.merge_passes += 1;
        }

        stats.merge_passes += 1;
        merge_runs(&runs, output)
    }
}

/// Scratch directory holding spilled runs
struct SpillArea {
    dir: TempDir,
    next_id: usize,
}

impl SpillArea {
    fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("crystal-sort-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!(dir = %dir.path().display(), "Created sort spill directory");
        Ok(Self { dir, next_id: 0 })
    }

    fn create_run(&mut self) -> io::Result<(PathBuf, BufWriter<File>)> {
        let path = self.dir.path().join(format!("run-{:06}", self.next_id));
        self.next_id += 1;
        let writer = BufWriter::new(File::create(&path)?);
        Ok((path, writer))
    }

    /// Sort, dedup and write the buffered lines as a new run, emptying the buffer.
    fn spill(&mut self, buffer: &mut Vec<String>) -> io::Result<PathBuf> {
        sort_unique_in_memory(buffer);
        let (path, mut writer) = self.create_run()?;
        for line in buffer.iter() {
            write_entry(&mut writer, line)?;
        }
        writer.flush()?;
        debug!(lines = buffer.len(), run = %path.display(), "Spilled sort run");
        buffer.clear();
        Ok(path)
    }
}

/// Head of one run in the merge heap
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    line: String,
    source: usize,
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_identifiers(&other.line, &self.line).then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge of sorted runs, dropping entries equal to the last one written.
fn merge_runs<W: Write>(runs: &[PathBuf], output: &mut W) -> io::Result<usize> {
    let mut readers = runs
        .iter()
        .map(|path| File::open(path).map(BufReader::new))
        .collect::<io::Result<Vec<_>>>()?;

    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (source, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = read_entry(reader)? {
            heap.push(HeapEntry { line, source });
        }
    }

    let mut last: Option<String> = None;
    let mut written = 0;

    while let Some(HeapEntry { line, source }) = heap.pop() {
        if let Some(next) = read_entry(&mut readers[source])? {
            heap.push(HeapEntry { line: next, source });
        }

        if last.as_deref().is_some_and(|prev| same_identifier(prev, &line)) {
            continue;
        }

        write_entry(output, &line)?;
        written += 1;
        last = Some(line);
    }

    Ok(written)
}

/// Next line without its terminator, `None` at end of input.
fn read_entry<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

fn write_entry<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")
}

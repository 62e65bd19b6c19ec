//! Error types for the index pipeline
//!
//! Variants are labeled by the stage that produced them. Whether an error is
//! fatal depends on where it surfaces: a `Retrieval` or `Format` error on the
//! sitemap index aborts the run, the same errors on a single chunk are logged
//! and the chunk is dropped.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Transport failure or non-success status for a single request
    #[error("Retrieval failed for {url}: {message}")]
    Retrieval { url: String, message: String },

    /// A document did not have the expected sitemap structure
    #[error("Unexpected document format in {source_name}: {message}")]
    Format {
        source_name: String,
        message: String,
    },

    #[error("External sort failed: {0}")]
    Sort(#[source] std::io::Error),

    #[error("Partitioning failed at {}: {source}", path.display())]
    Partition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IndexError {
    pub fn retrieval(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        IndexError::Retrieval {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn format(source_name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        IndexError::Format {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn partition(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Partition {
            path: path.into(),
            source,
        }
    }

    /// Stage label used in fatal error reports
    pub fn stage(&self) -> &'static str {
        match self {
            IndexError::Retrieval { .. } => "retrieval",
            IndexError::Format { .. } => "format",
            IndexError::Sort(_) => "sort",
            IndexError::Partition { .. } => "partition",
            IndexError::Config(_) => "configuration",
            IndexError::Io(_) => "io",
            IndexError::Task(_) => "task",
        }
    }
}

impl From<crystal_common::CommonError> for IndexError {
    fn from(err: crystal_common::CommonError) -> Self {
        IndexError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels() {
        assert_eq!(IndexError::retrieval("http://x", "404 Not Found").stage(), "retrieval");
        assert_eq!(IndexError::format("chunk.xml.gz", "bad").stage(), "format");
        assert_eq!(
            IndexError::Sort(std::io::Error::other("disk full")).stage(),
            "sort"
        );
        assert_eq!(
            IndexError::partition("index_a.txt", std::io::Error::other("denied")).stage(),
            "partition"
        );
    }

    #[test]
    fn test_messages_name_the_subject() {
        let err = IndexError::retrieval("http://host/index.xml", "503 Service Unavailable");
        assert_eq!(
            err.to_string(),
            "Retrieval failed for http://host/index.xml: 503 Service Unavailable"
        );

        let err = IndexError::partition("out/index_a.txt", std::io::Error::other("denied"));
        assert!(err.to_string().contains("out/index_a.txt"));
    }
}

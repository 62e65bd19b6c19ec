//! Sitemap documents
//!
//! Two XML shapes are involved (sitemaps.org protocol):
//!
//! ```xml
//! <sitemapindex>                      <urlset>
//!   <sitemap><loc>..</loc></sitemap>    <url><loc>..</loc></url>
//! </sitemapindex>                     </urlset>
//! ```
//!
//! Only `loc` is read. Namespaces, `lastmod` and the other optional children
//! are ignored.

use crate::error::{IndexError, Result};
use serde::Deserialize;
use std::io::BufRead;

/// Root of a sitemap index document
#[derive(Debug, Deserialize)]
struct SitemapIndexDoc {
    // No serde default: an index without any <sitemap> is a format error.
    sitemap: Vec<LocEntry>,
}

/// Root of a sitemap chunk
#[derive(Debug, Deserialize)]
struct UrlSetDoc {
    url: Vec<LocEntry>,
}

#[derive(Debug, Deserialize)]
struct LocEntry {
    loc: String,
}

/// URL of one remote sitemap chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SitemapLocation(String);

impl SitemapLocation {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final non-empty path segment, used as the chunk file name.
    ///
    /// The segment is kept percent-encoded. `None` if the location is not an
    /// absolute URL or its path has no usable segment.
    pub fn file_name(&self) -> Option<String> {
        let url = url::Url::parse(&self.0).ok()?;
        let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;

        if segment == "." || segment == ".." {
            return None;
        }
        Some(segment.to_string())
    }
}

impl std::fmt::Display for SitemapLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SitemapLocation {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Parse a sitemap index body into its child locations, in document order.
pub fn parse_index(body: &str, source_name: &str) -> Result<Vec<SitemapLocation>> {
    let doc: SitemapIndexDoc =
        quick_xml::de::from_str(body).map_err(|e| IndexError::format(source_name, e))?;

    Ok(doc
        .sitemap
        .into_iter()
        .map(|entry| SitemapLocation::new(entry.loc))
        .collect())
}

/// Parse an (already decompressed) sitemap chunk into its entry locations.
pub fn parse_urlset<R: BufRead>(reader: R, source_name: &str) -> Result<Vec<String>> {
    let doc: UrlSetDoc =
        quick_xml::de::from_reader(reader).map_err(|e| IndexError::format(source_name, e))?;

    Ok(doc.url.into_iter().map(|entry| entry.loc).collect())
}

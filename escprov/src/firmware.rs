//! Firmware image retrieval and validation.
//!
//! The image is fetched once per run and shared by every unit. It comes from an
//! explicit location (local file or `http(s)://` URL) or, by default, from the
//! newest artifact published for the product:
//!
//! ```text
//! https://files.zubax.com/products/io.px4.sapog/*.compound.bin
//! \________________ index ________________/ \__ file glob __/
//! ```
//!
//! The index page is fetched, its links filtered by the file glob, and the
//! name with the highest embedded version wins. Digit runs compare as numbers,
//! so `2.10` is newer than `2.9`.

use crate::error::{Error, Result};
use log::{debug, info};
use regex::Regex;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// Smallest accepted image is one byte above this.
pub const MIN_IMAGE_SIZE: usize = 30 * 1024;

/// Largest accepted image.
pub const MAX_IMAGE_SIZE: usize = 240 * 1024;

/// Timeout for every firmware HTTP request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote glob of published firmware for `product`.
pub fn default_firmware_glob(product: &str) -> String {
    format!("https://files.zubax.com/products/{product}/*.compound.bin")
}

/// Check the image length against the accepted range.
pub fn validate_size(len: usize) -> Result<()> {
    if len <= MIN_IMAGE_SIZE || len > MAX_IMAGE_SIZE {
        return Err(Error::Validation(format!(
            "image is {len} bytes, expected more than {MIN_IMAGE_SIZE} and at most {MAX_IMAGE_SIZE}"
        )));
    }
    Ok(())
}

/// A validated firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
    source: String,
}

impl FirmwareImage {
    /// Wrap `bytes` loaded from `source`, enforcing the size range.
    pub fn new(bytes: Vec<u8>, source: impl Into<String>) -> Result<Self> {
        validate_size(bytes.len())?;
        Ok(Self {
            bytes,
            source: source.into(),
        })
    }

    /// Image contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false` for a validated image.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Path or URL the image was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Loads firmware images from disk or over HTTP.
pub struct FirmwareFetcher {
    client: reqwest::blocking::Client,
    glob_url: String,
}

impl FirmwareFetcher {
    /// Fetcher resolving the newest image from `glob_url` when no explicit
    /// location is given.
    pub fn new(glob_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Fetch(format!("cannot create HTTP client: {e}")))?;
        Ok(Self {
            client,
            glob_url: glob_url.into(),
        })
    }

    /// Fetcher using a preconfigured HTTP client.
    pub fn with_client(client: reqwest::blocking::Client, glob_url: impl Into<String>) -> Self {
        Self {
            client,
            glob_url: glob_url.into(),
        }
    }

    /// Glob the newest image is resolved from.
    pub fn glob_url(&self) -> &str {
        &self.glob_url
    }

    /// Fetch the image from `explicit`, or the newest published one.
    pub fn fetch(&self, explicit: Option<&str>) -> Result<FirmwareImage> {
        let image = match explicit {
            Some(location) if is_url(location) => {
                FirmwareImage::new(self.get_bytes(location)?, location)?
            },
            Some(location) => load_file(Path::new(location))?,
            None => self.download_newest()?,
        };
        info!(
            "Firmware image: {} ({} bytes)",
            image.source(),
            image.len()
        );
        Ok(image)
    }

    /// Resolve the newest image matching the configured glob and download it.
    pub fn download_newest(&self) -> Result<FirmwareImage> {
        let (base, pattern) = split_glob_url(&self.glob_url)?;
        debug!("Looking for {pattern} under {base}/");

        let index = self.get_bytes(&format!("{base}/"))?;
        let index = String::from_utf8_lossy(&index);
        let name = newest_matching(&index, pattern)?.ok_or_else(|| {
            Error::Fetch(format!("no firmware matching {} was found", self.glob_url))
        })?;

        let url = format!("{base}/{name}");
        FirmwareImage::new(self.get_bytes(&url)?, url)
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Fetch(format!("{url}: HTTP {}", resp.status())));
        }
        let body = resp
            .bytes()
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        Ok(body.to_vec())
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn load_file(path: &Path) -> Result<FirmwareImage> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Fetch(format!("cannot read {}: {e}", path.display())))?;
    FirmwareImage::new(bytes, path.display().to_string())
}

/// Split `https://host/dir/*.bin` into `https://host/dir` and `*.bin`.
fn split_glob_url(glob_url: &str) -> Result<(&str, &str)> {
    match glob_url.rsplit_once('/') {
        Some((base, pattern)) if is_url(base) && !pattern.is_empty() => Ok((base, pattern)),
        _ => Err(Error::Config(format!(
            "firmware glob must look like https://host/dir/<pattern>, got {glob_url:?}"
        ))),
    }
}

/// Newest file name linked from `index` that matches `pattern`.
pub fn newest_matching(index: &str, pattern: &str) -> Result<Option<String>> {
    let pattern = glob::Pattern::new(pattern)
        .map_err(|e| Error::Config(format!("invalid firmware pattern {pattern:?}: {e}")))?;
    Ok(extract_links(index)
        .into_iter()
        .filter(|name| pattern.matches(name))
        .max_by(|a, b| compare_versions(a, b)))
}

/// Order artifact names with digit runs compared numerically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_key(a).cmp(&version_key(b))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart<'a> {
    Text(&'a str),
    // Significant digit count first, then the digits; no overflow on long runs
    Number(usize, &'a str),
}

fn version_key(name: &str) -> Vec<VersionPart<'_>> {
    let mut parts = Vec::new();
    let mut rest = name;
    while let Some(first) = rest.chars().next() {
        let is_digit = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != is_digit)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        parts.push(if is_digit {
            let digits = chunk.trim_start_matches('0');
            VersionPart::Number(digits.len(), digits)
        } else {
            VersionPart::Text(chunk)
        });
        rest = tail;
    }
    parts
}

#[allow(clippy::unwrap_used)] // Static pattern
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|[\s<])href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

/// File names of all `href` targets in an HTML index page.
fn extract_links(index: &str) -> Vec<String> {
    HREF.captures_iter(index)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|target| {
            let target = target.as_str().split(['?', '#']).next()?;
            target
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
        .collect()
}

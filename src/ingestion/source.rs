//! Source location resolution and decompression.
//!
//! A location is either an HTTP(S) URL, a `file://` URL or a plain path. The
//! opened byte stream is sniffed for the gzip magic and wrapped in a
//! streaming decoder; nothing is buffered beyond the decoder's own window.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use tracing::{debug, info};
use url::Url;

use crate::error::{IngestError, Result};

/// Where the CSV bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocation {
    Http(Url),
    File(PathBuf),
}

impl SourceLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(IngestError::Config("source location is empty".to_string()));
        }
        match Url::parse(location) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(SourceLocation::Http(url)),
                "file" => url.to_file_path().map(SourceLocation::File).map_err(|_| {
                    IngestError::Config(format!("invalid file URL '{}'", location))
                }),
                // Windows drive letters parse as a one-letter scheme.
                scheme if scheme.len() == 1 => Ok(SourceLocation::File(PathBuf::from(location))),
                scheme => Err(IngestError::Config(format!(
                    "unsupported source scheme '{}'",
                    scheme
                ))),
            },
            Err(_) => Ok(SourceLocation::File(PathBuf::from(location))),
        }
    }

    /// Whether the location's name claims gzip content.
    pub fn has_gzip_extension(&self) -> bool {
        let name = match self {
            SourceLocation::Http(url) => url.path().to_string(),
            SourceLocation::File(path) => path.to_string_lossy().into_owned(),
        };
        name.to_ascii_lowercase().ends_with(".gz")
    }

    /// Open the raw (possibly compressed) byte stream.
    pub fn open(&self) -> Result<Box<dyn Read>> {
        match self {
            SourceLocation::Http(url) => {
                info!(url = %url, "Downloading source");
                // The body is streamed for as long as the file takes; only
                // connecting is bounded.
                let client = reqwest::blocking::Client::builder()
                    .connect_timeout(Duration::from_secs(30))
                    .timeout(None)
                    .build()?;
                let response = client.get(url.clone()).send()?.error_for_status()?;
                debug!(status = %response.status(), "Source responded");
                Ok(Box::new(response))
            }
            SourceLocation::File(path) => {
                info!(path = %path.display(), "Reading source file");
                let file = File::open(path).map_err(|e| {
                    IngestError::Transport(format!("cannot open {}: {}", path.display(), e))
                })?;
                Ok(Box::new(file))
            }
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Http(url) => write!(f, "{}", url),
            SourceLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Detected compression format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Detect compression format from magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [0x1f, 0x8b, ..] => Compression::Gzip,
            _ => Compression::None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}

/// Peek at the head of `raw`, pick a decoder and return the decoded stream.
///
/// `expect_gzip` turns a missing gzip magic into a `DecodeError` instead of a
/// plain-text fallback.
pub fn decompress(mut raw: Box<dyn Read>, expect_gzip: bool) -> Result<Box<dyn Read>> {
    let mut head = [0u8; 2];
    let mut filled = 0;
    while filled < head.len() {
        match raw.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IngestError::from_stream_io(e)),
        }
    }

    let compression = Compression::detect(&head[..filled]);
    debug!(compression = %compression, "Detected source compression");

    let stream = Cursor::new(head[..filled].to_vec()).chain(raw);
    match compression {
        Compression::Gzip => Ok(Box::new(MultiGzDecoder::new(stream))),
        Compression::None if expect_gzip => Err(IngestError::Decode(
            "source is named .gz but does not start with a gzip header".to_string(),
        )),
        Compression::None => Ok(Box::new(stream)),
    }
}

/// Resolve, open and decode a location in one step.
pub fn open_decoded(location: &SourceLocation) -> Result<Box<dyn Read>> {
    let raw = location.open()?;
    decompress(raw, location.has_gzip_extension())
}

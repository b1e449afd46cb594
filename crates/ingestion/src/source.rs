//! Source file provider: local paths in place, remote URLs via a temp file.

use std::fs::File;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::config::FetchOptions;
use crate::error::{EtlError, Result};

/// A readable, seekable source file.
///
/// Remote downloads live in a temp file removed when this value is dropped,
/// whether or not the ingest succeeded.
#[derive(Debug)]
pub struct SourceFile {
    location: String,
    path: PathBuf,
    _download: Option<NamedTempFile>,
}

impl SourceFile {
    /// Resolve `location` to a local file, downloading it when remote.
    #[instrument(skip(options))]
    pub async fn fetch(location: &str, options: &FetchOptions) -> Result<Self> {
        if is_remote(location) {
            return Self::download(location, options).await;
        }

        let path = PathBuf::from(location.strip_prefix("file://").unwrap_or(location));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(EtlError::source_fetch(location, "file not found"));
        }

        debug!(path = %path.display(), "Using local source");
        Ok(Self {
            location: location.to_string(),
            path,
            _download: None,
        })
    }

    async fn download(url: &str, options: &FetchOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| EtlError::source_fetch(url, e))?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| EtlError::source_fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::source_fetch(url, format!("HTTP {}", status)));
        }

        let download = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(download.reopen()?);
        let mut stream = response.bytes_stream();
        let mut bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EtlError::source_fetch(url, e))?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        info!(url = %url, bytes, "Downloaded source");
        Ok(Self {
            location: url.to_string(),
            path: download.path().to_path_buf(),
            _download: Some(download),
        })
    }

    /// Where the source came from (URL or path as given).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Local path of the readable file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_remote(&self) -> bool {
        self._download.is_some()
    }

    /// Open the file from the start.
    pub fn open(&self) -> Result<File> {
        Ok(File::open(&self.path)?)
    }
}

fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://data.cityofchicago.org/api/views/x/rows.csv"));
        assert!(is_remote("HTTP://example.com/a.csv"));
        assert!(!is_remote("/tmp/a.csv"));
        assert!(!is_remote("file:///tmp/a.csv"));
    }

    #[tokio::test]
    async fn test_local_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let source = SourceFile::fetch(path.to_str().unwrap(), &FetchOptions::default())
            .await
            .unwrap();
        assert!(!source.is_remote());

        let mut contents = String::new();
        source.open().unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_file_scheme_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "a\n").unwrap();

        let location = format!("file://{}", path.display());
        let source = SourceFile::fetch(&location, &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(source.path(), path.as_path());
        assert_eq!(source.location(), location);
    }

    #[tokio::test]
    async fn test_missing_local_source() {
        let err = SourceFile::fetch("/definitely/not/here.csv", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::SourceFetch { .. }));
    }
}

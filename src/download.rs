//! HTTP downloads
//!
//! The [`Downloader`] trait is the only network seam in the crate; the file
//! resolver calls it one URL at a time.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::error::{Result, TidepkgError};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches one URL to a local path
pub trait Downloader {
    /// Download `url` to `dest`. On error `dest` may be left partially
    /// written; callers remove it.
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Blocking reqwest downloader
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// Create a downloader with the default timeout
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("tidepkg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TidepkgError::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading {}", url);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| TidepkgError::Download(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(TidepkgError::Download(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let mut file = File::create(dest)?;
        io::copy(&mut response, &mut file)
            .map_err(|e| TidepkgError::Download(format!("{}: {}", url, e)))?;

        debug!("Saved {} to {}", url, dest.display());
        Ok(())
    }
}

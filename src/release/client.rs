use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use super::{ReleaseDescriptor, latest_release_url};
use crate::config::UpdaterConfig;
use crate::constants::{MAX_RETRY_DELAY, METADATA_TIMEOUT, USER_AGENT};
use crate::core::UpkeepError;
use crate::utils::progress::DownloadProgress;

/// Failure of one request attempt, split by whether another attempt can help.
#[derive(Debug)]
enum AttemptError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl AttemptError {
    const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Transient(e) | Self::Permanent(e) => e,
        }
    }

    /// 5xx and 429 are worth retrying, other non-success statuses are not.
    fn from_status(status: StatusCode, url: &str) -> Self {
        let error = anyhow!("HTTP {status} from {url}");
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(error)
        } else {
            Self::Permanent(error)
        }
    }

    fn network(operation: &str, error: &reqwest::Error) -> Self {
        Self::Transient(
            UpkeepError::Network {
                operation: operation.to_string(),
                reason: error.to_string(),
            }
            .into(),
        )
    }
}

/// HTTP access to release metadata and assets.
///
/// Every request carries the updater's user agent and goes through the
/// configured proxy, or directly when none is configured. Metadata requests
/// time out individually; a download is bounded by an overall deadline that
/// covers all of its attempts.
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::config::UpdaterConfig;
/// use upkeep_cli::release::ReleaseClient;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = ReleaseClient::new(&UpdaterConfig::default(), false)?;
/// let release = client.fetch_latest("acme", "widget").await?;
/// let asset = release.select_asset()?;
/// client.download(&asset.browser_download_url, Path::new("update.tar.gz")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    http: reqwest::Client,
    api_base: String,
    max_retries: usize,
    download_timeout: Duration,
    show_progress: bool,
}

impl ReleaseClient {
    /// Builds a client from the effective configuration.
    ///
    /// # Errors
    ///
    /// Fails when the proxy URL is invalid.
    pub fn new(config: &UpdaterConfig, show_progress: bool) -> Result<Self> {
        // Only the configured proxy is used, never HTTP_PROXY and friends
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT).no_proxy();
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| UpkeepError::ConfigError {
                message: format!("invalid proxy '{proxy}': {e}"),
            })?;
            builder = builder.proxy(proxy);
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            max_retries: config.max_retries,
            download_timeout: config.download_timeout(),
            show_progress,
        })
    }

    /// The underlying HTTP client, shared with the shutdown notification.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Delays between attempts: 500ms doubling up to [`MAX_RETRY_DELAY`],
    /// `max_retries` of them.
    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(MAX_RETRY_DELAY)
            .take(self.max_retries)
    }

    /// Fetches the latest release of `owner/name`.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::ReleaseUnavailable`] when every attempt failed or the
    /// response is not a release descriptor.
    pub async fn fetch_latest(&self, owner: &str, name: &str) -> Result<ReleaseDescriptor> {
        let url = latest_release_url(&self.api_base, owner, name);
        info!("Fetching release metadata from {}", url);

        let result = RetryIf::spawn(
            self.retry_strategy(),
            || self.fetch_once(&url),
            |e: &AttemptError| {
                if e.is_transient() {
                    warn!("Release metadata request failed, retrying: {}", describe(e));
                }
                e.is_transient()
            },
        )
        .await;

        result.map_err(|e| {
            let cause = e.into_inner();
            let reason = format!("{cause:#}");
            cause.context(UpkeepError::ReleaseUnavailable {
                url,
                reason,
            })
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<ReleaseDescriptor, AttemptError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| AttemptError::network("fetch release metadata", &e))?;

        if !response.status().is_success() {
            return Err(AttemptError::from_status(response.status(), url));
        }

        response.json::<ReleaseDescriptor>().await.map_err(|e| {
            if e.is_decode() {
                AttemptError::Permanent(anyhow!("Malformed release descriptor: {e}"))
            } else {
                AttemptError::network("read release metadata", &e)
            }
        })
    }

    /// Downloads `url` to `dest`, replacing any partial file from an earlier attempt.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::DownloadFailed`] once the retries are exhausted, a
    /// non-retryable status is returned, or the overall deadline passes.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let label = dest.file_name().map_or_else(
            || "download".to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        let progress = DownloadProgress::new(self.show_progress, label);
        let attempts = AtomicUsize::new(0);

        info!("Downloading {} to {}", url, dest.display());
        let work = RetryIf::spawn(
            self.retry_strategy(),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                progress.reset();
                self.download_once(url, dest, &progress)
            },
            |e: &AttemptError| {
                if e.is_transient() {
                    warn!("Download attempt failed, retrying: {}", describe(e));
                }
                e.is_transient()
            },
        );

        let outcome = tokio::time::timeout(self.download_timeout, work).await;
        progress.finish();

        let failed = || UpkeepError::DownloadFailed {
            url: url.to_string(),
            attempts: attempts.load(Ordering::SeqCst),
        };
        match outcome {
            Ok(Ok(bytes)) => {
                info!("Downloaded {} bytes", bytes);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into_inner().context(failed())),
            Err(_) => Err(anyhow::Error::new(failed()).context(format!(
                "Download deadline of {}s exceeded",
                self.download_timeout.as_secs()
            ))),
        }
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        progress: &DownloadProgress,
    ) -> Result<u64, AttemptError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::network("download asset", &e))?;

        if !response.status().is_success() {
            return Err(AttemptError::from_status(response.status(), url));
        }

        let expected = response.content_length();
        progress.set_length(expected);

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            AttemptError::Permanent(
                anyhow::Error::new(e).context(format!("Failed to create {}", dest.display())),
            )
        })?;

        let local_error = |e: std::io::Error| {
            AttemptError::Permanent(
                anyhow::Error::new(e).context(format!("Failed to write {}", dest.display())),
            )
        };

        let mut written = 0u64;
        while let Some(chunk) =
            response.chunk().await.map_err(|e| AttemptError::network("read asset body", &e))?
        {
            file.write_all(&chunk).await.map_err(local_error)?;
            written += chunk.len() as u64;
            progress.inc(chunk.len() as u64);
        }
        file.flush().await.map_err(local_error)?;
        file.sync_all().await.map_err(local_error)?;

        if let Some(expected) = expected
            && expected != written
        {
            return Err(AttemptError::Transient(anyhow!(
                "Short download: expected {expected} bytes, got {written}"
            )));
        }

        debug!("Wrote {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

fn describe(e: &AttemptError) -> String {
    match e {
        AttemptError::Transient(inner) | AttemptError::Permanent(inner) => format!("{inner:#}"),
    }
}

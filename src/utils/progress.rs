//! Progress reporting for long transfers.
//!
//! Bars draw on stderr so stdout stays reserved for JSON results. A bar built
//! with `enabled == false` is hidden and silently ignores every update, so
//! callers never branch on the progress setting.

use indicatif::{ProgressBar as IndicatifBar, ProgressDrawTarget, ProgressStyle};

/// Byte-oriented progress for a download.
///
/// # Examples
///
/// ```rust
/// use upkeep_cli::utils::progress::DownloadProgress;
///
/// let progress = DownloadProgress::new(false, "app-linux-x64.tar.gz");
/// progress.set_length(Some(1024));
/// progress.inc(512);
/// progress.reset();
/// progress.inc(1024);
/// progress.finish();
/// ```
#[derive(Clone)]
pub struct DownloadProgress {
    inner: IndicatifBar,
}

impl DownloadProgress {
    pub fn new(enabled: bool, label: impl Into<String>) -> Self {
        let bar = if enabled {
            let bar = IndicatifBar::with_draw_target(None, ProgressDrawTarget::stderr());
            bar.set_style(download_style());
            bar
        } else {
            IndicatifBar::hidden()
        };
        bar.set_prefix(label.into());
        Self { inner: bar }
    }

    /// Sets the expected size, `None` when the server did not announce one.
    pub fn set_length(&self, len: Option<u64>) {
        match len {
            Some(len) => self.inner.set_length(len),
            None => self.inner.unset_length(),
        }
    }

    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    /// Starts over for a retried attempt.
    pub fn reset(&self) {
        self.inner.set_position(0);
    }

    pub fn finish(&self) {
        self.inner.finish_and_clear();
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }
}

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .map(|style| style.progress_chars("━╸━"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

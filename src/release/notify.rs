use std::time::Duration;
use tracing::{info, warn};

use crate::constants::WEBHOOK_TIMEOUT;

/// Asks the running application to shut down before its files are replaced.
///
/// Sends one GET to `url`. On a successful response the application gets
/// `grace` to exit before the caller continues. Every failure is logged and
/// swallowed: the unlock wait that follows is what actually guards the apply.
/// Returns whether the application acknowledged the request.
pub async fn notify_shutdown(http: &reqwest::Client, url: &str, grace: Duration) -> bool {
    info!("Requesting application shutdown via {}", url);

    match http.get(url).timeout(WEBHOOK_TIMEOUT).send().await {
        Ok(response) if response.status().is_success() => {
            info!("Application acknowledged shutdown, waiting {:?}", grace);
            tokio::time::sleep(grace).await;
            true
        }
        Ok(response) => {
            warn!("Shutdown request returned HTTP {}", response.status());
            false
        }
        Err(e) => {
            warn!("Shutdown request failed: {}", e);
            false
        }
    }
}

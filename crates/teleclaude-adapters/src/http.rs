//! Shared HTTP client settings for platform APIs.

use reqwest::Client;
use std::time::Duration;

/// Upper bound on one platform API request.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client whose requests give up after [`REQUEST_TIMEOUT`].
pub(crate) fn client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "HTTP client setup failed, falling back to defaults");
            Client::new()
        })
}

//! Optional push mode: periodic shipment of the scrape payload to a
//! remote gateway.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collector::CollectorRegistrar;
use crate::http::encode_metrics;

/// Request timeout for push deliveries.
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Push delivery settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub api_key: String,
    pub interval: Duration,
}

/// Ship the current sample set to the configured URL on every interval
/// until the token is cancelled. Delivery failures are logged and the
/// loop keeps going.
pub async fn run_push_loop(
    registrar: CollectorRegistrar,
    config: PushConfig,
    token: CancellationToken,
) {
    let client = match reqwest::Client::builder().timeout(PUSH_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to create push client; push mode disabled");
            return;
        }
    };

    tracing::info!(url = %config.url, interval = ?config.interval, "push mode enabled");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("push: exit signaled");
                return;
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        let payload = encode_metrics(&registrar).await;

        let result = client
            .post(&config.url)
            .header(API_KEY_HEADER, &config.api_key)
            .header(reqwest::header::CONTENT_TYPE, prometheus::TEXT_FORMAT)
            .body(payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("metrics pushed");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "push rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "push failed");
            }
        }
    }
}

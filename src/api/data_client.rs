//! Read-only client for the exchange's data API: activity feed, positions,
//! portfolio value.

use anyhow::{Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

use super::types::{ActivityEntry, PositionEntry, ValueResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the data API (read-only operations).
pub struct DataClient {
    client: Client,
    activity_host: String,
    data_host: String,
}

impl DataClient {
    pub fn new(activity_host: &str, data_host: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            activity_host: activity_host.trim_end_matches('/').to_string(),
            data_host: data_host.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch recent activity for a leader, newest first.
    pub async fn get_activity(&self, address: &str, limit: u32) -> Result<Vec<ActivityEntry>> {
        let url = format!(
            "{}/activity?user={}&limit={}",
            self.activity_host,
            address,
            limit.min(500)
        );

        debug!(url = %url, "Fetching activity");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch activity")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Activity request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse activity response")
    }

    /// Fetch current positions for any address (leader or follower).
    pub async fn get_positions(&self, address: &str) -> Result<Vec<PositionEntry>> {
        let url = format!("{}/positions?user={}&limit=500", self.data_host, address);

        debug!(url = %url, "Fetching positions");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch positions")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Positions request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse positions response")
    }

    /// Fetch available USDC balance for an address via the value endpoint.
    pub async fn get_balance(&self, address: &str) -> Result<Decimal> {
        let url = format!("{}/value?user={}", self.data_host, address);

        debug!(url = %url, "Fetching balance");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch balance")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Balance request failed: {} - {}", status, body);
        }

        let value: ValueResponse = response
            .json()
            .await
            .context("Failed to parse balance response")?;

        Decimal::try_from(value.value).context("Balance is not a valid decimal")
    }
}

//! Single-call host administration
//!
//! Each operation validates its input, submits one chain call, then mirrors the
//! change into the local `HostConfig` when that field is stored locally.

use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::{HostAdmin, HostInfo, PriceType, TokenApprovals};
use crate::config::{ConfigStore, HostConfig};
use crate::error::{HostError, Result};
use crate::events::{Progress, ProgressSink};
use crate::probe::extract_host_port;
use crate::validator::{validate_additional_stake, validate_models, validate_price, validate_public_url};

pub struct AdminService {
    chain: Arc<dyn HostAdmin>,
    approvals: Arc<dyn TokenApprovals>,
    config: Arc<dyn ConfigStore>,
    progress: ProgressSink,
}

impl AdminService {
    pub fn new(
        chain: Arc<dyn HostAdmin>,
        approvals: Arc<dyn TokenApprovals>,
        config: Arc<dyn ConfigStore>,
        progress: ProgressSink,
    ) -> Self {
        Self {
            chain,
            approvals,
            config,
            progress,
        }
    }

    /// Stake more tokens, approving the allowance first unless told not to
    pub async fn add_stake(&self, amount: &str, skip_approval: bool) -> Result<String> {
        validate_additional_stake(amount).check()?;

        if !skip_approval {
            let allowance = self.approvals.check_allowance().await?;
            if parse_amount(&allowance) < parse_amount(amount) {
                self.progress.emit(Progress::ApprovingTokens {
                    amount: amount.to_string(),
                });
                let tx = self.approvals.approve_token(amount).await?;
                info!(tx = %tx, amount, "Token approval confirmed");
            }
        }

        self.progress.emit(Progress::SubmittingTransaction { action: "stake" });
        let tx = self.chain.add_stake(amount).await?;
        info!(tx = %tx, amount, "Stake added");
        Ok(tx)
    }

    pub async fn update_url(&self, url: &str) -> Result<String> {
        validate_public_url(url).check()?;
        let endpoint = extract_host_port(url)?;

        self.progress.emit(Progress::SubmittingTransaction { action: "API URL update" });
        let tx = self.chain.update_api_url(url).await?;

        self.update_local(|config| {
            config.public_url = url.to_string();
            config.inference_port = endpoint.port;
        })
        .await?;

        info!(tx = %tx, url, "API URL updated");
        Ok(tx)
    }

    pub async fn update_models(&self, models: &[String]) -> Result<String> {
        validate_models(models).check()?;

        self.progress.emit(Progress::SubmittingTransaction { action: "model update" });
        let tx = self.chain.update_supported_models(models).await?;

        self.update_local(|config| config.models = models.to_vec()).await?;

        info!(tx = %tx, count = models.len(), "Supported models updated");
        Ok(tx)
    }

    pub async fn update_pricing(&self, price_per_token: u64) -> Result<String> {
        validate_price(price_per_token).check()?;

        self.progress.emit(Progress::SubmittingTransaction { action: "pricing update" });
        let tx = self.chain.update_pricing(price_per_token).await?;

        self.update_local(|config| config.price_per_token = price_per_token)
            .await?;

        info!(tx = %tx, price_per_token, "Pricing updated");
        Ok(tx)
    }

    /// Per-model prices live only on-chain
    pub async fn set_model_pricing(&self, model: &str, price: u64, price_type: PriceType) -> Result<String> {
        validate_models(&[model.to_string()]).check()?;
        validate_price(price).check()?;

        self.progress.emit(Progress::SubmittingTransaction {
            action: "model pricing",
        });
        let tx = self.chain.set_model_pricing(model, price, price_type).await?;
        info!(tx = %tx, model, price, price_type = ?price_type, "Model pricing set");
        Ok(tx)
    }

    pub async fn info(&self, address: Option<&str>) -> Result<HostInfo> {
        Ok(self.chain.host_info(address).await?)
    }

    async fn update_local<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut HostConfig),
    {
        match self.config.load().await? {
            Some(mut config) => {
                apply(&mut config);
                self.config.save(&config).await?;
                if config.has_process() {
                    warn!("Node is running with the previous settings; restart it to apply the change");
                }
            }
            None => warn!("No local configuration found; on-chain update applied only"),
        }
        Ok(())
    }
}

/// Parse a model list file: a JSON array, or one id per line with `#` comments
pub fn parse_models_file(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| HostError::Validation(format!("Invalid JSON model list: {}", e)));
    }

    Ok(trimmed
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn parse_amount(amount: &str) -> f64 {
    amount.trim().parse().unwrap_or(0.0)
}

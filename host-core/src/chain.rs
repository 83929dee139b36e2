//! Chain-facing capabilities and the HTTP gateway client
//!
//! The orchestrator only sees narrow capability traits:
//! - `ChainRegistrar`: status, requirements, stake+register, unregister
//! - `TokenApprovals`: allowance check and approval
//! - `HostAdmin`: single-call host updates (stake, URL, models, pricing, info)
//!
//! `GatewayClient` implements all three against a JSON gateway that fronts the
//! marketplace contracts. Transactions are confirmed gateway-side before it answers.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("llm-host/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("token approval failed: {0}")]
    Approval(String),
    #[error("staking failed: {0}")]
    Staking(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },
    #[error("gateway error {code}: {message}")]
    Rpc { code: String, message: String },
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// Read-only registration projection; always re-queried, never cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub is_registered: bool,
    #[serde(default)]
    pub host_address: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub staked_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsCheck {
    pub can_register: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Terms submitted with stake+register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRegistration {
    pub api_url: String,
    pub models: Vec<String>,
    pub price_per_token: u64,
    pub stake_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub address: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub staked_amount: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub price_per_token: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    pub success: bool,
    pub transaction_hash: String,
    pub host_info: HostInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Usdc,
    Eth,
}

/// Who this invocation acts as, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIdentity {
    pub wallet_address: String,
    pub network: String,
    pub rpc_url: String,
}

#[async_trait]
pub trait ChainRegistrar: Send + Sync {
    fn identity(&self) -> ChainIdentity;

    async fn check_registration_status(&self) -> Result<RegistrationStatus, ChainError>;

    async fn validate_registration_requirements(&self) -> Result<RequirementsCheck, ChainError>;

    /// Approves, stakes and registers in one go; fails on any partial failure
    async fn register_host(&self, registration: &HostRegistration) -> Result<RegistrationReceipt, ChainError>;

    /// Returns the transaction hash once confirmed
    async fn unregister_host(&self) -> Result<String, ChainError>;
}

#[async_trait]
pub trait TokenApprovals: Send + Sync {
    /// Current allowance granted to the staking contract, as a decimal amount
    async fn check_allowance(&self) -> Result<String, ChainError>;

    async fn approve_token(&self, amount: &str) -> Result<String, ChainError>;
}

#[async_trait]
pub trait HostAdmin: Send + Sync {
    async fn host_info(&self, address: Option<&str>) -> Result<HostInfo, ChainError>;

    async fn add_stake(&self, amount: &str) -> Result<String, ChainError>;

    async fn update_api_url(&self, url: &str) -> Result<String, ChainError>;

    async fn update_supported_models(&self, models: &[String]) -> Result<String, ChainError>;

    async fn update_pricing(&self, price_per_token: u64) -> Result<String, ChainError>;

    async fn set_model_pricing(&self, model: &str, price: u64, price_type: PriceType) -> Result<String, ChainError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
struct AllowanceResponse {
    allowance: String,
}

/// Error body returned by the gateway on non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub required: Option<String>,
    #[serde(default)]
    pub available: Option<String>,
}

/// Map a gateway error body onto the transaction error taxonomy
pub fn map_gateway_error(body: GatewayErrorBody) -> ChainError {
    match body.code.as_str() {
        "INSUFFICIENT_BALANCE" => ChainError::InsufficientBalance {
            required: body.required.unwrap_or_else(|| "unknown".to_string()),
            available: body.available.unwrap_or_else(|| "unknown".to_string()),
        },
        "APPROVAL_FAILED" => ChainError::Approval(body.message),
        "STAKING_FAILED" => ChainError::Staking(body.message),
        "REVERTED" => ChainError::Reverted(body.message),
        _ => ChainError::Rpc {
            code: body.code,
            message: body.message,
        },
    }
}

/// JSON gateway client, constructed once per invocation
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    identity: ChainIdentity,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(identity: ChainIdentity, token: Option<String>) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, identity, token })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.identity.rpc_url.trim_end_matches('/'), path)
    }

    fn host_path(&self, suffix: &str) -> String {
        format!("/hosts/{}{}", self.identity.wallet_address, suffix)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("User-Agent", USER_AGENT)
            .header("X-Network", &self.identity.network);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ChainError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<GatewayErrorBody>(&text) {
                Ok(body) => map_gateway_error(body),
                Err(_) => ChainError::Rpc {
                    code: status.as_u16().to_string(),
                    message: status_message(status, &text),
                },
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        debug!(path, "Gateway GET");
        self.send(self.request(Method::GET, path)).await
    }

    async fn call<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ChainError> {
        debug!(%method, path, "Gateway call");
        self.send(self.request(method, path).json(body)).await
    }

    async fn transaction<B: Serialize + Sync>(&self, method: Method, path: &str, body: &B) -> Result<String, ChainError> {
        let tx: TxResponse = self.call(method, path, body).await?;
        info!(tx = %tx.transaction_hash, path, "Transaction confirmed");
        Ok(tx.transaction_hash)
    }
}

fn status_message(status: StatusCode, text: &str) -> String {
    if text.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        text.trim().to_string()
    }
}

#[async_trait]
impl ChainRegistrar for GatewayClient {
    fn identity(&self) -> ChainIdentity {
        self.identity.clone()
    }

    async fn check_registration_status(&self) -> Result<RegistrationStatus, ChainError> {
        self.get(&self.host_path("/status")).await
    }

    async fn validate_registration_requirements(&self) -> Result<RequirementsCheck, ChainError> {
        self.get(&self.host_path("/requirements")).await
    }

    async fn register_host(&self, registration: &HostRegistration) -> Result<RegistrationReceipt, ChainError> {
        let receipt: RegistrationReceipt = self
            .call(Method::POST, &self.host_path("/register"), registration)
            .await?;
        if !receipt.success {
            return Err(ChainError::Reverted(format!(
                "registration transaction {} did not succeed",
                receipt.transaction_hash
            )));
        }
        Ok(receipt)
    }

    async fn unregister_host(&self) -> Result<String, ChainError> {
        self.transaction(Method::POST, &self.host_path("/unregister"), &serde_json::json!({}))
            .await
    }
}

#[async_trait]
impl TokenApprovals for GatewayClient {
    async fn check_allowance(&self) -> Result<String, ChainError> {
        let response: AllowanceResponse = self.get(&self.host_path("/allowance")).await?;
        Ok(response.allowance)
    }

    async fn approve_token(&self, amount: &str) -> Result<String, ChainError> {
        self.transaction(
            Method::POST,
            &self.host_path("/approve"),
            &serde_json::json!({ "amount": amount }),
        )
        .await
        .map_err(|e| match e {
            ChainError::Rpc { message, .. } => ChainError::Approval(message),
            other => other,
        })
    }
}

#[async_trait]
impl HostAdmin for GatewayClient {
    async fn host_info(&self, address: Option<&str>) -> Result<HostInfo, ChainError> {
        let address = address.unwrap_or(&self.identity.wallet_address);
        self.get(&format!("/hosts/{}", address)).await
    }

    async fn add_stake(&self, amount: &str) -> Result<String, ChainError> {
        self.transaction(Method::POST, &self.host_path("/stake"), &serde_json::json!({ "amount": amount }))
            .await
    }

    async fn update_api_url(&self, url: &str) -> Result<String, ChainError> {
        self.transaction(Method::PUT, &self.host_path("/api-url"), &serde_json::json!({ "apiUrl": url }))
            .await
    }

    async fn update_supported_models(&self, models: &[String]) -> Result<String, ChainError> {
        self.transaction(Method::PUT, &self.host_path("/models"), &serde_json::json!({ "models": models }))
            .await
    }

    async fn update_pricing(&self, price_per_token: u64) -> Result<String, ChainError> {
        self.transaction(
            Method::PUT,
            &self.host_path("/pricing"),
            &serde_json::json!({ "pricePerToken": price_per_token }),
        )
        .await
    }

    async fn set_model_pricing(&self, model: &str, price: u64, price_type: PriceType) -> Result<String, ChainError> {
        self.transaction(
            Method::PUT,
            &self.host_path("/model-pricing"),
            &serde_json::json!({ "model": model, "price": price, "priceType": price_type }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ChainIdentity {
        ChainIdentity {
            wallet_address: "0xHOST".to_string(),
            network: "base-sepolia".to_string(),
            rpc_url: "http://gateway.local:8545/".to_string(),
        }
    }

    #[test]
    fn test_url_building() {
        let client = GatewayClient::new(identity(), None).unwrap();
        assert_eq!(
            client.url(&client.host_path("/status")),
            "http://gateway.local:8545/api/hosts/0xHOST/status"
        );
    }

    #[test]
    fn test_gateway_error_mapping() {
        let body = GatewayErrorBody {
            code: "INSUFFICIENT_BALANCE".to_string(),
            message: "not enough FAB".to_string(),
            required: Some("1000".to_string()),
            available: Some("5".to_string()),
        };
        match map_gateway_error(body) {
            ChainError::InsufficientBalance { required, available } => {
                assert_eq!(required, "1000");
                assert_eq!(available, "5");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }

        let reverted = GatewayErrorBody {
            code: "REVERTED".to_string(),
            message: "execution reverted".to_string(),
            required: None,
            available: None,
        };
        assert!(matches!(map_gateway_error(reverted), ChainError::Reverted(m) if m == "execution reverted"));

        let other = GatewayErrorBody {
            code: "NONCE_TOO_LOW".to_string(),
            message: "nonce".to_string(),
            required: None,
            available: None,
        };
        assert!(matches!(map_gateway_error(other), ChainError::Rpc { code, .. } if code == "NONCE_TOO_LOW"));
    }

    #[test]
    fn test_status_deserializes_from_gateway_json() {
        let json = r#"{"isRegistered":true,"hostAddress":"0xHOST","apiUrl":"http://n:8080","stakedAmount":"1000"}"#;
        let status: RegistrationStatus = serde_json::from_str(json).unwrap();
        assert!(status.is_registered);
        assert_eq!(status.staked_amount, "1000");

        let minimal: RegistrationStatus = serde_json::from_str(r#"{"isRegistered":false}"#).unwrap();
        assert!(minimal.host_address.is_empty());
    }

    #[test]
    fn test_price_type_serialization() {
        assert_eq!(serde_json::to_string(&PriceType::Usdc).unwrap(), "\"usdc\"");
        assert_eq!(serde_json::to_string(&PriceType::Eth).unwrap(), "\"eth\"");
    }
}

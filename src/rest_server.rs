//! REST surface of the gateway.
//!
//! `POST /webhook/transfer` is the ingestion endpoint and always answers 200
//! with the terminal outcome in the body, so the watch provider never
//! replays a delivery expecting a different result. The remaining routes are
//! the operational surface: deposit-address leasing, pool statistics, wallet
//! balance and sweep, and a health probe.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum_extra::response::ErasedJson;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::*;

use crate::config_models::network::Network;
use crate::deposit_ingestor::DepositIngestor;
use crate::models::amount::Amount;
use crate::models::ids::UserId;
use crate::models::ids::WalletId;
use crate::models::timestamp::Timestamp;
use crate::pool_manager::PoolError;
use crate::pool_manager::WalletPoolManager;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// An enum of error handlers for the REST API server.
#[derive(Debug)]
pub struct RestError(pub String);

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self.0),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for RestError {
    fn from(err: anyhow::Error) -> Self {
        Self(err.to_string())
    }
}

/// Everything the route handlers need.
#[derive(Debug, Clone)]
pub struct RestState {
    pub pool: WalletPoolManager,
    pub ingestor: DepositIngestor,
}

pub fn router(rest_state: RestState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    axum::Router::new()
        .route("/webhook/transfer", axum::routing::post(webhook_transfer))
        .route(
            "/wallet/deposit-address",
            axum::routing::post(request_deposit_address),
        )
        .route("/pool/stats", axum::routing::get(get_pool_stats))
        .route(
            "/wallet/{wallet_id}/balance",
            axum::routing::get(get_wallet_balance),
        )
        .route(
            "/wallet/{wallet_id}/sweep",
            axum::routing::post(sweep_wallet),
        )
        .route("/health", axum::routing::get(health))
        .with_state(rest_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_rest_server(
    rest_listener: TcpListener,
    rest_state: RestState,
) -> Result<(), anyhow::Error> {
    axum::serve(
        rest_listener,
        router(rest_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookResponse {
    pub outcome: String,
}

/// The watch provider's delivery endpoint. Always 200; the outcome string
/// reports what became of the notification.
async fn webhook_transfer(
    State(rest): State<RestState>,
    headers: HeaderMap,
    body: Bytes,
) -> ErasedJson {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = rest
        .ingestor
        .handle_webhook(&body, signature, Timestamp::now())
        .await;
    ErasedJson::pretty(WebhookResponse {
        outcome: outcome.to_string(),
    })
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DepositAddressRequest {
    pub user_id: u64,
    pub network: String,

    /// Declares a `Pending` intent over the leased address when present.
    /// Checked against the configured minimum deposit.
    #[serde(default)]
    pub expected_amount: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DepositAddressResponse {
    pub wallet_id: u64,
    pub network: String,
    pub address: String,
    pub leased_at: u64,
    pub expires_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<u64>,
}

async fn request_deposit_address(
    State(rest): State<RestState>,
    axum::Json(request): axum::Json<DepositAddressRequest>,
) -> Response {
    let Ok(network) = request.network.parse::<Network>() else {
        return (
            StatusCode::BAD_REQUEST,
            format!("unknown network '{}'", request.network),
        )
            .into_response();
    };

    let expected_amount = match request.expected_amount.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<Amount>() {
            Ok(amount) => Some(amount),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("cannot parse expected_amount '{raw}': {e}"),
                )
                    .into_response()
            }
        },
    };
    let min_deposit = rest.pool.state().cli().min_deposit;
    if let Some(amount) = expected_amount {
        if amount < min_deposit {
            return (
                StatusCode::BAD_REQUEST,
                format!("expected_amount {amount} is below the minimum deposit {min_deposit}"),
            )
                .into_response();
        }
    }

    let now = Timestamp::now();
    let user = UserId(request.user_id);
    let receipt = match rest.pool.get_or_assign_wallet(user, network, now).await {
        Ok(receipt) => receipt,
        Err(e) => {
            error!("Deposit address request for {user} failed: {e}");
            return RestError(e.to_string()).into_response();
        }
    };

    let intent_id = match expected_amount {
        None => None,
        Some(amount) => {
            let intent_id = rest.pool.state().lock_guard_mut().await.declare_intent(
                user,
                network,
                receipt.address.clone(),
                receipt.wallet_id,
                amount,
                Some(receipt.expires_at),
                now,
            );
            rest.pool.state().persist_best_effort().await;
            Some(intent_id.0)
        }
    };

    ErasedJson::pretty(DepositAddressResponse {
        wallet_id: receipt.wallet_id.0,
        network: receipt.network.to_string(),
        address: receipt.address.to_string(),
        leased_at: receipt.leased_at.to_millis(),
        expires_at: receipt.expires_at.to_millis(),
        intent_id,
    })
    .into_response()
}

async fn get_pool_stats(State(rest): State<RestState>) -> ErasedJson {
    ErasedJson::pretty(rest.pool.pool_stats().await)
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WalletBalanceResponse {
    pub wallet_id: u64,
    pub balance: String,
}

async fn get_wallet_balance(
    State(rest): State<RestState>,
    Path(wallet_id): Path<u64>,
) -> Response {
    let wallet_id = WalletId(wallet_id);
    match rest.pool.wallet_balance(wallet_id).await {
        Ok(balance) => ErasedJson::pretty(WalletBalanceResponse {
            wallet_id: wallet_id.0,
            balance: balance.to_string(),
        })
        .into_response(),
        Err(PoolError::UnknownWallet(id)) => {
            (StatusCode::NOT_FOUND, format!("no wallet {id}")).into_response()
        }
        Err(e) => RestError(e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SweepResponse {
    pub wallet_id: u64,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub txid: String,
}

async fn sweep_wallet(State(rest): State<RestState>, Path(wallet_id): Path<u64>) -> Response {
    let wallet_id = WalletId(wallet_id);
    match rest.pool.sweep_to_master(wallet_id).await {
        Ok(report) => ErasedJson::pretty(SweepResponse {
            wallet_id: report.wallet_id.0,
            from: report.from.to_string(),
            to: report.to.to_string(),
            amount: report.amount.to_string(),
            txid: report.txid.to_string(),
        })
        .into_response(),
        Err(PoolError::UnknownWallet(id)) => {
            (StatusCode::NOT_FOUND, format!("no wallet {id}")).into_response()
        }
        Err(e @ (PoolError::NothingToSweep(_) | PoolError::NoMasterAddress(_))) => {
            (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e) => {
            error!("Sweep of wallet {wallet_id} failed: {e}");
            RestError(e.to_string()).into_response()
        }
    }
}

async fn health() -> ErasedJson {
    ErasedJson::pretty(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_address_request_accepts_minimal_body() {
        let request: DepositAddressRequest =
            serde_json::from_str(r#"{"user_id": 7, "network": "bep20"}"#).unwrap();
        assert_eq!(7, request.user_id);
        assert_eq!(None, request.expected_amount);
    }

    #[test]
    fn deposit_address_response_omits_absent_intent() {
        let response = DepositAddressResponse {
            wallet_id: 1,
            network: "bep20".into(),
            address: "0xabc".into(),
            leased_at: 0,
            expires_at: 3_600_000,
            intent_id: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("intent_id"));

        let with_intent = DepositAddressResponse {
            intent_id: Some(4),
            ..response
        };
        let json = serde_json::to_string(&with_intent).unwrap();
        assert!(json.contains("\"intent_id\":4"));
    }
}

//! HTTP implementation of [`RelayerClient`] on top of `reqwest`.
//!
//! Authenticated requests are signed over the exact bytes that go on the
//! wire: the body is serialized once, signed, then sent verbatim.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use super::{
    CancelOrderRequest, CreateWalletRequest, DepositRequest, GetWalletResponse, OrderRequest,
    PingResponse, RelayerClient, TaskId, TaskResponse, WithdrawRequest,
};
use crate::config::{RenegadeConfig, RENEGADE_AUTH_EXPIRATION_HEADER, RENEGADE_AUTH_HEADER};
use crate::error::{RenegadeError, Result};
use crate::state::order::now_ms;
use crate::state::{ApiWallet, Keychain, OrderId, Token, WalletId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpRelayerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRelayerClient {
    /// Client for the relayer at `base_url` (e.g. `http://127.0.0.1:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &RenegadeConfig) -> Result<Self> {
        Ok(Self::new(config.http_url()?))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v0{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .header(
                "User-Agent",
                format!("renegade-sdk/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Attach a signed body to `builder`.
    fn signed(builder: RequestBuilder, body: Vec<u8>, keychain: &Keychain) -> RequestBuilder {
        let auth = keychain.sign_http_request(&body, now_ms());
        builder
            .header(RENEGADE_AUTH_HEADER, auth.signature)
            .header(RENEGADE_AUTH_EXPIRATION_HEADER, auth.expiration_ms.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| RenegadeError::RelayerUnreachable(format!("{}: {e}", self.base_url)))
    }

    /// POST a signed JSON body and return the task it started.
    async fn post_task<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        keychain: Option<&Keychain>,
    ) -> Result<TaskId> {
        let bytes = serde_json::to_vec(body)?;
        let builder = self.request(Method::POST, path);
        let builder = match keychain {
            Some(keychain) => Self::signed(builder, bytes, keychain),
            None => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes),
        };
        let response = self.send(builder).await?;
        let TaskResponse { task_id } = parse_success(response).await?;
        debug!(path, task_id = %task_id, "relayer task started");
        Ok(task_id)
    }
}

/// Decode a 2xx response, or turn anything else into `RelayerError`.
async fn parse_success<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| RenegadeError::RelayerUnreachable(e.to_string()))?;
    if !status.is_success() {
        return Err(RenegadeError::RelayerError {
            status: status.as_u16(),
            message: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| RenegadeError::RelayerError {
        status: status.as_u16(),
        message: format!("unparseable response: {e}"),
    })
}

#[async_trait]
impl RelayerClient for HttpRelayerClient {
    async fn ping(&self) -> Result<u64> {
        let response = self.send(self.request(Method::GET, "/ping")).await?;
        if response.status() != StatusCode::OK {
            return Err(RenegadeError::RelayerError {
                status: response.status().as_u16(),
                message: "ping failed".to_string(),
            });
        }
        let PingResponse { timestamp } = parse_success(response).await?;
        Ok(timestamp)
    }

    async fn get_wallet(&self, id: WalletId, keychain: &Keychain) -> Result<Option<ApiWallet>> {
        let builder = Self::signed(
            self.request(Method::GET, &format!("/wallet/{id}")),
            Vec::new(),
            keychain,
        );
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            trace!(wallet = %id, "wallet not found on relayer");
            return Ok(None);
        }
        let GetWalletResponse { wallet } = parse_success(response).await?;
        Ok(Some(wallet))
    }

    async fn find_wallet_on_chain(&self, keychain: &Keychain) -> Result<Option<ApiWallet>> {
        // Ledger reads go through a separate chain client.
        trace!(account = %keychain.account_id(), "no ledger reader configured");
        Ok(None)
    }

    async fn create_wallet(&self, wallet: &ApiWallet) -> Result<TaskId> {
        let body = CreateWalletRequest {
            wallet: wallet.clone(),
        };
        self.post_task("/wallet", &body, None).await
    }

    async fn deposit(
        &self,
        id: WalletId,
        request: &DepositRequest,
        keychain: &Keychain,
    ) -> Result<TaskId> {
        self.post_task(&format!("/wallet/{id}/balances/deposit"), request, Some(keychain))
            .await
    }

    async fn withdraw(
        &self,
        id: WalletId,
        mint: &Token,
        request: &WithdrawRequest,
        keychain: &Keychain,
    ) -> Result<TaskId> {
        self.post_task(
            &format!("/wallet/{id}/balances/{mint}/withdraw"),
            request,
            Some(keychain),
        )
        .await
    }

    async fn place_order(
        &self,
        id: WalletId,
        request: &OrderRequest,
        keychain: &Keychain,
    ) -> Result<TaskId> {
        self.post_task(&format!("/wallet/{id}/orders"), request, Some(keychain))
            .await
    }

    async fn update_order(
        &self,
        id: WalletId,
        order_id: OrderId,
        request: &OrderRequest,
        keychain: &Keychain,
    ) -> Result<TaskId> {
        self.post_task(
            &format!("/wallet/{id}/orders/{order_id}/update"),
            request,
            Some(keychain),
        )
        .await
    }

    async fn cancel_order(
        &self,
        id: WalletId,
        order_id: OrderId,
        request: &CancelOrderRequest,
        keychain: &Keychain,
    ) -> Result<TaskId> {
        self.post_task(
            &format!("/wallet/{id}/orders/{order_id}/cancel"),
            request,
            Some(keychain),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::{verify_http_request, HttpAuth};
    use crate::state::Wallet;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn ping_reads_timestamp() {
        let app = Router::new().route("/v0/ping", get(|| async { Json(json!({"timestamp": 42})) }));
        let client = HttpRelayerClient::new(serve(app).await);
        assert_eq!(client.ping().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpRelayerClient::new(format!("http://{addr}"));
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerUnreachable(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn missing_wallet_is_none() {
        let app = Router::new().route(
            "/v0/wallet/:id",
            get(|| async { (AxumStatus::NOT_FOUND, "no such wallet") }),
        );
        let client = HttpRelayerClient::new(serve(app).await);
        let keychain = Keychain::from_seed(b"http-missing").unwrap();
        let found = client
            .get_wallet(keychain.account_id(), &keychain)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn failed_wallet_lookup_is_an_error() {
        let app = Router::new().route(
            "/v0/wallet/:id",
            get(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "database offline") }),
        );
        let client = HttpRelayerClient::new(serve(app).await);
        let keychain = Keychain::from_seed(b"http-500").unwrap();
        match client.get_wallet(keychain.account_id(), &keychain).await {
            Err(RenegadeError::RelayerError { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "database offline");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_wallet_returns_body() {
        let keychain = Keychain::from_seed(b"http-get").unwrap();
        let api = Wallet::empty(keychain.clone()).unwrap().to_api();
        let served = Arc::new(api.clone());
        let app = Router::new()
            .route(
                "/v0/wallet/:id",
                get(|State(w): State<Arc<ApiWallet>>| async move {
                    Json(json!({ "wallet": w.as_ref() }))
                }),
            )
            .with_state(served);
        let client = HttpRelayerClient::new(serve(app).await);
        let found = client.get_wallet(api.id, &keychain).await.unwrap();
        assert_eq!(found, Some(api));
    }

    #[tokio::test]
    async fn mutation_is_signed_over_body() {
        let keychain = Keychain::from_seed(b"http-signed").unwrap();
        let verifier = Arc::new(keychain.clone());
        let app = Router::new()
            .route(
                "/v0/wallet/:id/orders/:order_id/cancel",
                post(
                    |State(k): State<Arc<Keychain>>,
                     Path((_id, _order)): Path<(String, String)>,
                     headers: HeaderMap,
                     body: Bytes| async move {
                        let header = |name: &str| {
                            headers
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_string()
                        };
                        let auth = HttpAuth {
                            signature: header(RENEGADE_AUTH_HEADER),
                            expiration_ms: header(RENEGADE_AUTH_EXPIRATION_HEADER)
                                .parse()
                                .unwrap_or(0),
                        };
                        match verify_http_request(k.verifying_key(), &body, &auth, now_ms()) {
                            Ok(()) => (AxumStatus::OK, Json(json!({"task_id": "t-cancel"}))),
                            Err(_) => (AxumStatus::UNAUTHORIZED, Json(Value::Null)),
                        }
                    },
                ),
            )
            .with_state(verifier);
        let client = HttpRelayerClient::new(serve(app).await);
        let wallet = Wallet::empty(keychain.clone()).unwrap();
        let request = CancelOrderRequest {
            wallet: wallet.to_api(),
            statement_sig: wallet.sign_update(),
        };
        let task = client
            .cancel_order(wallet.id(), uuid::Uuid::new_v4(), &request, &keychain)
            .await
            .unwrap();
        assert_eq!(task, "t-cancel");

        // A different key fails verification on the server side.
        let other = Keychain::from_seed(b"someone-else").unwrap();
        let err = client
            .cancel_order(wallet.id(), uuid::Uuid::new_v4(), &request, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, RenegadeError::RelayerError { status: 401, .. }));
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let app = Router::new().route(
            "/v0/wallet",
            post(|| async { (AxumStatus::BAD_REQUEST, "wallet already exists") }),
        );
        let client = HttpRelayerClient::new(serve(app).await);
        let keychain = Keychain::from_seed(b"http-create").unwrap();
        let api = Wallet::empty(keychain).unwrap().to_api();
        match client.create_wallet(&api).await {
            Err(RenegadeError::RelayerError { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "wallet already exists");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

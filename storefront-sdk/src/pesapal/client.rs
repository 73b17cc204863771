//! HTTP client for the Pesapal v3 API.
//!
//! Every authorized call first requests a fresh bearer token. Pesapal tokens
//! live for five minutes, so callers that issue bursts of requests may want
//! to wrap this client with a cache.

use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::wire::{IpnListResponse, TokenRequest, TokenResponse};
use super::{
    AccessToken, CancelOrderRequest, CancelOrderResponse, GatewayPayload, GatewayReply,
    IpnRegistration, RefundRequest, RefundResponse, RegisterIpnRequest, SubmitOrderRequest,
    SubmitOrderResponse, TransactionStatus,
};

/// Failures talking to Pesapal that are not business rejections.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("http error calling {endpoint}: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Pesapal answered with a non-2xx status code.
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// Response body could not be deserialized.
    #[error("invalid json from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The response decoded but lacks a field the operation depends on.
    #[error("malformed response from {endpoint}: {reason}")]
    Malformed {
        endpoint: &'static str,
        reason: &'static str,
    },

    /// The endpoint path could not be joined with the base URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The HTTP client could not be built (TLS backend, timeout settings).
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

impl GatewayError {
    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            GatewayError::Http { endpoint, .. }
            | GatewayError::Status { endpoint, .. }
            | GatewayError::Decode { endpoint, .. }
            | GatewayError::Malformed { endpoint, .. } => Some(*endpoint),
            GatewayError::Url(_) | GatewayError::Client(_) => None,
        }
    }

    /// The Pesapal error code embedded in a non-2xx body, if any.
    pub fn gateway_code(&self) -> Option<String> {
        let GatewayError::Status { body, .. } = self else {
            return None;
        };
        #[derive(serde::Deserialize)]
        struct Envelope {
            error: Option<super::ApiError>,
        }
        serde_json::from_str::<Envelope>(body)
            .ok()?
            .error?
            .code
            .filter(|c| !c.trim().is_empty())
    }
}

const AUTH_TOKEN: &str = "Auth/RequestToken";
const SUBMIT_ORDER: &str = "Transactions/SubmitOrderRequest";
const TRANSACTION_STATUS: &str = "Transactions/GetTransactionStatus";
const REFUND: &str = "Transactions/RefundRequest";
const CANCEL_ORDER: &str = "Transactions/CancelOrder";
const REGISTER_IPN: &str = "URLSetup/RegisterIPN";
const LIST_IPNS: &str = "URLSetup/GetIpnList";

/// Typed HTTP client for the Pesapal v3 API.
#[derive(Debug, Clone)]
pub struct PesapalClient {
    http: Client,
    base_url: Url,
    consumer_key: String,
    consumer_secret: String,
}

impl PesapalClient {
    /// Create a new `PesapalClient`.
    ///
    /// * `base_url` – API root, e.g. `https://pay.pesapal.com/v3/api`.
    /// * `timeout` – applied to every request.
    pub fn new(
        base_url: &Url,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::Client)?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
        })
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /Auth/RequestToken`
    pub async fn get_token(&self) -> Result<GatewayReply<AccessToken>, GatewayError> {
        let url = self.base_url.join(AUTH_TOKEN)?;
        let body = TokenRequest {
            consumer_key: &self.consumer_key,
            consumer_secret: &self.consumer_secret,
        };
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|source| GatewayError::Http {
                endpoint: AUTH_TOKEN,
                source,
            })?;
        let reply: TokenResponse = parse_response(AUTH_TOKEN, resp).await?;
        match reply.into_reply() {
            GatewayReply::Rejected(error) => Ok(GatewayReply::Rejected(error)),
            GatewayReply::Accepted(TokenResponse {
                token: Some(token),
                expiry_date,
                ..
            }) if !token.is_empty() => Ok(GatewayReply::Accepted(AccessToken {
                token,
                expiry_date,
            })),
            GatewayReply::Accepted(_) => Err(GatewayError::Malformed {
                endpoint: AUTH_TOKEN,
                reason: "token missing from auth response",
            }),
        }
    }

    /// `POST /Transactions/SubmitOrderRequest`
    pub async fn submit_order(
        &self,
        order: &SubmitOrderRequest,
    ) -> Result<GatewayReply<SubmitOrderResponse>, GatewayError> {
        self.authorized(Method::POST, SUBMIT_ORDER, &[], Some(order))
            .await
    }

    /// `GET /Transactions/GetTransactionStatus?orderTrackingId=`
    pub async fn get_transaction_status(
        &self,
        tracking_id: &str,
    ) -> Result<GatewayReply<TransactionStatus>, GatewayError> {
        self.authorized::<(), _>(
            Method::GET,
            TRANSACTION_STATUS,
            &[("orderTrackingId", tracking_id)],
            None,
        )
        .await
    }

    /// `POST /Transactions/RefundRequest`
    pub async fn request_refund(
        &self,
        refund: &RefundRequest,
    ) -> Result<GatewayReply<RefundResponse>, GatewayError> {
        self.authorized(Method::POST, REFUND, &[], Some(refund)).await
    }

    /// `POST /Transactions/CancelOrder`
    pub async fn cancel_order(
        &self,
        cancel: &CancelOrderRequest,
    ) -> Result<GatewayReply<CancelOrderResponse>, GatewayError> {
        self.authorized(Method::POST, CANCEL_ORDER, &[], Some(cancel))
            .await
    }

    /// `POST /URLSetup/RegisterIPN`
    pub async fn register_ipn(
        &self,
        registration: &RegisterIpnRequest,
    ) -> Result<GatewayReply<IpnRegistration>, GatewayError> {
        self.authorized(Method::POST, REGISTER_IPN, &[], Some(registration))
            .await
    }

    /// `GET /URLSetup/GetIpnList`
    pub async fn list_ipns(&self) -> Result<GatewayReply<Vec<IpnRegistration>>, GatewayError> {
        let reply: GatewayReply<IpnListResponse> = self
            .authorized::<(), _>(Method::GET, LIST_IPNS, &[], None)
            .await?;
        Ok(reply.map(|list| match list {
            IpnListResponse::List(items) => items,
            IpnListResponse::Failure { .. } => Vec::new(),
        }))
    }

    /// Fetch a token, then issue the request with it.
    ///
    /// A rejected token request is surfaced as the operation's rejection.
    async fn authorized<B, T>(
        &self,
        method: Method,
        endpoint: &'static str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<GatewayReply<T>, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + GatewayPayload,
    {
        let token = match self.get_token().await? {
            GatewayReply::Accepted(token) => token,
            GatewayReply::Rejected(error) => return Ok(GatewayReply::Rejected(error)),
        };

        let url = self.base_url.join(endpoint)?;
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&token.token)
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|source| GatewayError::Http { endpoint, source })?;
        let payload: T = parse_response(endpoint, resp).await?;
        Ok(payload.into_reply())
    }
}

/// `Url::join` drops the last path segment unless it ends with a slash.
fn normalize_base(base_url: &Url) -> Url {
    let mut url = base_url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn parse_response<T: DeserializeOwned>(
    endpoint: &'static str,
    resp: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Status {
            endpoint,
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|source| GatewayError::Http { endpoint, source })?;
    serde_json::from_slice(&bytes).map_err(|source| GatewayError::Decode { endpoint, source })
}

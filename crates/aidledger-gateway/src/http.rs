//! HTTP clients for the external collaborators.

use std::time::Duration;

use aidledger_core::{BorrowerId, Caller, EligibilityContext};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::{
    AcademicRecords, CollectionRequest, GatewayError, IdentityProvider, MobileMoney, PinStatus,
    PinStore, ProviderAck,
};

/// Upper bound on any single call to a collaborator.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared JSON-over-HTTP plumbing for one base URL.
#[derive(Clone)]
struct JsonEndpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl JsonEndpoint {
    /// `base_url` should be like `http://localhost:4000` (no trailing slash).
    fn new(base_url: String, api_key: Option<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }

    /// Like [`read`](Self::read) for calls made with our own service key: a
    /// 401 means the key was refused, not that the borrower did anything wrong.
    async fn read_service<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, GatewayError> {
        Self::read(resp).await.map_err(|err| match err {
            GatewayError::Unauthorized => {
                GatewayError::Unavailable("service credentials rejected".into())
            }
            other => other,
        })
    }
}

// ── PIN store ──

/// Client for the PIN credential service.
pub struct HttpPinStore {
    endpoint: JsonEndpoint,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyBody<'a> {
    borrower_id: &'a str,
    pin: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

impl HttpPinStore {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[async_trait]
impl PinStore for HttpPinStore {
    async fn status(&self, borrower: &BorrowerId) -> Result<PinStatus, GatewayError> {
        let url = self.endpoint.url("/pin/status");
        debug!(url = %url, borrower = %borrower, "querying PIN status");
        let req = self
            .endpoint
            .client
            .get(&url)
            .query(&[("borrowerId", borrower.as_str())]);
        let resp = self.endpoint.authorize(req).send().await?;
        JsonEndpoint::read_service(resp).await
    }

    async fn verify(&self, borrower: &BorrowerId, pin: &str) -> Result<bool, GatewayError> {
        let url = self.endpoint.url("/pin/verify");
        debug!(url = %url, borrower = %borrower, "verifying PIN");
        let body = VerifyBody {
            borrower_id: borrower.as_str(),
            pin,
        };
        let req = self.endpoint.client.post(&url).json(&body);
        let resp = self.endpoint.authorize(req).send().await?;
        // A wrong PIN is `valid: false` or 422. A 401 is about our service key.
        if resp.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(false);
        }
        let parsed: VerifyResponse = JsonEndpoint::read_service(resp).await?;
        Ok(parsed.valid)
    }
}

// ── Mobile money ──

/// Client for the mobile-money collection API.
pub struct HttpMobileMoney {
    endpoint: JsonEndpoint,
}

impl HttpMobileMoney {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[async_trait]
impl MobileMoney for HttpMobileMoney {
    async fn request_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<ProviderAck, GatewayError> {
        let url = self.endpoint.url("/collections");
        info!(
            url = %url,
            reference = %request.reference,
            provider = request.provider.as_str(),
            amount = request.amount,
            "requesting collection"
        );
        let req = self.endpoint.client.post(&url).json(request);
        let resp = self.endpoint.authorize(req).send().await?;
        let ack: ProviderAck = JsonEndpoint::read_service(resp).await.inspect_err(|e| {
            warn!(reference = %request.reference, error = %e, "collection request failed");
        })?;
        info!(reference = %request.reference, provider_ref = %ack.provider_ref, "collection accepted");
        Ok(ack)
    }
}

// ── Identity ──

/// Resolves bearer tokens by asking the identity service who they belong to.
pub struct HttpIdentity {
    endpoint: JsonEndpoint,
}

impl HttpIdentity {
    pub fn new(base_url: String) -> Result<Self, GatewayError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, None)?,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentity {
    async fn resolve(&self, token: &str) -> Result<Caller, GatewayError> {
        let url = self.endpoint.url("/me");
        let resp = self
            .endpoint
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?;
        JsonEndpoint::read(resp).await
    }
}

// ── Academic records ──

pub struct HttpAcademicRecords {
    endpoint: JsonEndpoint,
}

impl HttpAcademicRecords {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, api_key)?,
        })
    }
}

#[async_trait]
impl AcademicRecords for HttpAcademicRecords {
    async fn standing(&self, borrower: &BorrowerId) -> Result<EligibilityContext, GatewayError> {
        let url = self
            .endpoint
            .url(&format!("/students/{}/standing", borrower.as_str()));
        debug!(url = %url, "fetching academic standing");
        let req = self.endpoint.client.get(&url);
        let resp = self.endpoint.authorize(req).send().await?;
        JsonEndpoint::read_service(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::{ErrorKind, Provider, Reference, Role};
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn fake_services() -> Router {
        Router::new()
            .route(
                "/pin/status",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let has_pin = q.get("borrowerId").map(String::as_str) == Some("STU1");
                    Json(serde_json::json!({ "hasPin": has_pin }))
                }),
            )
            .route(
                "/pin/verify",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["pin"] == "2468" {
                        (StatusCode::OK, Json(serde_json::json!({ "valid": true })))
                    } else {
                        (StatusCode::OK, Json(serde_json::json!({ "valid": false })))
                    }
                }),
            )
            .route(
                "/collections",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["amount"].as_u64() == Some(0) {
                        return (StatusCode::BAD_GATEWAY, Json(serde_json::json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({ "providerRef": "MTN-778899" })),
                    )
                }),
            )
            .route(
                "/me",
                get(|headers: HeaderMap| async move {
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer good-token") => (
                            StatusCode::OK,
                            Json(serde_json::json!({ "borrowerId": "STU1", "role": "borrower" })),
                        ),
                        _ => (StatusCode::UNAUTHORIZED, Json(serde_json::json!({}))),
                    }
                }),
            )
            .route(
                "/students/{id}/standing",
                get(|| async {
                    Json(serde_json::json!({ "currentTerm": "2026-S1", "finalTerm": "2027-S2" }))
                }),
            )
    }

    #[tokio::test]
    async fn pin_store_status_and_verify() {
        let base = serve(fake_services()).await;
        let store = HttpPinStore::new(base, None).unwrap();
        let stu1 = BorrowerId::new("STU1");

        assert!(store.status(&stu1).await.unwrap().has_pin);
        assert!(!store.status(&BorrowerId::new("STU2")).await.unwrap().has_pin);
        assert!(store.verify(&stu1, "2468").await.unwrap());
        assert!(!store.verify(&stu1, "1111").await.unwrap());
    }

    #[tokio::test]
    async fn pin_store_rejects_unprocessable_pin() {
        let app = Router::new().route(
            "/pin/verify",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "bad pin") }),
        );
        let store = HttpPinStore::new(serve(app).await, None).unwrap();
        assert!(!store.verify(&BorrowerId::new("STU1"), "1111").await.unwrap());
    }

    #[tokio::test]
    async fn refused_service_key_is_not_a_wrong_pin() {
        let app = Router::new()
            .route(
                "/pin/verify",
                post(|| async { (StatusCode::UNAUTHORIZED, "bad api key") }),
            )
            .route(
                "/pin/status",
                get(|| async { (StatusCode::UNAUTHORIZED, "bad api key") }),
            );
        let store = HttpPinStore::new(serve(app).await, Some("stale".into())).unwrap();
        let stu1 = BorrowerId::new("STU1");

        let err = store.verify(&stu1, "2468").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(matches!(
            ErrorKind::from(err),
            ErrorKind::Provider(_)
        ));
        assert!(matches!(
            store.status(&stu1).await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn mobile_money_collection() {
        let base = serve(fake_services()).await;
        let client = HttpMobileMoney::new(base, Some("key".into())).unwrap();
        let mut request = CollectionRequest {
            reference: Reference::new("LOAN", &BorrowerId::new("STU1"), 1),
            payer: BorrowerId::new("STU1"),
            amount: 50_000,
            phone: "+256770000000".into(),
            provider: Provider::Mtn,
        };
        let ack = client.request_collection(&request).await.unwrap();
        assert_eq!(ack.provider_ref, "MTN-778899");

        request.amount = 0;
        let err = client.request_collection(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Server { status: 502, .. }));
    }

    #[tokio::test]
    async fn identity_resolves_and_rejects() {
        let base = serve(fake_services()).await;
        let identity = HttpIdentity::new(base).unwrap();
        let caller = identity.resolve("good-token").await.unwrap();
        assert_eq!(caller.borrower_id.as_str(), "STU1");
        assert_eq!(caller.role, Role::Borrower);
        assert!(matches!(
            identity.resolve("bad-token").await,
            Err(GatewayError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn academic_standing() {
        let base = serve(fake_services()).await;
        let records = HttpAcademicRecords::new(base, None).unwrap();
        let ctx = records.standing(&BorrowerId::new("STU1")).await.unwrap();
        assert_eq!(ctx.current_term.to_string(), "2026-S1");
        assert!(ctx.has_following_term());
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let endpoint = JsonEndpoint::new("http://localhost:4000/".into(), None).unwrap();
        assert_eq!(endpoint.url("/me"), "http://localhost:4000/me");
    }

    #[test]
    fn collection_request_json_shape() {
        let request = CollectionRequest {
            reference: "DON-STU1-5".parse().unwrap(),
            payer: BorrowerId::new("STU1"),
            amount: 20_000,
            phone: "+256750000000".into(),
            provider: Provider::Airtel,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["reference"], "DON-STU1-5");
        assert_eq!(json["provider"], "airtel");
        assert_eq!(json["amount"], 20_000);
    }
}

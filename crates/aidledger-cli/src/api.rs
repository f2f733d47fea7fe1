//! HTTP surface over the ledger engine.
//!
//! Every route resolves its bearer token into a [`Caller`] through
//! the identity service; handlers pass that caller explicitly into the engine.

use std::sync::Arc;

use aidledger_core::{
    ApplicationKind, AutomatedDeduction, BalanceSummary, BorrowerId, Caller, Confirmation,
    ErrorCategory, ErrorKind, Loan, LoanId, PaymentId, PaymentTransaction, Phase, Reference,
    SupportRequest, SupportRequestId, SupportTerms, TermId, Ugx,
};
use aidledger_engine::{AidLedger, Initiated, PaymentRequest, PinVerification, Submitted};
use aidledger_gateway::{AcademicRecords, GatewayError, IdentityProvider, PinStatus};
use aidledger_store::Aggregate;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::export;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AidLedger>,
    pub identity: Arc<dyn IdentityProvider>,
    pub records: Arc<dyn AcademicRecords>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/loans", post(create_loan))
        .route("/loans/{id}", get(get_loan))
        .route("/loans/{id}/consent", post(consent_loan))
        .route("/loans/{id}/approve", post(approve_loan))
        .route("/loans/{id}/reject", post(reject_loan))
        .route("/support-requests", post(create_support_request))
        .route("/support-requests/{id}", get(get_support_request))
        .route("/support-requests/{id}/decision", post(decide_support_request))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/cancel", post(cancel_payment))
        .route("/payments/reconcile", post(reconcile_payment))
        .route("/payments/{id}/receipt", get(payment_receipt))
        .route("/transactions/{reference}", get(get_transaction))
        .route("/pin/status", get(pin_status))
        .route("/pin/verify", post(verify_pin))
        .route("/automated-deductions/balance-summary", get(balance_summary))
        .route("/automated-deductions/schedule", get(deduction_schedule))
        .route("/disbursements", post(disburse))
        .route("/terms/{term}/start", post(start_term))
        .route("/causes", post(create_cause))
        .route("/events", post(create_event))
        .with_state(state)
}

// ── Errors ──

#[derive(Debug)]
pub enum ApiError {
    Ledger(ErrorKind),
    Internal(String),
}

impl From<ErrorKind> for ApiError {
    fn from(err: ErrorKind) -> Self {
        Self::Ledger(err)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self::Ledger(err.into())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        let kind = match self {
            Self::Ledger(kind) => kind,
            Self::Internal(_) => return StatusCode::INTERNAL_SERVER_ERROR,
        };
        match kind {
            ErrorKind::PinNotSet => StatusCode::PRECONDITION_REQUIRED,
            ErrorKind::RequestExpired => StatusCode::GONE,
            ErrorKind::Unauthenticated | ErrorKind::InvalidPin { .. } => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden | ErrorKind::NotAuthorized => StatusCode::FORBIDDEN,
            other => match other.category() {
                ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                ErrorCategory::Eligibility => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCategory::Authorization => StatusCode::FORBIDDEN,
                ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::ExternalProvider => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Internal(detail) => {
                error!(detail = %detail, "request failed");
                json!({ "error": "internal", "message": "internal server error" })
            }
            Self::Ledger(kind) => {
                if status.is_server_error() {
                    warn!(error = %kind, "upstream failure");
                }
                let mut body = json!({
                    "error": kind.code(),
                    "category": kind.category(),
                    "message": kind.to_string(),
                });
                match kind {
                    ErrorKind::InvalidPin {
                        attempts_left: Some(left),
                    } => body["attemptsLeft"] = json!(left),
                    ErrorKind::OverpaymentRejected { outstanding, .. } => {
                        body["outstanding"] = json!(outstanding)
                    }
                    ErrorKind::AlreadyConfirmed { original } => body["original"] = json!(original),
                    _ => {}
                }
                body
            }
        };
        (status, Json(body)).into_response()
    }
}

// ── Authentication ──

/// The caller behind the request's bearer token.
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Ledger(ErrorKind::Unauthenticated))?;
        let caller = state.identity.resolve(token).await?;
        Ok(Self(caller))
    }
}

// ── Loans and support requests ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoanView {
    #[serde(flatten)]
    loan: Loan,
    outstanding: Ugx,
}

impl From<Loan> for LoanView {
    fn from(loan: Loan) -> Self {
        let outstanding = loan.outstanding();
        Self { loan, outstanding }
    }
}

async fn create_loan(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(terms): Json<aidledger_core::LoanTerms>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let standing = state.records.standing(&caller.borrower_id).await?;
    let submitted = state
        .engine
        .submit_application(&caller, ApplicationKind::Loan(terms), &standing)
        .await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

async fn get_loan(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<LoanId>,
) -> Result<Json<LoanView>, ApiError> {
    let loan = state.engine.ledger().loan_for(&caller, &id).await?;
    Ok(Json(loan.into()))
}

async fn consent_loan(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<LoanId>,
) -> Result<Json<LoanView>, ApiError> {
    Ok(Json(state.engine.consent(&caller, &id).await?.into()))
}

async fn approve_loan(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<LoanId>,
) -> Result<Json<LoanView>, ApiError> {
    Ok(Json(state.engine.approve_loan(&caller, &id).await?.into()))
}

async fn reject_loan(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<LoanId>,
) -> Result<Json<LoanView>, ApiError> {
    Ok(Json(state.engine.reject_loan(&caller, &id).await?.into()))
}

async fn create_support_request(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(terms): Json<SupportTerms>,
) -> Result<(StatusCode, Json<SupportRequest>), ApiError> {
    let request = state.engine.support().submit(&caller, terms)?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_support_request(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<SupportRequestId>,
) -> Result<Json<SupportRequest>, ApiError> {
    Ok(Json(state.engine.support().get(&caller, &id).await?))
}

#[derive(Deserialize)]
struct Decision {
    approve: bool,
}

async fn decide_support_request(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<SupportRequestId>,
    Json(decision): Json<Decision>,
) -> Result<Json<SupportRequest>, ApiError> {
    let request = state
        .engine
        .support()
        .decide(&caller, &id, decision.approve)
        .await?;
    Ok(Json(request))
}

// ── Payments ──

/// Names a transaction by its id (as returned from initiate) or its reference.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRef {
    #[serde(default)]
    transaction_id: Option<PaymentId>,
    #[serde(default)]
    reference: Option<Reference>,
}

impl TransactionRef {
    async fn resolve(self, state: &AppState, caller: &Caller) -> Result<Reference, ApiError> {
        match (self.transaction_id, self.reference) {
            (Some(id), reference) => {
                let txn = state.engine.payments().by_payment_id(caller, &id).await?;
                if reference.is_some_and(|r| r != txn.reference) {
                    return Err(ErrorKind::InvalidInput(
                        "transactionId and reference name different transactions".into(),
                    )
                    .into());
                }
                Ok(txn.reference)
            }
            (None, Some(reference)) => Ok(reference),
            (None, None) => Err(ErrorKind::InvalidInput(
                "transactionId or reference is required".into(),
            )
            .into()),
        }
    }
}

async fn initiate_payment(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<Initiated>), ApiError> {
    let initiated = state.engine.payments().initiate(&caller, request).await?;
    let status = if initiated.phase == Phase::AwaitingSettlement {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(initiated)))
}

async fn confirm_payment(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<TransactionRef>,
) -> Result<Json<Confirmation>, ApiError> {
    let reference = body.resolve(&state, &caller).await?;
    let confirmation = state.engine.confirm_payment(&caller, &reference).await?;
    Ok(Json(confirmation))
}

async fn cancel_payment(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<TransactionRef>,
) -> Result<Json<PaymentTransaction>, ApiError> {
    let reference = body.resolve(&state, &caller).await?;
    let txn = state.engine.payments().cancel(&caller, &reference).await?;
    Ok(Json(txn))
}

async fn reconcile_payment(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<TransactionRef>,
) -> Result<Json<Confirmation>, ApiError> {
    let reference = body.resolve(&state, &caller).await?;
    match state
        .engine
        .payments()
        .reconcile_bank_transfer(&caller, &reference)
        .await
    {
        Ok(confirmation) | Err(ErrorKind::AlreadyConfirmed {
            original: confirmation,
        }) => Ok(Json(confirmation)),
        Err(err) => Err(err.into()),
    }
}

async fn get_transaction(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(reference): Path<Reference>,
) -> Result<Json<PaymentTransaction>, ApiError> {
    Ok(Json(
        state
            .engine
            .payments()
            .transaction(&caller, &reference)
            .await?,
    ))
}

async fn payment_receipt(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<PaymentId>,
) -> Result<Response, ApiError> {
    let (receipt, artifact) = state.engine.payment_receipt(&caller, &id).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.txt\"", receipt.id),
        ),
    ];
    Ok((headers, artifact).into_response())
}

// ── PIN ──

async fn pin_status(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<Json<PinStatus>, ApiError> {
    Ok(Json(state.engine.pin_status(&caller).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPinBody {
    pin: String,
    #[serde(default)]
    transaction_id: Option<PaymentId>,
}

async fn verify_pin(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<VerifyPinBody>,
) -> Result<Json<PinVerification>, ApiError> {
    let verification = state
        .engine
        .verify_pin(&caller, &body.pin, body.transaction_id.as_ref())
        .await?;
    Ok(Json(verification))
}

// ── Deductions and terms ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BorrowerQuery {
    borrower_id: Option<String>,
}

async fn balance_summary(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Query(query): Query<BorrowerQuery>,
) -> Result<Json<BalanceSummary>, ApiError> {
    let borrower = query
        .borrower_id
        .map(BorrowerId::new)
        .unwrap_or_else(|| caller.borrower_id.clone());
    Ok(Json(state.engine.balance_summary(&caller, &borrower).await?))
}

async fn deduction_schedule(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<Response, ApiError> {
    caller.require_staff()?;
    let rows = state.engine.scheduler().upcoming().await;
    let csv = export::schedule_csv(&rows).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/csv")], csv).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisbursementBody {
    borrower_id: BorrowerId,
    term: TermId,
    amount: Ugx,
}

async fn disburse(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<DisbursementBody>,
) -> Result<Json<Vec<AutomatedDeduction>>, ApiError> {
    let applied = state
        .engine
        .disburse(&caller, &body.borrower_id, body.term, body.amount)
        .await?;
    Ok(Json(applied))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TermStarted {
    term: TermId,
    overdue: Vec<LoanId>,
}

async fn start_term(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(term): Path<TermId>,
) -> Result<Json<TermStarted>, ApiError> {
    let overdue = state.engine.start_term(&caller, term).await?;
    Ok(Json(TermStarted { term, overdue }))
}

// ── Donation causes and events ──

#[derive(Deserialize)]
struct TargetBody {
    id: String,
    title: String,
    #[serde(default)]
    fee: Option<Ugx>,
}

async fn create_cause(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<TargetBody>,
) -> Result<StatusCode, ApiError> {
    caller.require_staff()?;
    state
        .engine
        .targets()
        .add_cause(Aggregate::cause(body.id, body.title))
        .map_err(ErrorKind::from)?;
    Ok(StatusCode::CREATED)
}

async fn create_event(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(body): Json<TargetBody>,
) -> Result<StatusCode, ApiError> {
    caller.require_staff()?;
    let fee = body
        .fee
        .filter(|fee| *fee > 0)
        .ok_or_else(|| ErrorKind::InvalidInput("events need a positive fee".into()))?;
    state
        .engine
        .targets()
        .add_event(Aggregate::event(body.id, body.title, fee))
        .map_err(ErrorKind::from)?;
    Ok(StatusCode::CREATED)
}

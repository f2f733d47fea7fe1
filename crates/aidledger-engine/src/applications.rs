//! Emergency support requests. Non-repayable, so they never reach the ledger
//! or the scheduler.

use std::sync::Arc;

use aidledger_core::{
    Caller, Clock, ErrorKind, SupportRequest, SupportRequestId, SupportStatus, SupportTerms,
};
use aidledger_store::{StoreError, SupportBook};
use tracing::info;

pub struct SupportDesk {
    requests: Arc<SupportBook>,
    clock: Arc<dyn Clock>,
}

impl SupportDesk {
    pub fn new(requests: Arc<SupportBook>, clock: Arc<dyn Clock>) -> Self {
        Self { requests, clock }
    }

    pub fn submit(&self, caller: &Caller, terms: SupportTerms) -> Result<SupportRequest, ErrorKind> {
        if terms.amount == 0 {
            return Err(ErrorKind::InvalidAmount(0));
        }
        if terms.reason.trim().is_empty() {
            return Err(ErrorKind::InvalidInput("reason is required".into()));
        }
        let request = SupportRequest {
            id: SupportRequestId::new(),
            borrower_id: caller.borrower_id.clone(),
            amount: terms.amount,
            reason: terms.reason,
            supporting_document: terms.supporting_document,
            status: SupportStatus::Pending,
            created_at: self.clock.now(),
        };
        self.requests.insert(request.clone())?;
        info!(
            request = %request.id,
            borrower = %request.borrower_id,
            amount = request.amount,
            "support request submitted"
        );
        Ok(request)
    }

    /// Staff decision on a pending request. Decisions are final.
    pub async fn decide(
        &self,
        caller: &Caller,
        id: &SupportRequestId,
        approve: bool,
    ) -> Result<SupportRequest, ErrorKind> {
        caller.require_staff()?;
        let mut request = self.requests.lock(id).await.map_err(|err| match err {
            StoreError::NotFound(_) => ErrorKind::SupportRequestNotFound(id.to_string()),
            other => other.into(),
        })?;
        if request.status != SupportStatus::Pending {
            return Err(ErrorKind::InvalidInput(format!(
                "support request {id} was already decided"
            )));
        }
        request.status = if approve {
            SupportStatus::Approved
        } else {
            SupportStatus::Rejected
        };
        info!(request = %id, status = ?request.status, "support request decided");
        Ok(request.clone())
    }

    pub async fn get(
        &self,
        caller: &Caller,
        id: &SupportRequestId,
    ) -> Result<SupportRequest, ErrorKind> {
        let request = self
            .requests
            .get(id)
            .await
            .ok_or_else(|| ErrorKind::SupportRequestNotFound(id.to_string()))?;
        caller.may_act_for(&request.borrower_id)?;
        Ok(request)
    }
}

//! Two-phase payment state machine.
//!
//! ```text
//! created ──► pending_authorization ──► confirmed
//!    │               │   └──────────────► failed (cancelled | pin attempts | overpayment | target closed)
//!    │               └──────────────────► expired
//!    ├──► expired (provider never answered)
//!    └──► failed (provider unavailable)
//! awaiting_settlement ──────────────────► confirmed   (bank, staff reconciliation)
//! ```
//!
//! A mobile-money transaction carries a deadline from the moment it is
//! created, so one whose provider call never returns is still swept.
//!
//! Each transaction is serialised by its own lock. Confirmation applies the
//! payment to its target, issues the receipt and records the result inside
//! one critical section, so a reference is confirmed at most once and every
//! later confirmation sees the original result. PIN store and provider calls
//! run with no lock held; the state is re-read when they return.

use std::sync::Arc;

use aidledger_core::{
    BorrowerId, Caller, Clock, Confirmation, ErrorKind, FailureReason, LedgerEvent, LoanId,
    PaymentId, PaymentTarget, PaymentTransaction, Phase, Provider, ReceiptSource, Reference, Ugx,
    positive_amount,
};
use aidledger_gateway::{CollectionRequest, MobileMoney};
use aidledger_store::{StoreError, TargetRegistry, TransactionBook};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::events::EventHub;
use crate::ledger::LoanLedger;
use crate::pin_gate::PinGate;
use crate::receipts::ReceiptIssuer;

/// Body of `POST /payments/initiate`.
///
/// Loan repayments may name the loan directly with `loanId` instead of a
/// `target`, and the payer's contact may be sent as `phone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PaymentRequestBody")]
pub struct PaymentRequest {
    /// Signed so that zero and negative amounts reach validation instead of
    /// failing deserialisation.
    pub amount: i64,
    pub target: PaymentTarget,
    pub provider: Provider,
    /// Phone number for mobile money; account name for bank transfers.
    pub payer_contact: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequestBody {
    amount: i64,
    #[serde(default)]
    target: Option<PaymentTarget>,
    #[serde(default)]
    loan_id: Option<LoanId>,
    provider: Provider,
    #[serde(default, alias = "phone")]
    payer_contact: String,
}

impl TryFrom<PaymentRequestBody> for PaymentRequest {
    type Error = String;

    fn try_from(body: PaymentRequestBody) -> Result<Self, String> {
        let target = match (body.target, body.loan_id) {
            (Some(target), None) => target,
            (None, Some(loan)) => PaymentTarget::Loan(loan),
            (Some(PaymentTarget::Loan(a)), Some(b)) if a == b => PaymentTarget::Loan(a),
            (Some(_), Some(_)) => return Err("`target` and `loanId` disagree".into()),
            (None, None) => return Err("one of `target` or `loanId` is required".into()),
        };
        Ok(Self {
            amount: body.amount,
            target,
            provider: body.provider,
            payer_contact: body.payer_contact,
        })
    }
}

/// Result of a successful `initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiated {
    pub transaction_id: PaymentId,
    pub reference: Reference,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_expires_at: Option<DateTime<Utc>>,
    /// Transfer instructions for bank payments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

pub struct PaymentMachine {
    transactions: Arc<TransactionBook>,
    ledger: Arc<LoanLedger>,
    targets: Arc<TargetRegistry>,
    receipts: Arc<ReceiptIssuer>,
    gate: Arc<PinGate>,
    provider: Arc<dyn MobileMoney>,
    clock: Arc<dyn Clock>,
    events: EventHub,
    max_pin_attempts: u8,
}

impl PaymentMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<TransactionBook>,
        ledger: Arc<LoanLedger>,
        targets: Arc<TargetRegistry>,
        receipts: Arc<ReceiptIssuer>,
        gate: Arc<PinGate>,
        provider: Arc<dyn MobileMoney>,
        clock: Arc<dyn Clock>,
        events: EventHub,
        max_pin_attempts: u8,
    ) -> Self {
        Self {
            transactions,
            ledger,
            targets,
            receipts,
            gate,
            provider,
            clock,
            events,
            max_pin_attempts: max_pin_attempts.max(1),
        }
    }

    async fn lock(
        &self,
        reference: &Reference,
    ) -> Result<OwnedMutexGuard<PaymentTransaction>, ErrorKind> {
        self.transactions
            .lock(reference)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => ErrorKind::TransactionNotFound(reference.to_string()),
                other => other.into(),
            })
    }

    // ── initiate ──

    pub async fn initiate(
        &self,
        caller: &Caller,
        request: PaymentRequest,
    ) -> Result<Initiated, ErrorKind> {
        let amount = positive_amount(request.amount)?;
        if request.payer_contact.trim().is_empty() {
            return Err(ErrorKind::InvalidInput("payerContact is required".into()));
        }
        self.check_target(caller, &request.target, amount).await?;
        if request.provider.requires_pin() {
            self.gate.require_pin(&caller.borrower_id).await?;
        }

        let txn = self.create(&caller.borrower_id, amount, &request)?;
        let reference = txn.reference.clone();
        info!(
            reference = %reference,
            payer = %txn.payer,
            amount,
            target = %txn.target,
            provider = txn.provider.as_str(),
            "payment initiated"
        );

        if txn.phase == Phase::AwaitingSettlement {
            return Ok(Initiated {
                transaction_id: txn.id,
                reference: reference.clone(),
                phase: txn.phase,
                prompt_expires_at: None,
                instructions: Some(format!(
                    "Transfer UGX {amount} to the association account quoting reference {reference}. \
                     The payment is confirmed once staff reconcile the transfer."
                )),
            });
        }

        let collection = CollectionRequest {
            reference: reference.clone(),
            payer: caller.borrower_id.clone(),
            amount,
            phone: request.payer_contact.clone(),
            provider: request.provider,
        };
        let ack = self.provider.request_collection(&collection).await;

        let mut txn = self.lock(&reference).await?;
        if txn.phase != Phase::Created {
            // Swept while the provider was busy.
            terminal_error(&txn)?;
            return Err(ErrorKind::NotAuthorized);
        }
        match ack {
            Ok(ack) => {
                let prompt = self.gate.open_prompt(&txn.payer);
                txn.phase = Phase::PendingAuthorization;
                txn.prompt_expires_at = Some(prompt.expires_at);
                txn.provider_ref = Some(ack.provider_ref);
                Ok(Initiated {
                    transaction_id: txn.id,
                    reference,
                    phase: txn.phase,
                    prompt_expires_at: txn.prompt_expires_at,
                    instructions: None,
                })
            }
            Err(err) => {
                warn!(reference = %reference, error = %err, "provider rejected collection request");
                self.fail(&mut txn, FailureReason::ProviderUnavailable);
                Err(ErrorKind::Provider(err.to_string()))
            }
        }
    }

    /// Whether `target` can take a payment of `amount` from `caller` right now.
    async fn check_target(
        &self,
        caller: &Caller,
        target: &PaymentTarget,
        amount: Ugx,
    ) -> Result<(), ErrorKind> {
        match target {
            PaymentTarget::Loan(id) => {
                let loan = self.ledger.loan(id).await.map_err(|err| match err {
                    ErrorKind::LoanNotFound(id) => ErrorKind::InvalidTarget(format!("loan {id}")),
                    other => other,
                })?;
                caller.may_act_for(&loan.borrower_id)?;
                self.ledger.check_payable(id, amount).await?;
            }
            PaymentTarget::Donation(cause) => match self.targets.cause(cause).await {
                Some(c) if c.open => {}
                _ => return Err(ErrorKind::InvalidTarget(format!("donation cause {cause}"))),
            },
            PaymentTarget::Event(event) => match self.targets.event(event).await {
                Some(e) if e.open => {
                    if e.fee.is_some_and(|fee| fee != amount) {
                        return Err(ErrorKind::InvalidAmount(amount as i64));
                    }
                }
                _ => return Err(ErrorKind::InvalidTarget(format!("event {event}"))),
            },
        }
        Ok(())
    }

    /// Insert a fresh transaction under a unique reference. Two attempts by
    /// the same payer inside one millisecond get consecutive timestamps.
    fn create(
        &self,
        payer: &BorrowerId,
        amount: Ugx,
        request: &PaymentRequest,
    ) -> Result<PaymentTransaction, ErrorKind> {
        let now = self.clock.now();
        let mut stamp = now.timestamp_millis();
        let (phase, deadline) = if request.provider.requires_pin() {
            (Phase::Created, Some(self.gate.prompt_from(payer, now).expires_at))
        } else {
            (Phase::AwaitingSettlement, None)
        };
        loop {
            let txn = PaymentTransaction {
                id: PaymentId::new(),
                reference: Reference::new(request.target.prefix(), payer, stamp),
                payer: payer.clone(),
                amount,
                target: request.target.clone(),
                provider: request.provider,
                payer_contact: request.payer_contact.clone(),
                phase,
                created_at: now,
                prompt_expires_at: deadline,
                authorized_at: None,
                pin_failures: 0,
                confirmed_at: None,
                failure: None,
                confirmation: None,
                provider_ref: None,
            };
            match self.transactions.insert(txn.clone()) {
                Ok(()) => return Ok(txn),
                Err(StoreError::Duplicate(_)) => stamp += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    // ── authorize ──

    /// Verify the payer's PIN for `reference`.
    ///
    /// Wrong PINs count against the transaction; reaching the limit abandons
    /// it. A correct PIN after the prompt window expires the transaction.
    pub async fn authorize(
        &self,
        caller: &Caller,
        reference: &Reference,
        pin: &str,
    ) -> Result<PaymentTransaction, ErrorKind> {
        let prompt = {
            let mut txn = self.lock(reference).await?;
            if txn.payer != caller.borrower_id {
                return Err(ErrorKind::Forbidden);
            }
            self.ensure_awaiting_pin(&mut txn)?;
            if txn.authorized_at.is_some() {
                return Ok(txn.clone());
            }
            let Some(expires_at) = txn.prompt_expires_at else {
                return Err(ErrorKind::NotAuthorized);
            };
            self.gate.prompt_until(&txn.payer, expires_at)
        };

        let verdict = self.gate.verify(&prompt, pin).await;

        let mut txn = self.lock(reference).await?;
        // A cancel or expiry may have committed while the PIN store was busy.
        self.ensure_awaiting_pin(&mut txn)?;
        if txn.authorized_at.is_some() {
            return Ok(txn.clone());
        }
        match verdict {
            Ok(authorized) => {
                txn.authorized_at = Some(authorized.at);
                txn.pin_failures = 0;
                info!(reference = %reference, "payment authorised");
                Ok(txn.clone())
            }
            Err(ErrorKind::RequestExpired) => {
                self.expire(&mut txn);
                Err(ErrorKind::RequestExpired)
            }
            Err(ErrorKind::InvalidPin { .. }) => {
                txn.pin_failures = txn.pin_failures.saturating_add(1);
                if txn.pin_failures >= self.max_pin_attempts {
                    self.fail(&mut txn, FailureReason::PinAttemptsExhausted);
                    return Err(ErrorKind::TransactionFailed(
                        FailureReason::PinAttemptsExhausted,
                    ));
                }
                Err(ErrorKind::InvalidPin {
                    attempts_left: Some(self.max_pin_attempts - txn.pin_failures),
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Accept only transactions still waiting for their PIN. Expires the
    /// transaction if its window has passed.
    fn ensure_awaiting_pin(&self, txn: &mut PaymentTransaction) -> Result<(), ErrorKind> {
        terminal_error(txn)?;
        let phase = txn.phase;
        match phase {
            Phase::AwaitingSettlement => Err(ErrorKind::ManualSettlementRequired),
            Phase::Created => Err(ErrorKind::NotAuthorized),
            _ if txn.authorized_at.is_none() && self.window_elapsed(txn) => {
                self.expire(txn);
                Err(ErrorKind::RequestExpired)
            }
            _ => Ok(()),
        }
    }

    fn window_elapsed(&self, txn: &PaymentTransaction) -> bool {
        txn.prompt_expires_at
            .is_some_and(|deadline| self.clock.now() >= deadline)
    }

    // ── confirm ──

    /// Commit an authorised payment: apply it to the target, issue the
    /// receipt and mark the transaction confirmed.
    ///
    /// A repeat call for a confirmed reference fails with
    /// [`ErrorKind::AlreadyConfirmed`] carrying the original result; nothing
    /// is applied twice.
    pub async fn confirm(
        &self,
        caller: &Caller,
        reference: &Reference,
    ) -> Result<Confirmation, ErrorKind> {
        let mut txn = self.lock(reference).await?;
        caller.may_act_for(&txn.payer)?;
        terminal_error(&txn)?;
        match txn.phase {
            Phase::AwaitingSettlement => return Err(ErrorKind::ManualSettlementRequired),
            Phase::Created if self.window_elapsed(&txn) => {
                self.expire(&mut txn);
                return Err(ErrorKind::Expired);
            }
            Phase::Created => return Err(ErrorKind::NotAuthorized),
            _ => {}
        }
        if txn.authorized_at.is_none() {
            if self.window_elapsed(&txn) {
                self.expire(&mut txn);
                return Err(ErrorKind::Expired);
            }
            return Err(ErrorKind::NotAuthorized);
        }
        self.commit(&mut txn).await
    }

    /// Staff confirmation of a bank transfer that has arrived.
    pub async fn reconcile_bank_transfer(
        &self,
        caller: &Caller,
        reference: &Reference,
    ) -> Result<Confirmation, ErrorKind> {
        caller.require_staff()?;
        let mut txn = self.lock(reference).await?;
        terminal_error(&txn)?;
        if txn.phase != Phase::AwaitingSettlement {
            return Err(ErrorKind::InvalidInput(format!(
                "transaction {reference} is {}, not awaiting settlement",
                txn.phase
            )));
        }
        info!(reference = %reference, staff = %caller.borrower_id, "bank transfer reconciled");
        self.commit(&mut txn).await
    }

    async fn commit(&self, txn: &mut PaymentTransaction) -> Result<Confirmation, ErrorKind> {
        if let Err(err) = self.apply_to_target(txn).await {
            match &err {
                ErrorKind::OverpaymentRejected { .. } => {
                    self.fail(txn, FailureReason::OverpaymentRejected)
                }
                ErrorKind::InvalidTarget(_) | ErrorKind::LoanNotFound(_) => {
                    self.fail(txn, FailureReason::TargetClosed)
                }
                _ => {}
            }
            return Err(err);
        }

        let receipt = self
            .receipts
            .issue(ReceiptSource::Payment(txn.id), &txn.payer, txn.amount);
        let confirmation = Confirmation {
            payment_id: txn.id,
            receipt_id: receipt.id,
        };
        txn.phase = Phase::Confirmed;
        txn.confirmed_at = Some(self.clock.now());
        txn.confirmation = Some(confirmation.clone());
        info!(
            reference = %txn.reference,
            payment = %txn.id,
            amount = txn.amount,
            target = %txn.target,
            "payment confirmed"
        );
        self.events.publish(LedgerEvent::PaymentConfirmed {
            reference: txn.reference.clone(),
            payment_id: txn.id,
            receipt_id: confirmation.receipt_id.clone(),
            target: txn.target.clone(),
            amount: txn.amount,
        });
        Ok(confirmation)
    }

    /// Called with the transaction lock held; takes the target's lock second.
    async fn apply_to_target(&self, txn: &PaymentTransaction) -> Result<(), ErrorKind> {
        match &txn.target {
            PaymentTarget::Loan(id) => {
                self.ledger.apply_payment(id, txn.amount).await?;
            }
            PaymentTarget::Donation(cause) => {
                let mut cause = self
                    .targets
                    .lock_cause(cause)
                    .await
                    .map_err(|_| ErrorKind::InvalidTarget(format!("donation cause {cause}")))?;
                if !cause.open {
                    return Err(ErrorKind::InvalidTarget(format!("donation cause {}", cause.id)));
                }
                cause.total += txn.amount;
                cause.contributions += 1;
            }
            PaymentTarget::Event(event) => {
                let mut event = self
                    .targets
                    .lock_event(event)
                    .await
                    .map_err(|_| ErrorKind::InvalidTarget(format!("event {event}")))?;
                if !event.open {
                    return Err(ErrorKind::InvalidTarget(format!("event {}", event.id)));
                }
                event.total += txn.amount;
                event.contributions += 1;
            }
        }
        Ok(())
    }

    // ── cancel / expire ──

    /// Abandon a transaction that is still waiting for its PIN.
    pub async fn cancel(
        &self,
        caller: &Caller,
        reference: &Reference,
    ) -> Result<PaymentTransaction, ErrorKind> {
        let mut txn = self.lock(reference).await?;
        caller.may_act_for(&txn.payer)?;
        if let Some(original) = &txn.confirmation {
            return Err(ErrorKind::AlreadyConfirmed {
                original: original.clone(),
            });
        }
        if txn.phase != Phase::PendingAuthorization {
            return Err(ErrorKind::NotCancellable(txn.phase));
        }
        self.fail(&mut txn, FailureReason::Cancelled);
        Ok(txn.clone())
    }

    /// Expire every unauthorised transaction whose PIN window has passed,
    /// including ones still waiting on the provider.
    pub async fn expire_stale(&self) -> Vec<Reference> {
        let mut expired = Vec::new();
        for reference in self.transactions.references() {
            let Ok(mut txn) = self.lock(&reference).await else {
                continue;
            };
            if matches!(txn.phase, Phase::Created | Phase::PendingAuthorization)
                && txn.authorized_at.is_none()
                && self.window_elapsed(&txn)
            {
                self.expire(&mut txn);
                expired.push(reference);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "stale payments expired");
        }
        expired
    }

    fn fail(&self, txn: &mut PaymentTransaction, reason: FailureReason) {
        txn.phase = Phase::Failed;
        txn.failure = Some(reason);
        info!(reference = %txn.reference, reason = reason.as_str(), "payment failed");
        self.events.publish(LedgerEvent::PaymentFailed {
            reference: txn.reference.clone(),
            reason,
        });
    }

    fn expire(&self, txn: &mut PaymentTransaction) {
        txn.phase = Phase::Expired;
        debug!(reference = %txn.reference, "payment expired");
        self.events.publish(LedgerEvent::PaymentExpired {
            reference: txn.reference.clone(),
        });
    }

    // ── lookups ──

    pub async fn transaction(
        &self,
        caller: &Caller,
        reference: &Reference,
    ) -> Result<PaymentTransaction, ErrorKind> {
        let txn = self
            .transactions
            .get(reference)
            .await
            .ok_or_else(|| ErrorKind::TransactionNotFound(reference.to_string()))?;
        caller.may_act_for(&txn.payer)?;
        Ok(txn)
    }

    pub async fn by_payment_id(
        &self,
        caller: &Caller,
        id: &PaymentId,
    ) -> Result<PaymentTransaction, ErrorKind> {
        let reference = self
            .transactions
            .reference_for(id)
            .ok_or_else(|| ErrorKind::TransactionNotFound(id.to_string()))?;
        self.transaction(caller, &reference).await
    }

    /// Confirmed payments applied to `loan`.
    pub async fn payments_to(&self, loan: &LoanId) -> Vec<PaymentTransaction> {
        let mut out = Vec::new();
        for reference in self.transactions.references() {
            let Some(txn) = self.transactions.get(&reference).await else {
                continue;
            };
            if txn.phase == Phase::Confirmed && txn.target == PaymentTarget::Loan(*loan) {
                out.push(txn);
            }
        }
        out.sort_by_key(|t| t.confirmed_at);
        out
    }
}

/// The error a late caller sees for a transaction that already ended.
fn terminal_error(txn: &PaymentTransaction) -> Result<(), ErrorKind> {
    match txn.phase {
        Phase::Confirmed => match &txn.confirmation {
            Some(original) => Err(ErrorKind::AlreadyConfirmed {
                original: original.clone(),
            }),
            None => Err(ErrorKind::NotAuthorized),
        },
        Phase::Failed => Err(txn
            .failure
            .map(ErrorKind::for_failure)
            .unwrap_or(ErrorKind::Cancelled)),
        Phase::Expired => Err(ErrorKind::Expired),
        _ => Ok(()),
    }
}

//! Receipt issuance for confirmed payments and applied deductions.

use std::sync::Arc;

use aidledger_core::{
    BorrowerId, Clock, ErrorKind, PaymentId, Receipt, ReceiptId, ReceiptSource, Ugx,
};
use aidledger_store::ReceiptBook;
use tracing::info;

pub struct ReceiptIssuer {
    book: Arc<ReceiptBook>,
    clock: Arc<dyn Clock>,
}

impl ReceiptIssuer {
    pub fn new(book: Arc<ReceiptBook>, clock: Arc<dyn Clock>) -> Self {
        Self { book, clock }
    }

    /// Issue the receipt for `source`. Issuing again for the same source
    /// returns the original receipt unchanged.
    pub fn issue(&self, source: ReceiptSource, borrower: &BorrowerId, amount: Ugx) -> Receipt {
        let (receipt, created) = self.book.issue_once(source, || {
            let id = ReceiptId::for_source(&source);
            let artifact = match source {
                ReceiptSource::Payment(payment) => format!("/payments/{payment}/receipt"),
                ReceiptSource::Deduction(_) => format!("/receipts/{id}"),
            };
            Receipt {
                id,
                source,
                borrower_id: borrower.clone(),
                amount,
                issued_at: self.clock.now(),
                artifact,
            }
        });
        if created {
            info!(receipt = %receipt.id, borrower = %receipt.borrower_id, amount, "receipt issued");
        }
        receipt
    }

    pub fn for_payment(&self, payment: &PaymentId) -> Result<Receipt, ErrorKind> {
        self.book
            .by_source(&ReceiptSource::Payment(*payment))
            .ok_or_else(|| ErrorKind::ReceiptNotFound(payment.to_string()))
    }

    pub fn get(&self, id: &ReceiptId) -> Result<Receipt, ErrorKind> {
        self.book
            .by_id(id)
            .ok_or_else(|| ErrorKind::ReceiptNotFound(id.to_string()))
    }

    /// Render the downloadable artifact. Plain text; PDF layout is done by the
    /// reporting service.
    pub fn render(&self, receipt: &Receipt) -> Vec<u8> {
        let (kind, source_id) = match receipt.source {
            ReceiptSource::Payment(id) => ("Payment", id.to_string()),
            ReceiptSource::Deduction(id) => ("Automated deduction", id.to_string()),
        };
        format!(
            "RECEIPT {}\n\
             Type:      {}\n\
             Source:    {}\n\
             Borrower:  {}\n\
             Amount:    UGX {}\n\
             Issued at: {}\n",
            receipt.id,
            kind,
            source_id,
            receipt.borrower_id,
            receipt.amount,
            receipt.issued_at.to_rfc3339(),
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::{DeductionId, SystemClock};

    fn issuer() -> ReceiptIssuer {
        ReceiptIssuer::new(Arc::new(ReceiptBook::new()), Arc::new(SystemClock))
    }

    #[test]
    fn idempotent_by_source() {
        let issuer = issuer();
        let payment = PaymentId::new();
        let who = BorrowerId::new("STU1");
        let first = issuer.issue(ReceiptSource::Payment(payment), &who, 250_000);
        let second = issuer.issue(ReceiptSource::Payment(payment), &who, 1);
        assert_eq!(first, second);
        assert_eq!(issuer.for_payment(&payment).unwrap(), first);
        assert_eq!(first.artifact, format!("/payments/{payment}/receipt"));
    }

    #[test]
    fn unknown_payment_has_no_receipt() {
        let issuer = issuer();
        assert!(matches!(
            issuer.for_payment(&PaymentId::new()),
            Err(ErrorKind::ReceiptNotFound(_))
        ));
    }

    #[test]
    fn render_mentions_amount_and_kind() {
        let issuer = issuer();
        let receipt = issuer.issue(
            ReceiptSource::Deduction(DeductionId::new()),
            &BorrowerId::new("STU1"),
            400_000,
        );
        let text = String::from_utf8(issuer.render(&receipt)).unwrap();
        assert!(text.contains("UGX 400000"));
        assert!(text.contains("Automated deduction"));
        assert_eq!(issuer.get(&receipt.id).unwrap(), receipt);
    }
}

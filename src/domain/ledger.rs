use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Cents, Invoice, InvoiceId, InvoiceStatus, InvoiceType, Payment};

/// Sum of the payment amounts attached to one invoice.
pub fn total_paid(invoice_id: InvoiceId, payments: &[Payment]) -> Cents {
    payments
        .iter()
        .filter(|p| p.invoice_id == invoice_id)
        .map(|p| p.amount)
        .sum()
}

/// Derive the status of an invoice for a given day.
/// Cancelled is sticky and checked first. Overpayment counts as paid.
pub fn derive_status(invoice: &Invoice, today: NaiveDate) -> InvoiceStatus {
    if invoice.is_cancelled() {
        InvoiceStatus::Cancelled
    } else if invoice.amount_paid >= invoice.total_amount {
        InvoiceStatus::Paid
    } else if today > invoice.due_date {
        InvoiceStatus::Overdue
    } else {
        InvoiceStatus::Pending
    }
}

/// Recompute amount_paid from the invoice's payments and re-derive its status.
/// The payment type is left untouched.
pub fn reconcile(invoice: &mut Invoice, payments: &[Payment], today: NaiveDate) {
    invoice.amount_paid = total_paid(invoice.id, payments);
    invoice.status = derive_status(invoice, today);
}

/// Reconcile after a payment was deleted: once no payment is left, the
/// invoice forgets its payment type.
pub fn reconcile_after_deletion(invoice: &mut Invoice, payments: &[Payment], today: NaiveDate) {
    if !payments.iter().any(|p| p.invoice_id == invoice.id) {
        invoice.payment_type = None;
    }
    reconcile(invoice, payments, today);
}

/// Put an invoice in its terminal cancelled state. Payments must be deleted by
/// the caller in the same transaction.
pub fn apply_cancellation(invoice: &mut Invoice) {
    invoice.amount_paid = 0;
    invoice.payment_type = None;
    invoice.status = InvoiceStatus::Cancelled;
}

/// Validate a payment amount against the target invoice.
pub fn validate_payment(invoice: &Invoice, amount: Cents) -> Result<(), PaymentError> {
    if amount <= 0 {
        return Err(PaymentError::NonPositiveAmount(amount));
    }
    if invoice.is_cancelled() {
        return Err(PaymentError::InvoiceCancelled(invoice.invoice_number.clone()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    NonPositiveAmount(Cents),
    InvoiceCancelled(String),
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::NonPositiveAmount(amount) => {
                write!(f, "payment amount must be positive (got {} cents)", amount)
            }
            PaymentError::InvoiceCancelled(number) => {
                write!(f, "invoice {} is cancelled and cannot receive payments", number)
            }
        }
    }
}

impl std::error::Error for PaymentError {}

/// An invoice whose stored amount_paid disagrees with its payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaidMismatch {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub stored: Cents,
    pub computed: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateNumber {
    pub invoice_type: InvoiceType,
    pub invoice_number: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub invoice_count: usize,
    pub payment_count: usize,
    pub paid_mismatches: Vec<PaidMismatch>,
    /// Cancelled invoices that still have payments attached
    pub cancelled_with_payments: Vec<String>,
    pub duplicate_numbers: Vec<DuplicateNumber>,
    /// Payments pointing at an invoice that does not exist
    pub orphan_payments: usize,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.paid_mismatches.is_empty()
            && self.cancelled_with_payments.is_empty()
            && self.duplicate_numbers.is_empty()
            && self.orphan_payments == 0
    }
}

/// Check the reconciliation invariants over one company's records.
pub fn build_integrity_report(invoices: &[Invoice], payments: &[Payment]) -> IntegrityReport {
    let mut paid_by_invoice: HashMap<InvoiceId, (Cents, usize)> = HashMap::new();
    for payment in payments {
        let entry = paid_by_invoice.entry(payment.invoice_id).or_insert((0, 0));
        entry.0 += payment.amount;
        entry.1 += 1;
    }

    let mut paid_mismatches = Vec::new();
    let mut cancelled_with_payments = Vec::new();
    let mut numbers: HashMap<(InvoiceType, &str), usize> = HashMap::new();

    for invoice in invoices {
        let (computed, count) = paid_by_invoice.get(&invoice.id).copied().unwrap_or((0, 0));
        if invoice.amount_paid != computed {
            paid_mismatches.push(PaidMismatch {
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                stored: invoice.amount_paid,
                computed,
            });
        }
        if invoice.is_cancelled() && count > 0 {
            cancelled_with_payments.push(invoice.invoice_number.clone());
        }
        *numbers
            .entry((invoice.invoice_type, invoice.invoice_number.as_str()))
            .or_insert(0) += 1;
    }

    let mut duplicate_numbers: Vec<DuplicateNumber> = numbers
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((invoice_type, number), count)| DuplicateNumber {
            invoice_type,
            invoice_number: number.to_string(),
            count,
        })
        .collect();
    duplicate_numbers.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));

    let orphan_payments = payments
        .iter()
        .filter(|p| !invoices.iter().any(|i| i.id == p.invoice_id))
        .count();

    IntegrityReport {
        invoice_count: invoices.len(),
        payment_count: payments.len(),
        paid_mismatches,
        cancelled_with_payments,
        duplicate_numbers,
        orphan_payments,
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::{InvoiceDraft, InvoiceItem, PaymentType};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn make_invoice(total: Cents, due: &str) -> Invoice {
        let draft = InvoiceDraft::new(Uuid::new_v4(), InvoiceType::Invoice, date("2025-03-01"))
            .with_item(InvoiceItem::new("Réparation", 1.0, total))
            .with_due_date(date(due));
        Invoice::from_draft(Uuid::new_v4(), draft, "2025-1".into(), 0)
    }

    fn pay(invoice: &Invoice, amount: Cents) -> Payment {
        Payment::new(
            invoice.id,
            invoice.company_id,
            amount,
            PaymentType::Ttc,
            0.0,
            date("2025-03-05"),
            "Cash",
        )
    }

    #[test]
    fn test_status_pending_then_overdue() {
        let invoice = make_invoice(10000, "2025-03-31");
        assert_eq!(derive_status(&invoice, date("2025-03-31")), InvoiceStatus::Pending);
        assert_eq!(derive_status(&invoice, date("2025-04-01")), InvoiceStatus::Overdue);
    }

    #[test]
    fn test_status_paid_iff_covered() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        invoice.amount_paid = 9999;
        assert_ne!(derive_status(&invoice, date("2025-03-10")), InvoiceStatus::Paid);
        invoice.amount_paid = 10000;
        assert_eq!(derive_status(&invoice, date("2025-03-10")), InvoiceStatus::Paid);
        // Paid wins over overdue
        assert_eq!(derive_status(&invoice, date("2026-01-01")), InvoiceStatus::Paid);
    }

    #[test]
    fn test_cancelled_is_sticky() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        apply_cancellation(&mut invoice);
        invoice.amount_paid = 50000;
        assert_eq!(derive_status(&invoice, date("2025-03-10")), InvoiceStatus::Cancelled);
        assert_eq!(derive_status(&invoice, date("2030-01-01")), InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_reconcile_sums_only_own_payments() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        let other = make_invoice(5000, "2025-03-31");
        invoice.payment_type = Some(PaymentType::Ttc);

        let payments = vec![pay(&invoice, 4000), pay(&other, 5000), pay(&invoice, 3000)];
        reconcile(&mut invoice, &payments, date("2025-03-10"));

        assert_eq!(invoice.amount_paid, 7000);
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.payment_type, Some(PaymentType::Ttc));
    }

    #[test]
    fn test_reconcile_allows_overpayment() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        let payments = vec![pay(&invoice, 8000), pay(&invoice, 8000)];
        reconcile(&mut invoice, &payments, date("2025-03-10"));

        assert_eq!(invoice.amount_paid, 16000);
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.balance_due(), -6000);
    }

    #[test]
    fn test_reconcile_without_payments_keeps_payment_type() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        invoice.payment_type = Some(PaymentType::Ttc);
        reconcile(&mut invoice, &[], date("2025-03-10"));

        assert_eq!(invoice.amount_paid, 0);
        assert_eq!(invoice.payment_type, Some(PaymentType::Ttc));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }

    #[test]
    fn test_reconcile_after_deleting_last_payment_clears_payment_type() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        let other = make_invoice(5000, "2025-03-31");
        invoice.payment_type = Some(PaymentType::Ht);
        invoice.amount_paid = 10000;

        // A payment of another invoice does not count
        reconcile_after_deletion(&mut invoice, &[pay(&other, 5000)], date("2025-03-10"));

        assert_eq!(invoice.amount_paid, 0);
        assert_eq!(invoice.payment_type, None);
        assert_eq!(invoice.status, InvoiceStatus::Pending);

        let mut still_paid = make_invoice(10000, "2025-03-31");
        still_paid.payment_type = Some(PaymentType::Ht);
        let remaining = vec![pay(&still_paid, 2000)];
        reconcile_after_deletion(&mut still_paid, &remaining, date("2025-03-10"));
        assert_eq!(still_paid.payment_type, Some(PaymentType::Ht));
        assert_eq!(still_paid.amount_paid, 2000);
    }

    #[test]
    fn test_validate_payment() {
        let mut invoice = make_invoice(10000, "2025-03-31");
        assert_eq!(
            validate_payment(&invoice, 0),
            Err(PaymentError::NonPositiveAmount(0))
        );
        assert!(validate_payment(&invoice, -100).is_err());
        assert!(validate_payment(&invoice, 100).is_ok());

        apply_cancellation(&mut invoice);
        assert!(matches!(
            validate_payment(&invoice, 100),
            Err(PaymentError::InvoiceCancelled(_))
        ));
    }

    #[test]
    fn test_integrity_report_detects_drift() {
        let mut drifted = make_invoice(10000, "2025-03-31");
        let clean = make_invoice(5000, "2025-03-31");
        let payments = vec![pay(&drifted, 4000), pay(&clean, 0)];
        drifted.amount_paid = 9000;

        let report = build_integrity_report(&[drifted.clone(), clean], &payments);

        assert!(!report.is_ok());
        assert_eq!(report.paid_mismatches.len(), 1);
        assert_eq!(report.paid_mismatches[0].stored, 9000);
        assert_eq!(report.paid_mismatches[0].computed, 4000);
        // Both fixtures carry "2025-1"
        assert_eq!(report.duplicate_numbers.len(), 1);
        assert_eq!(report.duplicate_numbers[0].count, 2);
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ht_to_ttc, ttc_to_ht, Cents, CompanyId, InvoiceId, PaymentType};

pub type PaymentId = Uuid;

/// A payment received against one invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub company_id: CompanyId,
    /// Tax-included amount; the only figure reconciliation sums
    pub amount: Cents,
    pub amount_ht: Cents,
    /// How the amount was entered
    pub payment_type: PaymentType,
    /// Invoice tax percentage at the time of payment
    pub tax_percentage: f64,
    pub date: NaiveDate,
    /// e.g. "Cash", "Chèque", "Virement"
    pub method: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Create a payment from an amount entered in `payment_type`.
    pub fn new(
        invoice_id: InvoiceId,
        company_id: CompanyId,
        entered_amount: Cents,
        payment_type: PaymentType,
        tax_percentage: f64,
        date: NaiveDate,
        method: impl Into<String>,
    ) -> Self {
        let mut payment = Self {
            id: Uuid::new_v4(),
            invoice_id,
            company_id,
            amount: 0,
            amount_ht: 0,
            payment_type,
            tax_percentage,
            date,
            method: method.into(),
            reference: None,
            created_at: Utc::now(),
        };
        payment.set_entered_amount(entered_amount, payment_type);
        payment
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Re-derive the TTC and HT figures from an entered amount.
    pub fn set_entered_amount(&mut self, entered_amount: Cents, payment_type: PaymentType) {
        self.payment_type = payment_type;
        match payment_type {
            PaymentType::Ttc => {
                self.amount = entered_amount;
                self.amount_ht = ttc_to_ht(entered_amount, self.tax_percentage);
            }
            PaymentType::Ht => {
                self.amount_ht = entered_amount;
                self.amount = ht_to_ttc(entered_amount, self.tax_percentage);
            }
        }
    }

    /// The amount as the user typed it.
    pub fn entered_amount(&self) -> Cents {
        match self.payment_type {
            PaymentType::Ttc => self.amount,
            PaymentType::Ht => self.amount_ht,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn test_ttc_payment_derives_ht() {
        let payment = Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            11900,
            PaymentType::Ttc,
            19.0,
            today(),
            "Cash",
        );
        assert_eq!(payment.amount, 11900);
        assert_eq!(payment.amount_ht, 10000);
        assert_eq!(payment.entered_amount(), 11900);
    }

    #[test]
    fn test_ht_payment_derives_ttc() {
        let payment = Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            10000,
            PaymentType::Ht,
            19.0,
            today(),
            "Virement",
        )
        .with_reference("VIR-0042");
        assert_eq!(payment.amount, 11900);
        assert_eq!(payment.amount_ht, 10000);
        assert_eq!(payment.reference.as_deref(), Some("VIR-0042"));
    }
}

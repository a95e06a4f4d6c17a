use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{percent_of, Cents, ClientId, CompanyId};

pub type InvoiceId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    /// Formal invoice (facture)
    Invoice,
    /// Pre-invoice document (bon de livraison), convertible into an invoice
    DeliveryNote,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Invoice => "invoice",
            InvoiceType::DeliveryNote => "delivery_note",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "invoice" | "facture" => Some(InvoiceType::Invoice),
            "delivery_note" | "bon_de_livraison" => Some(InvoiceType::DeliveryNote),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InvoiceType::Invoice => "Facture",
            InvoiceType::DeliveryNote => "Bon de livraison",
        }
    }
}

impl std::fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    /// Terminal: no payment may be attached once set
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(InvoiceStatus::Pending),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            "cancelled" | "canceled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether amounts are entered tax-excluded (HT) or tax-included (TTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    #[serde(rename = "HT")]
    Ht,
    #[serde(rename = "TTC")]
    Ttc,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Ht => "HT",
            PaymentType::Ttc => "TTC",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "HT" => Some(PaymentType::Ht),
            "TTC" => Some(PaymentType::Ttc),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A line item with the garage accounting sub-fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: Cents,
    /// quantity × unit_price + mod_amount + tarif_tolier
    pub total: Cents,
    /// Purchase cost of the part
    pub achat_piece: Cents,
    /// Resale price of the part, mirrors unit_price
    pub vente_piece: Cents,
    /// max(0, vente_piece - achat_piece)
    pub benefits: Cents,
    /// Labor surcharge (main d'oeuvre)
    pub mod_amount: Cents,
    /// Bodywork surcharge
    pub tarif_tolier: Cents,
}

impl InvoiceItem {
    pub fn new(description: impl Into<String>, quantity: f64, unit_price: Cents) -> Self {
        let mut item = Self {
            description: description.into(),
            quantity,
            unit_price,
            total: 0,
            achat_piece: 0,
            vente_piece: 0,
            benefits: 0,
            mod_amount: 0,
            tarif_tolier: 0,
        };
        item.recompute();
        item
    }

    pub fn with_achat_piece(mut self, achat_piece: Cents) -> Self {
        self.achat_piece = achat_piece;
        self.recompute();
        self
    }

    pub fn with_mod(mut self, mod_amount: Cents) -> Self {
        self.mod_amount = mod_amount;
        self.recompute();
        self
    }

    pub fn with_tarif_tolier(mut self, tarif_tolier: Cents) -> Self {
        self.tarif_tolier = tarif_tolier;
        self.recompute();
        self
    }

    fn recompute(&mut self) {
        self.vente_piece = self.unit_price;
        self.benefits = (self.vente_piece - self.achat_piece).max(0);
        let base = (self.quantity * self.unit_price as f64).round() as Cents;
        self.total = base + self.mod_amount + self.tarif_tolier;
    }
}

/// Derived invoice amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Cents,
    pub tax_amount: Cents,
    pub discount_amount: Cents,
    pub total_amount: Cents,
}

/// total = subtotal + tax - discount + stamp, where tax and discount are both
/// computed on the subtotal.
pub fn compute_totals(
    items: &[InvoiceItem],
    tax_percentage: f64,
    discount_percentage: f64,
    stamp_cents: Cents,
) -> InvoiceTotals {
    let subtotal: Cents = items.iter().map(|item| item.total).sum();
    let tax_amount = percent_of(subtotal, tax_percentage);
    let discount_amount = percent_of(subtotal, discount_percentage);
    InvoiceTotals {
        subtotal,
        tax_amount,
        discount_amount,
        total_amount: subtotal + tax_amount - discount_amount + stamp_cents,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub company_id: CompanyId,
    pub client_id: ClientId,
    /// Formatted "{year}-{n}"
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    /// Document date; `created_at` stands in when absent
    pub date: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Cents,
    pub tax_percentage: f64,
    pub tax_amount: Cents,
    pub discount_percentage: f64,
    pub discount_amount: Cents,
    pub stamp_cents: Cents,
    pub total_amount: Cents,
    /// Always the sum of the payments attached to this invoice
    pub amount_paid: Cents,
    pub payment_type: Option<PaymentType>,
    pub status: InvoiceStatus,
    /// Number the document carried while it was a delivery note
    pub original_delivery_note_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Build a pending, unpaid invoice from a validated draft.
    pub fn from_draft(
        company_id: CompanyId,
        draft: InvoiceDraft,
        invoice_number: String,
        stamp_cents: Cents,
    ) -> Self {
        let now = Utc::now();
        let mut invoice = Self {
            id: Uuid::new_v4(),
            company_id,
            client_id: draft.client_id,
            invoice_number,
            invoice_type: draft.invoice_type,
            date: Some(draft.date),
            due_date: draft.due_date.unwrap_or(draft.date),
            items: draft.items,
            subtotal: 0,
            tax_percentage: draft.tax_percentage,
            tax_amount: 0,
            discount_percentage: draft.discount_percentage,
            discount_amount: 0,
            stamp_cents,
            total_amount: 0,
            amount_paid: 0,
            payment_type: None,
            status: InvoiceStatus::Pending,
            original_delivery_note_number: None,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };
        invoice.recompute_totals();
        invoice
    }

    /// Refresh subtotal, tax, discount and total from the current items.
    pub fn recompute_totals(&mut self) {
        let totals = compute_totals(
            &self.items,
            self.tax_percentage,
            self.discount_percentage,
            self.stamp_cents,
        );
        self.subtotal = totals.subtotal;
        self.tax_amount = totals.tax_amount;
        self.discount_amount = totals.discount_amount;
        self.total_amount = totals.total_amount;
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| self.created_at.date_naive())
    }

    pub fn year(&self) -> i32 {
        self.effective_date().year()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }

    /// Remaining amount; negative when overpaid.
    pub fn balance_due(&self) -> Cents {
        self.total_amount - self.amount_paid
    }
}

/// Everything needed to create an invoice except its number and owner.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub client_id: ClientId,
    pub invoice_type: InvoiceType,
    /// Explicit number; the next sequential one is issued when absent
    pub invoice_number: Option<String>,
    pub date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<InvoiceItem>,
    pub tax_percentage: f64,
    pub discount_percentage: f64,
    pub notes: Option<String>,
}

impl InvoiceDraft {
    pub fn new(client_id: ClientId, invoice_type: InvoiceType, date: NaiveDate) -> Self {
        Self {
            client_id,
            invoice_type,
            invoice_number: None,
            date,
            due_date: None,
            items: Vec::new(),
            tax_percentage: 0.0,
            discount_percentage: 0.0,
            notes: None,
        }
    }

    pub fn with_item(mut self, item: InvoiceItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_tax(mut self, tax_percentage: f64) -> Self {
        self.tax_percentage = tax_percentage;
        self
    }

    pub fn with_discount(mut self, discount_percentage: f64) -> Self {
        self.discount_percentage = discount_percentage;
        self
    }

    pub fn with_number(mut self, invoice_number: impl Into<String>) -> Self {
        self.invoice_number = Some(invoice_number.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), InvoiceError> {
        validate_items(&self.items)?;
        validate_percentage("tax", self.tax_percentage)?;
        validate_percentage("discount", self.discount_percentage)?;
        if let Some(due) = self.due_date {
            if due < self.date {
                return Err(InvoiceError::DueBeforeDate);
            }
        }
        Ok(())
    }
}

pub fn validate_items(items: &[InvoiceItem]) -> Result<(), InvoiceError> {
    if items.is_empty() {
        return Err(InvoiceError::NoItems);
    }
    for (index, item) in items.iter().enumerate() {
        if item.description.trim().is_empty() {
            return Err(InvoiceError::EmptyDescription { index });
        }
        if !(item.quantity > 0.0) {
            return Err(InvoiceError::InvalidQuantity { index });
        }
        if item.unit_price < 0 || item.achat_piece < 0 || item.mod_amount < 0 || item.tarif_tolier < 0
        {
            return Err(InvoiceError::NegativeAmount { index });
        }
    }
    Ok(())
}

pub fn validate_percentage(field: &'static str, value: f64) -> Result<(), InvoiceError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(InvoiceError::InvalidPercentage { field, value });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvoiceError {
    NoItems,
    EmptyDescription { index: usize },
    InvalidQuantity { index: usize },
    NegativeAmount { index: usize },
    InvalidPercentage { field: &'static str, value: f64 },
    DueBeforeDate,
}

impl std::fmt::Display for InvoiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceError::NoItems => write!(f, "invoice must have at least one item"),
            InvoiceError::EmptyDescription { index } => {
                write!(f, "item {} has an empty description", index + 1)
            }
            InvoiceError::InvalidQuantity { index } => {
                write!(f, "item {} must have a quantity greater than zero", index + 1)
            }
            InvoiceError::NegativeAmount { index } => {
                write!(f, "item {} has a negative amount", index + 1)
            }
            InvoiceError::InvalidPercentage { field, value } => {
                write!(f, "{} percentage must be between 0 and 100 (got {})", field, value)
            }
            InvoiceError::DueBeforeDate => write!(f, "due date is before the invoice date"),
        }
    }
}

impl std::error::Error for InvoiceError {}

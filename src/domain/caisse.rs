use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{
    aggregate, categorize, CaisseInsights, CaisseType, Cents, Invoice, InvoiceId, InvoiceItem,
    InvoiceStatus, InvoiceType, KeywordSettings, Payment,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }

    fn for_document(invoice_type: InvoiceType) -> Self {
        match invoice_type {
            InvoiceType::Invoice => TransactionType::Income,
            InvoiceType::DeliveryNote => TransactionType::Expense,
        }
    }

    /// Sign an absolute amount: expenses are negative.
    fn signed(&self, amount: Cents) -> Cents {
        match self {
            TransactionType::Income => amount,
            TransactionType::Expense => -amount,
        }
    }
}

/// A derived, non-persisted caisse line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaisseTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub transaction_type: TransactionType,
    pub description: String,
    /// Signed: expenses are negative
    pub amount: Cents,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub category: String,
    /// Matched keyword (or "Autre") for item caisses, document type for tva
    pub subcategory: String,
    pub matched_keyword: Option<String>,
    pub payment_method: Option<String>,
    pub is_paid: bool,
    pub ht_amount: Cents,
    pub tva_amount: Cents,
    pub ttc_amount: Cents,
}

impl CaisseTransaction {
    pub fn is_income(&self) -> bool {
        self.transaction_type == TransactionType::Income
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaisseView {
    pub transactions: Vec<CaisseTransaction>,
    pub insights: CaisseInsights,
}

/// Whether an invoice's effective date falls in the given month.
pub fn in_period(invoice: &Invoice, month: u32, year: i32) -> bool {
    let date = invoice.effective_date();
    date.month() == month && date.year() == year
}

/// Transactions and insights of one caisse for one month.
///
/// Keyword caisses work per item: every item is classified and only the ones
/// landing in `caisse_type` are kept. The tva caisse works per invoice and
/// ignores the keyword settings.
pub fn get_transactions(
    caisse_type: CaisseType,
    invoices: &[Invoice],
    payments: &[Payment],
    keyword_settings: &KeywordSettings,
    month: u32,
    year: i32,
) -> CaisseView {
    let period: Vec<&Invoice> = invoices
        .iter()
        .filter(|invoice| in_period(invoice, month, year))
        .collect();

    let transactions: Vec<CaisseTransaction> = match caisse_type {
        CaisseType::Tva => period
            .iter()
            .map(|invoice| tva_transaction(invoice, payments))
            .collect(),
        _ => period
            .iter()
            .flat_map(|invoice| item_transactions(caisse_type, invoice, payments, keyword_settings))
            .collect(),
    };

    let insights = aggregate(&transactions);
    CaisseView {
        transactions,
        insights,
    }
}

fn payment_method_for(invoice: &Invoice, payments: &[Payment]) -> Option<String> {
    payments
        .iter()
        .find(|p| p.invoice_id == invoice.id)
        .map(|p| p.method.clone())
}

fn item_transactions(
    caisse_type: CaisseType,
    invoice: &Invoice,
    payments: &[Payment],
    keyword_settings: &KeywordSettings,
) -> Vec<CaisseTransaction> {
    let payment_method = payment_method_for(invoice, payments);

    invoice
        .items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let categorization = categorize(&item.description, keyword_settings);
            if categorization.category != caisse_type {
                return None;
            }
            let (transaction_type, amount) = item_amount(caisse_type, invoice.invoice_type, item);

            Some(CaisseTransaction {
                id: format!("{}-{}", invoice.id, index),
                date: invoice.effective_date(),
                transaction_type,
                description: item.description.clone(),
                amount: transaction_type.signed(amount),
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                category: caisse_type.label().to_string(),
                subcategory: categorization
                    .matched_keyword
                    .clone()
                    .unwrap_or_else(|| "Autre".to_string()),
                matched_keyword: categorization.matched_keyword,
                payment_method: payment_method.clone(),
                is_paid: invoice.status == InvoiceStatus::Paid,
                ht_amount: invoice.subtotal,
                tva_amount: invoice.tax_amount,
                ttc_amount: invoice.total_amount,
            })
        })
        .collect()
}

/// Direction and absolute amount of an item in a keyword caisse.
fn item_amount(
    caisse_type: CaisseType,
    invoice_type: InvoiceType,
    item: &InvoiceItem,
) -> (TransactionType, Cents) {
    match caisse_type {
        CaisseType::BeneficeMo => (TransactionType::Income, item.mod_amount + item.benefits),
        CaisseType::AchatPiece => match invoice_type {
            InvoiceType::Invoice => (TransactionType::Income, item.vente_piece),
            InvoiceType::DeliveryNote => (TransactionType::Expense, item.achat_piece),
        },
        CaisseType::Huile => (TransactionType::for_document(invoice_type), item.total),
        CaisseType::Charge => (TransactionType::Expense, item.total),
        // Never reached: tva is built per invoice
        CaisseType::Tva => (TransactionType::for_document(invoice_type), item.total),
    }
}

fn tva_transaction(invoice: &Invoice, payments: &[Payment]) -> CaisseTransaction {
    let transaction_type = TransactionType::for_document(invoice.invoice_type);
    let category = match transaction_type {
        TransactionType::Income => "VENTE",
        TransactionType::Expense => "ACHAT",
    };

    CaisseTransaction {
        id: invoice.id.to_string(),
        date: invoice.effective_date(),
        transaction_type,
        description: format!("{} {}", invoice.invoice_type.label(), invoice.invoice_number),
        amount: transaction_type.signed(invoice.total_amount),
        invoice_id: invoice.id,
        invoice_number: invoice.invoice_number.clone(),
        category: category.to_string(),
        subcategory: invoice.invoice_type.as_str().to_string(),
        matched_keyword: None,
        payment_method: payment_method_for(invoice, payments),
        is_paid: invoice.status == InvoiceStatus::Paid,
        ht_amount: invoice.subtotal,
        tva_amount: invoice.tax_amount.abs(),
        ttc_amount: invoice.total_amount,
    }
}

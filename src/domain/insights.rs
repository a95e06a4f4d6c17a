use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CaisseTransaction, Cents, TransactionType};

/// Summary of one caisse over a set of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaisseInsights {
    pub total_income: Cents,
    pub total_expense: Cents,
    pub balance: Cents,
    pub transaction_count: usize,
    pub average_transaction: Cents,
    /// Not computed yet, always 0
    pub monthly_growth: Cents,
    /// Sum of |amount| per subcategory
    pub top_categories: BTreeMap<String, Cents>,
    /// Sum of |amount| per payment method
    pub payment_methods: BTreeMap<String, Cents>,
}

pub fn aggregate(transactions: &[CaisseTransaction]) -> CaisseInsights {
    let mut insights = CaisseInsights::default();

    for tx in transactions {
        let amount = tx.amount.abs();
        match tx.transaction_type {
            TransactionType::Income => insights.total_income += amount,
            TransactionType::Expense => insights.total_expense += amount,
        }

        let subcategory = if tx.subcategory.is_empty() {
            "Autre"
        } else {
            tx.subcategory.as_str()
        };
        *insights
            .top_categories
            .entry(subcategory.to_string())
            .or_insert(0) += amount;

        let method = tx.payment_method.as_deref().unwrap_or("Non spécifié");
        *insights
            .payment_methods
            .entry(method.to_string())
            .or_insert(0) += amount;
    }

    insights.balance = insights.total_income - insights.total_expense;
    insights.transaction_count = transactions.len();
    insights.average_transaction = if transactions.is_empty() {
        0
    } else {
        (insights.total_income + insights.total_expense) / transactions.len() as Cents
    };

    insights
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTva {
    pub collectee: Cents,
    pub deductible: Cents,
}

/// VAT position of the tva caisse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvaInsights {
    /// VAT on sales
    pub tva_collectee: Cents,
    /// VAT on purchases
    pub tva_deductible: Cents,
    /// Positive when owed, negative when a credit
    pub tva_a_verser: Cents,
    pub operation_count: usize,
    /// Cumulative VAT per document type ("invoice", "delivery_note")
    pub by_document_type: BTreeMap<String, Cents>,
    /// Cumulative VAT per payment status ("paid", "unpaid")
    pub by_status: BTreeMap<String, Cents>,
    pub paid_ttc: Cents,
    pub paid_count: usize,
    pub unpaid_ttc: Cents,
    pub unpaid_count: usize,
    /// Keyed by "YYYY-MM"
    pub monthly: BTreeMap<String, MonthlyTva>,
}

pub fn aggregate_tva(transactions: &[CaisseTransaction]) -> TvaInsights {
    let mut tva = TvaInsights {
        operation_count: transactions.len(),
        ..TvaInsights::default()
    };

    for tx in transactions {
        let month = tva
            .monthly
            .entry(tx.date.format("%Y-%m").to_string())
            .or_default();
        match tx.transaction_type {
            TransactionType::Income => {
                tva.tva_collectee += tx.tva_amount;
                month.collectee += tx.tva_amount;
            }
            TransactionType::Expense => {
                tva.tva_deductible += tx.tva_amount;
                month.deductible += tx.tva_amount;
            }
        }

        *tva
            .by_document_type
            .entry(tx.subcategory.clone())
            .or_insert(0) += tx.tva_amount;

        let status = if tx.is_paid { "paid" } else { "unpaid" };
        *tva.by_status.entry(status.to_string()).or_insert(0) += tx.tva_amount;

        if tx.is_paid {
            tva.paid_ttc += tx.ttc_amount;
            tva.paid_count += 1;
        } else {
            tva.unpaid_ttc += tx.ttc_amount;
            tva.unpaid_count += 1;
        }
    }

    tva.tva_a_verser = tva.tva_collectee - tva.tva_deductible;
    tva
}

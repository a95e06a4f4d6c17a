use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{
    CaisseInsights, CaisseTransaction, CaisseType, Cents, IntegrityReport, TvaInsights,
};

/// One caisse over one month, as rendered by the CLI and the exporters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaisseReport {
    pub caisse_type: CaisseType,
    pub month: u32,
    pub year: i32,
    pub transactions: Vec<CaisseTransaction>,
    pub insights: CaisseInsights,
    /// Only present for the tva caisse
    pub tva: Option<TvaInsights>,
}

impl CaisseReport {
    pub fn period_label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaisseSummaryEntry {
    pub caisse_type: CaisseType,
    pub transaction_count: usize,
    pub total_income: Cents,
    pub total_expense: Cents,
    pub balance: Cents,
}

/// Every caisse side by side for one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaisseSummary {
    pub month: u32,
    pub year: i32,
    pub entries: Vec<CaisseSummaryEntry>,
}

/// Outcome of re-deriving every invoice status for a given day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRefresh {
    pub as_of: NaiveDate,
    pub examined: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub company: String,
    pub report: IntegrityReport,
}

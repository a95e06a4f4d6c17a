use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::{CaisseReport, InvoicingService};
use crate::domain::{format_cents, CaisseType, Company, Invoice, KeywordSettings, Payment};
use crate::storage::InvoiceFilter;

/// Full company snapshot for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanySnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub company: Company,
    pub invoices: Vec<Invoice>,
    pub payments: Vec<Payment>,
    pub keyword_settings: KeywordSettings,
}

/// Write the transactions of a caisse report as CSV with the accounting
/// column headers.
pub fn write_caisse_csv<W: Write>(report: &CaisseReport, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "Date",
        "Type",
        "Description",
        "Montant",
        "N° Facture",
        "Catégorie",
        "Sous-catégorie",
        "Mode de paiement",
        "Payé",
        "Montant HT",
        "TVA",
        "Montant TTC",
        "Mot-clé correspondant",
    ])?;

    for tx in &report.transactions {
        csv_writer.write_record([
            tx.date.format("%Y-%m-%d").to_string(),
            tx.transaction_type.as_str().to_string(),
            tx.description.clone(),
            format_cents(tx.amount),
            tx.invoice_number.clone(),
            tx.category.clone(),
            tx.subcategory.clone(),
            tx.payment_method.clone().unwrap_or_default(),
            if tx.is_paid { "Oui" } else { "Non" }.to_string(),
            format_cents(tx.ht_amount),
            format_cents(tx.tva_amount),
            format_cents(tx.ttc_amount),
            tx.matched_keyword.clone().unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(report.transactions.len())
}

/// Exporter for converting invoicing data to various formats
pub struct Exporter<'a> {
    service: &'a InvoicingService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a InvoicingService) -> Self {
        Self { service }
    }

    /// Export one caisse for one month to CSV format
    pub async fn export_caisse_csv<W: Write>(
        &self,
        company: &Company,
        caisse_type: CaisseType,
        month: u32,
        year: i32,
        writer: W,
    ) -> Result<usize> {
        let report = self
            .service
            .caisse_report(company, caisse_type, month, year)
            .await?;
        write_caisse_csv(&report, writer)
    }

    /// Export one caisse report, insights included, as JSON
    pub async fn export_caisse_json<W: Write>(
        &self,
        company: &Company,
        caisse_type: CaisseType,
        month: u32,
        year: i32,
        mut writer: W,
    ) -> Result<CaisseReport> {
        let report = self
            .service
            .caisse_report(company, caisse_type, month, year)
            .await?;

        let json = serde_json::to_string_pretty(&report)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(report)
    }

    /// Export invoices to CSV format
    pub async fn export_invoices_csv<W: Write>(&self, company: &Company, writer: W) -> Result<usize> {
        let invoices = self
            .service
            .list_invoices(company, &InvoiceFilter::default())
            .await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "invoice_number",
            "invoice_type",
            "date",
            "due_date",
            "subtotal",
            "tax_amount",
            "discount_amount",
            "total_amount",
            "amount_paid",
            "payment_type",
            "status",
            "original_delivery_note_number",
        ])?;

        for invoice in &invoices {
            csv_writer.write_record([
                invoice.id.to_string(),
                invoice.invoice_number.clone(),
                invoice.invoice_type.as_str().to_string(),
                invoice.effective_date().format("%Y-%m-%d").to_string(),
                invoice.due_date.format("%Y-%m-%d").to_string(),
                format_cents(invoice.subtotal),
                format_cents(invoice.tax_amount),
                format_cents(invoice.discount_amount),
                format_cents(invoice.total_amount),
                format_cents(invoice.amount_paid),
                invoice
                    .payment_type
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                invoice.status.as_str().to_string(),
                invoice.original_delivery_note_number.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(invoices.len())
    }

    /// Export invoices, payments and keyword settings as a JSON snapshot
    pub async fn export_full_json<W: Write>(
        &self,
        company: &Company,
        mut writer: W,
    ) -> Result<CompanySnapshot> {
        let invoices = self
            .service
            .list_invoices(company, &InvoiceFilter::default())
            .await?;
        let payments = self.service.list_payments(company, None).await?;
        let keyword_settings = self.service.keyword_settings(company).await?;

        let snapshot = CompanySnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            company: company.clone(),
            invoices,
            payments,
            keyword_settings,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{aggregate, CaisseTransaction, TransactionType};
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn test_caisse_csv_layout() {
        let transactions = vec![CaisseTransaction {
            id: "t1".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            transaction_type: TransactionType::Expense,
            description: "Filtre, air".into(),
            amount: -1250,
            invoice_id: Uuid::new_v4(),
            invoice_number: "2025-7".into(),
            category: "PIECE".into(),
            subcategory: "filtre".into(),
            matched_keyword: Some("filtre".into()),
            payment_method: None,
            is_paid: false,
            ht_amount: 1250,
            tva_amount: 238,
            ttc_amount: 1488,
        }];
        let report = CaisseReport {
            caisse_type: CaisseType::AchatPiece,
            month: 3,
            year: 2025,
            insights: aggregate(&transactions),
            transactions,
            tva: None,
        };

        let mut out = Vec::new();
        let count = write_caisse_csv(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(count, 1);
        assert!(lines[0].starts_with("Date,Type,Description,Montant,N° Facture"));
        assert!(lines[0].ends_with("Mot-clé correspondant"));
        assert_eq!(
            lines[1],
            "2025-03-04,EXPENSE,\"Filtre, air\",-12.50,2025-7,PIECE,filtre,,Non,12.50,2.38,14.88,filtre"
        );
    }
}

// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use caisse::application::InvoicingService;
use caisse::domain::{Client, Company, InvoiceDraft, InvoiceItem, InvoiceType};
use chrono::NaiveDate;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(InvoicingService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = InvoicingService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into NaiveDate
pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Test fixture: one company with one client
pub struct Garage {
    pub company: Company,
    pub client: Client,
}

impl Garage {
    pub async fn setup(service: &InvoicingService) -> Result<Self> {
        Self::setup_named(service, "Garage Central").await
    }

    pub async fn setup_named(service: &InvoicingService, name: &str) -> Result<Self> {
        let company = service.create_company(name).await?;
        let client = service.create_client(&company, "Ahmed", 0).await?;
        Ok(Self { company, client })
    }

    /// Standard repair invoice, 19% tax:
    /// - "Vidange complète": 50.00 + 20.00 labor (benefice_mo 70.00)
    /// - "Plaquettes de frein": 2 × 45.00, bought 30.00 (achat_piece)
    /// - "Huile 5w30": 4 × 12.50 (huile)
    ///
    /// Subtotal 210.00, tax 39.90, total 249.90.
    pub fn repair_draft(&self, date: &str) -> InvoiceDraft {
        InvoiceDraft::new(self.client.id, InvoiceType::Invoice, parse_date(date))
            .with_item(InvoiceItem::new("Vidange complète", 1.0, 5000).with_mod(2000))
            .with_item(InvoiceItem::new("Plaquettes de frein", 2.0, 4500).with_achat_piece(3000))
            .with_item(InvoiceItem::new("Huile 5w30", 4.0, 1250))
            .with_tax(19.0)
    }

    /// Supplier delivery note, 19% tax: "Filtre à air" 15.00, bought 10.00.
    ///
    /// Subtotal 15.00, tax 2.85, total 17.85.
    pub fn supply_draft(&self, date: &str) -> InvoiceDraft {
        InvoiceDraft::new(self.client.id, InvoiceType::DeliveryNote, parse_date(date))
            .with_item(InvoiceItem::new("Filtre à air", 1.0, 1500).with_achat_piece(1000))
            .with_tax(19.0)
    }

    /// Single-item invoice for `amount` cents, no tax, due far in the future.
    pub fn simple_draft(&self, date: &str, amount: i64) -> InvoiceDraft {
        InvoiceDraft::new(self.client.id, InvoiceType::Invoice, parse_date(date))
            .with_item(InvoiceItem::new("Diagnostic", 1.0, amount))
            .with_due_date(parse_date("2099-12-31"))
    }
}

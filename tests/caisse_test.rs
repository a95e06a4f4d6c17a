mod common;

use std::sync::Arc;

use anyhow::Result;
use caisse::application::{AppError, InvoicingService, NewPayment};
use caisse::domain::{
    CaisseType, Company, Invoice, InvoiceDraft, InvoiceItem, InvoiceType, KeywordError,
    KeywordSettings, TransactionType,
};
use caisse::io::Exporter;
use common::{parse_date, test_service, Garage};

/// March 2025: one paid repair invoice, one unpaid supplier delivery note,
/// plus a cancelled March invoice and an April invoice that must not show up.
async fn march_activity(service: &InvoicingService, garage: &Garage) -> Result<(Invoice, Invoice)> {
    let repair = service
        .create_invoice(&garage.company, garage.repair_draft("2025-03-10"))
        .await?;
    let supply = service
        .create_invoice(&garage.company, garage.supply_draft("2025-03-12"))
        .await?;

    pay(service, &garage.company, &repair, repair.total_amount).await?;

    let cancelled = service
        .create_invoice(&garage.company, garage.repair_draft("2025-03-20"))
        .await?;
    service.cancel_invoice(&garage.company, cancelled.id).await?;

    service
        .create_invoice(&garage.company, garage.repair_draft("2025-04-02"))
        .await?;

    Ok((repair, supply))
}

async fn pay(
    service: &InvoicingService,
    company: &Company,
    invoice: &Invoice,
    amount: i64,
) -> Result<()> {
    service
        .add_payment(
            company,
            NewPayment {
                invoice_id: invoice.id,
                amount,
                payment_type: None,
                method: "Chèque".into(),
                reference: None,
                date: parse_date("2025-03-15"),
            },
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_benefice_mo_caisse() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    let (repair, _) = march_activity(&service, &garage).await?;

    let report = service
        .caisse_report(&garage.company, CaisseType::BeneficeMo, 3, 2025)
        .await?;
    assert_eq!(report.period_label(), "2025-03");
    assert_eq!(report.transactions.len(), 1);

    let tx = &report.transactions[0];
    assert_eq!(tx.id, format!("{}-0", repair.id));
    assert_eq!(tx.transaction_type, TransactionType::Income);
    // Labor 20.00 + part margin 50.00
    assert_eq!(tx.amount, 7000);
    assert_eq!(tx.subcategory, "vidange");
    assert_eq!(tx.matched_keyword.as_deref(), Some("vidange"));
    assert_eq!(tx.invoice_number, repair.invoice_number);
    assert!(tx.is_paid);
    assert_eq!(tx.payment_method.as_deref(), Some("Chèque"));
    assert_eq!(tx.ht_amount, 21000);
    assert_eq!(tx.tva_amount, 3990);
    assert_eq!(tx.ttc_amount, 24990);

    assert_eq!(report.insights.total_income, 7000);
    assert_eq!(report.insights.balance, 7000);
    assert!(report.tva.is_none());

    Ok(())
}

#[tokio::test]
async fn test_achat_piece_caisse_mixes_sales_and_purchases() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    let (repair, supply) = march_activity(&service, &garage).await?;

    let report = service
        .caisse_report(&garage.company, CaisseType::AchatPiece, 3, 2025)
        .await?;
    assert_eq!(report.transactions.len(), 2);

    let sale = report
        .transactions
        .iter()
        .find(|tx| tx.invoice_id == repair.id)
        .unwrap();
    assert_eq!(sale.transaction_type, TransactionType::Income);
    assert_eq!(sale.amount, 4500);
    assert_eq!(sale.subcategory, "plaquette");
    assert_eq!(sale.id, format!("{}-1", repair.id));

    let purchase = report
        .transactions
        .iter()
        .find(|tx| tx.invoice_id == supply.id)
        .unwrap();
    assert_eq!(purchase.transaction_type, TransactionType::Expense);
    assert_eq!(purchase.amount, -1000);
    assert_eq!(purchase.subcategory, "filtre");
    assert!(!purchase.is_paid);
    assert_eq!(purchase.payment_method, None);

    let insights = &report.insights;
    assert_eq!(insights.total_income, 4500);
    assert_eq!(insights.total_expense, 1000);
    assert_eq!(insights.balance, 3500);
    assert_eq!(insights.transaction_count, 2);
    assert_eq!(insights.average_transaction, 2750);
    assert_eq!(insights.monthly_growth, 0);
    assert_eq!(insights.top_categories.get("plaquette"), Some(&4500));
    assert_eq!(insights.top_categories.get("filtre"), Some(&1000));
    assert_eq!(insights.payment_methods.get("Chèque"), Some(&4500));
    assert_eq!(insights.payment_methods.get("Non spécifié"), Some(&1000));

    Ok(())
}

#[tokio::test]
async fn test_huile_and_empty_charge_caisses() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    march_activity(&service, &garage).await?;

    let huile = service
        .caisse_report(&garage.company, CaisseType::Huile, 3, 2025)
        .await?;
    assert_eq!(huile.transactions.len(), 1);
    assert_eq!(huile.transactions[0].amount, 5000);
    assert_eq!(huile.transactions[0].subcategory, "huile");

    let charge = service
        .caisse_report(&garage.company, CaisseType::Charge, 3, 2025)
        .await?;
    assert!(charge.transactions.is_empty());
    assert_eq!(charge.insights.transaction_count, 0);
    assert_eq!(charge.insights.average_transaction, 0);
    assert_eq!(charge.insights.balance, 0);

    Ok(())
}

#[tokio::test]
async fn test_charge_items_are_expenses_on_invoices_too() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;

    let draft = InvoiceDraft::new(garage.client.id, InvoiceType::Invoice, parse_date("2025-05-03"))
        .with_item(InvoiceItem::new("Loyer atelier mai", 1.0, 80000));
    service.create_invoice(&garage.company, draft).await?;

    let report = service
        .caisse_report(&garage.company, CaisseType::Charge, 5, 2025)
        .await?;
    assert_eq!(report.transactions.len(), 1);
    assert_eq!(report.transactions[0].transaction_type, TransactionType::Expense);
    assert_eq!(report.transactions[0].amount, -80000);
    assert_eq!(report.insights.balance, -80000);

    Ok(())
}

#[tokio::test]
async fn test_tva_caisse() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    let (repair, supply) = march_activity(&service, &garage).await?;

    let report = service
        .caisse_report(&garage.company, CaisseType::Tva, 3, 2025)
        .await?;
    assert_eq!(report.transactions.len(), 2);

    let sale = report
        .transactions
        .iter()
        .find(|tx| tx.invoice_id == repair.id)
        .unwrap();
    assert_eq!(sale.id, repair.id.to_string());
    assert_eq!(sale.category, "VENTE");
    assert_eq!(sale.subcategory, "invoice");
    assert_eq!(sale.amount, 24990);
    assert_eq!(sale.description, format!("Facture {}", repair.invoice_number));

    let purchase = report
        .transactions
        .iter()
        .find(|tx| tx.invoice_id == supply.id)
        .unwrap();
    assert_eq!(purchase.category, "ACHAT");
    assert_eq!(purchase.amount, -1785);
    assert_eq!(purchase.tva_amount, 285);

    let tva = report.tva.as_ref().unwrap();
    assert_eq!(tva.tva_collectee, 3990);
    assert_eq!(tva.tva_deductible, 285);
    assert_eq!(tva.tva_a_verser, 3705);
    assert_eq!(tva.operation_count, 2);
    assert_eq!(tva.by_document_type.get("invoice"), Some(&3990));
    assert_eq!(tva.by_document_type.get("delivery_note"), Some(&285));
    assert_eq!(tva.by_status.get("paid"), Some(&3990));
    assert_eq!(tva.by_status.get("unpaid"), Some(&285));
    assert_eq!(tva.paid_ttc, 24990);
    assert_eq!(tva.paid_count, 1);
    assert_eq!(tva.unpaid_ttc, 1785);
    assert_eq!(tva.unpaid_count, 1);
    assert_eq!(tva.monthly.get("2025-03").map(|m| m.collectee), Some(3990));

    Ok(())
}

#[tokio::test]
async fn test_summary_and_other_periods() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    march_activity(&service, &garage).await?;

    let summary = service.caisse_summary(&garage.company, 3, 2025).await?;
    assert_eq!(summary.entries.len(), CaisseType::ALL.len());
    let entry = |caisse_type: CaisseType| {
        summary
            .entries
            .iter()
            .find(|e| e.caisse_type == caisse_type)
            .unwrap()
    };
    assert_eq!(entry(CaisseType::BeneficeMo).balance, 7000);
    assert_eq!(entry(CaisseType::AchatPiece).balance, 3500);
    assert_eq!(entry(CaisseType::Huile).balance, 5000);
    assert_eq!(entry(CaisseType::Charge).transaction_count, 0);
    assert_eq!(entry(CaisseType::Tva).balance, 24990 - 1785);

    // April holds only the one repair invoice
    let april = service
        .caisse_report(&garage.company, CaisseType::Tva, 4, 2025)
        .await?;
    assert_eq!(april.transactions.len(), 1);

    let empty = service
        .caisse_report(&garage.company, CaisseType::Tva, 3, 2024)
        .await?;
    assert!(empty.transactions.is_empty());

    let invalid = service
        .caisse_report(&garage.company, CaisseType::Tva, 13, 2025)
        .await;
    assert!(matches!(invalid, Err(AppError::InvalidPeriod { month: 13, .. })));

    Ok(())
}

#[tokio::test]
async fn test_keyword_settings_drive_categorization() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    march_activity(&service, &garage).await?;

    // Defaults until the company saves its own
    let settings = service.keyword_settings(&garage.company).await?;
    assert_eq!(settings, KeywordSettings::default());

    // charge is checked before achatPiece, so "frein" pulls the brake pads over
    service
        .add_keyword(&garage.company, CaisseType::Charge, "frein")
        .await?;
    let charge = service
        .caisse_report(&garage.company, CaisseType::Charge, 3, 2025)
        .await?;
    assert_eq!(charge.transactions.len(), 1);
    assert_eq!(charge.transactions[0].amount, -9000);
    assert_eq!(charge.transactions[0].subcategory, "frein");

    let pieces = service
        .caisse_report(&garage.company, CaisseType::AchatPiece, 3, 2025)
        .await?;
    assert_eq!(pieces.transactions.len(), 1);

    let result = service
        .categorize(&garage.company, "PLAQUETTES DE FREIN AV")
        .await?;
    assert_eq!(result.category, CaisseType::Charge);
    assert_eq!(result.matched_keyword.as_deref(), Some("frein"));

    assert!(service
        .remove_keyword(&garage.company, CaisseType::Charge, "frein")
        .await?);
    assert!(!service
        .remove_keyword(&garage.company, CaisseType::Charge, "frein")
        .await?);

    Ok(())
}

#[tokio::test]
async fn test_empty_keyword_list_is_persisted() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    march_activity(&service, &garage).await?;

    let settings = KeywordSettings {
        huile: Vec::new(),
        ..KeywordSettings::default()
    };
    service
        .save_keyword_settings(&garage.company, &settings)
        .await?;
    assert!(service
        .keyword_settings(&garage.company)
        .await?
        .huile
        .is_empty());

    // Oil no longer matches anything and falls through to tva
    let huile = service
        .caisse_report(&garage.company, CaisseType::Huile, 3, 2025)
        .await?;
    assert!(huile.transactions.is_empty());
    let result = service.categorize(&garage.company, "Huile 5w30").await?;
    assert_eq!(result.category, CaisseType::Tva);
    assert_eq!(result.matched_keyword, None);

    let defaults = service.reset_keywords(&garage.company).await?;
    assert_eq!(defaults, KeywordSettings::default());
    assert_eq!(
        service.keyword_settings(&garage.company).await?,
        KeywordSettings::default()
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_keyword_adds_are_all_kept() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;

    let service = Arc::new(service);
    let company = Arc::new(garage.company.clone());
    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let company = company.clone();
        handles.push(tokio::spawn(async move {
            service
                .add_keyword(&company, CaisseType::Charge, &format!("loyer-{}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let settings = service.keyword_settings(&company).await?;
    let charge = settings.keywords(CaisseType::Charge);
    for i in 0..8 {
        let keyword = format!("loyer-{}", i);
        assert!(charge.contains(&keyword), "missing {}", keyword);
    }

    Ok(())
}

#[tokio::test]
async fn test_keyword_settings_are_per_company() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let first = Garage::setup_named(&service, "Garage Nord").await?;
    let second = Garage::setup_named(&service, "Garage Sud").await?;

    service
        .add_keyword(&first.company, CaisseType::Huile, "adblue")
        .await?;
    assert!(service
        .keyword_settings(&first.company)
        .await?
        .huile
        .contains(&"adblue".to_string()));
    assert_eq!(
        service.keyword_settings(&second.company).await?,
        KeywordSettings::default()
    );

    Ok(())
}

#[tokio::test]
async fn test_invalid_keywords_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;

    assert!(matches!(
        service
            .add_keyword(&garage.company, CaisseType::Tva, "tva")
            .await,
        Err(AppError::InvalidKeywords(KeywordError::NotKeywordDriven(_)))
    ));
    assert!(matches!(
        service
            .add_keyword(&garage.company, CaisseType::Huile, "  ")
            .await,
        Err(AppError::InvalidKeywords(KeywordError::Blank(_)))
    ));
    assert!(matches!(
        service
            .add_keyword(&garage.company, CaisseType::Huile, "HUILE")
            .await,
        Err(AppError::InvalidKeywords(KeywordError::Duplicate { .. }))
    ));

    // Nothing was saved
    assert_eq!(
        service.keyword_settings(&garage.company).await?,
        KeywordSettings::default()
    );

    Ok(())
}

#[tokio::test]
async fn test_caisse_exports() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    march_activity(&service, &garage).await?;
    let exporter = Exporter::new(&service);

    let mut csv_out = Vec::new();
    let count = exporter
        .export_caisse_csv(&garage.company, CaisseType::AchatPiece, 3, 2025, &mut csv_out)
        .await?;
    assert_eq!(count, 2);
    let csv_text = String::from_utf8(csv_out)?;
    let mut lines = csv_text.lines();
    assert!(lines.next().unwrap().starts_with("Date,Type,Description,Montant"));
    assert_eq!(lines.count(), 2);
    assert!(csv_text.contains("Plaquettes de frein,45.00"));
    assert!(csv_text.contains(",Oui,"));

    let mut json_out = Vec::new();
    let report = exporter
        .export_caisse_json(&garage.company, CaisseType::Tva, 3, 2025, &mut json_out)
        .await?;
    let value: serde_json::Value = serde_json::from_slice(&json_out)?;
    assert_eq!(
        value["transactions"].as_array().map(Vec::len),
        Some(report.transactions.len())
    );
    assert_eq!(value["tva"]["tva_a_verser"], 3705);

    let mut invoices_out = Vec::new();
    let exported = exporter
        .export_invoices_csv(&garage.company, &mut invoices_out)
        .await?;
    assert_eq!(exported, 4);

    let mut full_out = Vec::new();
    let snapshot = exporter
        .export_full_json(&garage.company, &mut full_out)
        .await?;
    assert_eq!(snapshot.invoices.len(), 4);
    assert_eq!(snapshot.payments.len(), 1);
    let parsed: caisse::io::CompanySnapshot = serde_json::from_slice(&full_out)?;
    assert_eq!(parsed.company.name, "Garage Central");

    Ok(())
}

#[tokio::test]
async fn test_integrity_check_on_clean_data() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let garage = Garage::setup(&service).await?;
    march_activity(&service, &garage).await?;

    let check = service.check_integrity(&garage.company).await?;
    assert_eq!(check.company, "Garage Central");
    assert!(check.report.is_ok());
    assert_eq!(check.report.invoice_count, 4);
    assert_eq!(check.report.payment_count, 1);

    Ok(())
}

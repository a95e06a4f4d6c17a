use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{
    AppError, InvoiceUpdate, InvoicingService, NewPayment, PaymentUpdate,
};
use crate::config::AppConfig;
use crate::domain::{
    categorize_items, format_cents, parse_cents, summarize_items, CaisseType, Company, Invoice,
    InvoiceDraft, InvoiceItem, InvoiceStatus, InvoiceType, PaymentType, CATEGORY_PRIORITY,
    KEYWORD_RULES_VERSION,
};
use crate::storage::InvoiceFilter;

/// Caisse - garage invoicing and cash-register ledger
#[derive(Parser)]
#[command(name = "caisse")]
#[command(about = "Invoices, payments and per-category cash registers for a garage")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides the configuration)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Configuration file (default: caisse.toml if present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Company to work on (overrides the configuration)
    #[arg(long, global = true)]
    pub company: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Company management commands
    #[command(subcommand)]
    Company(CompanyCommands),

    /// Client management commands
    #[command(subcommand)]
    Client(ClientCommands),

    /// Invoice and delivery note commands
    #[command(subcommand)]
    Invoice(InvoiceCommands),

    /// Show the next free number for a document type
    NextNumber {
        /// Document type: invoice, delivery_note (alias: bon_de_livraison)
        #[arg(short = 't', long = "type", default_value = "invoice")]
        invoice_type: String,

        /// Year (defaults to the current year)
        #[arg(short, long)]
        year: Option<i32>,
    },

    /// Payment commands
    #[command(subcommand)]
    Payment(PaymentCommands),

    /// Cash-register reports
    #[command(subcommand)]
    Caisse(CaisseCommands),

    /// Categorization keyword commands
    #[command(subcommand)]
    Keywords(KeywordCommands),

    /// Export data to CSV or JSON
    Export {
        /// What to export: caisse, invoices, full
        export_type: String,

        /// Caisse type for caisse exports: beneficeMO, charge, achatPiece, huile, tva
        #[arg(long, default_value = "tva")]
        caisse: String,

        /// Month (1-12, defaults to the current month)
        #[arg(short, long)]
        month: Option<u32>,

        /// Year (defaults to the current year)
        #[arg(short, long)]
        year: Option<i32>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json (default: csv, json for full)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Verify that stored payment totals match the payments
    Check,
}

#[derive(Subcommand)]
pub enum CompanyCommands {
    /// Create a new company
    Create {
        /// Company name (must be unique)
        name: String,
    },

    /// List all companies
    List,
}

#[derive(Subcommand)]
pub enum ClientCommands {
    /// Create a new client
    Create {
        /// Client name (unique within the company)
        name: String,

        /// Fiscal stamp added to every invoice total (e.g., "0.600")
        #[arg(short, long, default_value = "0")]
        stamp: String,
    },

    /// List clients
    List,
}

#[derive(Subcommand)]
pub enum InvoiceCommands {
    /// Create an invoice or delivery note
    Create {
        /// Client name or ID
        client: String,

        /// Document type: invoice, delivery_note (alias: bon_de_livraison)
        #[arg(short = 't', long = "type", default_value = "invoice")]
        invoice_type: String,

        /// Line item: "description;quantity;unit_price[;achat_piece[;mod[;tarif_tolier]]]"
        #[arg(short, long = "item", required = true)]
        items: Vec<String>,

        /// Document date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Due date (YYYY-MM-DD, defaults to the document date)
        #[arg(long)]
        due: Option<String>,

        /// Tax percentage
        #[arg(long, default_value = "0")]
        tax: f64,

        /// Discount percentage
        #[arg(long, default_value = "0")]
        discount: f64,

        /// Explicit number (the next sequential one otherwise)
        #[arg(short, long)]
        number: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List invoices
    List {
        /// Filter by document type
        #[arg(short = 't', long = "type")]
        invoice_type: Option<String>,

        /// Filter by client name or ID
        #[arg(long)]
        client: Option<String>,

        /// Filter by status: pending, paid, overdue, cancelled
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of invoices to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show an invoice with its items and payments
    Show {
        /// Invoice ID or number
        id: String,

        /// Document type used to resolve a number
        #[arg(short = 't', long = "type")]
        invoice_type: Option<String>,
    },

    /// Change an invoice; totals and status are recomputed
    Update {
        /// Invoice ID or number
        id: String,

        /// Document type used to resolve a number
        #[arg(short = 't', long = "type")]
        invoice_type: Option<String>,

        /// New client name or ID
        #[arg(long)]
        client: Option<String>,

        /// New number
        #[arg(long)]
        number: Option<String>,

        /// Replace all line items (same format as create)
        #[arg(short, long = "item")]
        items: Vec<String>,

        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        due: Option<String>,

        #[arg(long)]
        tax: Option<f64>,

        #[arg(long)]
        discount: Option<f64>,

        #[arg(long)]
        notes: Option<String>,

        /// Only "cancelled" is accepted; other statuses are derived
        #[arg(long)]
        status: Option<String>,
    },

    /// Cancel an invoice and delete its payments
    Cancel {
        /// Invoice ID or number
        id: String,

        #[arg(short = 't', long = "type")]
        invoice_type: Option<String>,
    },

    /// Turn a delivery note into an invoice
    Transform {
        /// Delivery note ID or number
        id: String,

        /// Invoice number to use (the next sequential one otherwise)
        #[arg(short, long)]
        number: Option<String>,
    },

    /// Delete an invoice and its payments
    Delete {
        /// Invoice ID or number
        id: String,

        #[arg(short = 't', long = "type")]
        invoice_type: Option<String>,
    },

    /// Re-derive every invoice status (marks overdue invoices)
    Refresh {
        /// Reference day (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Record a payment against an invoice
    Add {
        /// Invoice ID or number
        invoice: String,

        /// Amount (e.g., "119.00"), in the payment type
        amount: String,

        /// Payment method (e.g., Cash, Chèque, Virement)
        #[arg(short, long, default_value = "Cash")]
        method: String,

        /// Amount type: HT or TTC (defaults to the invoice's)
        #[arg(short = 't', long = "type")]
        payment_type: Option<String>,

        #[arg(short, long)]
        reference: Option<String>,

        /// Payment date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Change a payment
    Update {
        /// Payment ID
        id: String,

        #[arg(short, long)]
        amount: Option<String>,

        #[arg(short = 't', long = "type")]
        payment_type: Option<String>,

        #[arg(short, long)]
        method: Option<String>,

        #[arg(short, long)]
        reference: Option<String>,

        #[arg(long)]
        date: Option<String>,
    },

    /// Delete a payment
    Delete {
        /// Payment ID
        id: String,
    },

    /// List payments
    List {
        /// Only the payments of this invoice (ID or number)
        #[arg(long)]
        invoice: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CaisseCommands {
    /// Transactions and insights of one caisse for a month
    Show {
        /// Caisse type: beneficeMO, charge, achatPiece, huile, tva
        caisse_type: String,

        /// Month (1-12, defaults to the current month)
        #[arg(short, long)]
        month: Option<u32>,

        /// Year (defaults to the current year)
        #[arg(short, long)]
        year: Option<i32>,

        /// Output format: table, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Balance of every caisse for a month
    Summary {
        #[arg(short, long)]
        month: Option<u32>,

        #[arg(short, long)]
        year: Option<i32>,
    },
}

#[derive(Subcommand)]
pub enum KeywordCommands {
    /// Show the keywords in priority order
    List {
        /// Only this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Append a keyword to a category
    Add { category: String, keyword: String },

    /// Remove a keyword from a category
    Remove { category: String, keyword: String },

    /// Restore the default keywords
    Reset,

    /// Show which caisse a description lands in
    Test { description: String },
}

impl Cli {
    pub async fn run(self, config: AppConfig) -> Result<()> {
        let database = self
            .database
            .clone()
            .unwrap_or_else(|| config.database.path.clone());
        let company_name = self.company.clone().or_else(|| config.company.clone());

        if let Commands::Init = self.command {
            InvoicingService::init(&database).await?;
            println!("Database initialized: {}", database);
            return Ok(());
        }

        let service = InvoicingService::connect(&database).await?;

        match self.command {
            Commands::Init => unreachable!("handled above"),

            Commands::Company(cmd) => run_company_command(&service, cmd).await?,

            Commands::Client(cmd) => {
                let company = select_company(&service, company_name.as_deref()).await?;
                run_client_command(&service, &company, cmd).await?;
            }

            Commands::Invoice(cmd) => {
                let company = select_company(&service, company_name.as_deref()).await?;
                run_invoice_command(&service, &company, cmd).await?;
            }

            Commands::NextNumber { invoice_type, year } => {
                let company = select_company(&service, company_name.as_deref()).await?;
                let invoice_type = parse_invoice_type(&invoice_type)?;
                let year = year.unwrap_or_else(|| Utc::now().year());
                let number = service.next_number(&company, invoice_type, year).await?;
                println!("{}", number);
            }

            Commands::Payment(cmd) => {
                let company = select_company(&service, company_name.as_deref()).await?;
                run_payment_command(&service, &company, cmd).await?;
            }

            Commands::Caisse(cmd) => {
                let company = select_company(&service, company_name.as_deref()).await?;
                run_caisse_command(&service, &company, cmd).await?;
            }

            Commands::Keywords(cmd) => {
                let company = select_company(&service, company_name.as_deref()).await?;
                run_keyword_command(&service, &company, cmd).await?;
            }

            Commands::Export {
                export_type,
                caisse,
                month,
                year,
                output,
                format,
            } => {
                let company = select_company(&service, company_name.as_deref()).await?;
                let (month, year) = resolve_period(month, year);
                run_export_command(
                    &service,
                    &company,
                    &export_type,
                    &caisse,
                    month,
                    year,
                    output.as_deref(),
                    format.as_deref(),
                )
                .await?;
            }

            Commands::Check => {
                let company = select_company(&service, company_name.as_deref()).await?;
                run_check_command(&service, &company).await?;
            }
        }

        Ok(())
    }
}

/// The named company, or the only one when a single company exists.
async fn select_company(service: &InvoicingService, name: Option<&str>) -> Result<Company> {
    if let Some(name) = name {
        return Ok(service.get_company(name).await?);
    }

    let mut companies = service.list_companies().await?;
    match companies.len() {
        0 => anyhow::bail!("No company yet. Create one with: caisse company create <name>"),
        1 => Ok(companies.remove(0)),
        _ => anyhow::bail!(
            "Several companies exist. Pass --company or set `company` in caisse.toml"
        ),
    }
}

async fn run_company_command(service: &InvoicingService, cmd: CompanyCommands) -> Result<()> {
    match cmd {
        CompanyCommands::Create { name } => {
            let company = service.create_company(&name).await?;
            println!("Created company: {} ({})", company.name, company.id);
        }

        CompanyCommands::List => {
            let companies = service.list_companies().await?;
            if companies.is_empty() {
                println!("No companies found.");
            } else {
                println!("{:<30} {:<36}", "NAME", "ID");
                println!("{}", "-".repeat(67));
                for company in companies {
                    println!("{:<30} {:<36}", truncate(&company.name, 30), company.id);
                }
            }
        }
    }
    Ok(())
}

async fn run_client_command(
    service: &InvoicingService,
    company: &Company,
    cmd: ClientCommands,
) -> Result<()> {
    match cmd {
        ClientCommands::Create { name, stamp } => {
            let stamp_cents =
                parse_cents(&stamp).context("Invalid stamp format. Use '0.60' or '1'")?;
            let client = service.create_client(company, &name, stamp_cents).await?;
            println!("Created client: {} ({})", client.name, client.id);
        }

        ClientCommands::List => {
            let clients = service.list_clients(company).await?;
            if clients.is_empty() {
                println!("No clients found.");
            } else {
                println!("{:<30} {:>10}  {:<36}", "NAME", "STAMP", "ID");
                println!("{}", "-".repeat(79));
                for client in clients {
                    println!(
                        "{:<30} {:>10}  {:<36}",
                        truncate(&client.name, 30),
                        format_cents(client.stamp_cents),
                        client.id
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_invoice_command(
    service: &InvoicingService,
    company: &Company,
    cmd: InvoiceCommands,
) -> Result<()> {
    match cmd {
        InvoiceCommands::Create {
            client,
            invoice_type,
            items,
            date,
            due,
            tax,
            discount,
            number,
            notes,
        } => {
            let invoice_type = parse_invoice_type(&invoice_type)?;
            let client = service.get_client(company, &client).await?;
            let date = match date {
                Some(d) => parse_date(&d)?,
                None => Utc::now().date_naive(),
            };

            let mut draft = InvoiceDraft::new(client.id, invoice_type, date)
                .with_tax(tax)
                .with_discount(discount);
            for item in &items {
                draft = draft.with_item(parse_item(item)?);
            }
            if let Some(due) = due {
                draft = draft.with_due_date(parse_date(&due)?);
            }
            if let Some(number) = number {
                draft = draft.with_number(number);
            }
            if let Some(notes) = notes {
                draft = draft.with_notes(notes);
            }

            let invoice = service.create_invoice(company, draft).await?;
            println!(
                "Created {}: {} for {} ({})",
                invoice.invoice_type.label(),
                invoice.invoice_number,
                client.name,
                invoice.id
            );
            println!("  Total: {}", format_cents(invoice.total_amount));
        }

        InvoiceCommands::List {
            invoice_type,
            client,
            status,
            limit,
        } => {
            let filter = InvoiceFilter {
                invoice_type: invoice_type.as_deref().map(parse_invoice_type).transpose()?,
                client_id: match client {
                    Some(key) => Some(service.get_client(company, &key).await?.id),
                    None => None,
                },
                status: status.as_deref().map(parse_status).transpose()?,
                limit,
            };
            let invoices = service.list_invoices(company, &filter).await?;
            print_invoice_table(&invoices);
        }

        InvoiceCommands::Show { id, invoice_type } => {
            let invoice = resolve_invoice(service, company, &id, invoice_type.as_deref()).await?;
            let info = service.get_invoice_info(company, invoice.id).await?;
            print_invoice_details(&info.invoice, &info.client.name);

            if !info.payments.is_empty() {
                println!();
                println!("  Payments:");
                for payment in &info.payments {
                    println!(
                        "    - {} {} ({} {}) via {} [{}]",
                        payment.date.format("%Y-%m-%d"),
                        format_cents(payment.amount),
                        payment.payment_type,
                        format_cents(payment.entered_amount()),
                        payment.method,
                        payment.id
                    );
                }
            }

            let settings = service.keyword_settings(company).await?;
            let categorized = categorize_items(&info.invoice.items, &settings);
            println!();
            println!("  Caisse breakdown:");
            for (caisse_type, totals) in summarize_items(&categorized) {
                if totals.count == 0 {
                    continue;
                }
                println!(
                    "    {:<12} {:>3} item(s) {:>12}  (achat {}, vente {})",
                    caisse_type.as_str(),
                    totals.count,
                    format_cents(totals.total_amount),
                    format_cents(totals.total_achat),
                    format_cents(totals.total_vente)
                );
            }
        }

        InvoiceCommands::Update {
            id,
            invoice_type,
            client,
            number,
            items,
            date,
            due,
            tax,
            discount,
            notes,
            status,
        } => {
            let invoice = resolve_invoice(service, company, &id, invoice_type.as_deref()).await?;
            let items = if items.is_empty() {
                None
            } else {
                Some(
                    items
                        .iter()
                        .map(String::as_str)
                        .map(parse_item)
                        .collect::<Result<Vec<_>>>()?,
                )
            };

            let update = InvoiceUpdate {
                client,
                invoice_number: number,
                date: date.as_deref().map(parse_date).transpose()?,
                due_date: due.as_deref().map(parse_date).transpose()?,
                items,
                tax_percentage: tax,
                discount_percentage: discount,
                notes,
                status: status.as_deref().map(parse_status).transpose()?,
            };
            let updated = service.update_invoice(company, invoice.id, update).await?;
            println!(
                "Updated {}: total {}, paid {}, status {}",
                updated.invoice_number,
                format_cents(updated.total_amount),
                format_cents(updated.amount_paid),
                updated.status
            );
        }

        InvoiceCommands::Cancel { id, invoice_type } => {
            let invoice = resolve_invoice(service, company, &id, invoice_type.as_deref()).await?;
            let result = service.cancel_invoice(company, invoice.id).await?;
            println!(
                "Cancelled {} ({} payment(s) deleted)",
                result.invoice.invoice_number, result.payments_deleted
            );
        }

        InvoiceCommands::Transform { id, number } => {
            let note = resolve_invoice(service, company, &id, Some("delivery_note")).await?;
            let invoice = service
                .transform_delivery_note(company, note.id, number)
                .await?;
            println!(
                "Transformed delivery note {} into invoice {}",
                invoice
                    .original_delivery_note_number
                    .as_deref()
                    .unwrap_or_default(),
                invoice.invoice_number
            );
        }

        InvoiceCommands::Delete { id, invoice_type } => {
            let invoice = resolve_invoice(service, company, &id, invoice_type.as_deref()).await?;
            let result = service.delete_invoice(company, invoice.id).await?;
            println!(
                "Deleted {} ({} payment(s) deleted)",
                result.invoice_number, result.payments_deleted
            );
        }

        InvoiceCommands::Refresh { date } => {
            let as_of = match date {
                Some(d) => parse_date(&d)?,
                None => Utc::now().date_naive(),
            };
            let refresh = service.refresh_statuses(company, as_of).await?;
            println!(
                "Refreshed statuses as of {}: {} examined, {} updated",
                refresh.as_of, refresh.examined, refresh.updated
            );
        }
    }
    Ok(())
}

async fn run_payment_command(
    service: &InvoicingService,
    company: &Company,
    cmd: PaymentCommands,
) -> Result<()> {
    match cmd {
        PaymentCommands::Add {
            invoice,
            amount,
            method,
            payment_type,
            reference,
            date,
        } => {
            let invoice = resolve_invoice(service, company, &invoice, None).await?;
            let amount =
                parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let request = NewPayment {
                invoice_id: invoice.id,
                amount,
                payment_type: payment_type.as_deref().map(parse_payment_type).transpose()?,
                method,
                reference,
                date: match date {
                    Some(d) => parse_date(&d)?,
                    None => Utc::now().date_naive(),
                },
            };

            let result = service.add_payment(company, request).await?;
            println!(
                "Recorded payment of {} on {} ({})",
                format_cents(result.payment.amount),
                result.invoice.invoice_number,
                result.payment.id
            );
            print_balance_line(&result.invoice);
        }

        PaymentCommands::Update {
            id,
            amount,
            payment_type,
            method,
            reference,
            date,
        } => {
            let payment_id = parse_uuid(&id, "payment")?;
            let update = PaymentUpdate {
                amount: amount
                    .as_deref()
                    .map(parse_cents)
                    .transpose()
                    .context("Invalid amount format. Use '50.00' or '50'")?,
                payment_type: payment_type.as_deref().map(parse_payment_type).transpose()?,
                method,
                reference,
                date: date.as_deref().map(parse_date).transpose()?,
            };

            let result = service.update_payment(company, payment_id, update).await?;
            println!(
                "Updated payment {}: {}",
                result.payment.id,
                format_cents(result.payment.amount)
            );
            print_balance_line(&result.invoice);
        }

        PaymentCommands::Delete { id } => {
            let payment_id = parse_uuid(&id, "payment")?;
            let invoice = service.delete_payment(company, payment_id).await?;
            println!("Deleted payment {}", payment_id);
            print_balance_line(&invoice);
        }

        PaymentCommands::List { invoice } => {
            let invoice_id = match invoice {
                Some(key) => Some(resolve_invoice(service, company, &key, None).await?.id),
                None => None,
            };
            let payments = service.list_payments(company, invoice_id).await?;

            if payments.is_empty() {
                println!("No payments found.");
            } else {
                println!(
                    "{:<10} {:>12} {:>12} {:<4} {:<12} {:<36}",
                    "DATE", "TTC", "HT", "TYPE", "METHOD", "ID"
                );
                println!("{}", "-".repeat(91));
                for payment in payments {
                    println!(
                        "{:<10} {:>12} {:>12} {:<4} {:<12} {:<36}",
                        payment.date.format("%Y-%m-%d"),
                        format_cents(payment.amount),
                        format_cents(payment.amount_ht),
                        payment.payment_type,
                        truncate(&payment.method, 12),
                        payment.id
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_caisse_command(
    service: &InvoicingService,
    company: &Company,
    cmd: CaisseCommands,
) -> Result<()> {
    match cmd {
        CaisseCommands::Show {
            caisse_type,
            month,
            year,
            format,
        } => {
            let caisse_type = parse_caisse_type(&caisse_type)?;
            let (month, year) = resolve_period(month, year);
            let report = service.caisse_report(company, caisse_type, month, year).await?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!(
                "Caisse {} ({}) - {}",
                caisse_type,
                caisse_type.label(),
                report.period_label()
            );
            println!();

            if report.transactions.is_empty() {
                println!("No transactions for this period.");
            } else {
                println!(
                    "{:<10} {:<8} {:<30} {:>12} {:<10} {:<16}",
                    "DATE", "TYPE", "DESCRIPTION", "AMOUNT", "NUMBER", "SUBCATEGORY"
                );
                println!("{}", "-".repeat(91));
                for tx in &report.transactions {
                    println!(
                        "{:<10} {:<8} {:<30} {:>12} {:<10} {:<16}",
                        tx.date.format("%Y-%m-%d"),
                        tx.transaction_type.as_str(),
                        truncate(&tx.description, 30),
                        format_cents(tx.amount),
                        truncate(&tx.invoice_number, 10),
                        truncate(&tx.subcategory, 16)
                    );
                }
            }

            let insights = &report.insights;
            println!();
            println!("Income:       {:>15}", format_cents(insights.total_income));
            println!("Expense:      {:>15}", format_cents(insights.total_expense));
            println!("{}", "-".repeat(29));
            println!("Balance:      {:>15}", format_cents(insights.balance));
            println!(
                "Transactions: {:>15}  (average {})",
                insights.transaction_count,
                format_cents(insights.average_transaction)
            );

            if !insights.top_categories.is_empty() {
                println!();
                println!("By subcategory:");
                let mut top: Vec<_> = insights.top_categories.iter().collect();
                top.sort_by(|a, b| b.1.cmp(a.1));
                for (name, total) in top.into_iter().take(10) {
                    println!("  {:<24} {:>12}", truncate(name, 24), format_cents(*total));
                }
            }

            if !insights.payment_methods.is_empty() {
                println!();
                println!("By payment method:");
                for (method, total) in &insights.payment_methods {
                    println!("  {:<24} {:>12}", truncate(method, 24), format_cents(*total));
                }
            }

            if let Some(tva) = &report.tva {
                println!();
                println!("TVA collectée:  {:>15}", format_cents(tva.tva_collectee));
                println!("TVA déductible: {:>15}", format_cents(tva.tva_deductible));
                println!("{}", "-".repeat(31));
                println!("TVA à verser:   {:>15}", format_cents(tva.tva_a_verser));
                println!();
                println!(
                    "Paid:   {:>12} TTC ({} document(s))",
                    format_cents(tva.paid_ttc),
                    tva.paid_count
                );
                println!(
                    "Unpaid: {:>12} TTC ({} document(s))",
                    format_cents(tva.unpaid_ttc),
                    tva.unpaid_count
                );
            }
        }

        CaisseCommands::Summary { month, year } => {
            let (month, year) = resolve_period(month, year);
            let summary = service.caisse_summary(company, month, year).await?;

            println!("Caisse summary - {:04}-{:02}", summary.year, summary.month);
            println!();
            println!(
                "{:<12} {:>6} {:>14} {:>14} {:>14}",
                "CAISSE", "COUNT", "INCOME", "EXPENSE", "BALANCE"
            );
            println!("{}", "-".repeat(64));
            for entry in &summary.entries {
                println!(
                    "{:<12} {:>6} {:>14} {:>14} {:>14}",
                    entry.caisse_type.as_str(),
                    entry.transaction_count,
                    format_cents(entry.total_income),
                    format_cents(entry.total_expense),
                    format_cents(entry.balance)
                );
            }
        }
    }
    Ok(())
}

async fn run_keyword_command(
    service: &InvoicingService,
    company: &Company,
    cmd: KeywordCommands,
) -> Result<()> {
    match cmd {
        KeywordCommands::List { category } => {
            let settings = service.keyword_settings(company).await?;
            let categories = match category {
                Some(c) => vec![parse_caisse_type(&c)?],
                None => CATEGORY_PRIORITY.to_vec(),
            };

            println!("Keyword rules v{} (first match wins, in this order)", KEYWORD_RULES_VERSION);
            for category in categories {
                println!();
                println!("{} ({}):", category, category.label());
                if !category.is_keyword_driven() {
                    println!("  (no keywords: everything unmatched lands here)");
                    continue;
                }
                for keyword in settings.keywords(category) {
                    println!("  - {}", keyword);
                }
            }
        }

        KeywordCommands::Add { category, keyword } => {
            let category = parse_caisse_type(&category)?;
            service.add_keyword(company, category, &keyword).await?;
            println!("Added '{}' to {}", keyword.trim(), category);
        }

        KeywordCommands::Remove { category, keyword } => {
            let category = parse_caisse_type(&category)?;
            if service.remove_keyword(company, category, &keyword).await? {
                println!("Removed '{}' from {}", keyword.trim(), category);
            } else {
                println!("'{}' is not a keyword of {}", keyword.trim(), category);
            }
        }

        KeywordCommands::Reset => {
            service.reset_keywords(company).await?;
            println!("Keywords reset to defaults");
        }

        KeywordCommands::Test { description } => {
            let result = service.categorize(company, &description).await?;
            match result.matched_keyword {
                Some(keyword) => println!("{} (matched '{}')", result.category, keyword),
                None => println!("{} (no keyword matched)", result.category),
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_export_command(
    service: &InvoicingService,
    company: &Company,
    export_type: &str,
    caisse: &str,
    month: u32,
    year: i32,
    output: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match (export_type, format.unwrap_or("csv")) {
        ("caisse", "csv") => {
            let caisse_type = parse_caisse_type(caisse)?;
            let count = exporter
                .export_caisse_csv(company, caisse_type, month, year, writer)
                .await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        ("caisse", "json") => {
            let caisse_type = parse_caisse_type(caisse)?;
            let report = exporter
                .export_caisse_json(company, caisse_type, month, year, writer)
                .await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", report.transactions.len());
            }
        }
        ("invoices", "csv") => {
            let count = exporter.export_invoices_csv(company, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} invoices", count);
            }
        }
        ("full", _) => {
            let snapshot = exporter.export_full_json(company, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported {}: {} invoices, {} payments",
                    snapshot.company.name,
                    snapshot.invoices.len(),
                    snapshot.payments.len()
                );
            }
        }
        (kind, format) => {
            anyhow::bail!(
                "Unsupported export '{}' as '{}'. Valid: caisse (csv, json), invoices (csv), full (json)",
                kind,
                format
            );
        }
    }

    Ok(())
}

async fn run_check_command(service: &InvoicingService, company: &Company) -> Result<()> {
    println!("Checking {}...\n", company.name);

    let check = service.check_integrity(company).await?;
    let report = &check.report;

    println!("Invoices: {}", report.invoice_count);
    println!("Payments: {}", report.payment_count);
    println!();

    if report.is_ok() {
        println!("Payments and invoices are consistent.");
        return Ok(());
    }

    println!("Issues found:");
    for mismatch in &report.paid_mismatches {
        println!(
            "  - {}: stored paid {} but payments sum to {}",
            mismatch.invoice_number,
            format_cents(mismatch.stored),
            format_cents(mismatch.computed)
        );
    }
    for number in &report.cancelled_with_payments {
        println!("  - {}: cancelled but still has payments", number);
    }
    for duplicate in &report.duplicate_numbers {
        println!(
            "  - {} {} is used {} times",
            duplicate.invoice_type, duplicate.invoice_number, duplicate.count
        );
    }
    if report.orphan_payments > 0 {
        println!(
            "  - {} payment(s) point at a missing invoice",
            report.orphan_payments
        );
    }
    anyhow::bail!("Integrity check failed");
}

/// Resolve an invoice by ID or number. Without a type, invoices are searched
/// before delivery notes.
async fn resolve_invoice(
    service: &InvoicingService,
    company: &Company,
    key: &str,
    invoice_type: Option<&str>,
) -> Result<Invoice> {
    if let Some(t) = invoice_type {
        let invoice_type = parse_invoice_type(t)?;
        return Ok(service.find_invoice(company, key, invoice_type).await?);
    }

    match service.find_invoice(company, key, InvoiceType::Invoice).await {
        Err(AppError::InvoiceNotFound(_)) => Ok(service
            .find_invoice(company, key, InvoiceType::DeliveryNote)
            .await?),
        other => Ok(other?),
    }
}

fn print_invoice_table(invoices: &[Invoice]) {
    if invoices.is_empty() {
        println!("No invoices found.");
        return;
    }

    println!(
        "{:<10} {:<14} {:<10} {:>12} {:>12} {:<10}",
        "NUMBER", "TYPE", "DATE", "TOTAL", "PAID", "STATUS"
    );
    println!("{}", "-".repeat(73));
    for invoice in invoices {
        println!(
            "{:<10} {:<14} {:<10} {:>12} {:>12} {:<10}",
            truncate(&invoice.invoice_number, 10),
            invoice.invoice_type.as_str(),
            invoice.effective_date().format("%Y-%m-%d"),
            format_cents(invoice.total_amount),
            format_cents(invoice.amount_paid),
            invoice.status
        );
    }
}

fn print_invoice_details(invoice: &Invoice, client_name: &str) {
    println!("{} {}", invoice.invoice_type.label(), invoice.invoice_number);
    println!("  ID:          {}", invoice.id);
    println!("  Client:      {}", client_name);
    println!(
        "  Date:        {}",
        invoice.effective_date().format("%Y-%m-%d")
    );
    println!("  Due:         {}", invoice.due_date.format("%Y-%m-%d"));
    println!("  Status:      {}", invoice.status);
    if let Some(original) = &invoice.original_delivery_note_number {
        println!("  From note:   {}", original);
    }
    if let Some(notes) = &invoice.notes {
        println!("  Notes:       {}", notes);
    }
    println!();
    println!(
        "  {:<30} {:>6} {:>10} {:>10} {:>10} {:>10}",
        "ITEM", "QTY", "PRICE", "ACHAT", "MOD", "TOTAL"
    );
    for item in &invoice.items {
        println!(
            "  {:<30} {:>6} {:>10} {:>10} {:>10} {:>10}",
            truncate(&item.description, 30),
            item.quantity,
            format_cents(item.unit_price),
            format_cents(item.achat_piece),
            format_cents(item.mod_amount),
            format_cents(item.total)
        );
    }
    println!();
    println!("  Subtotal:    {:>12}", format_cents(invoice.subtotal));
    println!(
        "  Tax ({}%):   {:>12}",
        invoice.tax_percentage,
        format_cents(invoice.tax_amount)
    );
    println!(
        "  Discount ({}%): {:>9}",
        invoice.discount_percentage,
        format_cents(invoice.discount_amount)
    );
    if invoice.stamp_cents != 0 {
        println!("  Stamp:       {:>12}", format_cents(invoice.stamp_cents));
    }
    println!("  Total:       {:>12}", format_cents(invoice.total_amount));
    println!("  Paid:        {:>12}", format_cents(invoice.amount_paid));
    println!("  Balance due: {:>12}", format_cents(invoice.balance_due()));
}

fn print_balance_line(invoice: &Invoice) {
    println!(
        "  {}: paid {} of {} ({})",
        invoice.invoice_number,
        format_cents(invoice.amount_paid),
        format_cents(invoice.total_amount),
        invoice.status
    );
}

fn resolve_period(month: Option<u32>, year: Option<i32>) -> (u32, i32) {
    let today = Utc::now().date_naive();
    (month.unwrap_or(today.month()), year.unwrap_or(today.year()))
}

/// Parse "description;quantity;unit_price[;achat_piece[;mod[;tarif_tolier]]]".
fn parse_item(input: &str) -> Result<InvoiceItem> {
    let parts: Vec<&str> = input.split(';').map(str::trim).collect();
    if parts.len() < 3 || parts.len() > 6 {
        anyhow::bail!(
            "Invalid item '{}'. Use \"description;quantity;unit_price[;achat_piece[;mod[;tarif_tolier]]]\"",
            input
        );
    }

    let quantity: f64 = parts[1]
        .replace(',', ".")
        .parse()
        .with_context(|| format!("Invalid quantity '{}'", parts[1]))?;
    let unit_price =
        parse_cents(parts[2]).with_context(|| format!("Invalid unit price '{}'", parts[2]))?;

    let optional = |index: usize, name: &str| -> Result<i64> {
        match parts.get(index) {
            Some(value) if !value.is_empty() => parse_cents(value)
                .with_context(|| format!("Invalid {} '{}'", name, value)),
            _ => Ok(0),
        }
    };

    Ok(InvoiceItem::new(parts[0], quantity, unit_price)
        .with_achat_piece(optional(3, "achat_piece")?)
        .with_mod(optional(4, "mod")?)
        .with_tarif_tolier(optional(5, "tarif_tolier")?))
}

fn parse_invoice_type(input: &str) -> Result<InvoiceType> {
    InvoiceType::from_str(input)
        .ok_or_else(|| AppError::UnknownInvoiceType(input.to_string()).into())
}

fn parse_caisse_type(input: &str) -> Result<CaisseType> {
    CaisseType::from_str(input)
        .ok_or_else(|| AppError::UnknownCaisseType(input.to_string()).into())
}

fn parse_status(input: &str) -> Result<InvoiceStatus> {
    InvoiceStatus::from_str(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid status '{}'. Valid: pending, paid, overdue, cancelled",
            input
        )
    })
}

fn parse_payment_type(input: &str) -> Result<PaymentType> {
    PaymentType::from_str(input)
        .ok_or_else(|| anyhow::anyhow!("Invalid payment type '{}'. Valid: HT, TTC", input))
}

fn parse_uuid(input: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(input.trim())
        .with_context(|| format!("Invalid {} ID format (expected UUID)", what))
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

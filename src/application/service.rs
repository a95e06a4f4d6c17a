use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    aggregate_tva, apply_cancellation, build_integrity_report, categorize, derive_status,
    format_invoice_number, get_transactions, next_sequence, reconcile, reconcile_after_deletion,
    validate_items, validate_payment, validate_percentage, CaisseType, Categorization, Cents,
    Client, Company, CompanyId, Invoice, InvoiceDraft, InvoiceError, InvoiceId, InvoiceItem,
    InvoiceStatus, InvoiceType, KeywordSettings, Payment, PaymentError, PaymentId, PaymentType,
};
use crate::storage::{InvoiceFilter, Repository};

use super::{
    AppError, CaisseReport, CaisseSummary, CaisseSummaryEntry, IntegrityCheck, KeyedLocks,
    StatusRefresh,
};

/// Application service for invoicing, payments and caisse reporting.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Every invoice mutation runs under the invoice's key lock and inside one
/// database transaction, so a payment write and the amount_paid/status
/// recompute commit or roll back together.
pub struct InvoicingService {
    repo: Repository,
    invoice_locks: KeyedLocks<InvoiceId>,
    number_locks: KeyedLocks<(CompanyId, InvoiceType, i32)>,
    keyword_locks: KeyedLocks<CompanyId>,
}

/// Changes to an existing invoice. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct InvoiceUpdate {
    pub client: Option<String>,
    pub invoice_number: Option<String>,
    pub date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub items: Option<Vec<InvoiceItem>>,
    pub tax_percentage: Option<f64>,
    pub discount_percentage: Option<f64>,
    pub notes: Option<String>,
    /// Only `cancelled` has an effect; other statuses are always derived
    pub status: Option<InvoiceStatus>,
}

/// A payment to record against an invoice.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: InvoiceId,
    /// Entered amount, in `payment_type`
    pub amount: Cents,
    /// Defaults to the invoice's payment type, then TTC
    pub payment_type: Option<PaymentType>,
    pub method: String,
    pub reference: Option<String>,
    pub date: NaiveDate,
}

/// Changes to an existing payment. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub amount: Option<Cents>,
    pub payment_type: Option<PaymentType>,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub date: Option<NaiveDate>,
}

/// A payment together with the invoice state it left behind.
#[derive(Debug)]
pub struct PaymentResult {
    pub payment: Payment,
    pub invoice: Invoice,
}

pub struct CancellationResult {
    pub invoice: Invoice,
    pub payments_deleted: u64,
}

pub struct DeletionResult {
    pub invoice_number: String,
    pub payments_deleted: u64,
}

/// Detailed invoice information
pub struct InvoiceInfo {
    pub invoice: Invoice,
    pub client: Client,
    pub payments: Vec<Payment>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl InvoicingService {
    /// Create a new invoicing service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            invoice_locks: KeyedLocks::new(),
            number_locks: KeyedLocks::new(),
            keyword_locks: KeyedLocks::new(),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Company and client operations
    // ========================

    pub async fn create_company(&self, name: &str) -> Result<Company, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::EmptyName("company name"));
        }
        if self.repo.get_company_by_name(name).await?.is_some() {
            return Err(AppError::CompanyAlreadyExists(name.to_string()));
        }

        let company = Company::new(name);
        self.repo.save_company(&company).await?;
        info!(company_id = %company.id, name = %company.name, "company created");
        Ok(company)
    }

    pub async fn get_company(&self, name: &str) -> Result<Company, AppError> {
        self.repo
            .get_company_by_name(name.trim())
            .await?
            .ok_or_else(|| AppError::CompanyNotFound(name.to_string()))
    }

    pub async fn list_companies(&self) -> Result<Vec<Company>, AppError> {
        Ok(self.repo.list_companies().await?)
    }

    pub async fn create_client(
        &self,
        company: &Company,
        name: &str,
        stamp_cents: Cents,
    ) -> Result<Client, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::EmptyName("client name"));
        }
        if stamp_cents < 0 {
            return Err(AppError::InvalidAmount(
                "Stamp must not be negative".to_string(),
            ));
        }
        if self.repo.get_client_by_name(company.id, name).await?.is_some() {
            return Err(AppError::ClientAlreadyExists(name.to_string()));
        }

        let client = Client::new(company.id, name).with_stamp(stamp_cents);
        self.repo.save_client(&client).await?;
        info!(company_id = %company.id, client_id = %client.id, "client created");
        Ok(client)
    }

    /// Get a client by name or ID.
    pub async fn get_client(&self, company: &Company, key: &str) -> Result<Client, AppError> {
        let found = match Uuid::parse_str(key.trim()) {
            Ok(id) => self.repo.get_client(company.id, id).await?,
            Err(_) => self.repo.get_client_by_name(company.id, key.trim()).await?,
        };
        found.ok_or_else(|| AppError::ClientNotFound(key.to_string()))
    }

    pub async fn list_clients(&self, company: &Company) -> Result<Vec<Client>, AppError> {
        Ok(self.repo.list_clients(company.id).await?)
    }

    // ========================
    // Numbering
    // ========================

    /// Next free number for a document type and year. Informational: the
    /// number is only reserved when an invoice is created with it.
    pub async fn next_number(
        &self,
        company: &Company,
        invoice_type: InvoiceType,
        year: i32,
    ) -> Result<String, AppError> {
        let _guard = self.number_locks.lock((company.id, invoice_type, year)).await;
        let mut tx = self.repo.begin().await?;
        let number = Self::issue_number(&mut tx, company.id, invoice_type, year).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(number)
    }

    async fn issue_number(
        conn: &mut sqlx::SqliteConnection,
        company_id: CompanyId,
        invoice_type: InvoiceType,
        year: i32,
    ) -> Result<String, AppError> {
        let existing = Repository::list_invoice_numbers(conn, company_id, invoice_type).await?;
        let sequence = next_sequence(year, existing.iter().map(String::as_str));
        Ok(format_invoice_number(year, sequence))
    }

    // ========================
    // Invoice operations
    // ========================

    /// Create an invoice from a draft. The next sequential number is issued
    /// unless the draft carries one.
    pub async fn create_invoice(
        &self,
        company: &Company,
        draft: InvoiceDraft,
    ) -> Result<Invoice, AppError> {
        draft.validate()?;
        let client = self
            .repo
            .get_client(company.id, draft.client_id)
            .await?
            .ok_or_else(|| AppError::ClientNotFound(draft.client_id.to_string()))?;

        let invoice_type = draft.invoice_type;
        let year = draft.date.year();
        let _guard = self.number_locks.lock((company.id, invoice_type, year)).await;
        let mut tx = self.repo.begin().await?;

        let number = match draft.invoice_number.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => Self::issue_number(&mut tx, company.id, invoice_type, year).await?,
        };

        let mut invoice = Invoice::from_draft(company.id, draft, number, client.stamp_cents);
        invoice.status = derive_status(&invoice, today());

        if !Repository::insert_invoice(&mut tx, &invoice).await? {
            return Err(AppError::DuplicateInvoiceNumber {
                invoice_type,
                invoice_number: invoice.invoice_number,
            });
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            invoice_type = %invoice.invoice_type,
            total_amount = invoice.total_amount,
            "invoice created"
        );
        Ok(invoice)
    }

    pub async fn get_invoice(&self, company: &Company, id: InvoiceId) -> Result<Invoice, AppError> {
        self.repo
            .get_invoice(company.id, id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))
    }

    /// Resolve an invoice by ID, or by number within a document type.
    pub async fn find_invoice(
        &self,
        company: &Company,
        key: &str,
        invoice_type: InvoiceType,
    ) -> Result<Invoice, AppError> {
        let found = match Uuid::parse_str(key.trim()) {
            Ok(id) => self.repo.get_invoice(company.id, id).await?,
            Err(_) => {
                self.repo
                    .get_invoice_by_number(company.id, invoice_type, key.trim())
                    .await?
            }
        };
        found.ok_or_else(|| AppError::InvoiceNotFound(key.to_string()))
    }

    /// Get an invoice with its client and payments.
    pub async fn get_invoice_info(
        &self,
        company: &Company,
        id: InvoiceId,
    ) -> Result<InvoiceInfo, AppError> {
        let invoice = self.get_invoice(company, id).await?;
        let client = self
            .repo
            .get_client(company.id, invoice.client_id)
            .await?
            .ok_or_else(|| AppError::ClientNotFound(invoice.client_id.to_string()))?;
        let payments = self.repo.list_payments_for_invoice(invoice.id).await?;

        Ok(InvoiceInfo {
            invoice,
            client,
            payments,
        })
    }

    pub async fn list_invoices(
        &self,
        company: &Company,
        filter: &InvoiceFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        Ok(self.repo.list_invoices(company.id, filter).await?)
    }

    /// Apply changes to an invoice, recompute its totals and re-derive its
    /// status. Setting the status to cancelled cancels it.
    pub async fn update_invoice(
        &self,
        company: &Company,
        id: InvoiceId,
        update: InvoiceUpdate,
    ) -> Result<Invoice, AppError> {
        if update.status == Some(InvoiceStatus::Cancelled) {
            return Ok(self.cancel_invoice(company, id).await?.invoice);
        }

        let new_client = match update.client.as_deref() {
            Some(key) => Some(self.get_client(company, key).await?),
            None => None,
        };

        let _guard = self.invoice_locks.lock(id).await;
        let mut tx = self.repo.begin().await?;

        let mut invoice = Repository::find_invoice(&mut tx, company.id, id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))?;
        if invoice.is_cancelled() {
            return Err(AppError::InvoiceCancelled(invoice.invoice_number));
        }

        if let Some(client) = new_client {
            invoice.client_id = client.id;
            invoice.stamp_cents = client.stamp_cents;
        }
        if let Some(number) = update.invoice_number {
            let number = number.trim().to_string();
            if number.is_empty() {
                return Err(AppError::EmptyName("invoice number"));
            }
            invoice.invoice_number = number;
        }
        if let Some(date) = update.date {
            invoice.date = Some(date);
        }
        if let Some(due_date) = update.due_date {
            invoice.due_date = due_date;
        }
        if let Some(items) = update.items {
            validate_items(&items)?;
            invoice.items = items;
        }
        if let Some(tax) = update.tax_percentage {
            validate_percentage("tax", tax)?;
            invoice.tax_percentage = tax;
        }
        if let Some(discount) = update.discount_percentage {
            validate_percentage("discount", discount)?;
            invoice.discount_percentage = discount;
        }
        if let Some(notes) = update.notes {
            invoice.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        // Only a date change is checked: a transformed note keeps its old due date
        let dates_changed = update.date.is_some() || update.due_date.is_some();
        if dates_changed && invoice.due_date < invoice.effective_date() {
            return Err(InvoiceError::DueBeforeDate.into());
        }

        invoice.recompute_totals();
        let payments = Repository::find_payments_for_invoice(&mut tx, invoice.id).await?;
        reconcile(&mut invoice, &payments, today());
        invoice.updated_at = Utc::now();

        if !Repository::update_invoice(&mut tx, &invoice).await? {
            return Err(AppError::DuplicateInvoiceNumber {
                invoice_type: invoice.invoice_type,
                invoice_number: invoice.invoice_number,
            });
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            invoice_id = %invoice.id,
            total_amount = invoice.total_amount,
            amount_paid = invoice.amount_paid,
            status = %invoice.status,
            "invoice updated"
        );
        Ok(invoice)
    }

    /// Cancel an invoice: its payments are deleted and it can no longer be
    /// paid or edited. Cancelling twice is a no-op.
    pub async fn cancel_invoice(
        &self,
        company: &Company,
        id: InvoiceId,
    ) -> Result<CancellationResult, AppError> {
        let _guard = self.invoice_locks.lock(id).await;
        let mut tx = self.repo.begin().await?;

        let mut invoice = Repository::find_invoice(&mut tx, company.id, id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))?;
        if invoice.is_cancelled() {
            debug!(invoice_id = %invoice.id, "invoice already cancelled");
            return Ok(CancellationResult {
                invoice,
                payments_deleted: 0,
            });
        }

        let payments_deleted = Repository::delete_payments_for_invoice(&mut tx, invoice.id).await?;
        apply_cancellation(&mut invoice);
        invoice.updated_at = Utc::now();
        Repository::update_invoice(&mut tx, &invoice).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        warn!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            payments_deleted,
            "invoice cancelled"
        );
        Ok(CancellationResult {
            invoice,
            payments_deleted,
        })
    }

    /// Turn a delivery note into an invoice dated today. The note's number is
    /// kept as `original_delivery_note_number` and a fresh invoice number is
    /// issued unless one is supplied.
    pub async fn transform_delivery_note(
        &self,
        company: &Company,
        id: InvoiceId,
        number: Option<String>,
    ) -> Result<Invoice, AppError> {
        let date = today();
        let _number_guard = self
            .number_locks
            .lock((company.id, InvoiceType::Invoice, date.year()))
            .await;
        let _guard = self.invoice_locks.lock(id).await;
        let mut tx = self.repo.begin().await?;

        let mut invoice = Repository::find_invoice(&mut tx, company.id, id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))?;
        if invoice.invoice_type != InvoiceType::DeliveryNote {
            return Err(AppError::NotADeliveryNote(invoice.invoice_number));
        }
        if invoice.is_cancelled() {
            return Err(AppError::InvoiceCancelled(invoice.invoice_number));
        }

        let new_number = match number.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => {
                Self::issue_number(&mut tx, company.id, InvoiceType::Invoice, date.year()).await?
            }
        };

        let old_number = std::mem::replace(&mut invoice.invoice_number, new_number);
        invoice.original_delivery_note_number = Some(old_number);
        invoice.invoice_type = InvoiceType::Invoice;
        invoice.payment_type = Some(PaymentType::Ttc);
        invoice.date = Some(date);
        invoice.status = derive_status(&invoice, date);
        invoice.updated_at = Utc::now();

        if !Repository::update_invoice(&mut tx, &invoice).await? {
            return Err(AppError::DuplicateInvoiceNumber {
                invoice_type: InvoiceType::Invoice,
                invoice_number: invoice.invoice_number,
            });
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            original_number = ?invoice.original_delivery_note_number,
            "delivery note transformed"
        );
        Ok(invoice)
    }

    /// Delete an invoice and all of its payments.
    pub async fn delete_invoice(
        &self,
        company: &Company,
        id: InvoiceId,
    ) -> Result<DeletionResult, AppError> {
        let _guard = self.invoice_locks.lock(id).await;
        let mut tx = self.repo.begin().await?;

        let invoice = Repository::find_invoice(&mut tx, company.id, id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))?;
        let payments_deleted = Repository::delete_payments_for_invoice(&mut tx, invoice.id).await?;
        Repository::delete_invoice(&mut tx, invoice.id).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(invoice_id = %invoice.id, payments_deleted, "invoice deleted");
        Ok(DeletionResult {
            invoice_number: invoice.invoice_number,
            payments_deleted,
        })
    }

    /// Re-derive the status of every non-cancelled invoice as of a day.
    pub async fn refresh_statuses(
        &self,
        company: &Company,
        as_of: NaiveDate,
    ) -> Result<StatusRefresh, AppError> {
        let invoices = self.repo.list_invoices(company.id, &InvoiceFilter::default()).await?;
        let mut examined = 0;
        let mut updated = 0;

        for candidate in invoices.iter().filter(|i| !i.is_cancelled()) {
            examined += 1;
            if derive_status(candidate, as_of) == candidate.status {
                continue;
            }

            let _guard = self.invoice_locks.lock(candidate.id).await;
            let mut tx = self.repo.begin().await?;
            let Some(mut invoice) = Repository::find_invoice(&mut tx, company.id, candidate.id).await?
            else {
                continue;
            };
            let payments = Repository::find_payments_for_invoice(&mut tx, invoice.id).await?;
            let previous = invoice.status;
            reconcile(&mut invoice, &payments, as_of);
            if invoice.status != previous {
                invoice.updated_at = Utc::now();
                Repository::update_invoice(&mut tx, &invoice).await?;
                updated += 1;
                debug!(
                    invoice_id = %invoice.id,
                    from = %previous,
                    to = %invoice.status,
                    "invoice status refreshed"
                );
            }
            tx.commit().await.map_err(anyhow::Error::from)?;
        }

        info!(company_id = %company.id, examined, updated, "statuses refreshed");
        Ok(StatusRefresh {
            as_of,
            examined,
            updated,
        })
    }

    // ========================
    // Payment operations
    // ========================

    /// Record a payment and reconcile its invoice.
    pub async fn add_payment(
        &self,
        company: &Company,
        request: NewPayment,
    ) -> Result<PaymentResult, AppError> {
        if request.amount <= 0 {
            return Err(PaymentError::NonPositiveAmount(request.amount).into());
        }

        let _guard = self.invoice_locks.lock(request.invoice_id).await;
        let mut tx = self.repo.begin().await?;

        let mut invoice = Repository::find_invoice(&mut tx, company.id, request.invoice_id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(request.invoice_id.to_string()))?;
        validate_payment(&invoice, request.amount)?;

        let payment_type = request
            .payment_type
            .or(invoice.payment_type)
            .unwrap_or(PaymentType::Ttc);
        let mut payment = Payment::new(
            invoice.id,
            company.id,
            request.amount,
            payment_type,
            invoice.tax_percentage,
            request.date,
            request.method,
        );
        if let Some(reference) = request.reference {
            payment = payment.with_reference(reference);
        }
        Repository::insert_payment(&mut tx, &payment).await?;

        if invoice.payment_type.is_none() {
            invoice.payment_type = Some(payment_type);
        }
        Self::reconcile_in_tx(&mut tx, &mut invoice, reconcile).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount = payment.amount,
            amount_paid = invoice.amount_paid,
            status = %invoice.status,
            "payment recorded"
        );
        Ok(PaymentResult { payment, invoice })
    }

    /// Change a payment and reconcile its invoice.
    pub async fn update_payment(
        &self,
        company: &Company,
        payment_id: PaymentId,
        update: PaymentUpdate,
    ) -> Result<PaymentResult, AppError> {
        if let Some(amount) = update.amount {
            if amount <= 0 {
                return Err(PaymentError::NonPositiveAmount(amount).into());
            }
        }

        let invoice_id = self.get_payment(company, payment_id).await?.invoice_id;
        let _guard = self.invoice_locks.lock(invoice_id).await;
        let mut tx = self.repo.begin().await?;

        // Re-read under the lock: the payment may have changed meanwhile
        let mut payment = Repository::find_payment(&mut tx, company.id, payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;
        let mut invoice = Repository::find_invoice(&mut tx, company.id, payment.invoice_id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(payment.invoice_id.to_string()))?;
        if invoice.is_cancelled() {
            return Err(AppError::InvoiceCancelled(invoice.invoice_number));
        }

        if update.amount.is_some() || update.payment_type.is_some() {
            let payment_type = update.payment_type.unwrap_or(payment.payment_type);
            let amount = match update.amount {
                Some(amount) => amount,
                // Same figure, re-read in the new type
                None => payment.entered_amount(),
            };
            payment.set_entered_amount(amount, payment_type);
        }
        if let Some(method) = update.method {
            payment.method = method;
        }
        if let Some(reference) = update.reference {
            payment.reference = Some(reference).filter(|r| !r.trim().is_empty());
        }
        if let Some(date) = update.date {
            payment.date = date;
        }

        Repository::update_payment(&mut tx, &payment).await?;
        Self::reconcile_in_tx(&mut tx, &mut invoice, reconcile).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount = payment.amount,
            amount_paid = invoice.amount_paid,
            status = %invoice.status,
            "payment updated"
        );
        Ok(PaymentResult { payment, invoice })
    }

    /// Delete a payment and reconcile its invoice. Returns the invoice.
    pub async fn delete_payment(
        &self,
        company: &Company,
        payment_id: PaymentId,
    ) -> Result<Invoice, AppError> {
        let invoice_id = self.get_payment(company, payment_id).await?.invoice_id;
        let _guard = self.invoice_locks.lock(invoice_id).await;
        let mut tx = self.repo.begin().await?;

        let payment = Repository::find_payment(&mut tx, company.id, payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;
        let mut invoice = Repository::find_invoice(&mut tx, company.id, payment.invoice_id)
            .await?
            .ok_or_else(|| AppError::InvoiceNotFound(payment.invoice_id.to_string()))?;

        Repository::delete_payment(&mut tx, payment.id).await?;
        Self::reconcile_in_tx(&mut tx, &mut invoice, reconcile_after_deletion).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount_paid = invoice.amount_paid,
            status = %invoice.status,
            "payment deleted"
        );
        Ok(invoice)
    }

    pub async fn get_payment(
        &self,
        company: &Company,
        payment_id: PaymentId,
    ) -> Result<Payment, AppError> {
        self.repo
            .get_payment(company.id, payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))
    }

    /// Payments of one invoice, or of the whole company.
    pub async fn list_payments(
        &self,
        company: &Company,
        invoice_id: Option<InvoiceId>,
    ) -> Result<Vec<Payment>, AppError> {
        match invoice_id {
            Some(id) => {
                let invoice = self.get_invoice(company, id).await?;
                Ok(self.repo.list_payments_for_invoice(invoice.id).await?)
            }
            None => Ok(self.repo.list_payments(company.id).await?),
        }
    }

    /// Recompute amount_paid and status from the payments visible in the
    /// transaction, then persist the invoice.
    async fn reconcile_in_tx(
        conn: &mut sqlx::SqliteConnection,
        invoice: &mut Invoice,
        reconcile_with: fn(&mut Invoice, &[Payment], NaiveDate),
    ) -> Result<(), AppError> {
        let payments = Repository::find_payments_for_invoice(conn, invoice.id).await?;
        reconcile_with(invoice, &payments, today());
        invoice.updated_at = Utc::now();
        Repository::update_invoice(conn, invoice).await?;
        debug!(
            invoice_id = %invoice.id,
            payments = payments.len(),
            amount_paid = invoice.amount_paid,
            status = %invoice.status,
            "invoice reconciled"
        );
        Ok(())
    }

    // ========================
    // Keyword settings
    // ========================

    /// Keyword settings of a company; the defaults until it saves its own.
    pub async fn keyword_settings(&self, company: &Company) -> Result<KeywordSettings, AppError> {
        Ok(self
            .repo
            .get_keyword_settings(company.id)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_keyword_settings(
        &self,
        company: &Company,
        settings: &KeywordSettings,
    ) -> Result<(), AppError> {
        let _guard = self.keyword_locks.lock(company.id).await;
        self.store_keyword_settings(company, settings).await
    }

    async fn store_keyword_settings(
        &self,
        company: &Company,
        settings: &KeywordSettings,
    ) -> Result<(), AppError> {
        settings.validate()?;
        self.repo.save_keyword_settings(company.id, settings).await?;
        info!(company_id = %company.id, "keyword settings saved");
        Ok(())
    }

    pub async fn add_keyword(
        &self,
        company: &Company,
        category: CaisseType,
        keyword: &str,
    ) -> Result<KeywordSettings, AppError> {
        let _guard = self.keyword_locks.lock(company.id).await;
        let mut settings = self.keyword_settings(company).await?;
        settings.add_keyword(category, keyword)?;
        self.store_keyword_settings(company, &settings).await?;
        info!(company_id = %company.id, %category, keyword, "keyword added");
        Ok(settings)
    }

    /// Remove a keyword. Returns false if the category did not have it.
    pub async fn remove_keyword(
        &self,
        company: &Company,
        category: CaisseType,
        keyword: &str,
    ) -> Result<bool, AppError> {
        let _guard = self.keyword_locks.lock(company.id).await;
        let mut settings = self.keyword_settings(company).await?;
        if !settings.remove_keyword(category, keyword)? {
            return Ok(false);
        }
        self.store_keyword_settings(company, &settings).await?;
        info!(company_id = %company.id, %category, keyword, "keyword removed");
        Ok(true)
    }

    pub async fn reset_keywords(&self, company: &Company) -> Result<KeywordSettings, AppError> {
        let _guard = self.keyword_locks.lock(company.id).await;
        self.repo.clear_keyword_settings(company.id).await?;
        info!(company_id = %company.id, "keyword settings reset to defaults");
        Ok(KeywordSettings::default())
    }

    /// Classify a description with the company's keywords.
    pub async fn categorize(
        &self,
        company: &Company,
        description: &str,
    ) -> Result<Categorization, AppError> {
        let settings = self.keyword_settings(company).await?;
        Ok(categorize(description, &settings))
    }

    // ========================
    // Caisse reports
    // ========================

    /// Transactions and insights of one caisse for one month. Cancelled
    /// invoices are left out.
    pub async fn caisse_report(
        &self,
        company: &Company,
        caisse_type: CaisseType,
        month: u32,
        year: i32,
    ) -> Result<CaisseReport, AppError> {
        let (invoices, payments, settings) = self.report_inputs(company, month, year).await?;
        Ok(build_report(caisse_type, &invoices, &payments, &settings, month, year))
    }

    /// Every caisse for one month.
    pub async fn caisse_summary(
        &self,
        company: &Company,
        month: u32,
        year: i32,
    ) -> Result<CaisseSummary, AppError> {
        let (invoices, payments, settings) = self.report_inputs(company, month, year).await?;

        let entries = CaisseType::ALL
            .iter()
            .map(|caisse_type| {
                let view =
                    get_transactions(*caisse_type, &invoices, &payments, &settings, month, year);
                CaisseSummaryEntry {
                    caisse_type: *caisse_type,
                    transaction_count: view.insights.transaction_count,
                    total_income: view.insights.total_income,
                    total_expense: view.insights.total_expense,
                    balance: view.insights.balance,
                }
            })
            .collect();

        Ok(CaisseSummary {
            month,
            year,
            entries,
        })
    }

    async fn report_inputs(
        &self,
        company: &Company,
        month: u32,
        year: i32,
    ) -> Result<(Vec<Invoice>, Vec<Payment>, KeywordSettings), AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::InvalidPeriod { month, year });
        }

        let invoices: Vec<Invoice> = self
            .repo
            .list_invoices(company.id, &InvoiceFilter::default())
            .await?
            .into_iter()
            .filter(|invoice| !invoice.is_cancelled())
            .collect();
        let payments = self.repo.list_payments(company.id).await?;
        let settings = self.keyword_settings(company).await?;

        debug!(
            company_id = %company.id,
            month,
            year,
            invoices = invoices.len(),
            "building caisse report"
        );
        Ok((invoices, payments, settings))
    }

    // ========================
    // Integrity
    // ========================

    /// Verify the reconciliation invariants over a company's records.
    pub async fn check_integrity(&self, company: &Company) -> Result<IntegrityCheck, AppError> {
        let invoices = self
            .repo
            .list_invoices(company.id, &InvoiceFilter::default())
            .await?;
        let payments = self.repo.list_payments(company.id).await?;
        let report = build_integrity_report(&invoices, &payments);

        if !report.is_ok() {
            warn!(
                company_id = %company.id,
                mismatches = report.paid_mismatches.len(),
                duplicates = report.duplicate_numbers.len(),
                "integrity check found problems"
            );
        }
        Ok(IntegrityCheck {
            company: company.name.clone(),
            report,
        })
    }
}

fn build_report(
    caisse_type: CaisseType,
    invoices: &[Invoice],
    payments: &[Payment],
    settings: &KeywordSettings,
    month: u32,
    year: i32,
) -> CaisseReport {
    let view = get_transactions(caisse_type, invoices, payments, settings, month, year);
    let tva = (caisse_type == CaisseType::Tva).then(|| aggregate_tva(&view.transactions));

    CaisseReport {
        caisse_type,
        month,
        year,
        transactions: view.transactions,
        insights: view.insights,
        tva,
    }
}

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    CaisseType, Client, ClientId, Company, CompanyId, Invoice, InvoiceId, InvoiceItem,
    InvoiceStatus, InvoiceType, KeywordSettings, Payment, PaymentId, PaymentType,
    CATEGORY_PRIORITY,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_KEYWORDS};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// How long a writer waits for the database write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const INVOICE_COLUMNS: &str = "id, company_id, client_id, invoice_number, invoice_type, date, due_date, items, subtotal, tax_percentage, tax_amount, discount_percentage, discount_amount, stamp_cents, total_amount, amount_paid, payment_type, status, original_delivery_note_number, notes, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, invoice_id, company_id, amount, amount_ht, payment_type, tax_percentage, date, method, reference, created_at";

/// Optional filters for listing a company's invoices.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub invoice_type: Option<InvoiceType>,
    pub client_id: Option<ClientId>,
    pub status: Option<InvoiceStatus>,
    pub limit: Option<usize>,
}

/// Repository for persisting and querying companies, clients, invoices,
/// payments and keyword settings.
///
/// Reads that take part in a read-recompute-write sequence come in a
/// connection-scoped form (`&mut SqliteConnection`) so they can run inside
/// a transaction opened with [`Repository::begin`].
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    ///
    /// Uses WAL so readers do not block the single writer, and a busy timeout
    /// so concurrent writers queue for the lock instead of failing.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_KEYWORDS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Open a write transaction. Dropping it without commit rolls back.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front: a deferred transaction
    /// that reads first cannot upgrade while another writer holds the lock.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin transaction")
    }

    // ========================
    // Company operations
    // ========================

    pub async fn save_company(&self, company: &Company) -> Result<()> {
        sqlx::query("INSERT INTO companies (id, name, created_at) VALUES (?, ?, ?)")
            .bind(company.id.to_string())
            .bind(&company.name)
            .bind(company.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save company")?;
        Ok(())
    }

    pub async fn get_company_by_name(&self, name: &str) -> Result<Option<Company>> {
        let row = sqlx::query("SELECT id, name, created_at FROM companies WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch company by name")?;

        row.as_ref().map(Self::row_to_company).transpose()
    }

    pub async fn list_companies(&self) -> Result<Vec<Company>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM companies ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list companies")?;

        rows.iter().map(Self::row_to_company).collect()
    }

    fn row_to_company(row: &SqliteRow) -> Result<Company> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");

        Ok(Company {
            id: Uuid::parse_str(&id_str).context("Invalid company ID")?,
            name: row.get("name"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    // ========================
    // Client operations
    // ========================

    pub async fn save_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, company_id, name, stamp_cents, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(client.id.to_string())
        .bind(client.company_id.to_string())
        .bind(&client.name)
        .bind(client.stamp_cents)
        .bind(client.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save client")?;
        Ok(())
    }

    /// Get a client by ID within a company.
    pub async fn get_client(&self, company_id: CompanyId, id: ClientId) -> Result<Option<Client>> {
        let row = sqlx::query(
            "SELECT id, company_id, name, stamp_cents, created_at FROM clients WHERE company_id = ? AND id = ?",
        )
        .bind(company_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch client")?;

        row.as_ref().map(Self::row_to_client).transpose()
    }

    pub async fn get_client_by_name(
        &self,
        company_id: CompanyId,
        name: &str,
    ) -> Result<Option<Client>> {
        let row = sqlx::query(
            "SELECT id, company_id, name, stamp_cents, created_at FROM clients WHERE company_id = ? AND name = ?",
        )
        .bind(company_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch client by name")?;

        row.as_ref().map(Self::row_to_client).transpose()
    }

    pub async fn list_clients(&self, company_id: CompanyId) -> Result<Vec<Client>> {
        let rows = sqlx::query(
            "SELECT id, company_id, name, stamp_cents, created_at FROM clients WHERE company_id = ? ORDER BY name",
        )
        .bind(company_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list clients")?;

        rows.iter().map(Self::row_to_client).collect()
    }

    fn row_to_client(row: &SqliteRow) -> Result<Client> {
        let id_str: String = row.get("id");
        let company_id_str: String = row.get("company_id");
        let created_at_str: String = row.get("created_at");

        Ok(Client {
            id: Uuid::parse_str(&id_str).context("Invalid client ID")?,
            company_id: Uuid::parse_str(&company_id_str).context("Invalid company ID")?,
            name: row.get("name"),
            stamp_cents: row.get("stamp_cents"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    // ========================
    // Invoice operations
    // ========================

    /// Insert an invoice. Returns false when its number is already taken for
    /// the same company and document type.
    pub async fn insert_invoice(conn: &mut SqliteConnection, invoice: &Invoice) -> Result<bool> {
        let items_json = serde_json::to_string(&invoice.items)?;

        let result = sqlx::query(&format!(
            "INSERT INTO invoices ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            INVOICE_COLUMNS
        ))
        .bind(invoice.id.to_string())
        .bind(invoice.company_id.to_string())
        .bind(invoice.client_id.to_string())
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_type.as_str())
        .bind(invoice.date.map(|d| d.format(DATE_FORMAT).to_string()))
        .bind(invoice.due_date.format(DATE_FORMAT).to_string())
        .bind(&items_json)
        .bind(invoice.subtotal)
        .bind(invoice.tax_percentage)
        .bind(invoice.tax_amount)
        .bind(invoice.discount_percentage)
        .bind(invoice.discount_amount)
        .bind(invoice.stamp_cents)
        .bind(invoice.total_amount)
        .bind(invoice.amount_paid)
        .bind(invoice.payment_type.map(|t| t.as_str()))
        .bind(invoice.status.as_str())
        .bind(&invoice.original_delivery_note_number)
        .bind(&invoice.notes)
        .bind(invoice.created_at.to_rfc3339())
        .bind(invoice.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to save invoice")),
        }
    }

    /// Overwrite every mutable column of an invoice. Returns false when the
    /// new number collides with another document.
    pub async fn update_invoice(conn: &mut SqliteConnection, invoice: &Invoice) -> Result<bool> {
        let items_json = serde_json::to_string(&invoice.items)?;

        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                client_id = ?, invoice_number = ?, invoice_type = ?, date = ?, due_date = ?,
                items = ?, subtotal = ?, tax_percentage = ?, tax_amount = ?,
                discount_percentage = ?, discount_amount = ?, stamp_cents = ?, total_amount = ?,
                amount_paid = ?, payment_type = ?, status = ?, original_delivery_note_number = ?,
                notes = ?, updated_at = ?
            WHERE id = ? AND company_id = ?
            "#,
        )
        .bind(invoice.client_id.to_string())
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_type.as_str())
        .bind(invoice.date.map(|d| d.format(DATE_FORMAT).to_string()))
        .bind(invoice.due_date.format(DATE_FORMAT).to_string())
        .bind(&items_json)
        .bind(invoice.subtotal)
        .bind(invoice.tax_percentage)
        .bind(invoice.tax_amount)
        .bind(invoice.discount_percentage)
        .bind(invoice.discount_amount)
        .bind(invoice.stamp_cents)
        .bind(invoice.total_amount)
        .bind(invoice.amount_paid)
        .bind(invoice.payment_type.map(|t| t.as_str()))
        .bind(invoice.status.as_str())
        .bind(&invoice.original_delivery_note_number)
        .bind(&invoice.notes)
        .bind(invoice.updated_at.to_rfc3339())
        .bind(invoice.id.to_string())
        .bind(invoice.company_id.to_string())
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to update invoice")),
        }
    }

    pub async fn delete_invoice(conn: &mut SqliteConnection, id: InvoiceId) -> Result<()> {
        sqlx::query("DELETE FROM invoices WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete invoice")?;
        Ok(())
    }

    pub async fn find_invoice(
        conn: &mut SqliteConnection,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM invoices WHERE company_id = ? AND id = ?",
            INVOICE_COLUMNS
        ))
        .bind(company_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch invoice")?;

        row.as_ref().map(Self::row_to_invoice).transpose()
    }

    /// Get an invoice by ID within a company.
    pub async fn get_invoice(&self, company_id: CompanyId, id: InvoiceId) -> Result<Option<Invoice>> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        Self::find_invoice(&mut conn, company_id, id).await
    }

    pub async fn get_invoice_by_number(
        &self,
        company_id: CompanyId,
        invoice_type: InvoiceType,
        invoice_number: &str,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM invoices WHERE company_id = ? AND invoice_type = ? AND invoice_number = ?",
            INVOICE_COLUMNS
        ))
        .bind(company_id.to_string())
        .bind(invoice_type.as_str())
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch invoice by number")?;

        row.as_ref().map(Self::row_to_invoice).transpose()
    }

    /// Every number issued for one company and document type.
    pub async fn list_invoice_numbers(
        conn: &mut SqliteConnection,
        company_id: CompanyId,
        invoice_type: InvoiceType,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT invoice_number FROM invoices WHERE company_id = ? AND invoice_type = ?",
        )
        .bind(company_id.to_string())
        .bind(invoice_type.as_str())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list invoice numbers")?;

        Ok(rows.iter().map(|row| row.get("invoice_number")).collect())
    }

    /// List a company's invoices, oldest document date first.
    pub async fn list_invoices(
        &self,
        company_id: CompanyId,
        filter: &InvoiceFilter,
    ) -> Result<Vec<Invoice>> {
        let mut query = format!(
            "SELECT {} FROM invoices WHERE company_id = ?",
            INVOICE_COLUMNS
        );

        let client_id_str = filter.client_id.map(|id| id.to_string());

        if filter.invoice_type.is_some() {
            query.push_str(" AND invoice_type = ?");
        }
        if filter.client_id.is_some() {
            query.push_str(" AND client_id = ?");
        }
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
        }

        query.push_str(" ORDER BY COALESCE(date, substr(created_at, 1, 10)), created_at");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query).bind(company_id.to_string());

        if let Some(invoice_type) = filter.invoice_type {
            sql_query = sql_query.bind(invoice_type.as_str());
        }
        if let Some(ref cid_str) = client_id_str {
            sql_query = sql_query.bind(cid_str);
        }
        if let Some(status) = filter.status {
            sql_query = sql_query.bind(status.as_str());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list invoices")?;

        rows.iter().map(Self::row_to_invoice).collect()
    }

    fn row_to_invoice(row: &SqliteRow) -> Result<Invoice> {
        let id_str: String = row.get("id");
        let company_id_str: String = row.get("company_id");
        let client_id_str: String = row.get("client_id");
        let invoice_type_str: String = row.get("invoice_type");
        let date_str: Option<String> = row.get("date");
        let due_date_str: String = row.get("due_date");
        let items_json: String = row.get("items");
        let payment_type_str: Option<String> = row.get("payment_type");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        let items: Vec<InvoiceItem> =
            serde_json::from_str(&items_json).context("Invalid invoice items JSON")?;

        Ok(Invoice {
            id: Uuid::parse_str(&id_str).context("Invalid invoice ID")?,
            company_id: Uuid::parse_str(&company_id_str).context("Invalid company ID")?,
            client_id: Uuid::parse_str(&client_id_str).context("Invalid client ID")?,
            invoice_number: row.get("invoice_number"),
            invoice_type: InvoiceType::from_str(&invoice_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid invoice type: {}", invoice_type_str))?,
            date: date_str.as_deref().map(parse_date).transpose()?,
            due_date: parse_date(&due_date_str)?,
            items,
            subtotal: row.get("subtotal"),
            tax_percentage: row.get("tax_percentage"),
            tax_amount: row.get("tax_amount"),
            discount_percentage: row.get("discount_percentage"),
            discount_amount: row.get("discount_amount"),
            stamp_cents: row.get("stamp_cents"),
            total_amount: row.get("total_amount"),
            amount_paid: row.get("amount_paid"),
            payment_type: payment_type_str
                .map(|s| {
                    PaymentType::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("Invalid payment type: {}", s))
                })
                .transpose()?,
            status: InvoiceStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid invoice status: {}", status_str))?,
            original_delivery_note_number: row.get("original_delivery_note_number"),
            notes: row.get("notes"),
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }

    // ========================
    // Payment operations
    // ========================

    pub async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            PAYMENT_COLUMNS
        ))
        .bind(payment.id.to_string())
        .bind(payment.invoice_id.to_string())
        .bind(payment.company_id.to_string())
        .bind(payment.amount)
        .bind(payment.amount_ht)
        .bind(payment.payment_type.as_str())
        .bind(payment.tax_percentage)
        .bind(payment.date.format(DATE_FORMAT).to_string())
        .bind(&payment.method)
        .bind(&payment.reference)
        .bind(payment.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save payment")?;
        Ok(())
    }

    pub async fn update_payment(conn: &mut SqliteConnection, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments SET
                amount = ?, amount_ht = ?, payment_type = ?, date = ?, method = ?, reference = ?
            WHERE id = ?
            "#,
        )
        .bind(payment.amount)
        .bind(payment.amount_ht)
        .bind(payment.payment_type.as_str())
        .bind(payment.date.format(DATE_FORMAT).to_string())
        .bind(&payment.method)
        .bind(&payment.reference)
        .bind(payment.id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update payment")?;
        Ok(())
    }

    pub async fn delete_payment(conn: &mut SqliteConnection, id: PaymentId) -> Result<()> {
        sqlx::query("DELETE FROM payments WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete payment")?;
        Ok(())
    }

    /// Delete every payment of an invoice. Returns how many were removed.
    pub async fn delete_payments_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: InvoiceId,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM payments WHERE invoice_id = ?")
            .bind(invoice_id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete invoice payments")?;
        Ok(result.rows_affected())
    }

    pub async fn find_payment(
        conn: &mut SqliteConnection,
        company_id: CompanyId,
        id: PaymentId,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE company_id = ? AND id = ?",
            PAYMENT_COLUMNS
        ))
        .bind(company_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch payment")?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    /// Get a payment by ID within a company.
    pub async fn get_payment(&self, company_id: CompanyId, id: PaymentId) -> Result<Option<Payment>> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        Self::find_payment(&mut conn, company_id, id).await
    }

    /// Payments of one invoice, in the order they were received.
    pub async fn find_payments_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE invoice_id = ? ORDER BY date, created_at",
            PAYMENT_COLUMNS
        ))
        .bind(invoice_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list invoice payments")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    pub async fn list_payments_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;
        Self::find_payments_for_invoice(&mut conn, invoice_id).await
    }

    /// Every payment recorded for a company.
    pub async fn list_payments(&self, company_id: CompanyId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE company_id = ? ORDER BY date, created_at",
            PAYMENT_COLUMNS
        ))
        .bind(company_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list payments")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    fn row_to_payment(row: &SqliteRow) -> Result<Payment> {
        let id_str: String = row.get("id");
        let invoice_id_str: String = row.get("invoice_id");
        let company_id_str: String = row.get("company_id");
        let payment_type_str: String = row.get("payment_type");
        let date_str: String = row.get("date");
        let created_at_str: String = row.get("created_at");

        Ok(Payment {
            id: Uuid::parse_str(&id_str).context("Invalid payment ID")?,
            invoice_id: Uuid::parse_str(&invoice_id_str).context("Invalid invoice ID")?,
            company_id: Uuid::parse_str(&company_id_str).context("Invalid company ID")?,
            amount: row.get("amount"),
            amount_ht: row.get("amount_ht"),
            payment_type: PaymentType::from_str(&payment_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payment type: {}", payment_type_str))?,
            tax_percentage: row.get("tax_percentage"),
            date: parse_date(&date_str)?,
            method: row.get("method"),
            reference: row.get("reference"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    // ========================
    // Keyword settings
    // ========================

    /// Stored keyword settings of a company, or None if it never saved any.
    pub async fn get_keyword_settings(&self, company_id: CompanyId) -> Result<Option<KeywordSettings>> {
        let marker = sqlx::query("SELECT company_id FROM keyword_settings_marker WHERE company_id = ?")
            .bind(company_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch keyword settings marker")?;

        if marker.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT category, keyword FROM keyword_settings WHERE company_id = ? ORDER BY category, position",
        )
        .bind(company_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch keyword settings")?;

        let mut settings = KeywordSettings {
            benefice_mo: Vec::new(),
            charge: Vec::new(),
            achat_piece: Vec::new(),
            huile: Vec::new(),
        };

        for row in rows {
            let category_str: String = row.get("category");
            let keyword: String = row.get("keyword");
            match CaisseType::from_str(&category_str) {
                Some(CaisseType::BeneficeMo) => settings.benefice_mo.push(keyword),
                Some(CaisseType::Charge) => settings.charge.push(keyword),
                Some(CaisseType::AchatPiece) => settings.achat_piece.push(keyword),
                Some(CaisseType::Huile) => settings.huile.push(keyword),
                Some(CaisseType::Tva) | None => {
                    anyhow::bail!("Invalid keyword category: {}", category_str)
                }
            }
        }

        Ok(Some(settings))
    }

    /// Replace a company's keyword settings atomically.
    pub async fn save_keyword_settings(
        &self,
        company_id: CompanyId,
        settings: &KeywordSettings,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        let company_id_str = company_id.to_string();

        sqlx::query("DELETE FROM keyword_settings WHERE company_id = ?")
            .bind(&company_id_str)
            .execute(&mut *tx)
            .await
            .context("Failed to clear keyword settings")?;

        for category in CATEGORY_PRIORITY {
            for (position, keyword) in settings.keywords(category).iter().enumerate() {
                sqlx::query(
                    "INSERT INTO keyword_settings (company_id, category, position, keyword) VALUES (?, ?, ?, ?)",
                )
                .bind(&company_id_str)
                .bind(category.as_str())
                .bind(position as i64)
                .bind(keyword)
                .execute(&mut *tx)
                .await
                .context("Failed to save keyword")?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO keyword_settings_marker (company_id, updated_at) VALUES (?, ?)
            ON CONFLICT(company_id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(&company_id_str)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to save keyword settings marker")?;

        tx.commit().await.context("Failed to commit keyword settings")?;
        Ok(())
    }

    /// Drop a company's stored keywords so the defaults apply again.
    pub async fn clear_keyword_settings(&self, company_id: CompanyId) -> Result<()> {
        let mut tx = self.begin().await?;
        let company_id_str = company_id.to_string();

        sqlx::query("DELETE FROM keyword_settings WHERE company_id = ?")
            .bind(&company_id_str)
            .execute(&mut *tx)
            .await
            .context("Failed to clear keyword settings")?;
        sqlx::query("DELETE FROM keyword_settings_marker WHERE company_id = ?")
            .bind(&company_id_str)
            .execute(&mut *tx)
            .await
            .context("Failed to clear keyword settings marker")?;

        tx.commit().await.context("Failed to commit keyword reset")?;
        Ok(())
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("Invalid date: {}", s))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}

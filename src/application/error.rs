use thiserror::Error;

use crate::domain::{InvoiceError, InvoiceType, KeywordError, PaymentError};

/// Broad classification of an [`AppError`], used for exit codes and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid invoice: {0}")]
    InvalidInvoice(#[from] InvoiceError),

    #[error("Invalid payment: {0}")]
    InvalidPayment(#[from] PaymentError),

    #[error("Invalid keyword configuration: {0}")]
    InvalidKeywords(#[from] KeywordError),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("The {0} must not be empty")]
    EmptyName(&'static str),

    #[error("Unknown invoice type: {0}")]
    UnknownInvoiceType(String),

    #[error("Unknown caisse type: {0}")]
    UnknownCaisseType(String),

    #[error("Invalid period: month {month} of {year}")]
    InvalidPeriod { month: u32, year: i32 },

    #[error("Invoice {0} is cancelled")]
    InvoiceCancelled(String),

    #[error("Only delivery notes can be transformed, {0} is already an invoice")]
    NotADeliveryNote(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Company not found: {0}")]
    CompanyNotFound(String),

    #[error("Company already exists: {0}")]
    CompanyAlreadyExists(String),

    #[error("Client already exists: {0}")]
    ClientAlreadyExists(String),

    #[error("Number {invoice_number} is already used by another {invoice_type}")]
    DuplicateInvoiceNumber {
        invoice_type: InvoiceType,
        invoice_number: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInvoice(_)
            | AppError::InvalidPayment(_)
            | AppError::InvalidKeywords(_)
            | AppError::InvalidAmount(_)
            | AppError::EmptyName(_)
            | AppError::UnknownInvoiceType(_)
            | AppError::UnknownCaisseType(_)
            | AppError::InvalidPeriod { .. }
            | AppError::InvoiceCancelled(_)
            | AppError::NotADeliveryNote(_) => ErrorKind::Validation,
            AppError::InvoiceNotFound(_)
            | AppError::PaymentNotFound(_)
            | AppError::ClientNotFound(_)
            | AppError::CompanyNotFound(_) => ErrorKind::NotFound,
            AppError::CompanyAlreadyExists(_)
            | AppError::ClientAlreadyExists(_)
            | AppError::DuplicateInvoiceNumber { .. } => ErrorKind::Conflict,
            AppError::Database(_) => ErrorKind::Internal,
        }
    }
}

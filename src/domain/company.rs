use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type CompanyId = Uuid;
pub type ClientId = Uuid;

/// A company owns every invoice, payment, client and keyword configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub company_id: CompanyId,
    pub name: String,
    /// Fiscal stamp added to the total of every invoice issued to this client
    pub stamp_cents: Cents,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(company_id: CompanyId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            name: name.into(),
            stamp_cents: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_stamp(mut self, stamp_cents: Cents) -> Self {
        self.stamp_cents = stamp_cents;
        self
    }
}

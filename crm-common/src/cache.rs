//! Local cache of CRM records, written only by webhook synchronization.
//!
//! Every write is a single create-or-replace keyed by the record's stable identifier.
//! All mapped fields are overwritten on conflict, never merged: a cached row can always be
//! rebuilt from the latest event seen for its key.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// Category given to contacts the first time they are cached. Not overwritten by later syncs.
pub const DEFAULT_CONTACT_TYPE: &str = "member";

/// Enumeration of errors for operations with a CacheStore.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("migration failed with: {0}")]
    MigrationError(sqlx::migrate::MigrateError),
    #[error("{0} is not a valid OpportunityStatus")]
    ParseOpportunityStatusError(String),
    #[error("in-memory cache lock was poisoned")]
    PoisonedLock,
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Local status of a cached opportunity, derived from the CRM deal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "opportunity_status")]
#[sqlx(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Active,
    Pending,
    Completed,
    Cancelled,
}

impl FromStr for OpportunityStatus {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OpportunityStatus::Active),
            "pending" => Ok(OpportunityStatus::Pending),
            "completed" => Ok(OpportunityStatus::Completed),
            "cancelled" => Ok(OpportunityStatus::Cancelled),
            invalid => Err(CacheError::ParseOpportunityStatusError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OpportunityStatus::Active => write!(f, "Active"),
            OpportunityStatus::Pending => write!(f, "Pending"),
            OpportunityStatus::Completed => write!(f, "Completed"),
            OpportunityStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Local mirror of a CRM contact, keyed by email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CachedContact {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub company: String,
    pub last_active: DateTime<Utc>,
    pub active: bool,
}

/// Local mirror of a CRM deal, keyed by an id derived from the deal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CachedOpportunity {
    pub id: String,
    pub title: String,
    pub opportunity_type: String,
    pub status: OpportunityStatus,
    pub posted_date: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_value: Option<f64>,
}

/// Synthetic cache key for a CRM deal. The fixed prefix keeps it apart from any locally created id.
pub fn opportunity_id(deal_id: u64) -> String {
    format!("hubspot-deal-{}", deal_id)
}

#[async_trait]
pub trait CacheStore {
    async fn upsert_contact(&self, contact: &CachedContact) -> CacheResult<()>;
    async fn upsert_opportunity(&self, opportunity: &CachedOpportunity) -> CacheResult<()>;
    async fn get_contact(&self, email: &str) -> CacheResult<Option<CachedContact>>;
    async fn get_opportunity(&self, id: &str) -> CacheResult<Option<CachedOpportunity>>;
}

/// A CacheStore backed by two PostgreSQL tables.
/// Upserts rely on `INSERT ... ON CONFLICT DO UPDATE`, so concurrent writers to the same key
/// never produce duplicate rows: the last one to commit wins.
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub async fn new(url: &str, max_connections: u32) -> CacheResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| CacheError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply any pending migrations for the cache tables.
    pub async fn migrate(&self) -> CacheResult<()> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(CacheError::MigrationError)
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn upsert_contact(&self, contact: &CachedContact) -> CacheResult<()> {
        sqlx::query(
            r#"
INSERT INTO cached_contacts
    (email, name, phone, company, last_active, active, contact_type)
VALUES
    ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (email) DO UPDATE SET
    name = EXCLUDED.name,
    phone = EXCLUDED.phone,
    company = EXCLUDED.company,
    last_active = EXCLUDED.last_active,
    active = EXCLUDED.active
            "#,
        )
        .bind(&contact.email)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.company)
        .bind(contact.last_active)
        .bind(contact.active)
        .bind(DEFAULT_CONTACT_TYPE)
        .execute(&self.pool)
        .await
        .map_err(|error| CacheError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn upsert_opportunity(&self, opportunity: &CachedOpportunity) -> CacheResult<()> {
        sqlx::query(
            r#"
INSERT INTO cached_opportunities
    (id, title, opportunity_type, status, posted_date, deadline, estimated_value)
VALUES
    ($1, $2, $3, $4::opportunity_status, $5, $6, $7)
ON CONFLICT (id) DO UPDATE SET
    title = EXCLUDED.title,
    opportunity_type = EXCLUDED.opportunity_type,
    status = EXCLUDED.status,
    posted_date = EXCLUDED.posted_date,
    deadline = EXCLUDED.deadline,
    estimated_value = EXCLUDED.estimated_value
            "#,
        )
        .bind(&opportunity.id)
        .bind(&opportunity.title)
        .bind(&opportunity.opportunity_type)
        .bind(opportunity.status)
        .bind(opportunity.posted_date)
        .bind(opportunity.deadline)
        .bind(opportunity.estimated_value)
        .execute(&self.pool)
        .await
        .map_err(|error| CacheError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn get_contact(&self, email: &str) -> CacheResult<Option<CachedContact>> {
        sqlx::query_as(
            r#"
SELECT email, name, phone, company, last_active, active
FROM cached_contacts
WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| CacheError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    async fn get_opportunity(&self, id: &str) -> CacheResult<Option<CachedOpportunity>> {
        sqlx::query_as(
            r#"
SELECT id, title, opportunity_type, status, posted_date, deadline, estimated_value
FROM cached_opportunities
WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| CacheError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }
}

/// An in-process CacheStore, used when running without a database and in tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    contacts: RwLock<HashMap<String, CachedContact>>,
    opportunities: RwLock<HashMap<String, CachedOpportunity>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.read().map(|map| map.len()).unwrap_or_default()
    }

    pub fn opportunity_count(&self) -> usize {
        self.opportunities
            .read()
            .map(|map| map.len())
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::PoisonedLock
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn upsert_contact(&self, contact: &CachedContact) -> CacheResult<()> {
        let mut contacts = self.contacts.write().map_err(poisoned)?;
        contacts.insert(contact.email.clone(), contact.clone());
        Ok(())
    }

    async fn upsert_opportunity(&self, opportunity: &CachedOpportunity) -> CacheResult<()> {
        let mut opportunities = self.opportunities.write().map_err(poisoned)?;
        opportunities.insert(opportunity.id.clone(), opportunity.clone());
        Ok(())
    }

    async fn get_contact(&self, email: &str) -> CacheResult<Option<CachedContact>> {
        let contacts = self.contacts.read().map_err(poisoned)?;
        Ok(contacts.get(email).cloned())
    }

    async fn get_opportunity(&self, id: &str) -> CacheResult<Option<CachedOpportunity>> {
        let opportunities = self.opportunities.read().map_err(poisoned)?;
        Ok(opportunities.get(id).cloned())
    }
}

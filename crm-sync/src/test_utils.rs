use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crm_common::cache::{CacheError, CacheResult, CacheStore, CachedContact, CachedOpportunity};
use crm_common::crm::{CrmClient, CrmError, CrmObject};
use crm_common::event::WebhookEvent;
use crm_common::mapping::{ContactProperties, DealProperties};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn event(event_id: u64, subscription_type: &str, object_id: u64) -> WebhookEvent {
    WebhookEvent {
        event_id,
        subscription_id: 42,
        portal_id: 7,
        app_id: 3,
        occurred_at: 1_717_228_800_000,
        subscription_type: subscription_type.to_owned(),
        attempt_number: 0,
        object_id,
        change_source: "CRM_UI".to_owned(),
        change_flag: String::new(),
        property_name: None,
        property_value: None,
    }
}

/// A CrmClient answering from fixed property bags. Unknown ids get a 404.
#[derive(Default)]
pub struct FakeCrm {
    contacts: HashMap<u64, ContactProperties>,
    deals: HashMap<u64, DealProperties>,
}

impl FakeCrm {
    pub fn with_contact(mut self, object_id: u64, properties: ContactProperties) -> Self {
        self.contacts.insert(object_id, properties);
        self
    }

    pub fn with_deal(mut self, object_id: u64, properties: DealProperties) -> Self {
        self.deals.insert(object_id, properties);
        self
    }
}

#[async_trait]
impl CrmClient for FakeCrm {
    async fn get_contact(
        &self,
        object_id: u64,
        _properties: &[&str],
    ) -> Result<CrmObject<ContactProperties>, CrmError> {
        match self.contacts.get(&object_id) {
            Some(properties) => Ok(CrmObject {
                id: object_id.to_string(),
                properties: properties.clone(),
            }),
            None => Err(CrmError::StatusError {
                object_type: "contacts",
                object_id,
                status: 404,
            }),
        }
    }

    async fn get_deal(
        &self,
        object_id: u64,
        _properties: &[&str],
    ) -> Result<CrmObject<DealProperties>, CrmError> {
        match self.deals.get(&object_id) {
            Some(properties) => Ok(CrmObject {
                id: object_id.to_string(),
                properties: properties.clone(),
            }),
            None => Err(CrmError::StatusError {
                object_type: "deals",
                object_id,
                status: 404,
            }),
        }
    }
}

/// A CacheStore whose writes always fail.
pub struct FailingCacheStore {}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn upsert_contact(&self, _contact: &CachedContact) -> CacheResult<()> {
        Err(CacheError::PoisonedLock)
    }

    async fn upsert_opportunity(&self, _opportunity: &CachedOpportunity) -> CacheResult<()> {
        Err(CacheError::PoisonedLock)
    }

    async fn get_contact(&self, _email: &str) -> CacheResult<Option<CachedContact>> {
        Ok(None)
    }

    async fn get_opportunity(&self, _id: &str) -> CacheResult<Option<CachedOpportunity>> {
        Ok(None)
    }
}

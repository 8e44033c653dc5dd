//! Mapping of CRM property bags into cache rows.
//!
//! HubSpot omits properties that were never set, and returns `null` for cleared ones.
//! Both cases land as `None` here, and each field has exactly one default policy below.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{opportunity_id, CachedContact, CachedOpportunity};
use crate::stage::translate_deal_stage;

/// Contact properties requested from the CRM.
pub const CONTACT_PROPERTIES: &[&str] = &[
    "email",
    "firstname",
    "lastname",
    "phone",
    "company",
    "lastmodifieddate",
];

/// Deal properties requested from the CRM.
pub const DEAL_PROPERTIES: &[&str] = &[
    "dealname",
    "dealtype",
    "dealstage",
    "createdate",
    "closedate",
    "amount",
];

pub const UNKNOWN_COMPANY: &str = "Unknown";
pub const UNTITLED_DEAL: &str = "Untitled Deal";
pub const DEFAULT_DEAL_TYPE: &str = "newbusiness";

#[derive(Error, Debug, PartialEq)]
pub enum MappingError {
    #[error("contact {0} has no email address")]
    MissingEmail(u64),
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct ContactProperties {
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub lastmodifieddate: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct DealProperties {
    pub dealname: Option<String>,
    pub dealtype: Option<String>,
    pub dealstage: Option<String>,
    pub createdate: Option<String>,
    pub closedate: Option<String>,
    pub amount: Option<String>,
}

/// Trimmed value of a property, treating blank strings as absent.
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a CRM timestamp. HubSpot sends ISO 8601 for most date properties,
/// but some older properties still carry epoch milliseconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn timestamp_property(name: &str, value: &Option<String>) -> Option<DateTime<Utc>> {
    let raw = non_blank(value)?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        tracing::warn!(property = name, value = raw, "ignoring unparseable timestamp");
    }
    parsed
}

pub fn map_contact(
    object_id: u64,
    properties: &ContactProperties,
    now: DateTime<Utc>,
) -> Result<CachedContact, MappingError> {
    let email = non_blank(&properties.email)
        .ok_or(MappingError::MissingEmail(object_id))?
        .to_owned();

    let full_name = format!(
        "{} {}",
        non_blank(&properties.firstname).unwrap_or_default(),
        non_blank(&properties.lastname).unwrap_or_default()
    );
    let name = match full_name.trim() {
        "" => email.clone(),
        name => name.to_owned(),
    };

    Ok(CachedContact {
        name,
        phone: non_blank(&properties.phone).map(str::to_owned),
        company: non_blank(&properties.company)
            .unwrap_or(UNKNOWN_COMPANY)
            .to_owned(),
        last_active: timestamp_property("lastmodifieddate", &properties.lastmodifieddate)
            .unwrap_or(now),
        active: true,
        email,
    })
}

pub fn map_deal(deal_id: u64, properties: &DealProperties, now: DateTime<Utc>) -> CachedOpportunity {
    CachedOpportunity {
        id: opportunity_id(deal_id),
        title: non_blank(&properties.dealname)
            .unwrap_or(UNTITLED_DEAL)
            .to_owned(),
        opportunity_type: non_blank(&properties.dealtype)
            .unwrap_or(DEFAULT_DEAL_TYPE)
            .to_owned(),
        status: translate_deal_stage(non_blank(&properties.dealstage).unwrap_or_default()),
        posted_date: timestamp_property("createdate", &properties.createdate).unwrap_or(now),
        deadline: timestamp_property("closedate", &properties.closedate),
        estimated_value: non_blank(&properties.amount)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite()),
    }
}

use std::time;

use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::mapping::{ContactProperties, DealProperties};

/// Enumeration of errors returned when fetching objects from the CRM.
#[derive(Error, Debug)]
pub enum CrmError {
    #[error("invalid CRM url: {0}")]
    UrlError(#[from] url::ParseError),
    #[error("CRM request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("CRM responded with status {status} for {object_type} {object_id}")]
    StatusError {
        object_type: &'static str,
        object_id: u64,
        status: u16,
    },
}

/// A CRM object as returned by the HubSpot v3 objects API.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CrmObject<P> {
    pub id: String,
    pub properties: P,
}

/// Read access to CRM records. Only the properties listed in `properties` are requested.
#[async_trait]
pub trait CrmClient {
    async fn get_contact(
        &self,
        object_id: u64,
        properties: &[&str],
    ) -> Result<CrmObject<ContactProperties>, CrmError>;

    async fn get_deal(
        &self,
        object_id: u64,
        properties: &[&str],
    ) -> Result<CrmObject<DealProperties>, CrmError>;
}

pub struct HubSpotClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HubSpotClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        request_timeout: time::Duration,
    ) -> Result<Self, CrmError> {
        let mut base_url = Url::parse(base_url)?;
        // Relative joins replace the last path segment unless it ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if !access_token.is_empty() {
            if let Ok(mut value) =
                header::HeaderValue::from_str(&format!("Bearer {}", access_token))
            {
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
            } else {
                tracing::warn!("HubSpot access token is not a valid header value, ignoring it");
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("crm-sync")
            .timeout(request_timeout)
            .build()?;

        Ok(Self { base_url, client })
    }

    fn object_url(
        &self,
        object_type: &str,
        object_id: u64,
        properties: &[&str],
    ) -> Result<Url, CrmError> {
        let mut url = self
            .base_url
            .join(&format!("crm/v3/objects/{}/{}", object_type, object_id))?;
        url.query_pairs_mut()
            .append_pair("properties", &properties.join(","));
        Ok(url)
    }

    async fn get_object<P: DeserializeOwned>(
        &self,
        object_type: &'static str,
        object_id: u64,
        properties: &[&str],
    ) -> Result<CrmObject<P>, CrmError> {
        let url = self.object_url(object_type, object_id, properties)?;

        let start = tokio::time::Instant::now();
        let response = self.client.get(url).send().await?;
        metrics::histogram!("crm_sync_crm_request_duration_seconds", "object_type" => object_type)
            .record(start.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::StatusError {
                object_type,
                object_id,
                status: status.as_u16(),
            });
        }

        Ok(response.json::<CrmObject<P>>().await?)
    }
}

#[async_trait]
impl CrmClient for HubSpotClient {
    async fn get_contact(
        &self,
        object_id: u64,
        properties: &[&str],
    ) -> Result<CrmObject<ContactProperties>, CrmError> {
        self.get_object("contacts", object_id, properties).await
    }

    async fn get_deal(
        &self,
        object_id: u64,
        properties: &[&str],
    ) -> Result<CrmObject<DealProperties>, CrmError> {
        self.get_object("deals", object_id, properties).await
    }
}

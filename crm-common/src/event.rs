use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single change notification as sent by HubSpot.
/// Events are never stored: only the cache rows they produce are.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_id: u64,
    pub subscription_id: u64,
    #[serde(default)]
    pub portal_id: u64,
    #[serde(default)]
    pub app_id: u64,
    /// Milliseconds since the unix epoch.
    pub occurred_at: i64,
    pub subscription_type: String,
    #[serde(default)]
    pub attempt_number: u32,
    pub object_id: u64,
    #[serde(default)]
    pub change_source: String,
    #[serde(default)]
    pub change_flag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_value: Option<String>,
}

impl WebhookEvent {
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.occurred_at)
    }
}

/// The body of a webhook delivery.
/// HubSpot posts a bare array, but the wrapped `{"events": [...]}` shape is accepted too.
///
/// Only the outer shape is checked here. Events stay as raw JSON so that one event we cannot
/// decode does not reject the ones next to it; see [`decode_event`].
#[derive(Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum WebhookDelivery {
    Wrapped { events: Vec<Value> },
    Bare(Vec<Value>),
}

impl WebhookDelivery {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn into_events(self) -> Vec<Value> {
        match self {
            WebhookDelivery::Wrapped { events } => events,
            WebhookDelivery::Bare(events) => events,
        }
    }
}

/// A raw delivery element that did not decode as a [`WebhookEvent`].
#[derive(Debug)]
pub struct UndecodedEvent {
    /// The `subscriptionType` of the element, when it has a string one.
    pub subscription_type: Option<String>,
    pub error: serde_json::Error,
}

/// Decode one element of a delivery. Event types we do not subscribe to may have a different
/// shape (association changes carry `fromObjectId`/`toObjectId` instead of `objectId`), so the
/// subscription type is kept around for the caller to decide what to do.
pub fn decode_event(value: Value) -> Result<WebhookEvent, UndecodedEvent> {
    let subscription_type = value
        .get("subscriptionType")
        .and_then(Value::as_str)
        .map(str::to_owned);

    serde_json::from_value(value).map_err(|error| UndecodedEvent {
        subscription_type,
        error,
    })
}

//! Routing of webhook events to the cache sync that handles them.
//!
//! Each event is processed on its own: a failure is logged and recorded in the batch report,
//! and never stops the remaining events. HubSpot redelivers whole batches, so a single bad event
//! must not cause the rest of its batch to be delivered again and again.
use std::sync::Arc;

use metrics::counter;
use serde_derive::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crm_common::cache::CacheStore;
use crm_common::crm::CrmClient;
use crm_common::event::{decode_event, UndecodedEvent, WebhookEvent};
use crm_common::mapping::{map_contact, map_deal, CONTACT_PROPERTIES, DEAL_PROPERTIES};
use crm_common::time::TimeSource;

use crate::error::SyncError;

/// Subscription types we know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ContactCreation,
    ContactPropertyChange,
    ContactDeletion,
    DealCreation,
    DealPropertyChange,
    DealDeletion,
}

impl EventKind {
    /// Exact match on the `subscriptionType` of an event.
    pub fn from_subscription_type(subscription_type: &str) -> Option<Self> {
        match subscription_type {
            "contact.creation" => Some(EventKind::ContactCreation),
            "contact.propertyChange" => Some(EventKind::ContactPropertyChange),
            "contact.deletion" => Some(EventKind::ContactDeletion),
            "deal.creation" => Some(EventKind::DealCreation),
            "deal.propertyChange" => Some(EventKind::DealPropertyChange),
            "deal.deletion" => Some(EventKind::DealDeletion),
            _ => None,
        }
    }
}

/// What happened to a single event that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A cache row was created or overwritten.
    Synced,
    /// Unknown subscription type.
    Skipped,
    /// Known event that we deliberately do not apply. Deletions never remove cache rows.
    Ignored,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub synced: usize,
    pub skipped: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn from_results(results: &[Result<EventOutcome, SyncError>]) -> Self {
        results.iter().fold(
            BatchReport {
                received: results.len(),
                ..Default::default()
            },
            |mut report, result| {
                match result {
                    Ok(EventOutcome::Synced) => report.synced += 1,
                    Ok(EventOutcome::Skipped) => report.skipped += 1,
                    Ok(EventOutcome::Ignored) => report.ignored += 1,
                    Err(_) => report.failed += 1,
                }
                report
            },
        )
    }
}

pub struct Dispatcher {
    crm: Arc<dyn CrmClient + Send + Sync>,
    cache: Arc<dyn CacheStore + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl Dispatcher {
    pub fn new(
        crm: Arc<dyn CrmClient + Send + Sync>,
        cache: Arc<dyn CacheStore + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        Self {
            crm,
            cache,
            timesource,
        }
    }

    /// Decode and process every element of a delivery in order, and report how each one went.
    /// Elements that do not decode are counted like any other event: skipped when their
    /// subscription type is one we do not handle, failed otherwise.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn dispatch_delivery(&self, events: Vec<Value>) -> BatchReport {
        let mut results = Vec::with_capacity(events.len());

        for value in events {
            let result = match decode_event(value) {
                Ok(event) => self.process(&event).await,
                Err(undecoded) => skip_undecoded(undecoded),
            };
            results.push(result);
        }

        record(BatchReport::from_results(&results))
    }

    /// Process already decoded events in order, and report how each one went.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn dispatch(&self, events: &[WebhookEvent]) -> BatchReport {
        let mut results = Vec::with_capacity(events.len());

        for event in events {
            results.push(self.process(event).await);
        }

        record(BatchReport::from_results(&results))
    }

    async fn process(&self, event: &WebhookEvent) -> Result<EventOutcome, SyncError> {
        let result = self.handle_event(event).await;
        if let Err(ref err) = result {
            error!(
                event_id = event.event_id,
                object_id = event.object_id,
                subscription_type = event.subscription_type.as_str(),
                "failed to process webhook event: {}",
                err
            );
        }
        result
    }

    #[instrument(
        skip_all,
        fields(
            event_id = event.event_id,
            object_id = event.object_id,
            subscription_type = %event.subscription_type,
        )
    )]
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<EventOutcome, SyncError> {
        let Some(kind) = EventKind::from_subscription_type(&event.subscription_type) else {
            info!("skipping event with unknown subscription type");
            return Ok(EventOutcome::Skipped);
        };

        match kind {
            EventKind::ContactCreation | EventKind::ContactPropertyChange => {
                self.sync_contact(event.object_id).await?;
                Ok(EventOutcome::Synced)
            }
            EventKind::DealCreation | EventKind::DealPropertyChange => {
                self.sync_deal(event.object_id).await?;
                Ok(EventOutcome::Synced)
            }
            EventKind::ContactDeletion | EventKind::DealDeletion => {
                info!("deletion is not applied to the cache");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    async fn sync_contact(&self, object_id: u64) -> Result<(), SyncError> {
        let object = self.crm.get_contact(object_id, CONTACT_PROPERTIES).await?;
        let contact = map_contact(
            object_id,
            &object.properties,
            self.timesource.current_time(),
        )?;

        self.cache.upsert_contact(&contact).await?;
        tracing::debug!(object_id, "synced contact");

        Ok(())
    }

    async fn sync_deal(&self, object_id: u64) -> Result<(), SyncError> {
        let object = self.crm.get_deal(object_id, DEAL_PROPERTIES).await?;
        let opportunity = map_deal(
            object_id,
            &object.properties,
            self.timesource.current_time(),
        );

        self.cache.upsert_opportunity(&opportunity).await?;
        tracing::debug!(id = %opportunity.id, status = %opportunity.status, "synced opportunity");

        Ok(())
    }
}

fn skip_undecoded(undecoded: UndecodedEvent) -> Result<EventOutcome, SyncError> {
    match undecoded.subscription_type {
        Some(subscription_type)
            if EventKind::from_subscription_type(&subscription_type).is_none() =>
        {
            info!(
                subscription_type = subscription_type.as_str(),
                "skipping event with unknown subscription type"
            );
            Ok(EventOutcome::Skipped)
        }
        subscription_type => {
            error!(
                subscription_type = subscription_type.as_deref().unwrap_or_default(),
                "failed to decode webhook event: {}",
                undecoded.error
            );
            Err(SyncError::from(undecoded.error))
        }
    }
}

fn record(report: BatchReport) -> BatchReport {
    counter!("crm_sync_events_received_total").increment(report.received as u64);
    counter!("crm_sync_events_synced_total").increment(report.synced as u64);
    counter!("crm_sync_events_skipped_total").increment(report.skipped as u64);
    counter!("crm_sync_events_ignored_total").increment(report.ignored as u64);
    counter!("crm_sync_events_failed_total").increment(report.failed as u64);

    report
}

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use metrics::counter;
use serde_derive::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crm_common::event::WebhookDelivery;
use crm_common::signature::{self, SIGNATURE_HEADER};

use super::app::AppState;
use crate::error::SyncError;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct WebhookPostResponse {
    pub success: bool,
    pub processed: usize,
}

#[derive(Deserialize, Debug)]
pub struct ChallengeQuery {
    challenge: Option<String>,
}

/// Receive a delivery of CRM change events.
///
/// The signature is checked against the raw body before anything is parsed. Once authenticated,
/// the delivery is always acknowledged with the number of events received, whatever happened to
/// the individual events: a 200 tells HubSpot not to redeliver the batch.
#[instrument(skip_all, fields(batch_size, body_size = body.len()))]
pub async fn post_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookPostResponse>, SyncError> {
    authenticate(state.webhook_secret.as_deref(), &headers, &body).map_err(|err| {
        warn!("rejected webhook delivery: {}", err);
        let reason = match err {
            SyncError::MissingSecret => "missing_secret",
            SyncError::MissingSignature => "missing_signature",
            _ => "invalid_signature",
        };
        counter!("crm_sync_signature_rejected_total", "reason" => reason).increment(1);
        err
    })?;

    let events = WebhookDelivery::from_bytes(&body)
        .map_err(|err| {
            warn!("rejected unparseable webhook delivery: {}", err);
            SyncError::from(err)
        })?
        .into_events();

    tracing::Span::current().record("batch_size", events.len());

    let report = state.dispatcher.dispatch_delivery(events).await;
    info!(
        received = report.received,
        synced = report.synced,
        skipped = report.skipped,
        ignored = report.ignored,
        failed = report.failed,
        "processed webhook delivery"
    );

    Ok(Json(WebhookPostResponse {
        success: true,
        processed: report.received,
    }))
}

fn authenticate(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Result<(), SyncError> {
    let secret = secret.ok_or(SyncError::MissingSecret)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(SyncError::MissingSignature)?
        .to_str()
        .map_err(|_| SyncError::InvalidSignature)?;

    if signature::verify(body, signature, secret) {
        Ok(())
    } else {
        Err(SyncError::InvalidSignature)
    }
}

/// Subscription handshake: echo `challenge` back as plain text, or report that we are up.
pub async fn get_webhook(Query(query): Query<ChallengeQuery>) -> Response {
    match query.challenge {
        Some(challenge) => ([(header::CONTENT_TYPE, "text/plain")], challenge).into_response(),
        None => Json(serde_json::json!({
            "status": "ok",
            "service": "crm-sync webhook",
        }))
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use assert_json_diff::assert_json_eq;
    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt; // for `collect`
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use crate::dispatch::Dispatcher;
    use crate::handlers::add_routes;
    use crate::test_utils::{now, FakeCrm};
    use crm_common::cache::{CacheStore, MemoryCacheStore, OpportunityStatus};
    use crm_common::mapping::{ContactProperties, DealProperties};
    use crm_common::time::FixedTime;

    const SECRET: &str = "hubspot-client-secret";

    fn setup(crm: FakeCrm, secret: Option<&str>) -> (Router, Arc<MemoryCacheStore>) {
        let cache = Arc::new(MemoryCacheStore::new());
        let dispatcher = Dispatcher::new(
            Arc::new(crm),
            cache.clone(),
            Arc::new(FixedTime { time: now() }),
        );
        let state = AppState::new(dispatcher, secret.map(str::to_owned));

        (add_routes(Router::new(), state, 1_000_000, 10), cache)
    }

    fn delivery(events: Value) -> String {
        serde_json::to_string(&events).unwrap()
    }

    fn event_json(event_id: u64, subscription_type: &str, object_id: u64) -> Value {
        json!({
            "eventId": event_id,
            "subscriptionId": 42,
            "portalId": 7,
            "appId": 3,
            "occurredAt": 1717228800000_i64,
            "subscriptionType": subscription_type,
            "attemptNumber": 0,
            "objectId": object_id,
            "changeSource": "CRM_UI",
            "changeFlag": "",
        })
    }

    fn signed_post(body: String) -> Request<Body> {
        let signature = signature::sign(body.as_bytes(), SECRET);
        Request::builder()
            .method(http::Method::POST)
            .uri("/webhook")
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn webhook_syncs_contact() {
        let crm = FakeCrm::default().with_contact(
            123,
            ContactProperties {
                email: Some("jane@example.com".to_owned()),
                firstname: Some("Jane".to_owned()),
                lastname: Some("Doe".to_owned()),
                ..Default::default()
            },
        );
        let (app, cache) = setup(crm, Some(SECRET));

        let body = delivery(json!([event_json(1, "contact.propertyChange", 123)]));
        let response = app.oneshot(signed_post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"success": true, "processed": 1})
        );

        let contact = cache
            .get_contact("jane@example.com")
            .await
            .unwrap()
            .expect("contact was not cached");
        assert_eq!(contact.name, "Jane Doe");
        assert!(contact.active);
    }

    #[tokio::test]
    async fn webhook_accepts_wrapped_events() {
        let crm = FakeCrm::default().with_deal(
            10,
            DealProperties {
                dealname: Some("Library roof".to_owned()),
                dealstage: Some("closedwon".to_owned()),
                ..Default::default()
            },
        );
        let (app, cache) = setup(crm, Some(SECRET));

        let body = delivery(json!({"events": [event_json(1, "deal.propertyChange", 10)]}));
        let response = app.oneshot(signed_post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let opportunity = cache
            .get_opportunity("hubspot-deal-10")
            .await
            .unwrap()
            .expect("opportunity was not cached");
        assert_eq!(opportunity.status, OpportunityStatus::Completed);
    }

    #[tokio::test]
    async fn webhook_acknowledges_partial_failures() {
        let (app, cache) = setup(FakeCrm::default(), Some(SECRET));

        let body = delivery(json!([
            event_json(1, "contact.creation", 404),
            event_json(2, "some.futureEvent", 1),
            event_json(3, "deal.deletion", 5),
        ]));
        let response = app.oneshot(signed_post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"success": true, "processed": 3})
        );
        assert_eq!(cache.contact_count(), 0);
    }

    #[tokio::test]
    async fn webhook_acknowledges_events_it_cannot_decode() {
        let crm = FakeCrm::default().with_contact(
            123,
            ContactProperties {
                email: Some("jane@example.com".to_owned()),
                ..Default::default()
            },
        );
        let (app, cache) = setup(crm, Some(SECRET));

        let body = delivery(json!([
            event_json(1, "contact.propertyChange", 123),
            {
                "eventId": 2,
                "subscriptionId": 43,
                "portalId": 7,
                "occurredAt": 1717228800000_i64,
                "subscriptionType": "contact.associationChange",
                "attemptNumber": 0,
                "fromObjectId": 123,
                "toObjectId": 456,
                "changeSource": "CRM_UI"
            },
        ]));
        let response = app.oneshot(signed_post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"success": true, "processed": 2})
        );
        assert_eq!(cache.contact_count(), 1);
    }

    #[tokio::test]
    async fn webhook_missing_signature() {
        let (app, _) = setup(FakeCrm::default(), Some(SECRET));

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/webhook")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    // Not even JSON: we must reject before parsing.
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_json_eq!(
            body_json(response).await,
            json!({"success": false, "error": "missing webhook signature"})
        );
    }

    #[tokio::test]
    async fn webhook_invalid_signature() {
        let (app, cache) = setup(FakeCrm::default(), Some(SECRET));

        let body = delivery(json!([event_json(1, "contact.creation", 123)]));
        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/webhook")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .header(SIGNATURE_HEADER, signature::sign(b"other body", SECRET))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(cache.contact_count(), 0);
    }

    #[tokio::test]
    async fn webhook_missing_secret() {
        let (app, _) = setup(FakeCrm::default(), None);

        let body = delivery(json!([]));
        let response = app.oneshot(signed_post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_json_eq!(
            body_json(response).await,
            json!({"success": false, "error": "webhook secret is not configured"})
        );
    }

    #[tokio::test]
    async fn webhook_payload_not_json() {
        let (app, _) = setup(FakeCrm::default(), Some(SECRET));

        let response = app.oneshot(signed_post("x".to_owned())).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn webhook_payload_body_too_large() {
        let cache = Arc::new(MemoryCacheStore::new());
        let dispatcher = Dispatcher::new(
            Arc::new(FakeCrm::default()),
            cache,
            Arc::new(FixedTime { time: now() }),
        );
        let app = add_routes(
            Router::new(),
            AppState::new(dispatcher, Some(SECRET.to_owned())),
            1_000,
            10,
        );

        let body = "a".repeat(2_000);
        let response = app.oneshot(signed_post(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn webhook_challenge_is_echoed() {
        let (app, _) = setup(FakeCrm::default(), Some(SECRET));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook?challenge=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"abc123");
    }

    #[tokio::test]
    async fn webhook_status_without_challenge() {
        let (app, _) = setup(FakeCrm::default(), None);

        let response = app
            .oneshot(Request::builder().uri("/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"status": "ok", "service": "crm-sync webhook"})
        );
    }
}

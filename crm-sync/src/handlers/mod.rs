mod app;
mod webhook;

pub use app::{add_routes, app, AppState};
pub use webhook::{get_webhook, post_webhook, WebhookPostResponse};

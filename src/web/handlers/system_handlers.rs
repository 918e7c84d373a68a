// src/web/handlers/system_handlers.rs
use crate::auth::OptionalIdentity;

use rocket::serde::json::Json;
use tracing::info;

pub async fn health_handler(auth: OptionalIdentity) -> Json<&'static str> {
    if let Some(identity) = auth.identity {
        info!("Health check by authenticated user: {}", identity.subject);
    } else {
        info!("Health check by anonymous user");
    }
    Json("OK")
}

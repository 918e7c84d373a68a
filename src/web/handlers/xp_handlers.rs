// src/web/handlers/xp_handlers.rs
use crate::auth::Identity;
use crate::database::{DatabaseConfig, User, UserDirectory};
use crate::web::types::{ApiError, AwardRequest, AwardResponse, LevelStatusResponse};
use crate::xp::{LedgerError, XpLedger};
use rocket::serde::json::Json;
use rocket::State;
use sqlx::SqlitePool;
use tracing::{error, info};

/// Resolve the caller to an existing user record. The XP routes never
/// create the record; that is `GET /api/me`'s job.
async fn resolve_user(pool: &SqlitePool, identity: &Identity) -> Result<User, ApiError> {
    let directory = UserDirectory::new(pool);
    match directory.find_by_subject(&identity.subject).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ApiError::not_found("User not found")),
        Err(e) => {
            error!("Failed to look up user {}: {}", identity.subject, e);
            Err(ApiError::internal("Failed to resolve user"))
        }
    }
}

pub async fn get_xp_handler(
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<LevelStatusResponse>, ApiError> {
    let pool = db_config.pool().map_err(|e| {
        error!("Database connection failed: {}", e);
        ApiError::internal("Database error occurred")
    })?;

    let user = resolve_user(pool, &identity).await?;

    let ledger = XpLedger::new(pool);
    match ledger.status(user.id).await {
        Ok(status) => Ok(Json(status.into())),
        Err(e) => {
            error!("Failed to fetch XP for user {}: {}", user.id, e);
            Err(ApiError::internal("Failed to fetch user XP"))
        }
    }
}

pub async fn award_xp_handler(
    request: Json<AwardRequest>,
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<AwardResponse>, ApiError> {
    let pool = db_config.pool().map_err(|e| {
        error!("Database connection failed: {}", e);
        ApiError::internal("Database error occurred")
    })?;

    let user = resolve_user(pool, &identity).await?;

    let amount = match request.amount {
        Some(amount) => amount,
        None => {
            return Err(ApiError::bad_request(
                "Valid XP amount is required",
                "INVALID_AMOUNT",
            ))
        }
    };

    let ledger = XpLedger::new(pool);
    match ledger
        .award(user.id, amount, request.action.as_deref())
        .await
    {
        Ok(outcome) => {
            info!(
                "Awarded {} XP to user {} for {} (level {})",
                outcome.amount_added,
                user.id,
                request.action.as_deref().unwrap_or("unspecified"),
                outcome.level
            );
            Ok(Json(outcome.into()))
        }
        Err(LedgerError::InvalidAmount(_)) => Err(ApiError::bad_request(
            "Valid XP amount is required",
            "INVALID_AMOUNT",
        )),
        Err(e) => {
            error!("Failed to add XP for user {}: {}", user.id, e);
            Err(ApiError::internal("Failed to add XP"))
        }
    }
}

// src/web/handlers/user_handlers.rs
use crate::auth::Identity;
use crate::database::{DatabaseConfig, UserDirectory, UserRole};
use crate::web::types::{ApiError, RoleUpdateRequest, RoleUpdateResponse, UserResponse};
use rocket::serde::json::Json;
use rocket::State;
use tracing::{error, info, warn};

pub async fn get_me_handler(
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<UserResponse>, ApiError> {
    let pool = db_config.pool().map_err(|e| {
        error!("Database connection failed: {}", e);
        ApiError::internal("Database error occurred")
    })?;

    let directory = UserDirectory::new(pool);
    match directory
        .get_or_create(
            &identity.subject,
            identity.email.as_deref(),
            identity.name.as_deref(),
        )
        .await
    {
        Ok(user) => Ok(Json(user.into())),
        Err(e) => {
            error!(
                "Failed to resolve user for subject {}: {}",
                identity.subject, e
            );
            Err(ApiError::internal("Failed to fetch user information"))
        }
    }
}

pub async fn update_role_handler(
    request: Json<RoleUpdateRequest>,
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<RoleUpdateResponse>, ApiError> {
    let pool = db_config.pool().map_err(|e| {
        error!("Database connection failed: {}", e);
        ApiError::internal("Database error occurred")
    })?;

    let directory = UserDirectory::new(pool);

    // Only admins may change roles
    let requester = match directory.find_by_subject(&identity.subject).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::forbidden("Forbidden")),
        Err(e) => {
            error!("Failed to look up requester {}: {}", identity.subject, e);
            return Err(ApiError::internal("Failed to resolve user"));
        }
    };

    if requester.role != UserRole::Admin {
        warn!(
            "User {} attempted a role change without admin rights",
            requester.subject
        );
        return Err(ApiError::forbidden("Forbidden"));
    }

    match directory
        .set_role(&request.target_subject, request.new_role)
        .await
    {
        Ok(Some(user)) => {
            info!(
                "Admin {} set role of {} to {:?}",
                requester.subject, user.subject, user.role
            );
            Ok(Json(RoleUpdateResponse {
                message: "Role updated".to_string(),
                user: user.into(),
            }))
        }
        Ok(None) => Err(ApiError::not_found("Target user not found")),
        Err(e) => {
            error!(
                "Failed to update role for {}: {}",
                request.target_subject, e
            );
            Err(ApiError::internal("Failed to update role"))
        }
    }
}

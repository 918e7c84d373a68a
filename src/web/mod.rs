// src/web/mod.rs
pub mod handlers;
pub mod types;

pub use types::*;

use crate::auth::{AuthConfig, Identity, OptionalIdentity};
use crate::database::DatabaseConfig;
use crate::environment::IdentityProviderConfig;
use anyhow::Result;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{catchers, get, options, patch, post, routes, Request, Response, State};
use std::path::PathBuf;
use tracing::{error, info};

// CORS Fairing
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, PATCH, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

#[get("/me/xp")]
pub async fn get_xp(
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<LevelStatusResponse>, ApiError> {
    handlers::get_xp_handler(identity, db_config).await
}

#[post("/me/xp", data = "<request>")]
pub async fn award_xp(
    request: Json<AwardRequest>,
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<AwardResponse>, ApiError> {
    handlers::award_xp_handler(request, identity, db_config).await
}

#[get("/me")]
pub async fn get_me(
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<UserResponse>, ApiError> {
    handlers::get_me_handler(identity, db_config).await
}

#[patch("/users/role", data = "<request>")]
pub async fn update_role(
    request: Json<RoleUpdateRequest>,
    identity: Identity,
    db_config: &State<DatabaseConfig>,
) -> Result<Json<RoleUpdateResponse>, ApiError> {
    handlers::update_role_handler(request, identity, db_config).await
}

#[get("/health")]
pub async fn health(auth: OptionalIdentity) -> Json<&'static str> {
    handlers::health_handler(auth).await
}

#[options("/<_..>")]
pub async fn options() -> Status {
    Status::Ok
}

// Error catchers
#[rocket::catch(400)]
pub fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "Valid XP amount is required".to_string(),
        code: "BAD_REQUEST".to_string(),
    })
}

#[rocket::catch(401)]
pub fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "Unauthorized".to_string(),
        code: "UNAUTHENTICATED".to_string(),
    })
}

// Rocket reports type-mismatched JSON bodies as 422; the boundary contract
// promises 400 for those
#[rocket::catch(422)]
pub fn unprocessable() -> ApiError {
    ApiError::bad_request("Valid XP amount is required", "BAD_REQUEST")
}

#[rocket::catch(404)]
pub fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "Not found".to_string(),
        code: "NOT_FOUND".to_string(),
    })
}

#[rocket::catch(500)]
pub fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "Internal server error".to_string(),
        code: "INTERNAL_ERROR".to_string(),
    })
}

// Main server start function
pub async fn start_web_server(
    database_path: PathBuf,
    identity_provider: IdentityProviderConfig,
    port: u16,
) -> Result<()> {
    let mut db_config = DatabaseConfig::new(database_path);

    if let Err(e) = db_config.init_pool().await {
        error!("Failed to initialize database: {}", e);
        return Err(e);
    }

    if let Err(e) = db_config.migrate().await {
        error!("Failed to run database migrations: {}", e);
        return Err(e);
    }

    let mut auth_config = AuthConfig::new(
        identity_provider.issuer,
        identity_provider.audience,
        identity_provider.jwks_url,
    );

    if let Err(e) = auth_config.update_provider_keys().await {
        error!("Failed to fetch identity provider keys: {}", e);
        return Err(e);
    }

    info!("Starting BloomPoint XP API server");
    info!("Database: {}", db_config.database_path.display());

    let figment = rocket::Config::figment().merge(("port", port));

    rocket::custom(figment)
        .attach(Cors)
        .manage(auth_config)
        .manage(db_config)
        .register(
            "/api",
            catchers![
                bad_request,
                unauthorized,
                unprocessable,
                not_found,
                internal_error
            ],
        )
        .mount(
            "/api",
            routes![get_xp, award_xp, get_me, update_role, health, options],
        )
        .launch()
        .await?;

    Ok(())
}

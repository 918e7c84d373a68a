// src/web/types.rs
use crate::database::{User, UserRole};
use crate::xp::{AwardOutcome, LevelStatus};
use chrono::{DateTime, Utc};
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::serde::{Deserialize, Serialize};
use rocket::{Request, Response};

/// Wire form of a user's level status. Field names match what the profile
/// page already consumes.
#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct LevelStatusResponse {
    pub xp: i64,
    pub level: i64,
    #[serde(rename = "totalXP")]
    pub total_xp: i64,
    #[serde(rename = "xpToNextLevel")]
    pub xp_to_next_level: i64,
    #[serde(rename = "xpProgress")]
    pub xp_progress: f64,
}

impl From<LevelStatus> for LevelStatusResponse {
    fn from(status: LevelStatus) -> Self {
        Self {
            xp: status.xp,
            level: status.level,
            total_xp: status.total_xp,
            xp_to_next_level: status.xp_to_next_level,
            xp_progress: status.xp_progress,
        }
    }
}

/// Body of `POST /api/me/xp`. `amount` is optional at the wire level so a
/// missing value reaches the handler's validation and comes back as a 400
/// rather than a body-parse failure; a non-numeric value is caught by the
/// unprocessable-entity catcher.
#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct AwardRequest {
    pub amount: Option<i64>,
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct AwardResponse {
    pub message: String,
    pub xp: i64,
    pub level: i64,
    #[serde(rename = "totalXP")]
    pub total_xp: i64,
    #[serde(rename = "xpToNextLevel")]
    pub xp_to_next_level: i64,
    #[serde(rename = "xpProgress")]
    pub xp_progress: f64,
    #[serde(rename = "leveledUp")]
    pub leveled_up: bool,
    pub action: Option<String>,
    #[serde(rename = "amountAdded")]
    pub amount_added: i64,
}

impl From<AwardOutcome> for AwardResponse {
    fn from(outcome: AwardOutcome) -> Self {
        Self {
            message: "XP added successfully".to_string(),
            xp: outcome.xp,
            level: outcome.level,
            total_xp: outcome.total_xp,
            xp_to_next_level: outcome.xp_to_next_level,
            xp_progress: outcome.xp_progress,
            leveled_up: outcome.leveled_up,
            action: outcome.reason,
            amount_added: outcome.amount_added,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct UserResponse {
    pub id: i64,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: UserRole,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            subject: user.subject,
            email: user.email,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct RoleUpdateRequest {
    #[serde(rename = "targetSubject")]
    pub target_subject: String,
    #[serde(rename = "newRole")]
    pub new_role: UserRole,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct RoleUpdateResponse {
    pub message: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// JSON error with the HTTP status the boundary contract prescribes.
#[derive(Debug)]
pub struct ApiError {
    pub status: Status,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: Status, error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                code: code.into(),
            },
        }
    }

    pub fn bad_request(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, error, code)
    }

    pub fn forbidden(error: impl Into<String>) -> Self {
        Self::new(Status::Forbidden, error, "FORBIDDEN")
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(Status::NotFound, error, "NOT_FOUND")
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(Status::InternalServerError, error, "INTERNAL_ERROR")
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = serde_json::to_string(&self.body).map_err(|_| Status::InternalServerError)?;

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xp::LedgerEntry;

    #[test]
    fn test_level_status_wire_field_names() {
        let status = LevelStatus::from_entry(LedgerEntry { xp: 60, level: 1 });
        let json = serde_json::to_value(LevelStatusResponse::from(status)).expect("serialize");

        assert_eq!(json["xp"], 60);
        assert_eq!(json["level"], 1);
        assert_eq!(json["totalXP"], 60);
        assert_eq!(json["xpToNextLevel"], 100);
        assert_eq!(json["xpProgress"], 60.0);
    }

    #[test]
    fn test_award_request_amount_validation_shape() {
        let parsed: Result<AwardRequest, _> =
            serde_json::from_str(r#"{"amount": "fifty", "action": "job_application"}"#);
        assert!(parsed.is_err());

        // Missing amount parses and is rejected by the handler instead
        let parsed: AwardRequest = serde_json::from_str(r#"{"action": "x"}"#).expect("parse");
        assert!(parsed.amount.is_none());
    }

    #[test]
    fn test_role_parses_uppercase_wire_values() {
        let request: RoleUpdateRequest =
            serde_json::from_str(r#"{"targetSubject": "subj", "newRole": "EMPLOYER"}"#)
                .expect("parse");
        assert_eq!(request.new_role, UserRole::Employer);

        let bad: Result<RoleUpdateRequest, _> =
            serde_json::from_str(r#"{"targetSubject": "subj", "newRole": "employer"}"#);
        assert!(bad.is_err());
    }
}

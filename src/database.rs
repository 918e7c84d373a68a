// src/database.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    User,
    Employer,
    Admin,
}

/// Internal user record backing an external identity-provider subject.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DatabaseConfig {
    pub database_path: PathBuf,
    pub pool: Option<SqlitePool>,
}

impl DatabaseConfig {
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            database_path,
            pool: None,
        }
    }

    /// Initialize the database connection pool
    pub async fn init_pool(&mut self) -> Result<()> {
        if let Some(parent) = self.database_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", self.database_path.display());

        let pool = SqlitePool::connect(&database_url)
            .await
            .context("Failed to connect to SQLite database")?;
        self.pool = Some(pool);

        info!("Database connection pool initialized: {}", database_url);
        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Database pool not initialized. Call init_pool() first."))
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.pool()?;
        run_migrations(pool).await?;
        info!("Database migrations completed successfully");
        Ok(())
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT NOT NULL UNIQUE,
            email TEXT,
            name TEXT,
            role TEXT NOT NULL DEFAULT 'USER',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_users_subject
        ON users(subject);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS xp_ledger (
            user_id INTEGER PRIMARY KEY REFERENCES users(id),
            xp INTEGER NOT NULL DEFAULT 0,
            level INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db)) if db.is_unique_violation()
    )
}

/// Maps external identity-provider subjects to internal user records,
/// creating a minimal record on first sight.
pub struct UserDirectory<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserDirectory<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a user by the identity provider's subject
    pub async fn find_by_subject(&self, subject: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, subject, email, name, role, created_at, updated_at
            FROM users
            WHERE subject = ?
            "#,
        )
        .bind(subject)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Create a new user with the default role
    pub async fn create(
        &self,
        subject: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<User> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO users (subject, email, name, role, created_at, updated_at)
            VALUES (?, ?, ?, 'USER', ?, ?)
            "#,
        )
        .bind(subject)
        .bind(email)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        let user_id = result.last_insert_rowid();

        info!("Created user {} for subject: {}", user_id, subject);

        Ok(User {
            id: user_id,
            subject: subject.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            role: UserRole::User,
            created_at: now,
            updated_at: now,
        })
    }

    /// Resolve a subject to a user record, auto-creating one on first sight
    pub async fn get_or_create(
        &self,
        subject: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<User> {
        if let Some(user) = self.find_by_subject(subject).await? {
            return Ok(user);
        }

        match self.create(subject, email, name).await {
            Ok(user) => Ok(user),
            // Lost a first-sight race on the unique subject column; the
            // other writer's row is the one to return
            Err(e) if is_unique_violation(&e) => self
                .find_by_subject(subject)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Failed to create user for subject: {}", subject)),
            Err(e) => Err(e),
        }
    }

    /// Change another user's role, returning the updated record
    pub async fn set_role(&self, subject: &str, role: UserRole) -> Result<Option<User>> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = ?, updated_at = ?
            WHERE subject = ?
            "#,
        )
        .bind(role)
        .bind(Utc::now())
        .bind(subject)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        info!("Updated role for subject {} to {:?}", subject, role);
        self.find_by_subject(subject).await
    }
}

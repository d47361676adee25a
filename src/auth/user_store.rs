//! User Storage
//! Persist user accounts in SQLite
//!
//! Deleted users keep their row with `deleted_at` set and are invisible to
//! every lookup. Username and email are unique among live rows only, so a
//! deleted account's name can be registered again.

use crate::auth::models::{User, UserRole, UserStatus};
use crate::auth::password::PasswordHasher;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, avatar, \
     role, status, last_login, created_at, updated_at, deleted_at";

/// Fields of an account that does not exist yet
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub status: UserStatus,
}

#[derive(Debug)]
pub enum StoreError {
    UsernameTaken,
    EmailTaken,
    Database(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UsernameTaken => write!(f, "username already exists"),
            StoreError::EmailTaken => write!(f, "email already exists"),
            StoreError::Database(e) => write!(f, "database error: {:#}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Database(err)
    }
}

/// Filters for [`UserStore::list_page`]
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub keyword: Option<String>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserStats {
    pub total: i64,
    pub active: i64,
    pub admins: i64,
    pub registered_today: i64,
}

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open database {}", self.db_path))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                avatar TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'user',
                status TEXT NOT NULL DEFAULT 'active',
                last_login TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username_live
                ON users(username) WHERE deleted_at IS NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_live
                ON users(email) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at);",
        )
        .context("Failed to initialize users schema")?;

        Ok(())
    }

    /// Insert the demo accounts when no live user exists. Returns how many were created.
    pub fn seed_demo_users(&self, hasher: &PasswordHasher) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL",
                [],
                |row| row.get(0),
            )
            .context("Failed to count users")?;

        if count > 0 {
            return Ok(0);
        }

        let demo = [
            ("admin", "admin@example.com", "admin123", "Admin", UserRole::Admin),
            ("user", "user@example.com", "user123", "Demo", UserRole::User),
        ];

        for (username, email, password, first_name, role) in demo {
            self.create_user(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: hasher.hash(password)?,
                first_name: first_name.to_string(),
                last_name: "User".to_string(),
                role,
                status: UserStatus::Active,
            })
            .map_err(|e| anyhow::anyhow!("Failed to seed {}: {}", username, e))?;
        }

        info!("Seeded demo users (admin/admin123, user/user123)");
        warn!("Demo accounts use well-known passwords, disable SEED_DEMO_USERS in production");

        Ok(demo.len())
    }

    /// Insert a new account. Username/email collisions with live users are reported as such.
    pub fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let conn = self.connect()?;
        let now = Utc::now();
        let email = new_user.email.trim().to_lowercase();

        let inserted = conn.execute(
            "INSERT INTO users (username, email, password_hash, first_name, last_name, avatar,
                                role, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '', ?6, ?7, ?8, ?8)",
            params![
                new_user.username,
                email,
                new_user.password_hash,
                new_user.first_name,
                new_user.last_name,
                new_user.role.as_str(),
                new_user.status.as_str(),
                now,
            ],
        );

        if let Err(err) = inserted {
            return Err(classify_insert_error(err));
        }

        let user = User {
            id: conn.last_insert_rowid(),
            username: new_user.username,
            email,
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            avatar: String::new(),
            role: new_user.role,
            status: new_user.status,
            last_login: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        info!("Created user: {} ({})", user.username, user.role.as_str());

        Ok(user)
    }

    /// Get a live user by id
    pub fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM users WHERE id = ?1 AND deleted_at IS NULL",
            USER_COLUMNS
        );

        conn.query_row(&sql, params![id], row_to_user)
            .optional()
            .context("Failed to load user by id")
    }

    /// Get a live user by username, or by email when `login` contains one
    pub fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM users
             WHERE (username = ?1 OR email = ?2) AND deleted_at IS NULL
             ORDER BY (username = ?1) DESC
             LIMIT 1",
            USER_COLUMNS
        );

        conn.query_row(
            &sql,
            params![login.trim(), login.trim().to_lowercase()],
            row_to_user,
        )
        .optional()
        .context("Failed to load user by login")
    }

    pub fn username_taken(&self, username: &str) -> Result<bool> {
        self.exists("SELECT 1 FROM users WHERE username = ?1 AND deleted_at IS NULL", username)
    }

    pub fn email_taken(&self, email: &str) -> Result<bool> {
        self.exists(
            "SELECT 1 FROM users WHERE email = ?1 AND deleted_at IS NULL",
            &email.trim().to_lowercase(),
        )
    }

    fn exists(&self, sql: &str, value: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found = conn
            .query_row(sql, params![value], |_| Ok(()))
            .optional()
            .context("Failed to check uniqueness")?;
        Ok(found.is_some())
    }

    /// One page of live users, newest first, plus the total matching the filter.
    pub fn list_page(&self, page: u32, page_size: u32, filter: &UserFilter) -> Result<(Vec<User>, u64)> {
        let conn = self.connect()?;
        let pattern = filter
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", escape_like(k)));
        let status = filter.status.map(|s| s.as_str());

        let predicate = "deleted_at IS NULL
             AND (?1 IS NULL OR username LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\'
                  OR first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\')
             AND (?2 IS NULL OR status = ?2)";

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM users WHERE {}", predicate),
                params![pattern, status],
                |row| row.get(0),
            )
            .context("Failed to count users")?;

        let page_size = page_size.max(1);
        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
        let sql = format!(
            "SELECT {} FROM users WHERE {} ORDER BY id DESC LIMIT ?3 OFFSET ?4",
            USER_COLUMNS, predicate
        );

        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(
                params![pattern, status, i64::from(page_size), offset],
                row_to_user,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list users")?;

        Ok((users, total.max(0) as u64))
    }

    /// Write back the editable profile fields, role and status. Returns false if the user is gone.
    pub fn save(&self, user: &User) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn
            .execute(
                "UPDATE users
                 SET first_name = ?2, last_name = ?3, avatar = ?4, role = ?5, status = ?6,
                     updated_at = ?7
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    user.id,
                    user.first_name,
                    user.last_name,
                    user.avatar,
                    user.role.as_str(),
                    user.status.as_str(),
                    Utc::now(),
                ],
            )
            .context("Failed to update user")?;
        Ok(rows > 0)
    }

    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, password_hash, Utc::now()],
            )
            .context("Failed to update password")?;
        Ok(rows > 0)
    }

    pub fn touch_last_login(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE users SET last_login = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, Utc::now()],
        )
        .context("Failed to record last login")?;
        Ok(())
    }

    /// Mark a user deleted. Returns false if no live user had that id.
    pub fn soft_delete(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let now = Utc::now();
        let rows = conn
            .execute(
                "UPDATE users SET deleted_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id, now],
            )
            .context("Failed to delete user")?;

        if rows > 0 {
            info!("Deleted user: {}", id);
        }
        Ok(rows > 0)
    }

    pub fn stats(&self) -> Result<UserStats> {
        let conn = self.connect()?;
        let start_of_day: DateTime<Utc> = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .context("Invalid start of day")?
            .and_utc();

        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'active'), 0),
                    COALESCE(SUM(role = 'admin'), 0),
                    COALESCE(SUM(created_at >= ?1), 0)
             FROM users WHERE deleted_at IS NULL",
            params![start_of_day],
            |row| {
                Ok(UserStats {
                    total: row.get(0)?,
                    active: row.get(1)?,
                    admins: row.get(2)?,
                    registered_today: row.get(3)?,
                })
            },
        )
        .context("Failed to compute user stats")
    }

    /// Cheap round trip used by the health endpoint
    pub fn ping(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Database ping failed")
    }
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(7)?;
    let status: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        avatar: row.get(6)?,
        role: UserRole::from_str(&role).unwrap_or(UserRole::User),
        status: UserStatus::from_str(&status).unwrap_or(UserStatus::Inactive),
        last_login: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        deleted_at: row.get(12)?,
    })
}

fn classify_insert_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            if message.contains("users.username") {
                return StoreError::UsernameTaken;
            }
            if message.contains("users.email") {
                return StoreError::EmailTaken;
            }
        }
    }
    StoreError::Database(anyhow::Error::new(err).context("Failed to insert user"))
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

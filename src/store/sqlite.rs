// MIT License - Copyright (c) 2026 Peter Wright
// SQLite implementation of the persistence gateway

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Site, SiteEvent, Store, User};
use crate::auth::{self, Subject, SubjectKind};
use crate::error::{Result, SecCtlError};
use crate::event::Event;

const SCHEMA_VERSION: i64 = 2;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and migrate it.
    pub async fn connect(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }
        info!("Connecting to database: {}", url);
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        Self::from_pool(pool).await
    }

    /// A private in-memory database. One connection, never recycled, since
    /// each SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await?;
    if current >= SCHEMA_VERSION {
        debug!("Database schema is up to date (version {})", current);
        return Ok(());
    }
    info!(
        "Migrating database from version {} to {}",
        current, SCHEMA_VERSION
    );

    let mut tx = pool.begin().await?;
    if current < 1 {
        create_tables(&mut tx).await?;
    }
    if current == 1 {
        // Version 1 stored token expiries in milliseconds
        sqlx::query(
            "UPDATE auth_tokens SET expires_at = expires_at * 1000 WHERE expires_at IS NOT NULL",
        )
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn create_tables(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            owner_id TEXT REFERENCES users(id),
            state_shadow TEXT
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS auth_tokens (
            token TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            subject_kind TEXT NOT NULL CHECK (subject_kind IN ('user', 'site')),
            expires_at INTEGER -- epoch microseconds
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tokens_subject ON auth_tokens(subject_id, subject_kind)",
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS site_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id TEXT NOT NULL REFERENCES sites(id),
            level TEXT NOT NULL,
            time_ms INTEGER NOT NULL,
            data TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_site ON site_events(site_id, id DESC)")
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| SecCtlError::Persistence(sqlx::Error::Decode(Box::new(e))))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        email: row.try_get("email")?,
    })
}

fn site_from_row(row: &SqliteRow) -> Result<Site> {
    let owner: Option<String> = row.try_get("owner_id")?;
    Ok(Site {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        owner_id: owner.as_deref().map(parse_uuid).transpose()?,
        state_shadow: row.try_get("state_shadow")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<SiteEvent> {
    let time_ms: i64 = row.try_get("time_ms")?;
    Ok(SiteEvent {
        id: row.try_get("id")?,
        site_id: parse_uuid(&row.try_get::<String, _>("site_id")?)?,
        level: row.try_get("level")?,
        time: DateTime::from_timestamp_millis(time_ms).unwrap_or(DateTime::UNIX_EPOCH),
        data: row.try_get("data")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_user(&self, email: &str, password: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        let hash = auth::hash_password(password)?;
        sqlx::query("INSERT INTO users (id, email, password_hash) VALUES (?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    SecCtlError::Credential {
                        details: format!("email {} already registered", email),
                    }
                }
                other => SecCtlError::Persistence(other),
            })?;
        info!("Created user {}", user.id);
        Ok(user)
    }

    async fn auth_user_by_password(&self, email: &str, password: &str) -> Result<User> {
        let row = sqlx::query("SELECT id, email, password_hash FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SecCtlError::Auth)?;
        let hash: String = row.try_get("password_hash")?;
        if !auth::verify_password(password, &hash)? {
            return Err(SecCtlError::Auth);
        }
        user_from_row(&row)
    }

    async fn create_token(
        &self,
        subject: Subject,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let token = auth::new_token();
        sqlx::query(
            "INSERT INTO auth_tokens (token, subject_id, subject_kind, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(subject.id.to_string())
        .bind(subject.kind.as_str())
        .bind(expires_at.map(|t| t.timestamp_micros()))
        .execute(&self.pool)
        .await?;
        debug!("Issued {} token for {}", subject.kind, subject.id);
        Ok(token)
    }

    async fn validate_token(
        &self,
        token: &str,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM auth_tokens
             WHERE token = ? AND subject_id = ? AND subject_kind = ?
               AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(token)
        .bind(subject.id.to_string())
        .bind(subject.kind.as_str())
        .bind(now.timestamp_micros())
        .fetch_optional(&self.pool)
        .await?;
        found.map(|_| ()).ok_or(SecCtlError::Auth)
    }

    async fn auth_user_by_token(&self, token: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT users.id, users.email FROM users
             JOIN auth_tokens t ON t.subject_id = users.id AND t.subject_kind = ?
             WHERE t.token = ? AND (t.expires_at IS NULL OR t.expires_at > ?)",
        )
        .bind(SubjectKind::User.as_str())
        .bind(token)
        .bind(Utc::now().timestamp_micros())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SecCtlError::Auth)?;
        user_from_row(&row)
    }

    async fn auth_site_by_token(&self, token: &str) -> Result<Site> {
        let row = sqlx::query(
            "SELECT sites.id, sites.owner_id, sites.state_shadow FROM sites
             JOIN auth_tokens t ON t.subject_id = sites.id AND t.subject_kind = ?
             WHERE t.token = ? AND (t.expires_at IS NULL OR t.expires_at > ?)",
        )
        .bind(SubjectKind::Site.as_str())
        .bind(token)
        .bind(Utc::now().timestamp_micros())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SecCtlError::Auth)?;
        site_from_row(&row)
    }

    async fn create_site(&self) -> Result<Site> {
        let site = Site {
            id: Uuid::new_v4(),
            owner_id: None,
            state_shadow: None,
        };
        sqlx::query("INSERT INTO sites (id) VALUES (?)")
            .bind(site.id.to_string())
            .execute(&self.pool)
            .await?;
        info!("Created site {}", site.id);
        Ok(site)
    }

    async fn fetch_site(&self, site_id: Uuid) -> Result<Site> {
        let row = sqlx::query("SELECT id, owner_id, state_shadow FROM sites WHERE id = ?")
            .bind(site_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SecCtlError::NotFound {
                what: format!("site {}", site_id),
            })?;
        site_from_row(&row)
    }

    async fn update_site_state(&self, site_id: Uuid, state_json: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sites SET state_shadow = ? WHERE id = ?")
            .bind(state_json)
            .bind(site_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SecCtlError::NotFound {
                what: format!("site {}", site_id),
            });
        }
        Ok(())
    }

    async fn claim_site(&self, user: &User, site_id: Uuid, claim_token: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE sites SET owner_id = ?
             WHERE id = ? AND owner_id IS NULL
               AND EXISTS (
                 SELECT 1 FROM auth_tokens
                 WHERE token = ? AND subject_id = sites.id AND subject_kind = ?
                   AND (expires_at IS NULL OR expires_at > ?)
               )",
        )
        .bind(user.id.to_string())
        .bind(site_id.to_string())
        .bind(claim_token)
        .bind(SubjectKind::Site.as_str())
        .bind(Utc::now().timestamp_micros())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(SecCtlError::Claim);
        }

        sqlx::query("DELETE FROM auth_tokens WHERE token = ?")
            .bind(claim_token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Site {} claimed by user {}", site_id, user.id);
        Ok(())
    }

    async fn create_event(&self, site_id: Uuid, event: &Event) -> Result<SiteEvent> {
        let data = serde_json::to_string(event)?;
        let time = event.time;
        let result = sqlx::query(
            "INSERT INTO site_events (site_id, level, time_ms, data) VALUES (?, ?, ?, ?)",
        )
        .bind(site_id.to_string())
        .bind(event.level.as_str())
        .bind(time.timestamp_millis())
        .bind(&data)
        .execute(&self.pool)
        .await?;

        Ok(SiteEvent {
            id: result.last_insert_rowid(),
            site_id,
            level: event.level.as_str().to_string(),
            time: DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time),
            data,
        })
    }

    async fn site_events(
        &self,
        site_id: Uuid,
        before: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<SiteEvent>> {
        // LIMIT -1 means no limit in SQLite
        let limit = limit.filter(|&n| n > 0).map(i64::from).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT id, site_id, level, time_ms, data FROM site_events
             WHERE site_id = ? AND (? IS NULL OR id < ?)
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(site_id.to_string())
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLevel;
    use chrono::Duration;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory()
            .await
            .expect("Failed to create in-memory store")
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let store = test_store().await;
        run_migrations(store.pool()).await.unwrap();
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_create_and_auth_user() {
        let store = test_store().await;
        let user = store.create_user("a@example.com", "pw").await.unwrap();
        assert_eq!(user.email, "a@example.com");

        let authed = store.auth_user_by_password("a@example.com", "pw").await.unwrap();
        assert_eq!(authed, user);
        assert!(matches!(
            store.auth_user_by_password("a@example.com", "bad").await,
            Err(SecCtlError::Auth)
        ));
        assert!(matches!(
            store.auth_user_by_password("b@example.com", "pw").await,
            Err(SecCtlError::Auth)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let store = test_store().await;
        store.create_user("a@example.com", "pw").await.unwrap();
        assert!(matches!(
            store.create_user("a@example.com", "other").await,
            Err(SecCtlError::Credential { .. })
        ));
    }

    #[tokio::test]
    async fn test_user_token() {
        let store = test_store().await;
        let user = store.create_user("a@example.com", "pw").await.unwrap();
        let token = store.create_token(Subject::user(user.id), None).await.unwrap();

        assert_eq!(store.auth_user_by_token(&token).await.unwrap(), user);
        // Reusable
        assert_eq!(store.auth_user_by_token(&token).await.unwrap(), user);
        assert!(matches!(
            store.auth_user_by_token("nope").await,
            Err(SecCtlError::Auth)
        ));
    }

    #[tokio::test]
    async fn test_validate_token_expiry() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        let token = store
            .create_token(Subject::site(site.id), Some(expires))
            .await
            .unwrap();

        store
            .validate_token(&token, Subject::site(site.id), now)
            .await
            .unwrap();
        // Expiry is exclusive
        assert!(matches!(
            store.validate_token(&token, Subject::site(site.id), expires).await,
            Err(SecCtlError::Auth)
        ));
        assert!(store
            .validate_token(&token, Subject::site(site.id), expires + Duration::seconds(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_validate_token_checks_subject_kind() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        let token = store.create_token(Subject::site(site.id), None).await.unwrap();

        assert!(matches!(
            store.validate_token(&token, Subject::user(site.id), Utc::now()).await,
            Err(SecCtlError::Auth)
        ));
        assert!(matches!(
            store.auth_user_by_token(&token).await,
            Err(SecCtlError::Auth)
        ));
        assert_eq!(store.auth_site_by_token(&token).await.unwrap().id, site.id);
    }

    #[tokio::test]
    async fn test_validate_token_checks_subject_id() {
        let store = test_store().await;
        let a = store.create_site().await.unwrap();
        let b = store.create_site().await.unwrap();
        let token = store.create_token(Subject::site(a.id), None).await.unwrap();
        assert!(store
            .validate_token(&token, Subject::site(b.id), Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_expired_site_token_does_not_authenticate() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        let token = store
            .create_token(Subject::site(site.id), Some(Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();
        assert!(matches!(
            store.auth_site_by_token(&token).await,
            Err(SecCtlError::Auth)
        ));
    }

    #[tokio::test]
    async fn test_fetch_and_update_site() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        assert_eq!(site.owner_id, None);

        store
            .update_site_state(site.id, r#"{"partitions":[]}"#)
            .await
            .unwrap();
        let fetched = store.fetch_site(site.id).await.unwrap();
        assert_eq!(fetched.state_shadow.as_deref(), Some(r#"{"partitions":[]}"#));

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.fetch_site(missing).await,
            Err(SecCtlError::NotFound { .. })
        ));
        assert!(matches!(
            store.update_site_state(missing, "{}").await,
            Err(SecCtlError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_site() {
        let store = test_store().await;
        let user = store.create_user("a@example.com", "pw").await.unwrap();
        let site = store.create_site().await.unwrap();
        let claim = store
            .create_token(Subject::site(site.id), Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        store.claim_site(&user, site.id, &claim).await.unwrap();
        assert_eq!(store.fetch_site(site.id).await.unwrap().owner_id, Some(user.id));

        // Token consumed
        assert!(store
            .validate_token(&claim, Subject::site(site.id), Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_claim_site_only_once() {
        let store = test_store().await;
        let alice = store.create_user("a@example.com", "pw").await.unwrap();
        let bob = store.create_user("b@example.com", "pw").await.unwrap();
        let site = store.create_site().await.unwrap();
        let first = store.create_token(Subject::site(site.id), None).await.unwrap();
        let second = store.create_token(Subject::site(site.id), None).await.unwrap();

        store.claim_site(&alice, site.id, &first).await.unwrap();
        assert!(matches!(
            store.claim_site(&bob, site.id, &second).await,
            Err(SecCtlError::Claim)
        ));
        assert_eq!(store.fetch_site(site.id).await.unwrap().owner_id, Some(alice.id));
        // Failed claim leaves the token alone
        store
            .validate_token(&second, Subject::site(site.id), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_claim_site_bad_tokens() {
        let store = test_store().await;
        let user = store.create_user("a@example.com", "pw").await.unwrap();
        let site = store.create_site().await.unwrap();
        let other = store.create_site().await.unwrap();

        let wrong_site = store.create_token(Subject::site(other.id), None).await.unwrap();
        let expired = store
            .create_token(Subject::site(site.id), Some(Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
        let user_token = store.create_token(Subject::user(site.id), None).await.unwrap();

        for token in [wrong_site.as_str(), expired.as_str(), user_token.as_str(), "garbage"] {
            assert!(matches!(
                store.claim_site(&user, site.id, token).await,
                Err(SecCtlError::Claim)
            ));
        }
        assert!(matches!(
            store.claim_site(&user, Uuid::new_v4(), &wrong_site).await,
            Err(SecCtlError::Claim)
        ));
        assert_eq!(store.fetch_site(site.id).await.unwrap().owner_id, None);
    }

    #[tokio::test]
    async fn test_concurrent_claims_one_winner() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        let token = store.create_token(Subject::site(site.id), None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            let token = token.clone();
            let user = store
                .create_user(&format!("u{i}@example.com"), "pw")
                .await
                .unwrap();
            handles.push(tokio::spawn(async move {
                store.claim_site(&user, site.id, &token).await.map(|_| user.id)
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Ok(id) = handle.await.unwrap() {
                winners.push(id);
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(store.fetch_site(site.id).await.unwrap().owner_id, Some(winners[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_distinct_tokens() {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", tmp.path().join("claims.db").display());
        let store = SqliteStore::connect(&url).await.unwrap();
        let site = store.create_site().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..2 {
            let store = store.clone();
            let user = store
                .create_user(&format!("claimer{i}@example.com"), "pw")
                .await
                .unwrap();
            let token = store.create_token(Subject::site(site.id), None).await.unwrap();
            handles.push(tokio::spawn(async move {
                store.claim_site(&user, site.id, &token).await.map(|_| user.id)
            }));
        }

        let mut winners = Vec::new();
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(id) => winners.push(id),
                Err(SecCtlError::Claim) => losers += 1,
                Err(e) => panic!("unexpected claim error: {e}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(losers, 1);
        assert_eq!(store.fetch_site(site.id).await.unwrap().owner_id, Some(winners[0]));
    }

    #[tokio::test]
    async fn test_sub_millisecond_expiry() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        let now = Utc::now();
        let expires = now + Duration::microseconds(500);
        let token = store
            .create_token(Subject::site(site.id), Some(expires))
            .await
            .unwrap();

        store
            .validate_token(&token, Subject::site(site.id), now)
            .await
            .unwrap();
        assert!(store
            .validate_token(&token, Subject::site(site.id), expires)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_version_1_expiries_migrated() {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        let mut tx = pool.begin().await.unwrap();
        create_tables(&mut tx).await.unwrap();
        tx.commit().await.unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        let site_id = Uuid::new_v4();
        let expires = Utc::now() + Duration::hours(1);
        sqlx::query("INSERT INTO sites (id) VALUES (?)")
            .bind(site_id.to_string())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO auth_tokens (token, subject_id, subject_kind, expires_at) VALUES ('old', ?, 'site', ?)",
        )
        .bind(site_id.to_string())
        .bind(expires.timestamp_millis())
        .execute(&pool)
        .await
        .unwrap();

        let store = SqliteStore::from_pool(pool).await.unwrap();
        store
            .validate_token("old", Subject::site(site_id), Utc::now())
            .await
            .unwrap();
        assert!(store
            .validate_token("old", Subject::site(site_id), expires)
            .await
            .is_err());
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_zero_limit_returns_all_events() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        for i in 0..3 {
            store
                .create_event(site.id, &Event::new(EventLevel::Info, format!("e{i}")))
                .await
                .unwrap();
        }
        assert_eq!(store.site_events(site.id, None, Some(0)).await.unwrap().len(), 3);
        let newest = store.site_events(site.id, None, Some(1)).await.unwrap();
        assert_eq!(
            store
                .site_events(site.id, Some(newest[0].id), Some(0))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_event_pagination() {
        let store = test_store().await;
        let site = store.create_site().await.unwrap();
        let other = store.create_site().await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let event = Event::new(EventLevel::Info, format!("e{i}"));
            ids.push(store.create_event(site.id, &event).await.unwrap().id);
        }
        store
            .create_event(other.id, &Event::new(EventLevel::Alarm, "x"))
            .await
            .unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let latest = store.site_events(site.id, None, Some(2)).await.unwrap();
        assert_eq!(latest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);
        assert_eq!(latest[0].decode().unwrap().code, "e4");

        let older = store
            .site_events(site.id, Some(ids[3]), Some(2))
            .await
            .unwrap();
        assert_eq!(older.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let all = store.site_events(site.id, None, None).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|e| e.site_id == site.id && e.level == "Info"));
    }
}

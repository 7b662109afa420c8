// MIT License - Copyright (c) 2026 Peter Wright
// Persistence gateway: users, sites, tokens and the site event log

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::Subject;
use crate::error::Result;
use crate::event::Event;

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: Uuid,
    /// Set once by a successful claim, never cleared.
    pub owner_id: Option<Uuid>,
    /// Last state snapshot reported by the site, as JSON.
    pub state_shadow: Option<String>,
}

/// One row of a site's append-only event log.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteEvent {
    /// Assigned by storage; strictly increasing.
    pub id: i64,
    pub site_id: Uuid,
    pub level: String,
    pub time: DateTime<Utc>,
    /// The reported [`Event`] as JSON.
    pub data: String,
}

impl SiteEvent {
    pub fn decode(&self) -> Result<Event> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Durable storage used by the registry and the listener.
///
/// Every failure is returned to the caller unchanged; nothing retries.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Create a user. Email addresses are unique.
    async fn create_user(&self, email: &str, password: &str) -> Result<User>;

    /// `Auth` unless the email exists and the password matches.
    async fn auth_user_by_password(&self, email: &str, password: &str) -> Result<User>;

    /// Issue a token bound to `subject`, valid until `expires_at` if given.
    async fn create_token(
        &self,
        subject: Subject,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String>;

    /// `Ok` iff a token exists for exactly this subject (id and kind) and
    /// has no expiry or expires strictly after `now`.
    async fn validate_token(&self, token: &str, subject: Subject, now: DateTime<Utc>)
    -> Result<()>;

    async fn auth_user_by_token(&self, token: &str) -> Result<User>;

    async fn auth_site_by_token(&self, token: &str) -> Result<Site>;

    /// Create an unowned site.
    async fn create_site(&self) -> Result<Site>;

    /// `NotFound` if no such site.
    async fn fetch_site(&self, site_id: Uuid) -> Result<Site>;

    /// Replace the stored state snapshot of a site.
    async fn update_site_state(&self, site_id: Uuid, state_json: &str) -> Result<()>;

    /// Make `user` the owner of an unowned site, consuming a claim token.
    ///
    /// Runs as one transaction. Fails with `Claim`, leaving the token in
    /// place, if the site doesn't exist, is already owned, or the token
    /// isn't a live token of that site.
    async fn claim_site(&self, user: &User, site_id: Uuid, claim_token: &str) -> Result<()>;

    /// Append an event to a site's log.
    async fn create_event(&self, site_id: Uuid, event: &Event) -> Result<SiteEvent>;

    /// Events of a site, newest first, optionally only those with an id
    /// below `before` and at most `limit` of them. A limit of 0 means no
    /// limit.
    async fn site_events(
        &self,
        site_id: Uuid,
        before: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<SiteEvent>>;
}

// MIT License - Copyright (c) 2026 Peter Wright
// Process-wide registry of live site connections

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::UserCommand;
use crate::connection::{ConnectionState, SiteConnection};
use crate::constants::{COMMAND_TTL, TOPIC_SITE_REMOVED, site_commands_topic, site_events_topic};
use crate::devices::SystemState;
use crate::error::{Result, SecCtlError};
use crate::event::Event;
use crate::relay::{CommandRelay, RelaySubscription};
use crate::store::{Site, SiteEvent, Store, User};
use crate::transport::{MessageReader, MessageWriter};

struct Inner {
    store: Arc<dyn Store>,
    relay: Arc<dyn CommandRelay>,
    sites: DashMap<Uuid, Arc<SiteConnection>>,
    /// Sites whose event topic this process already consumes.
    event_sites: DashSet<Uuid>,
    /// Tags this process's removal announcements.
    instance: Uuid,
    cancel: CancellationToken,
}

impl Inner {
    fn remove_local(&self, site_id: Uuid) -> bool {
        match self.sites.remove(&site_id) {
            Some((_, conn)) => {
                info!("Deregistered site {} (connection {})", site_id, conn.id());
                conn.close();
                true
            }
            None => false,
        }
    }
}

/// Tracks which sites are connected to this process and routes work to
/// them through the relay.
///
/// Commands are never written to a connection directly: they are published
/// on the site's command topic and picked up by whichever process holds
/// the live connection. Background tasks run until [`shutdown`] is called.
///
/// [`shutdown`]: SiteRegistry::shutdown
#[derive(Clone)]
pub struct SiteRegistry {
    inner: Arc<Inner>,
}

impl SiteRegistry {
    /// Create a registry and start listening for removals announced by
    /// other processes.
    pub async fn start(store: Arc<dyn Store>, relay: Arc<dyn CommandRelay>) -> Result<Self> {
        let removals = relay.subscribe(TOPIC_SITE_REMOVED).await?;
        let inner = Arc::new(Inner {
            store,
            relay,
            sites: DashMap::new(),
            event_sites: DashSet::new(),
            instance: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(removal_listener(inner.clone(), removals));
        Ok(Self { inner })
    }

    /// Start a connection for an authenticated site and make it the
    /// site's live connection, closing any connection it supersedes.
    pub async fn register<R, W>(
        &self,
        site_id: Uuid,
        reader: MessageReader<R>,
        writer: MessageWriter<W>,
    ) -> Result<Arc<SiteConnection>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.ensure_event_consumer(site_id).await?;

        let conn = SiteConnection::start(
            site_id,
            reader,
            writer,
            self.inner.relay.clone(),
            self.inner.store.clone(),
            &self.inner.cancel,
        );
        if let Some(old) = self.inner.sites.insert(site_id, conn.clone()) {
            warn!(
                "Site {} reconnected, closing superseded connection {}",
                site_id,
                old.id()
            );
            old.close();
        }
        info!("Registered site {} (connection {})", site_id, conn.id());

        tokio::spawn(deregister_on_close(
            self.inner.clone(),
            site_id,
            conn.id(),
            conn.watch_state(),
        ));
        Ok(conn)
    }

    async fn ensure_event_consumer(&self, site_id: Uuid) -> Result<()> {
        if !self.inner.event_sites.insert(site_id) {
            return Ok(());
        }
        match self.inner.relay.subscribe(&site_events_topic(&site_id)).await {
            Ok(sub) => {
                tokio::spawn(persist_events(self.inner.clone(), site_id, sub));
                Ok(())
            }
            Err(e) => {
                self.inner.event_sites.remove(&site_id);
                Err(e)
            }
        }
    }

    /// Drop the site's local connection, if any, and announce the removal
    /// to every other process.
    ///
    /// The announcement carries this registry's instance id so that its own
    /// listener ignores it and a connection registered in the meantime
    /// survives.
    pub async fn remove(&self, site_id: Uuid) -> Result<()> {
        self.inner.remove_local(site_id);
        let announcement = format!("{} {}", site_id.simple(), self.inner.instance.simple());
        self.inner
            .relay
            .publish(TOPIC_SITE_REMOVED, announcement.into_bytes(), None)
            .await
    }

    pub fn connected_site(&self, site_id: Uuid) -> Option<Arc<SiteConnection>> {
        self.inner.sites.get(&site_id).map(|c| c.value().clone())
    }

    pub fn is_connected(&self, site_id: Uuid) -> bool {
        self.inner.sites.contains_key(&site_id)
    }

    pub fn site_count(&self) -> usize {
        self.inner.sites.len()
    }

    /// Fetch a site on behalf of a user. Unowned sites are visible to
    /// everyone; owned ones only to their owner.
    pub async fn get_site(&self, user: &User, site_id: Uuid) -> Result<Site> {
        let site = self.inner.store.fetch_site(site_id).await?;
        match site.owner_id {
            Some(owner) if owner != user.id => Err(SecCtlError::Unauthorized),
            _ => Ok(site),
        }
    }

    /// Queue a command for the site. It expires if no connection picks it
    /// up in time.
    pub async fn send_command(&self, site_id: Uuid, cmd: &UserCommand) -> Result<()> {
        cmd.validate()?;
        let payload = serde_json::to_vec(cmd)?;
        debug!("Queueing {:?} for site {}", cmd.code, site_id);
        self.inner
            .relay
            .publish(&site_commands_topic(&site_id), payload, Some(COMMAND_TTL))
            .await
    }

    /// [`send_command`](Self::send_command) after checking the user may
    /// see the site.
    pub async fn send_user_command(
        &self,
        user: &User,
        site_id: Uuid,
        cmd: &UserCommand,
    ) -> Result<()> {
        self.get_site(user, site_id).await?;
        self.send_command(site_id, cmd).await
    }

    /// Newest events first. `max` of 0 returns them all.
    pub async fn latest_events(&self, site_id: Uuid, max: u32) -> Result<Vec<SiteEvent>> {
        self.inner
            .store
            .site_events(site_id, None, (max > 0).then_some(max))
            .await
    }

    /// The page of events older than the event with id `before`. `max` of 0
    /// returns all of them.
    pub async fn events_before(
        &self,
        site_id: Uuid,
        before: i64,
        max: u32,
    ) -> Result<Vec<SiteEvent>> {
        self.inner
            .store
            .site_events(site_id, Some(before), (max > 0).then_some(max))
            .await
    }

    /// State last reported by the site's live connection.
    pub async fn snapshot(&self, site_id: Uuid) -> Option<SystemState> {
        let conn = self.connected_site(site_id)?;
        conn.snapshot().await
    }

    /// Stop background tasks and close every connection.
    pub fn shutdown(&self) {
        info!("Shutting down registry with {} sites", self.site_count());
        self.inner.cancel.cancel();
        let conns: Vec<Arc<SiteConnection>> =
            self.inner.sites.iter().map(|c| c.value().clone()).collect();
        self.inner.sites.clear();
        for conn in conns {
            conn.close();
        }
    }
}

async fn removal_listener(inner: Arc<Inner>, mut sub: RelaySubscription) {
    loop {
        let payload = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            payload = sub.recv() => match payload {
                Some(payload) => payload,
                None => return,
            },
        };
        match parse_removal(&payload) {
            Some((site_id, Some(origin))) if origin == inner.instance => {
                debug!("Skipping own removal announcement for site {}", site_id);
            }
            Some((site_id, _)) => {
                if inner.remove_local(site_id) {
                    debug!("Removed site {} on announcement", site_id);
                }
            }
            None => warn!("Ignoring malformed site removal: {:?}", payload),
        }
    }
}

/// `<site id>[ <origin instance id>]`
fn parse_removal(payload: &[u8]) -> Option<(Uuid, Option<Uuid>)> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut parts = text.split_whitespace();
    let site_id = Uuid::parse_str(parts.next()?).ok()?;
    let origin = match parts.next() {
        Some(origin) => Some(Uuid::parse_str(origin).ok()?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((site_id, origin))
}

async fn persist_events(inner: Arc<Inner>, site_id: Uuid, mut sub: RelaySubscription) {
    loop {
        let payload = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            payload = sub.recv() => match payload {
                Some(payload) => payload,
                None => return,
            },
        };
        let event: Event = match serde_json::from_slice(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed event from site {}: {}", site_id, e);
                continue;
            }
        };
        if let Err(e) = inner.store.create_event(site_id, &event).await {
            error!("Failed to store event for site {}: {}", site_id, e);
        }
    }
}

/// Remove the entry once its connection closes, unless a newer connection
/// has taken its place.
async fn deregister_on_close(
    inner: Arc<Inner>,
    site_id: Uuid,
    conn_id: u64,
    mut state: watch::Receiver<ConnectionState>,
) {
    tokio::select! {
        _ = inner.cancel.cancelled() => return,
        _ = state.wait_for(|s| *s == ConnectionState::Closed) => {}
    }
    if inner
        .sites
        .remove_if(&site_id, |_, conn| conn.id() == conn_id)
        .is_some()
    {
        info!("Site {} disconnected (connection {})", site_id, conn_id);
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// One live site session: inbound state/events, outbound control and commands

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::UserCommand;
use crate::constants::{site_commands_topic, site_events_topic};
use crate::devices::SystemState;
use crate::error::{Result, SecCtlError};
use crate::message::{ControlMessage, SiteMessage};
use crate::relay::CommandRelay;
use crate::store::Store;
use crate::transport::{MessageReader, MessageWriter};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    /// Terminal. A reconnecting site gets a new [`SiteConnection`].
    Closed,
}

/// State shared between the handle and its tasks.
struct Shared {
    site_id: Uuid,
    id: u64,
    state: watch::Sender<ConnectionState>,
    snapshot: RwLock<Option<SystemState>>,
    cancel: CancellationToken,
}

impl Shared {
    fn close(&self, reason: &str) {
        let closed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Active {
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
        if closed {
            info!(
                "Site {} connection {} closed: {}",
                self.site_id, self.id, reason
            );
        }
        self.cancel.cancel();
    }
}

/// A live connection to one site.
///
/// Starting a connection spawns three tasks, all bound to one cancellation
/// token:
///
/// 1. the read loop, which keeps the state snapshot current and forwards
///    events to `site:<id>:events`;
/// 2. a one-shot request for the site's full state;
/// 3. the command loop, which forwards `site:<id>:commands` to the site.
///
/// Any transport failure or protocol violation closes the connection and
/// ends all three.
pub struct SiteConnection {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl SiteConnection {
    pub fn start<R, W>(
        site_id: Uuid,
        reader: MessageReader<R>,
        writer: MessageWriter<W>,
        relay: Arc<dyn CommandRelay>,
        store: Arc<dyn Store>,
        parent: &CancellationToken,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (state, _) = watch::channel(ConnectionState::Active);
        let shared = Arc::new(Shared {
            site_id,
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state,
            snapshot: RwLock::new(None),
            cancel: parent.child_token(),
        });
        info!("Site {} connection {} active", site_id, shared.id);

        let handles = vec![
            tokio::spawn(read_loop(
                shared.clone(),
                reader,
                writer.clone(),
                relay.clone(),
                store,
            )),
            tokio::spawn(request_state(shared.clone(), writer.clone())),
            tokio::spawn(command_loop(shared.clone(), writer, relay)),
        ];

        Arc::new(Self { shared, handles })
    }

    pub fn site_id(&self) -> Uuid {
        self.shared.site_id
    }

    /// Process-unique id of this connection instance.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Latest known state of the site, if it has reported any.
    pub async fn snapshot(&self) -> Option<SystemState> {
        self.shared.snapshot.read().await.clone()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.shared.close("closed locally");
    }
}

impl Drop for SiteConnection {
    fn drop(&mut self) {
        self.shared.close("handle dropped");
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SiteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteConnection")
            .field("site_id", &self.shared.site_id)
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop<R, W>(
    shared: Arc<Shared>,
    mut reader: MessageReader<R>,
    writer: MessageWriter<W>,
    relay: Arc<dyn CommandRelay>,
    store: Arc<dyn Store>,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let events_topic = site_events_topic(&shared.site_id);
    let reason = loop {
        let msg = tokio::select! {
            _ = shared.cancel.cancelled() => break None,
            msg = reader.next_message() => msg,
        };
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => break Some(e),
        };
        debug!("Site {} sent {}", shared.site_id, msg.kind());

        match msg {
            SiteMessage::SystemState(state) => {
                *shared.snapshot.write().await = Some(state.clone());
                persist_snapshot(&shared, store.as_ref(), &state).await;
            }
            SiteMessage::StateChange(change) => {
                let state = {
                    let mut snapshot = shared.snapshot.write().await;
                    let state = snapshot.get_or_insert_with(SystemState::default);
                    state.apply(change);
                    state.clone()
                };
                persist_snapshot(&shared, store.as_ref(), &state).await;
            }
            SiteMessage::Event(event) => match serde_json::to_vec(&event) {
                Ok(payload) => {
                    if let Err(e) = relay.publish(&events_topic, payload, None).await {
                        error!("Failed to publish event for site {}: {}", shared.site_id, e);
                    }
                }
                Err(e) => error!("Failed to serialize event: {}", e),
            },
            other @ (SiteMessage::Control(_) | SiteMessage::UserCommand(_)) => {
                break Some(SecCtlError::UnexpectedMessage { kind: other.kind() });
            }
        }
    };

    match reason {
        Some(e) if e.is_connection_fatal() => {
            warn!("Site {} read failed: {}", shared.site_id, e);
            shared.close(&e.to_string());
        }
        Some(e) => {
            error!("Site {} read loop stopped: {}", shared.site_id, e);
            shared.close(&e.to_string());
        }
        None => shared.close("cancelled"),
    }
    writer.shutdown().await;
}

async fn persist_snapshot(shared: &Shared, store: &dyn Store, state: &SystemState) {
    let json = match serde_json::to_string(state) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize state of site {}: {}", shared.site_id, e);
            return;
        }
    };
    if let Err(e) = store.update_site_state(shared.site_id, &json).await {
        warn!("Failed to store state of site {}: {}", shared.site_id, e);
    }
}

async fn request_state<W>(shared: Arc<Shared>, writer: MessageWriter<W>)
where
    W: AsyncWrite + Unpin + Send,
{
    let msg = SiteMessage::Control(ControlMessage::GetState);
    tokio::select! {
        _ = shared.cancel.cancelled() => {}
        result = writer.send(&msg) => {
            if let Err(e) = result {
                warn!("Failed to request state from site {}: {}", shared.site_id, e);
            }
        }
    }
}

async fn command_loop<W>(shared: Arc<Shared>, writer: MessageWriter<W>, relay: Arc<dyn CommandRelay>)
where
    W: AsyncWrite + Unpin + Send,
{
    let topic = site_commands_topic(&shared.site_id);
    let subscribed = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        sub = relay.subscribe(&topic) => sub,
    };
    let mut commands = match subscribed {
        Ok(sub) => sub,
        Err(e) => {
            error!("Failed to subscribe to {}: {}", topic, e);
            shared.close(&e.to_string());
            return;
        }
    };

    loop {
        let payload = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            payload = commands.recv() => payload,
        };
        let Some(payload) = payload else {
            shared.close("command relay closed");
            return;
        };
        let cmd: UserCommand = match serde_json::from_slice(&payload) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Skipping malformed command for site {}: {}", shared.site_id, e);
                continue;
            }
        };
        info!("Forwarding {:?} to site {}", cmd.code, shared.site_id);
        let sent = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            sent = send_command(&writer, cmd) => sent,
        };
        if let Err(e) = sent {
            shared.close(&e.to_string());
            return;
        }
    }
}

async fn send_command<W>(writer: &MessageWriter<W>, cmd: UserCommand) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    writer.send(&SiteMessage::UserCommand(cmd)).await
}

// MIT License - Copyright (c) 2026 Peter Wright
// TCP listener for site connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::SiteConnection;
use crate::error::{Result, SecCtlError};
use crate::message::parse_login;
use crate::registry::SiteRegistry;
use crate::store::Store;
use crate::transport::{MessageReader, MessageWriter};

/// Accepts site connections, authenticates them and hands them to the
/// registry.
pub struct SiteServer {
    listener: TcpListener,
    registry: SiteRegistry,
    store: Arc<dyn Store>,
    login_timeout: Duration,
}

impl SiteServer {
    pub async fn bind(
        addr: &str,
        registry: SiteRegistry,
        store: Arc<dyn Store>,
        login_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind site listener on {}: {}", addr, e);
            SecCtlError::Io(e)
        })?;
        info!("Listening for sites on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            registry,
            store,
            login_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Site listener stopping");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept site connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            debug!("Site connection from {}", peer);
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let (reader, writer) = stream.into_split();
            let registry = self.registry.clone();
            let store = self.store.clone();
            let login_timeout = self.login_timeout;
            tokio::spawn(async move {
                if let Err(e) = accept_site(
                    MessageReader::new(reader),
                    MessageWriter::new(writer),
                    &registry,
                    store.as_ref(),
                    login_timeout,
                )
                .await
                {
                    warn!("Rejected site connection from {}: {}", peer, e);
                }
            });
        }
    }
}

/// Run the login handshake on a fresh connection and register the site.
///
/// The first frame must be a login carrying a live site token. On any
/// failure the streams are dropped, closing the connection.
pub async fn accept_site<R, W>(
    mut reader: MessageReader<R>,
    writer: MessageWriter<W>,
    registry: &SiteRegistry,
    store: &dyn Store,
    login_timeout: Duration,
) -> Result<Arc<SiteConnection>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let frame = timeout(login_timeout, reader.next_frame())
        .await
        .map_err(|_| SecCtlError::Auth)??;
    let token = parse_login(&frame)?;
    let site = store.auth_site_by_token(&token).await?;
    info!("Site {} logged in", site.id);
    registry.register(site.id, reader, writer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Subject;
    use crate::message::{ControlMessage, SiteMessage, login_frame};
    use crate::protocol::Frame;
    use crate::relay::MemoryRelay;
    use crate::store::SqliteStore;
    use tokio::io::AsyncReadExt;

    async fn setup() -> (SiteRegistry, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = SiteRegistry::start(store.clone(), Arc::new(MemoryRelay::new()))
            .await
            .unwrap();
        (registry, store)
    }

    #[tokio::test]
    async fn test_login_registers_site() {
        let (registry, store) = setup().await;
        let site = store.create_site().await.unwrap();
        let token = store.create_token(Subject::site(site.id), None).await.unwrap();

        let (cloud, site_end) = tokio::io::duplex(4096);
        let (cloud_rd, cloud_wr) = tokio::io::split(cloud);
        let (site_rd, site_wr) = tokio::io::split(site_end);
        let site_tx = MessageWriter::new(site_wr);
        let mut site_rx = MessageReader::new(site_rd);
        site_tx.send_frame(&login_frame(&token)).await.unwrap();

        let conn = accept_site(
            MessageReader::new(cloud_rd),
            MessageWriter::new(cloud_wr),
            &registry,
            store.as_ref(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(conn.site_id(), site.id);
        assert!(registry.is_connected(site.id));
        assert_eq!(
            site_rx.next_message().await.unwrap(),
            SiteMessage::Control(ControlMessage::GetState)
        );
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let (registry, store) = setup().await;
        let (cloud, site_end) = tokio::io::duplex(4096);
        let (cloud_rd, cloud_wr) = tokio::io::split(cloud);
        let (_site_rd, site_wr) = tokio::io::split(site_end);
        MessageWriter::new(site_wr)
            .send_frame(&login_frame("nope"))
            .await
            .unwrap();

        let err = accept_site(
            MessageReader::new(cloud_rd),
            MessageWriter::new(cloud_wr),
            &registry,
            store.as_ref(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SecCtlError::Auth));
        assert_eq!(registry.site_count(), 0);
    }

    #[tokio::test]
    async fn test_first_frame_must_be_login() {
        let (registry, store) = setup().await;
        let (cloud, site_end) = tokio::io::duplex(4096);
        let (cloud_rd, cloud_wr) = tokio::io::split(cloud);
        let (_site_rd, site_wr) = tokio::io::split(site_end);
        MessageWriter::new(site_wr)
            .send_frame(&Frame::new(2, "{}"))
            .await
            .unwrap();

        let err = accept_site(
            MessageReader::new(cloud_rd),
            MessageWriter::new(cloud_wr),
            &registry,
            store.as_ref(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SecCtlError::Auth));
    }

    #[tokio::test]
    async fn test_silent_site_times_out() {
        let (registry, store) = setup().await;
        let (cloud, _site_end) = tokio::io::duplex(4096);
        let (cloud_rd, cloud_wr) = tokio::io::split(cloud);

        let err = accept_site(
            MessageReader::new(cloud_rd),
            MessageWriter::new(cloud_wr),
            &registry,
            store.as_ref(),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SecCtlError::Auth));
    }

    #[tokio::test]
    async fn test_listener_closes_rejected_socket() {
        let (registry, store) = setup().await;
        let server = SiteServer::bind("127.0.0.1:0", registry, store, Duration::from_secs(1))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(server.run(cancel.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut bytes = login_frame("bogus").encode().unwrap();
        bytes.extend_from_slice(b"\r\n");
        tokio::io::AsyncWriteExt::write_all(&mut stream, &bytes)
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}

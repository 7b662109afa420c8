// MIT License - Copyright (c) 2026 Peter Wright
// MQTT-backed relay for running several cloud processes against one broker

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{CommandRelay, RelaySubscription, SubscriptionSource};
use crate::constants::TOPIC_SITE_REMOVED;
use crate::error::{Result, SecCtlError};

/// Bytes of the expiry header prepended to every payload.
const EXPIRY_HEADER_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct MqttRelayOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Prepended to every relay topic, e.g. `sec-ctl`.
    pub topic_prefix: String,
    /// Shared-subscription group for work-queue topics. Without one every
    /// process receives every command and event.
    pub shared_group: Option<String>,
}

/// Local subscribers of one topic.
#[derive(Default)]
struct Route {
    senders: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    next: usize,
}

impl Route {
    /// Hand the message to the next live subscriber. Returns it back if
    /// there is none.
    fn dispatch(&mut self, mut body: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        self.senders.retain(|s| !s.is_closed());
        for _ in 0..self.senders.len() {
            let idx = self.next % self.senders.len();
            self.next = idx + 1;
            match self.senders[idx].send(body) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => body = returned,
            }
        }
        Err(body)
    }
}

/// Relay over an MQTT broker (QoS 1).
///
/// MQTT 3.1.1 has no message expiry, so each payload carries an 8-byte
/// big-endian expiry in epoch milliseconds (0 for none) and the receiving
/// side drops anything past it.
pub struct MqttRelay {
    client: AsyncClient,
    prefix: String,
    shared_group: Option<String>,
    routes: Arc<DashMap<String, Route>>,
    eventloop_handle: JoinHandle<()>,
}

impl MqttRelay {
    pub fn connect(opts: MqttRelayOptions) -> Self {
        info!(
            "Connecting relay to MQTT broker at {}:{}",
            opts.host, opts.port
        );
        let mut mqtt_opts = MqttOptions::new(&opts.client_id, &opts.host, opts.port);
        mqtt_opts.set_keep_alive(opts.keep_alive);
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        let routes: Arc<DashMap<String, Route>> = Arc::new(DashMap::new());
        let prefix = opts.topic_prefix.trim_end_matches('/').to_string();

        let loop_client = client.clone();
        let loop_routes = routes.clone();
        let loop_prefix = prefix.clone();
        let loop_group = opts.shared_group.clone();
        let eventloop_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a reconnect
                        let topics: Vec<String> =
                            loop_routes.iter().map(|r| r.key().clone()).collect();
                        info!("MQTT relay connected, subscribing to {} topics", topics.len());
                        for topic in topics {
                            let filter =
                                subscription_filter(&loop_prefix, loop_group.as_deref(), &topic);
                            if let Err(e) = loop_client.subscribe(&filter, QoS::AtLeastOnce).await {
                                error!("Failed to subscribe to {filter}: {e}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        let Some(topic) = strip_prefix(&loop_prefix, &msg.topic) else {
                            continue;
                        };
                        let body = match decode_payload(&msg.payload, Utc::now().timestamp_millis())
                        {
                            Some(body) => body,
                            None => {
                                debug!("Dropping expired or malformed message on {topic}");
                                continue;
                            }
                        };
                        let undelivered = match loop_routes.get_mut(topic) {
                            Some(mut route) => route.dispatch(body).is_err(),
                            None => true,
                        };
                        if undelivered {
                            warn!("No local subscriber for message on {topic}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT relay event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            prefix,
            shared_group: opts.shared_group,
            routes,
            eventloop_handle,
        }
    }

    fn full_topic(&self, topic: &str) -> String {
        full_topic(&self.prefix, topic)
    }
}

impl Drop for MqttRelay {
    fn drop(&mut self) {
        self.eventloop_handle.abort();
    }
}

#[async_trait]
impl CommandRelay for MqttRelay {
    async fn publish(&self, topic: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);
        self.client
            .publish(
                self.full_topic(topic),
                QoS::AtLeastOnce,
                false,
                encode_payload(&payload, expires_at),
            )
            .await
            .map_err(SecCtlError::relay)
    }

    async fn subscribe(&self, topic: &str) -> Result<RelaySubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let first = {
            let mut route = self.routes.entry(topic.to_string()).or_default();
            route.senders.retain(|s| !s.is_closed());
            route.senders.push(tx);
            route.senders.len() == 1
        };
        let filter = subscription_filter(&self.prefix, self.shared_group.as_deref(), topic);
        let source = MqttSource {
            rx,
            topic: topic.to_string(),
            filter: filter.clone(),
            client: self.client.clone(),
            routes: self.routes.clone(),
        };
        if first {
            debug!("MQTT relay subscribing to {filter}");
            self.client
                .subscribe(&filter, QoS::AtLeastOnce)
                .await
                .map_err(SecCtlError::relay)?;
        }
        Ok(RelaySubscription::new(topic, Box::new(source)))
    }
}

/// Drop the topic's route if none of its subscribers is left. Returns
/// whether it was dropped.
fn release_route(routes: &DashMap<String, Route>, topic: &str) -> bool {
    routes
        .remove_if(topic, |_, route| route.senders.iter().all(|s| s.is_closed()))
        .is_some()
}

struct MqttSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    topic: String,
    filter: String,
    client: AsyncClient,
    routes: Arc<DashMap<String, Route>>,
}

impl Drop for MqttSource {
    fn drop(&mut self) {
        self.rx.close();
        // Last local subscriber out leaves the broker subscription
        if release_route(&self.routes, &self.topic) {
            debug!("MQTT relay unsubscribing from {}", self.filter);
            if let Err(e) = self.client.try_unsubscribe(self.filter.as_str()) {
                warn!("Failed to unsubscribe from {}: {e}", self.filter);
            }
        }
    }
}

#[async_trait]
impl SubscriptionSource for MqttSource {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

fn full_topic(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}/{topic}")
    }
}

fn strip_prefix<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(topic);
    }
    topic.strip_prefix(prefix)?.strip_prefix('/')
}

/// Removal announcements go to every process; everything else is a work
/// queue shared by the group.
fn subscription_filter(prefix: &str, group: Option<&str>, topic: &str) -> String {
    let full = full_topic(prefix, topic);
    match group {
        Some(group) if topic != TOPIC_SITE_REMOVED => format!("$share/{group}/{full}"),
        _ => full,
    }
}

fn encode_payload(body: &[u8], expires_at_ms: Option<i64>) -> Vec<u8> {
    let expiry = expires_at_ms.map(|ms| ms.max(1) as u64).unwrap_or(0);
    let mut out = Vec::with_capacity(EXPIRY_HEADER_LEN + body.len());
    out.extend_from_slice(&expiry.to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Strip the expiry header. `None` if the message expired at or before
/// `now_ms` or is too short to carry a header.
fn decode_payload(payload: &[u8], now_ms: i64) -> Option<Vec<u8>> {
    if payload.len() < EXPIRY_HEADER_LEN {
        return None;
    }
    let (header, body) = payload.split_at(EXPIRY_HEADER_LEN);
    let mut expiry = [0u8; EXPIRY_HEADER_LEN];
    expiry.copy_from_slice(header);
    let expiry = u64::from_be_bytes(expiry);
    if expiry != 0 && expiry <= now_ms.max(0) as u64 {
        return None;
    }
    Some(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_expiry_header() {
        let enc = encode_payload(b"cmd", Some(1_000));
        assert_eq!(enc.len(), EXPIRY_HEADER_LEN + 3);
        assert_eq!(decode_payload(&enc, 999).unwrap(), b"cmd");
        assert!(decode_payload(&enc, 1_000).is_none());
        assert!(decode_payload(&enc, 5_000).is_none());
    }

    #[test]
    fn test_payload_without_expiry() {
        let enc = encode_payload(b"evt", None);
        assert_eq!(&enc[..EXPIRY_HEADER_LEN], &[0u8; 8]);
        assert_eq!(decode_payload(&enc, i64::MAX).unwrap(), b"evt");
    }

    #[test]
    fn test_short_payload_rejected() {
        assert!(decode_payload(b"abc", 0).is_none());
    }

    #[test]
    fn test_topics() {
        assert_eq!(full_topic("sec-ctl", "sites.removed"), "sec-ctl/sites.removed");
        assert_eq!(full_topic("", "sites.removed"), "sites.removed");
        assert_eq!(
            strip_prefix("sec-ctl", "sec-ctl/site:ab:commands"),
            Some("site:ab:commands")
        );
        assert_eq!(strip_prefix("sec-ctl", "other/site:ab:commands"), None);
        assert_eq!(strip_prefix("sec-ctl", "sec-ctlx/a"), None);
    }

    #[test]
    fn test_subscription_filter() {
        assert_eq!(
            subscription_filter("p", Some("cloud"), "site:ab:events"),
            "$share/cloud/p/site:ab:events"
        );
        assert_eq!(
            subscription_filter("p", Some("cloud"), TOPIC_SITE_REMOVED),
            "p/sites.removed"
        );
        assert_eq!(subscription_filter("p", None, "site:ab:events"), "p/site:ab:events");
    }

    #[test]
    fn test_route_round_robin() {
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let mut route = Route {
            senders: vec![tx1, tx2],
            next: 0,
        };
        route.dispatch(b"a".to_vec()).unwrap();
        route.dispatch(b"b".to_vec()).unwrap();
        route.dispatch(b"c".to_vec()).unwrap();
        assert_eq!(rx1.try_recv().unwrap(), b"a");
        assert_eq!(rx2.try_recv().unwrap(), b"b");
        assert_eq!(rx1.try_recv().unwrap(), b"c");
    }

    #[test]
    fn test_route_released_with_last_subscriber() {
        let routes: DashMap<String, Route> = DashMap::new();
        let (tx1, rx1) = mpsc::unbounded_channel::<Vec<u8>>();
        let (tx2, mut rx2) = mpsc::unbounded_channel::<Vec<u8>>();
        routes.insert(
            "site:ab:commands".to_string(),
            Route {
                senders: vec![tx1, tx2],
                next: 0,
            },
        );

        drop(rx1);
        assert!(!release_route(&routes, "site:ab:commands"));
        assert!(routes.contains_key("site:ab:commands"));

        rx2.close();
        assert!(release_route(&routes, "site:ab:commands"));
        assert!(routes.is_empty());
        assert!(!release_route(&routes, "site:ab:commands"));
    }

    #[test]
    fn test_route_skips_closed_subscribers() {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let mut route = Route {
            senders: vec![tx1, tx2],
            next: 0,
        };
        drop(rx1);
        route.dispatch(b"a".to_vec()).unwrap();
        assert_eq!(rx2.try_recv().unwrap(), b"a");
        assert_eq!(route.senders.len(), 1);

        drop(rx2);
        assert_eq!(route.dispatch(b"b".to_vec()), Err(b"b".to_vec()));
    }
}

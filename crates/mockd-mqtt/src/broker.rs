//! The embedded MQTT broker
//!
//! One broker per bound port. Incoming publishes are routed to matching
//! subscribers with the QoS downgraded to `min(publish, subscription)`,
//! retained messages are delivered to new subscriptions before any live
//! traffic on the same topic, and publishes that match an MQTT mock trigger
//! that mock's canned response publish. QoS 2 handshakes are accepted but
//! delivery is at-least-once.

use crate::codec::{read_packet, Packet, ProtocolError};
use crate::topics::TopicTree;
use mockd_core::dispatch::{dispatch, DispatchOutcome};
use mockd_core::model::{MockSpec, MqttAclRule, MqttPublishSpec};
use mockd_core::template::{render_str, TemplateContext};
use mockd_core::{
    Error, Mock, Protocol, RequestLogEntry, RequestSnapshot, ResponseRecord, Result, Stores,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Broker bind settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

impl BrokerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port,
        }
    }
}

type ClientSender = mpsc::UnboundedSender<Packet>;

/// One broker instance bound to one port
pub struct MqttBroker {
    config: BrokerConfig,
    stores: Arc<Stores>,
    topics: RwLock<TopicTree>,
    clients: RwLock<HashMap<String, ClientSender>>,
    /// MQTT mocks merged onto this port
    mocks: RwLock<Vec<Arc<Mock>>>,
    shutdown: watch::Sender<bool>,
    /// Simulator tasks keyed by their mock id; stopped on removal and on
    /// shutdown, outside the broker's own locks
    simulators: Mutex<Vec<(String, JoinHandle<()>)>>,
    next_packet_id: AtomicU32,
}

impl MqttBroker {
    pub fn new(config: BrokerConfig, stores: Arc<Stores>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            stores,
            topics: RwLock::new(TopicTree::new()),
            clients: RwLock::new(HashMap::new()),
            mocks: RwLock::new(Vec::new()),
            shutdown,
            simulators: Mutex::new(Vec::new()),
            next_packet_id: AtomicU32::new(1),
        })
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Attach a mock to this broker: seed its retained messages and start
    /// its simulator, if declared.
    pub async fn add_mock(self: &Arc<Self>, mock: Arc<Mock>) {
        let MockSpec::Mqtt(spec) = &mock.spec else {
            return;
        };
        {
            let mut topics = self.topics.write().await;
            for retained in &spec.retained {
                let payload = static_payload(&retained.payload);
                topics.retain(&retained.topic, payload.as_bytes(), retained.qos.min(2));
            }
        }
        if let Some(simulator) = spec.simulator.clone() {
            let broker = Arc::clone(self);
            let mut shutdown_rx = self.shutdown.subscribe();
            let handle = tokio::spawn(async move {
                let mut sent: u64 = 0;
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_millis(simulator.interval_ms.max(1)));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let payload = static_payload(&simulator.payload);
                            broker
                                .deliver(&simulator.topic, payload.as_bytes(), simulator.qos.min(2), simulator.retain, false)
                                .await;
                            sent += 1;
                            if simulator.max_messages.is_some_and(|max| sent >= max) {
                                break;
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }
            });
            self.simulators.lock().await.push((mock.id.clone(), handle));
        }
        self.mocks.write().await.push(mock);
    }

    pub async fn remove_mock(&self, mock_id: &str) {
        self.mocks.write().await.retain(|m| m.id != mock_id);
        let mut simulators = self.simulators.lock().await;
        simulators.retain(|(id, handle)| {
            if id == mock_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub async fn mock_count(&self) -> usize {
        self.mocks.read().await.len()
    }

    /// Bind the listener and start accepting. Bind failures surface to the
    /// caller so the engine can roll back.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::listener(format!("mqtt bind {addr}: {e}")))?;
        info!(%addr, "mqtt broker listening");

        let broker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(%peer, "mqtt client connected");
                                let broker = Arc::clone(&broker);
                                tokio::spawn(async move {
                                    broker.handle_connection(stream).await;
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "mqtt accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("mqtt broker stopping");
                        break;
                    }
                }
            }
        }))
    }

    /// Stop the broker. Simulators are joined here, outside the broker's
    /// own locks: a simulator callback re-enters the broker to publish.
    pub async fn stop(&self) {
        let handles = {
            let mut simulators = self.simulators.lock().await;
            std::mem::take(&mut *simulators)
        };
        let _ = self.shutdown.send(true);
        for (_, handle) in handles {
            handle.abort();
        }
        self.clients.write().await.clear();
    }

    fn alloc_packet_id(&self) -> u16 {
        let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed) % (u16::MAX as u32);
        (id + 1) as u16
    }

    /// Handle one client connection; generic over the stream so tests can
    /// drive an in-memory duplex.
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        // Session starts with CONNECT
        let (client_id, will) = match read_packet(&mut reader).await {
            Ok(Packet::Connect {
                client_id, will, ..
            }) => {
                let client_id = if client_id.is_empty() {
                    format!("mockd-{}", uuid::Uuid::new_v4().simple())
                } else {
                    client_id
                };
                (client_id, will)
            }
            Ok(other) => {
                warn!(?other, "first packet was not CONNECT, closing");
                return;
            }
            Err(_) => return,
        };

        let connack = Packet::ConnAck {
            session_present: false,
            code: 0,
        };
        if writer.write_all(&connack.encode()).await.is_err() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        self.clients
            .write()
            .await
            .insert(client_id.clone(), tx.clone());
        info!(%client_id, "mqtt session established");

        // Writer task drains the per-client queue
        let mut shutdown_rx = self.shutdown.subscribe();
        let writer_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    packet = rx.recv() => {
                        let Some(packet) = packet else { break };
                        if writer.write_all(&packet.encode()).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut clean_disconnect = false;
        let mut reader_shutdown = self.shutdown.subscribe();
        loop {
            let packet = tokio::select! {
                packet = read_packet(&mut reader) => packet,
                _ = reader_shutdown.changed() => break,
            };
            match packet {
                Ok(Packet::Publish {
                    qos,
                    retain,
                    topic,
                    packet_id,
                    payload,
                    ..
                }) => {
                    match qos {
                        1 => {
                            let _ = tx.send(Packet::PubAck(packet_id.unwrap_or(0)));
                        }
                        2 => {
                            // Accept the handshake; delivery stays
                            // at-least-once
                            let _ = tx.send(Packet::PubRec(packet_id.unwrap_or(0)));
                        }
                        _ => {}
                    }
                    self.incoming_publish(&client_id, &topic, &payload, qos, retain)
                        .await;
                }
                Ok(Packet::PubRel(id)) => {
                    let _ = tx.send(Packet::PubComp(id));
                }
                Ok(Packet::Subscribe { packet_id, filters }) => {
                    self.subscribe(&client_id, &tx, packet_id, filters).await;
                }
                Ok(Packet::Unsubscribe { packet_id, filters }) => {
                    let mut topics = self.topics.write().await;
                    for filter in &filters {
                        topics.unsubscribe(filter, &client_id);
                    }
                    drop(topics);
                    let _ = tx.send(Packet::UnsubAck(packet_id));
                }
                Ok(Packet::PingReq) => {
                    let _ = tx.send(Packet::PingResp);
                }
                Ok(Packet::Disconnect) => {
                    clean_disconnect = true;
                    break;
                }
                Ok(Packet::PubAck(_) | Packet::PubRec(_) | Packet::PubComp(_)) => {}
                Ok(other) => {
                    debug!(?other, "ignoring unexpected packet");
                }
                Err(ProtocolError::ConnectionClosed) => break,
                Err(e) => {
                    warn!(%client_id, error = %e, "mqtt protocol error, closing");
                    break;
                }
            }
        }

        // Teardown: drop subscriptions, then the will for abnormal exits
        self.clients.write().await.remove(&client_id);
        self.topics.write().await.remove_client(&client_id);
        if !clean_disconnect {
            if let Some(will) = will {
                self.deliver(&will.topic, &will.payload, will.qos.min(2), will.retain, true)
                    .await;
            }
        }
        writer_task.abort();
        debug!(%client_id, "mqtt session closed");
    }

    async fn subscribe(
        &self,
        client_id: &str,
        tx: &ClientSender,
        packet_id: u16,
        filters: Vec<(String, u8)>,
    ) {
        let acl = self.acl_rules().await;
        let mut codes = Vec::with_capacity(filters.len());

        // Registration, SUBACK and retained delivery happen under the
        // topics write lock: a concurrent live publish can only enqueue
        // after it, so the retained message is observed first.
        let mut topics = self.topics.write().await;
        let mut retained_out = Vec::new();
        for (filter, requested_qos) in &filters {
            let qos = (*requested_qos).min(2);
            if mockd_core::matching::mqtt::validate_filter(filter).is_err()
                || !acl_allows(&acl, client_id, filter, AclOp::Subscribe)
            {
                codes.push(0x80);
                continue;
            }
            topics.subscribe(filter, client_id, qos);
            codes.push(qos);
            for (topic, message) in topics.retained_for(filter) {
                retained_out.push(Packet::Publish {
                    dup: false,
                    qos: message.qos.min(qos),
                    retain: true,
                    topic,
                    packet_id: (message.qos.min(qos) > 0).then(|| self.alloc_packet_id()),
                    payload: message.payload,
                });
            }
        }
        let _ = tx.send(Packet::SubAck { packet_id, codes });
        for packet in retained_out {
            let _ = tx.send(packet);
        }
        drop(topics);
    }

    /// A publish arriving from a client: route, then run the mock pipeline
    async fn incoming_publish(
        self: &Arc<Self>,
        client_id: &str,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) {
        let acl = self.acl_rules().await;
        if !acl_allows(&acl, client_id, topic, AclOp::Publish) {
            warn!(%client_id, topic, "publish denied by ACL");
            return;
        }
        self.deliver(topic, payload, qos, retain, true).await;
    }

    /// Route a publish to matching subscribers; optionally feed the mock
    /// pipeline (broker-origin publishes skip it to avoid loops).
    pub async fn deliver(
        self: &Arc<Self>,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        trigger_mocks: bool,
    ) {
        if retain {
            self.topics.write().await.retain(topic, payload, qos);
        }

        let subscribers = self.topics.read().await.subscribers_matching(topic);
        if !subscribers.is_empty() {
            let clients = self.clients.read().await;
            for subscription in subscribers {
                let Some(tx) = clients.get(&subscription.client_id) else {
                    continue;
                };
                // Downgrade to min(publish QoS, subscription QoS)
                let effective = qos.min(subscription.qos);
                let _ = tx.send(Packet::Publish {
                    dup: false,
                    qos: effective,
                    retain: false,
                    topic: topic.to_string(),
                    packet_id: (effective > 0).then(|| self.alloc_packet_id()),
                    payload: payload.to_vec(),
                });
            }
        }

        if trigger_mocks {
            self.run_mock_pipeline(topic, payload).await;
        }
    }

    async fn run_mock_pipeline(self: &Arc<Self>, topic: &str, payload: &[u8]) {
        let started = std::time::Instant::now();
        let snapshot = RequestSnapshot::new(Protocol::Mqtt, "PUBLISH", topic)
            .with_body(payload.to_vec());
        let mocks = self.mocks.read().await.clone();
        let outcome = dispatch(&mocks, &snapshot);

        match outcome {
            DispatchOutcome::Matched(hit) => {
                self.stores.verification.record(&hit.mock.id, &snapshot).await;
                let MockSpec::Mqtt(spec) = &hit.mock.spec else {
                    return;
                };
                let mut record = ResponseRecord::new(200);
                if let Some(response) = &spec.response {
                    match self.stores.chaos.decide(topic).await.action {
                        mockd_core::ChaosAction::None => {
                            let published =
                                self.publish_response(&snapshot, &hit.mock.id, response).await;
                            record = ResponseRecord::new(200).with_body(&published);
                        }
                        injected => {
                            debug!(topic, ?injected, "chaos suppressed mqtt response");
                            record = ResponseRecord::new(503);
                        }
                    }
                }
                self.stores
                    .request_log
                    .push(
                        RequestLogEntry::new(snapshot)
                            .matched(&hit.mock.id)
                            .with_response(record)
                            .with_elapsed_ms(started.elapsed().as_millis() as u64),
                    )
                    .await;
            }
            DispatchOutcome::NoMatch { near_misses } => {
                self.stores
                    .request_log
                    .push(
                        RequestLogEntry::new(snapshot)
                            .with_near_misses(near_misses)
                            .with_elapsed_ms(started.elapsed().as_millis() as u64),
                    )
                    .await;
            }
        }
    }

    async fn publish_response(
        self: &Arc<Self>,
        snapshot: &RequestSnapshot,
        mock_id: &str,
        response: &MqttPublishSpec,
    ) -> String {
        let ctx = TemplateContext::for_request(snapshot, mock_id)
            .with_sequences(&self.stores.sequences)
            .with_state(&self.stores.state);
        let topic = render_str(&response.topic, &ctx).await;
        let payload = match &response.payload {
            serde_json::Value::String(s) => render_str(s, &ctx).await,
            other => {
                let rendered = mockd_core::template::render_json(other, &ctx).await;
                rendered.to_string()
            }
        };
        Box::pin(self.deliver(&topic, payload.as_bytes(), response.qos.min(2), response.retain, false))
            .await;
        payload
    }

    async fn acl_rules(&self) -> Vec<MqttAclRule> {
        let mocks = self.mocks.read().await;
        mocks
            .iter()
            .filter_map(|mock| match &mock.spec {
                MockSpec::Mqtt(spec) => Some(spec.acl.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum AclOp {
    Publish,
    Subscribe,
}

/// Default allow: a topic is denied only if a covering rule disallows the
/// operation for this client.
fn acl_allows(rules: &[MqttAclRule], client_id: &str, topic_or_filter: &str, op: AclOp) -> bool {
    use mockd_core::matching::mqtt::topic_matches;
    for rule in rules {
        let client_applies = match &rule.client_id {
            None => true,
            Some(pattern) if pattern == "*" => true,
            Some(pattern) => pattern == client_id,
        };
        if !client_applies {
            continue;
        }
        let topic_applies = topic_matches(&rule.topic, topic_or_filter)
            || rule.topic == topic_or_filter;
        if !topic_applies {
            continue;
        }
        let allowed = match op {
            AclOp::Publish => rule.allow_publish,
            AclOp::Subscribe => rule.allow_subscribe,
        };
        if !allowed {
            return false;
        }
    }
    true
}

fn static_payload(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::model::MqttMockSpec;
    use mockd_core::MockdConfig;
    use tokio::io::AsyncReadExt;

    async fn test_broker() -> Arc<MqttBroker> {
        let stores = Stores::from_config(&MockdConfig::default())
            .await
            .expect("stores");
        MqttBroker::new(BrokerConfig::new(1883), stores)
    }

    fn mqtt_mock(topic: &str, response: Option<MqttPublishSpec>) -> Arc<Mock> {
        let mut mock = Mock {
            id: String::new(),
            name: String::new(),
            enabled: true,
            priority: 0,
            workspace: None,
            spec: MockSpec::Mqtt(MqttMockSpec {
                port: None,
                topic: topic.to_string(),
                response,
                retained: Vec::new(),
                simulator: None,
                acl: Vec::new(),
            }),
            insertion_index: 0,
        };
        mock.fill_defaults();
        Arc::new(mock)
    }

    /// Drive the broker through an in-memory stream: returns the client
    /// half for writing packets and reading broker output.
    async fn connect(broker: &Arc<MqttBroker>, client_id: &str) -> tokio::io::DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let broker = Arc::clone(broker);
        tokio::spawn(async move {
            broker.handle_connection(server).await;
        });
        let mut client = client;
        let connect = Packet::Connect {
            client_id: client_id.to_string(),
            clean_session: true,
            keep_alive: 30,
            will: None,
            username: None,
            password: None,
        };
        client.write_all(&connect.encode()).await.expect("connect");
        let connack = read_packet(&mut client).await.expect("connack");
        assert!(matches!(connack, Packet::ConnAck { code: 0, .. }));
        client
    }

    #[tokio::test]
    async fn retained_message_arrives_before_live_traffic() {
        let broker = test_broker().await;

        // Publisher stores a retained message
        let mut publisher = connect(&broker, "pub").await;
        let publish = Packet::Publish {
            dup: false,
            qos: 0,
            retain: true,
            topic: "devices/status".to_string(),
            packet_id: None,
            payload: b"online".to_vec(),
        };
        publisher.write_all(&publish.encode()).await.expect("publish");
        // Allow the broker task to process
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Subscriber joins later and must see the retained message first
        let mut subscriber = connect(&broker, "sub").await;
        let subscribe = Packet::Subscribe {
            packet_id: 1,
            filters: vec![("devices/#".to_string(), 0)],
        };
        subscriber.write_all(&subscribe.encode()).await.expect("subscribe");

        let suback = read_packet(&mut subscriber).await.expect("suback");
        assert!(matches!(suback, Packet::SubAck { .. }));
        let first = read_packet(&mut subscriber).await.expect("retained");
        match first {
            Packet::Publish { topic, payload, retain, .. } => {
                assert_eq!(topic, "devices/status");
                assert_eq!(payload, b"online");
                assert!(retain);
            }
            other => panic!("expected retained publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn qos_downgrades_to_min_of_pub_and_sub() {
        let broker = test_broker().await;
        let mut subscriber = connect(&broker, "sub").await;
        subscriber
            .write_all(
                &Packet::Subscribe {
                    packet_id: 1,
                    filters: vec![("metrics/#".to_string(), 1)],
                }
                .encode(),
            )
            .await
            .expect("subscribe");
        let _ = read_packet(&mut subscriber).await.expect("suback");

        let mut publisher = connect(&broker, "pub").await;
        publisher
            .write_all(
                &Packet::Publish {
                    dup: false,
                    qos: 2,
                    retain: false,
                    topic: "metrics/cpu".to_string(),
                    packet_id: Some(9),
                    payload: b"42".to_vec(),
                }
                .encode(),
            )
            .await
            .expect("publish");
        let _pubrec = read_packet(&mut publisher).await.expect("pubrec");

        let delivered = read_packet(&mut subscriber).await.expect("delivery");
        match delivered {
            Packet::Publish { qos, .. } => assert_eq!(qos, 1),
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_response_publish() {
        let broker = test_broker().await;
        broker
            .add_mock(mqtt_mock(
                "devices/+/ping",
                Some(MqttPublishSpec {
                    topic: "devices/pong".to_string(),
                    payload: serde_json::json!("pong from {{request.path}}"),
                    qos: 0,
                    retain: false,
                }),
            ))
            .await;

        let mut subscriber = connect(&broker, "sub").await;
        subscriber
            .write_all(
                &Packet::Subscribe {
                    packet_id: 1,
                    filters: vec![("devices/pong".to_string(), 0)],
                }
                .encode(),
            )
            .await
            .expect("subscribe");
        let _ = read_packet(&mut subscriber).await.expect("suback");

        let mut publisher = connect(&broker, "dev").await;
        publisher
            .write_all(
                &Packet::Publish {
                    dup: false,
                    qos: 0,
                    retain: false,
                    topic: "devices/thermostat/ping".to_string(),
                    packet_id: None,
                    payload: b"hi".to_vec(),
                }
                .encode(),
            )
            .await
            .expect("publish");

        let delivered = read_packet(&mut subscriber).await.expect("mock response");
        match delivered {
            Packet::Publish { topic, payload, .. } => {
                assert_eq!(topic, "devices/pong");
                assert_eq!(payload, b"pong from devices/thermostat/ping");
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn acl_denies_subscription_with_0x80() {
        let broker = test_broker().await;
        let mut denied = mqtt_mock("any", None);
        {
            let mock = Arc::get_mut(&mut denied).expect("unshared");
            if let MockSpec::Mqtt(spec) = &mut mock.spec {
                spec.acl.push(MqttAclRule {
                    client_id: Some("intruder".to_string()),
                    topic: "secret/#".to_string(),
                    allow_publish: true,
                    allow_subscribe: false,
                });
            }
        }
        broker.add_mock(denied).await;

        let mut client = connect(&broker, "intruder").await;
        client
            .write_all(
                &Packet::Subscribe {
                    packet_id: 4,
                    filters: vec![("secret/keys".to_string(), 0)],
                }
                .encode(),
            )
            .await
            .expect("subscribe");
        let suback = read_packet(&mut client).await.expect("suback");
        match suback {
            Packet::SubAck { codes, .. } => assert_eq!(codes, vec![0x80]),
            other => panic!("expected suback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_and_clean_disconnect() {
        let broker = test_broker().await;
        let mut client = connect(&broker, "c").await;
        client
            .write_all(&Packet::PingReq.encode())
            .await
            .expect("ping");
        let pong = read_packet(&mut client).await.expect("pingresp");
        assert_eq!(pong, Packet::PingResp);
        client
            .write_all(&Packet::Disconnect.encode())
            .await
            .expect("disconnect");
        // Read returns closed once the broker tears the session down
        let mut buf = [0u8; 1];
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
}

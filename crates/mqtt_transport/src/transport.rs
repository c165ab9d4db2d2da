//! MqttTransport - rumqttc client handle plus one event loop task
//!
//! The event loop owns the socket. Acknowledged operations are serialized by
//! `op_lock`, so at most one `PendingAck` exists and the next outgoing packet
//! of the matching kind carries its packet id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{topic_matches, ContractError, InboundMessage, MessageCallback, QoS, Transport};
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, SubscribeReasonCode};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::settings::MqttSettings;

type AckResult = Result<(), String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Closed,
    Connecting,
    Connected,
    Failed(String),
}

/// Operation waiting for the server
#[derive(Debug, Clone, Copy, PartialEq)]
enum AckKind {
    Publish(rumqttc::QoS),
    Subscribe,
    Unsubscribe,
}

impl AckKind {
    fn operation(&self) -> &'static str {
        match self {
            AckKind::Publish(_) => "publish",
            AckKind::Subscribe => "subscribe",
            AckKind::Unsubscribe => "unsubscribe",
        }
    }

    /// Packet id if `outgoing` is the packet this operation sent
    fn sent_as(&self, outgoing: &Outgoing) -> Option<u16> {
        match (self, outgoing) {
            (AckKind::Publish(_), Outgoing::Publish(pkid))
            | (AckKind::Subscribe, Outgoing::Subscribe(pkid))
            | (AckKind::Unsubscribe, Outgoing::Unsubscribe(pkid)) => Some(*pkid),
            _ => None,
        }
    }
}

struct PendingAck {
    kind: AckKind,
    pkid: Option<u16>,
    done: oneshot::Sender<AckResult>,
}

struct Subscription {
    qos: QoS,
    callback: MessageCallback,
}

/// State shared between the transport handle and the event loop
struct Shared {
    subscriptions: Mutex<HashMap<String, Subscription>>,
    pending: Mutex<Option<PendingAck>>,
    state: watch::Sender<LinkState>,
    stopping: AtomicBool,
}

struct Link {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// MQTT transport
pub struct MqttTransport {
    settings: MqttSettings,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
    op_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            settings,
            shared: Arc::new(Shared {
                subscriptions: Mutex::new(HashMap::new()),
                pending: Mutex::new(None),
                state,
                stopping: AtomicBool::new(false),
            }),
            link: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.state.borrow() == LinkState::Connected
    }

    fn client(&self) -> Result<AsyncClient, ContractError> {
        lock(&self.link)
            .as_ref()
            .map(|link| link.client.clone())
            .ok_or_else(|| ContractError::TransportConnection {
                message: "not connected".into(),
            })
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    async fn wait_ack(
        &self,
        ack: oneshot::Receiver<AckResult>,
        kind: AckKind,
        target: &str,
    ) -> Result<(), ContractError> {
        let outcome = match tokio::time::timeout(self.settings.ack_timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("acknowledgement dropped".to_string()),
            Err(_) => {
                self.shared.abandon();
                Err(format!(
                    "no acknowledgement within {:?}",
                    self.settings.ack_timeout
                ))
            }
        };
        outcome.map_err(|message| ContractError::transport_ack(kind.operation(), target, message))
    }
}

impl Shared {
    /// Register the next acknowledged operation
    fn begin(&self, kind: AckKind) -> oneshot::Receiver<AckResult> {
        let (done, ack) = oneshot::channel();
        let stale = lock(&self.pending).replace(PendingAck {
            kind,
            pkid: None,
            done,
        });
        if let Some(stale) = stale {
            let _ = stale.done.send(Err("superseded".into()));
        }
        ack
    }

    fn abandon(&self) {
        lock(&self.pending).take();
    }

    fn fail_pending(&self, message: &str) {
        let pending = lock(&self.pending).take();
        if let Some(pending) = pending {
            let _ = pending.done.send(Err(message.to_string()));
        }
    }

    fn complete(&self, kind: AckKind, pkid: u16, result: AckResult) {
        let mut pending = lock(&self.pending);
        let matches = pending
            .as_ref()
            .is_some_and(|p| p.kind == kind && p.pkid == Some(pkid));
        if matches {
            if let Some(p) = pending.take() {
                let _ = p.done.send(result);
            }
        }
    }

    fn on_outgoing(&self, outgoing: &Outgoing) {
        let mut pending = lock(&self.pending);
        let Some(p) = pending.as_mut() else {
            return;
        };
        if p.pkid.is_some() {
            return;
        }
        let Some(pkid) = p.kind.sent_as(outgoing) else {
            return;
        };

        // QoS 0 gets no acknowledgement, leaving the socket is all there is
        if p.kind == AckKind::Publish(rumqttc::QoS::AtMostOnce) {
            if let Some(p) = pending.take() {
                let _ = p.done.send(Ok(()));
            }
        } else {
            p.pkid = Some(pkid);
        }
    }

    fn on_incoming(&self, packet: Packet, client: &AsyncClient, reconnected: &mut bool) {
        match packet {
            Packet::ConnAck(ack) => {
                info!(session_present = ack.session_present, "MQTT connected");
                if *reconnected {
                    self.resubscribe(client);
                }
                *reconnected = true;
                self.state.send_replace(LinkState::Connected);
            }
            Packet::Publish(publish) => self.deliver(publish.topic, publish.payload),
            Packet::PubAck(ack) => {
                self.complete(AckKind::Publish(rumqttc::QoS::AtLeastOnce), ack.pkid, Ok(()))
            }
            Packet::PubComp(comp) => {
                self.complete(AckKind::Publish(rumqttc::QoS::ExactlyOnce), comp.pkid, Ok(()))
            }
            Packet::SubAck(ack) => {
                let refused = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if refused {
                    Err("subscription refused by server".to_string())
                } else {
                    Ok(())
                };
                self.complete(AckKind::Subscribe, ack.pkid, result);
            }
            Packet::UnsubAck(ack) => self.complete(AckKind::Unsubscribe, ack.pkid, Ok(())),
            other => trace!(packet = ?other, "MQTT packet ignored"),
        }
    }

    /// Hand an inbound message to every matching subscription, in arrival order
    fn deliver(&self, topic: String, payload: Bytes) {
        let callbacks: Vec<MessageCallback> = lock(&self.subscriptions)
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &topic))
            .map(|(_, subscription)| Arc::clone(&subscription.callback))
            .collect();

        if callbacks.is_empty() {
            debug!(topic = %topic, "No subscription for inbound message");
            return;
        }
        for callback in &callbacks {
            callback(InboundMessage::new(topic.clone(), payload.clone()));
        }
    }

    /// Clean sessions lose subscriptions on reconnect
    fn resubscribe(&self, client: &AsyncClient) {
        for (filter, subscription) in lock(&self.subscriptions).iter() {
            if let Err(e) = client.try_subscribe(filter.clone(), mqtt_qos(subscription.qos)) {
                warn!(filter = %filter, error = %e, "Resubscribe failed");
            }
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    reconnect_delay: Duration,
) {
    let mut reconnected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(packet)) => shared.on_incoming(packet, &client, &mut reconnected),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(Event::Outgoing(outgoing)) => shared.on_outgoing(&outgoing),
            Err(e) => {
                shared.fail_pending(&format!("connection error: {e}"));
                if shared.stopping.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "MQTT connection error, retrying");
                shared.state.send_replace(LinkState::Failed(e.to_string()));
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }

    shared.state.send_replace(LinkState::Closed);
    debug!("MQTT event loop stopped");
}

impl Transport for MqttTransport {
    #[instrument(name = "mqtt_connect", skip(self), fields(endpoint = %self.endpoint(), client_id = %self.settings.client_id))]
    async fn connect(&self) -> Result<(), ContractError> {
        if lock(&self.link).is_some() {
            return Ok(());
        }

        let (client, eventloop) =
            AsyncClient::new(self.settings.mqtt_options(), self.settings.request_capacity);
        self.shared.stopping.store(false, Ordering::SeqCst);
        self.shared.state.send_replace(LinkState::Connecting);
        let mut state = self.shared.state.subscribe();

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            Arc::clone(&self.shared),
            self.settings.reconnect_delay,
        ));

        let settled = tokio::time::timeout(
            self.settings.connect_timeout,
            state.wait_for(|s| *s != LinkState::Connecting),
        )
        .await
        .map(|changed| changed.map(|s| (*s).clone()));

        let failure = match settled {
            Ok(Ok(LinkState::Connected)) => None,
            Ok(Ok(LinkState::Failed(message))) => Some(message),
            Ok(Ok(other)) => Some(format!("unexpected link state {other:?}")),
            Ok(Err(_)) => Some("event loop stopped".to_string()),
            Err(_) => Some(format!(
                "no ConnAck within {:?}",
                self.settings.connect_timeout
            )),
        };

        if let Some(message) = failure {
            self.shared.stopping.store(true, Ordering::SeqCst);
            task.abort();
            self.shared.state.send_replace(LinkState::Closed);
            return Err(ContractError::TransportConnection {
                message: format!("{}: {message}", self.endpoint()),
            });
        }

        *lock(&self.link) = Some(Link { client, task });
        Ok(())
    }

    #[instrument(name = "mqtt_subscribe", skip(self, callback), fields(filter = %filter, qos = qos.level()))]
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), ContractError> {
        let client = self.client()?;
        let _op = self.op_lock.lock().await;

        // Registered first: retained messages follow the SubAck immediately
        lock(&self.shared.subscriptions).insert(filter.to_string(), Subscription { qos, callback });

        let ack = self.shared.begin(AckKind::Subscribe);
        let result = match client.subscribe(filter, mqtt_qos(qos)).await {
            Ok(()) => self.wait_ack(ack, AckKind::Subscribe, filter).await,
            Err(e) => {
                self.shared.abandon();
                Err(ContractError::transport_ack("subscribe", filter, e.to_string()))
            }
        };

        if result.is_err() {
            lock(&self.shared.subscriptions).remove(filter);
        }
        result
    }

    #[instrument(name = "mqtt_publish", skip(self, payload), fields(topic = %topic, bytes = payload.len()))]
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: Bytes,
    ) -> Result<(), ContractError> {
        let client = self.client()?;
        let _op = self.op_lock.lock().await;

        let kind = AckKind::Publish(mqtt_qos(qos));
        let ack = self.shared.begin(kind);
        if let Err(e) = client
            .publish_bytes(topic, mqtt_qos(qos), retained, payload)
            .await
        {
            self.shared.abandon();
            return Err(ContractError::transport_ack("publish", topic, e.to_string()));
        }
        self.wait_ack(ack, kind, topic).await
    }

    #[instrument(name = "mqtt_unsubscribe", skip(self), fields(filter = %filter))]
    async fn unsubscribe(&self, filter: &str) -> Result<(), ContractError> {
        lock(&self.shared.subscriptions).remove(filter);
        let Ok(client) = self.client() else {
            return Ok(());
        };
        let _op = self.op_lock.lock().await;

        let ack = self.shared.begin(AckKind::Unsubscribe);
        if let Err(e) = client.unsubscribe(filter).await {
            self.shared.abandon();
            return Err(ContractError::transport_ack("unsubscribe", filter, e.to_string()));
        }
        self.wait_ack(ack, AckKind::Unsubscribe, filter).await
    }

    #[instrument(name = "mqtt_disconnect", skip(self))]
    async fn disconnect(&self, quiesce: Duration) {
        let Some(link) = lock(&self.link).take() else {
            return;
        };

        // Let an in-flight operation finish first
        let _op = tokio::time::timeout(quiesce, self.op_lock.lock()).await;

        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = link.client.disconnect().await {
            warn!(error = %e, "MQTT disconnect request failed");
        }

        let mut task = link.task;
        if tokio::time::timeout(quiesce, &mut task).await.is_err() {
            warn!(quiesce_ms = quiesce.as_millis() as u64, "Event loop still running, aborting");
            task.abort();
        }
        self.shared.fail_pending("disconnected");
        self.shared.state.send_replace(LinkState::Closed);
        info!(endpoint = %self.endpoint(), "MQTT disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TransportConfig;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// One MQTT control packet as seen by the server side
    struct Frame {
        header: u8,
        body: Vec<u8>,
    }

    impl Frame {
        fn kind(&self) -> u8 {
            self.header >> 4
        }

        fn u16_at(&self, at: usize) -> u16 {
            u16::from_be_bytes([self.body[at], self.body[at + 1]])
        }

        /// Topic, qos, retain, packet id and payload of a PUBLISH
        fn publish(&self) -> (String, u8, bool, Option<u16>, Vec<u8>) {
            let qos = (self.header >> 1) & 0b11;
            let retain = self.header & 1 == 1;
            let topic_len = self.u16_at(0) as usize;
            let topic = String::from_utf8(self.body[2..2 + topic_len].to_vec()).unwrap();
            let mut at = 2 + topic_len;
            let pkid = (qos > 0).then(|| {
                at += 2;
                self.u16_at(at - 2)
            });
            (topic, qos, retain, pkid, self.body[at..].to_vec())
        }
    }

    async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Frame> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok(Frame { header, body })
    }

    /// Accept one client and answer its CONNECT
    async fn accept(listener: &TcpListener) -> (TcpStream, Frame) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let connect = read_frame(&mut stream).await.unwrap();
        assert_eq!(connect.kind(), 1);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        (stream, connect)
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("tcp://{}", listener.local_addr().unwrap());
        (listener, addr)
    }

    fn transport(addr: &str) -> MqttTransport {
        let config = TransportConfig {
            addr: addr.to_string(),
            user: "miner1".to_string(),
            password: Some("secret".to_string()),
            client_id: None,
        };
        let settings = MqttSettings::from_config(&config)
            .unwrap()
            .with_ack_timeout(Duration::from_millis(300))
            .with_connect_timeout(Duration::from_secs(2));
        MqttTransport::new(settings)
    }

    #[tokio::test]
    async fn test_connect_sends_credentials() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, connect) = accept(&listener).await;
            let disconnect = read_frame(&mut stream).await.unwrap();
            (connect, disconnect)
        });

        let transport = transport(&addr);
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        transport.disconnect(Duration::from_millis(500)).await;
        assert!(!transport.is_connected());

        let (connect, disconnect) = server.await.unwrap();
        let body = String::from_utf8_lossy(&connect.body).into_owned();
        assert!(body.contains("MQTT"));
        assert!(body.contains("miner1"));
        assert!(body.contains("secret"));
        assert_eq!(disconnect.kind(), 14);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, addr) = listener().await;
        drop(listener);

        let transport = transport(&addr);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, ContractError::TransportConnection { .. }));
        assert!(!transport.is_connected());

        let err = transport
            .publish("/t", QoS::AtLeastOnce, true, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::TransportConnection { .. }));
    }

    #[tokio::test]
    async fn test_publish_waits_for_puback() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = accept(&listener).await;
            let frame = read_frame(&mut stream).await.unwrap();
            assert_eq!(frame.kind(), 3);
            let published = frame.publish();
            let pkid = published.3.unwrap().to_be_bytes();

            tokio::time::sleep(Duration::from_millis(100)).await;
            stream.write_all(&[0x40, 0x02, pkid[0], pkid[1]]).await.unwrap();
            let _ = read_frame(&mut stream).await;
            published
        });

        let transport = transport(&addr);
        transport.connect().await.unwrap();

        let started = Instant::now();
        transport
            .publish(
                "/cql/miner/miner1/db1/newest",
                QoS::AtLeastOnce,
                true,
                Bytes::from_static(b"{\"block_id\":1}"),
            )
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        transport.disconnect(Duration::from_millis(500)).await;

        let (topic, qos, retain, _, payload) = server.await.unwrap();
        assert_eq!(topic, "/cql/miner/miner1/db1/newest");
        assert_eq!(qos, 1);
        assert!(retain);
        assert_eq!(payload, b"{\"block_id\":1}");
    }

    #[tokio::test]
    async fn test_unacknowledged_publish_fails() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = accept(&listener).await;
            // Swallow everything, never acknowledge
            while read_frame(&mut stream).await.is_ok() {}
        });

        let transport = transport(&addr);
        transport.connect().await.unwrap();

        let err = transport
            .publish("/t", QoS::AtLeastOnce, true, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::TransportAck {
                operation: "publish",
                ..
            }
        ));

        transport.disconnect(Duration::from_millis(200)).await;
        server.abort();
    }

    #[tokio::test]
    async fn test_subscription_receives_messages() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = accept(&listener).await;

            let subscribe = read_frame(&mut stream).await.unwrap();
            assert_eq!(subscribe.kind(), 8);
            let pkid = subscribe.u16_at(0).to_be_bytes();
            stream
                .write_all(&[0x90, 0x03, pkid[0], pkid[1], 0x01])
                .await
                .unwrap();

            let topic = b"/cql/client/c1/db1/write";
            let payload = b"{\"client_seq\":1}";
            let mut publish = vec![0x30, (2 + topic.len() + payload.len()) as u8, 0x00];
            publish.push(topic.len() as u8);
            publish.extend_from_slice(topic);
            publish.extend_from_slice(payload);
            stream.write_all(&publish).await.unwrap();

            let unsubscribe = read_frame(&mut stream).await.unwrap();
            assert_eq!(unsubscribe.kind(), 10);
            let pkid = unsubscribe.u16_at(0).to_be_bytes();
            stream.write_all(&[0xB0, 0x02, pkid[0], pkid[1]]).await.unwrap();
            let _ = read_frame(&mut stream).await;
        });

        let transport = transport(&addr);
        transport.connect().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: MessageCallback = Arc::new(move |message: InboundMessage| {
            let _ = tx.send(message);
        });
        transport
            .subscribe("/cql/client/#", QoS::AtLeastOnce, callback)
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, "/cql/client/c1/db1/write");
        assert_eq!(&message.payload[..], b"{\"client_seq\":1}");

        transport.unsubscribe("/cql/client/#").await.unwrap();
        transport.disconnect(Duration::from_millis(500)).await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_subscription_is_not_kept() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = accept(&listener).await;
            let subscribe = read_frame(&mut stream).await.unwrap();
            let pkid = subscribe.u16_at(0).to_be_bytes();
            stream
                .write_all(&[0x90, 0x03, pkid[0], pkid[1], 0x80])
                .await
                .unwrap();
            let _ = read_frame(&mut stream).await;
        });

        let transport = transport(&addr);
        transport.connect().await.unwrap();

        let callback: MessageCallback = Arc::new(|_| {});
        let err = transport
            .subscribe("/cql/client/#", QoS::AtLeastOnce, callback)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::TransportAck {
                operation: "subscribe",
                ..
            }
        ));
        assert!(lock(&transport.shared.subscriptions).is_empty());

        transport.disconnect(Duration::from_millis(500)).await;
        server.await.unwrap();
    }
}

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

use super::*;
use crate::config::{AgentSettings, BrokerSettings};
use crate::utils::error::ConfigError;

const WAIT: Duration = Duration::from_secs(5);

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata/tls")
        .join(name)
}

fn fast_reconnect(mut config: SessionConfig) -> SessionConfig {
    config.reconnect = BackoffPolicy {
        first: Duration::from_millis(20),
        max: Duration::from_millis(100),
        factor: 2.0,
    };
    config
}

#[test]
fn test_plaintext_session_selects_tcp() {
    let session =
        Session::initialize(SessionConfig::new("broker-a", "dev-7", "127.0.0.1:1883")).unwrap();

    assert_eq!(session.scheme(), TransportScheme::Plaintext);
    assert_eq!(session.broker_url(), "tcp://127.0.0.1:1883");
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[test]
fn test_full_tls_material_selects_ssl() {
    let config = SessionConfig::new("broker-b", "dev-7", "broker-b.local:8883").with_tls(
        fixture("ca.pem"),
        fixture("client.pem"),
        fixture("client.key"),
    );
    let session = Session::initialize(config).unwrap();

    assert_eq!(session.scheme(), TransportScheme::Tls);
    assert_eq!(session.broker_url(), "ssl://broker-b.local:8883");
}

#[test]
fn test_tls_material_is_all_or_nothing() {
    for mask in 0u8..8 {
        let mut config = SessionConfig::new("broker", "dev-7", "127.0.0.1:8883");
        if mask & 1 != 0 {
            config.root_ca = Some(fixture("ca.pem"));
        }
        if mask & 2 != 0 {
            config.cert = Some(fixture("client.pem"));
        }
        if mask & 4 != 0 {
            config.key = Some(fixture("client.key"));
        }

        let result = Session::initialize(config);
        match mask.count_ones() {
            0 | 3 => assert!(result.is_ok(), "mask {mask:03b} should initialize"),
            _ => assert!(
                matches!(result, Err(ConfigError::PartialTls { .. })),
                "mask {mask:03b} should be rejected"
            ),
        }
    }
}

#[test]
fn test_empty_tls_paths_count_as_absent() {
    let mut config = SessionConfig::new("broker", "dev-7", "127.0.0.1:1883");
    config.root_ca = Some(PathBuf::new());
    config.cert = Some(PathBuf::new());
    config.key = Some(PathBuf::new());

    let session = Session::initialize(config).unwrap();
    assert_eq!(session.scheme(), TransportScheme::Plaintext);
}

#[test]
fn test_partial_tls_names_missing_fields() {
    let mut config = SessionConfig::new("broker", "dev-7", "127.0.0.1:8883");
    config.cert = Some(fixture("client.pem"));

    match config.validate() {
        Err(ConfigError::PartialTls { missing }) => assert_eq!(missing, vec!["root_ca", "key"]),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_unreadable_tls_material_is_a_config_error() {
    let config = SessionConfig::new("broker", "dev-7", "127.0.0.1:8883").with_tls(
        "/nonexistent/ca.pem",
        fixture("client.pem"),
        fixture("client.key"),
    );
    let err = Session::initialize(config).err().unwrap();
    assert_eq!(err.as_label(), "config_tls_material");
}

#[test]
fn test_missing_endpoint_and_client_id() {
    let err = Session::initialize(SessionConfig::new("broker", "dev-7", "  "))
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::MissingEndpoint));

    let err = Session::initialize(SessionConfig::new("broker", "", "127.0.0.1:1883"))
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::MissingClientId));
}

#[test]
fn test_endpoint_parsing() {
    let address = SessionConfig::new("b", "dev", "broker.local").validate().unwrap();
    assert_eq!((address.host.as_str(), address.port), ("broker.local", 1883));

    let address = SessionConfig::new("b", "dev", "[::1]:1884").validate().unwrap();
    assert_eq!((address.host.as_str(), address.port), ("::1", 1884));
    assert_eq!(address.to_string(), "tcp://[::1]:1884");

    for bad in ["tcp://broker:1883", "broker:http", "broker:0", ":1883", "::1:1883"] {
        let err = SessionConfig::new("b", "dev", bad).validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidEndpoint { .. }),
            "{bad} should be rejected"
        );
    }
}

#[test]
fn test_from_settings_treats_empty_strings_as_absent() {
    let broker = BrokerSettings {
        endpoint: " 10.0.0.5:1883 ".to_string(),
        username: Some("user".to_string()),
        password: Some(String::new()),
        root_ca: Some(String::new()),
        cert: Some(String::new()),
        key: Some(String::new()),
        subscribe_topics: [("devices/cmd".to_string(), 1)].into_iter().collect(),
        keep_alive_secs: 30,
        inbound_capacity: 8,
    };
    let agent = AgentSettings {
        device_id: "dev-7".to_string(),
        ..AgentSettings::default()
    };

    let config = SessionConfig::from_settings("local", &broker, &agent);

    assert_eq!(config.endpoint, "10.0.0.5:1883");
    assert_eq!(config.username.as_deref(), Some("user"));
    assert!(config.password.is_none());
    assert!(config.root_ca.is_none());
    assert_eq!(config.scheme().unwrap(), TransportScheme::Plaintext);
    assert_eq!(config.keep_alive, Duration::from_secs(30));
    assert_eq!(config.inbound_capacity, 8);
    assert_eq!(config.subscriptions.get("devices/cmd"), Some(&1));
}

#[test]
fn test_qos_above_two_is_clamped_to_zero() {
    assert_eq!(effective_qos(0), rumqttc::QoS::AtMostOnce);
    assert_eq!(effective_qos(1), rumqttc::QoS::AtLeastOnce);
    assert_eq!(effective_qos(2), rumqttc::QoS::ExactlyOnce);
    assert_eq!(effective_qos(3), rumqttc::QoS::AtMostOnce);
    assert_eq!(effective_qos(255), rumqttc::QoS::AtMostOnce);
}

#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_qos_above_two_logs_a_warning() {
    let logs = LogCapture::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let qos = tracing::subscriber::with_default(subscriber, || effective_qos(3));

    assert_eq!(qos, rumqttc::QoS::AtMostOnce);
    let output = logs.contents();
    assert!(output.contains("WARN"), "{output}");
    assert!(output.contains("QoS out of range"), "{output}");
    assert!(output.contains("requested=3"), "{output}");
}

#[test]
fn test_status_payload_shape() {
    let online: serde_json::Value =
        serde_json::from_slice(&StatusPayload::online("dev-7").to_bytes().unwrap()).unwrap();
    assert_eq!(online["client_id"], "dev-7");
    assert_eq!(online["Status"], "on-line");
    let timestamp = online["timestamp"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());

    let offline: serde_json::Value =
        serde_json::from_slice(&StatusPayload::offline("dev-7").to_bytes().unwrap()).unwrap();
    assert_eq!(offline["Status"], "off-line");
    assert_eq!(offline.as_object().unwrap().len(), 3);
}

#[test]
fn test_client_topic() {
    assert_eq!(client_topic("register", "dev-7"), "register/dev-7");
    assert_eq!(client_topic("message/", "dev-7"), "message/dev-7");
}

#[test]
fn test_take_inbound_only_once() {
    let mut session =
        Session::initialize(SessionConfig::new("broker", "dev-7", "127.0.0.1:1883")).unwrap();
    assert!(session.take_inbound().is_some());
    assert!(session.take_inbound().is_none());
}

#[tokio::test]
async fn test_stop_without_start_closes_inbound() {
    let mut session =
        Session::initialize(SessionConfig::new("broker", "dev-7", "127.0.0.1:1883")).unwrap();
    let mut inbound = session.take_inbound().unwrap();

    session.stop().await;

    assert!(inbound.recv().await.is_none());
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_broker_keeps_retrying_until_stop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = fast_reconnect(SessionConfig::new("broker-a", "dev-7", endpoint));
    let mut session = Session::initialize(config).unwrap();
    let mut inbound = session.take_inbound().unwrap();

    session.start();
    assert_eq!(session.state(), ConnectionState::Connecting);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.state(), ConnectionState::Connecting);

    let err = session.publish("message/dev-7", 1, "x").await.unwrap_err();
    assert_eq!(err.as_label(), "publish_connection_lost");

    timeout(WAIT, session.stop()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(inbound.recv().await.is_none());

    let err = session.publish("message/dev-7", 0, "x").await.unwrap_err();
    assert_eq!(err.as_label(), "publish_closed");

    // terminal
    session.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

// Minimal MQTT 3.1.1 broker side, enough to drive one session.

async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    loop {
        let header = stream.read_u8().await.unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.unwrap();

        if header == 0xC0 {
            stream.write_all(&[0xD0, 0x00]).await.unwrap();
            continue;
        }
        return (header, body);
    }
}

fn publish_parts(header: u8, body: &[u8]) -> (String, Option<[u8; 2]>, Vec<u8>) {
    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let topic = String::from_utf8(body[2..2 + len].to_vec()).unwrap();
    let qos = (header >> 1) & 0x03;
    if qos == 0 {
        (topic, None, body[2 + len..].to_vec())
    } else {
        let pkid = [body[2 + len], body[3 + len]];
        (topic, Some(pkid), body[4 + len..].to_vec())
    }
}

/// Accepts a connection, acknowledges it, and answers the announce and
/// subscribe that follow. Returns the announced status document.
async fn accept_session(listener: &TcpListener) -> (TcpStream, serde_json::Value, Vec<String>) {
    let (mut stream, _) = listener.accept().await.unwrap();

    let (header, _) = read_packet(&mut stream).await;
    assert_eq!(header >> 4, 1, "expected CONNECT");
    stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

    let mut status = None;
    let mut filters = Vec::new();
    while status.is_none() || filters.is_empty() {
        let (header, body) = read_packet(&mut stream).await;
        match header >> 4 {
            3 => {
                let (topic, _, payload) = publish_parts(header, &body);
                assert_eq!(topic, "register/dev-7");
                status = Some(serde_json::from_slice(&payload).unwrap());
            }
            8 => {
                let mut at = 2;
                while at < body.len() {
                    let len = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
                    filters.push(String::from_utf8(body[at + 2..at + 2 + len].to_vec()).unwrap());
                    at += 2 + len + 1;
                }
                let granted = vec![0x01; filters.len()];
                let mut suback = vec![0x90, 2 + granted.len() as u8, body[0], body[1]];
                suback.extend(granted);
                stream.write_all(&suback).await.unwrap();
            }
            other => panic!("unexpected packet type {other}"),
        }
    }
    (stream, status.unwrap_or_default(), filters)
}

#[tokio::test]
async fn test_session_announces_and_resubscribes_on_every_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();

    let config = fast_reconnect(
        SessionConfig::new("broker-a", "dev-7", endpoint).with_subscription("devices/cmd", 1),
    );
    let mut session = Session::initialize(config).unwrap();
    let mut inbound = session.take_inbound().unwrap();
    let mut state = session.watch_state();
    session.start();

    // first connection
    let (mut conn, status, filters) = timeout(WAIT, accept_session(&listener)).await.unwrap();
    assert_eq!(status["Status"], "on-line");
    assert_eq!(status["client_id"], "dev-7");
    assert_eq!(filters, vec!["devices/cmd".to_string()]);
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    // inbound delivery
    let topic = b"devices/cmd";
    let payload = br#"{"op":"reboot"}"#;
    let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8, 0x00, topic.len() as u8];
    packet.extend_from_slice(topic);
    packet.extend_from_slice(payload);
    conn.write_all(&packet).await.unwrap();

    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(message.hostname(), "broker-a");
    assert_eq!(message.client_id(), "dev-7");
    assert_eq!(message.topic(), "devices/cmd");
    assert_eq!(message.qos(), 0);
    assert_eq!(message.payload(), payload);

    // connection loss, then automatic reconnect
    drop(conn);
    let (mut conn, status, filters) = timeout(WAIT, accept_session(&listener)).await.unwrap();
    assert_eq!(status["Status"], "on-line");
    assert_eq!(filters, vec!["devices/cmd".to_string()]);
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    // acknowledged application publish
    let publisher = session.publisher();
    let broker = async {
        let (header, body) = read_packet(&mut conn).await;
        assert_eq!(header >> 4, 3);
        let (topic, pkid, payload) = publish_parts(header, &body);
        let pkid = pkid.unwrap();
        conn.write_all(&[0x40, 0x02, pkid[0], pkid[1]]).await.unwrap();
        (topic, payload)
    };
    let (published, (topic, payload)) = timeout(
        WAIT,
        async { tokio::join!(publisher.publish_application("message", 1, "hello"), broker) },
    )
    .await
    .unwrap();
    published.unwrap();
    assert_eq!(topic, "message/dev-7");
    assert_eq!(payload, b"hello");

    // stop announces off-line and disconnects before the inbound channel closes
    timeout(WAIT, session.stop()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(inbound.recv().await.is_none());

    let (header, body) = timeout(WAIT, read_packet(&mut conn)).await.unwrap();
    assert_eq!(header >> 4, 3);
    let (topic, _, payload) = publish_parts(header, &body);
    assert_eq!(topic, "register/dev-7");
    let status: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(status["Status"], "off-line");

    let (header, _) = timeout(WAIT, read_packet(&mut conn)).await.unwrap();
    assert_eq!(header, 0xE0, "expected DISCONNECT");
}

/// Starts a session against `listener` and waits until it is connected.
async fn connected_session(
    listener: &TcpListener,
    publish_timeout: Duration,
) -> (Session, TcpStream, watch::Receiver<ConnectionState>) {
    let endpoint = listener.local_addr().unwrap().to_string();
    let mut config = fast_reconnect(
        SessionConfig::new("broker-a", "dev-7", endpoint).with_subscription("devices/cmd", 1),
    );
    config.publish_timeout = publish_timeout;
    let mut session = Session::initialize(config).unwrap();
    let mut state = session.watch_state();
    session.start();

    let (conn, _, _) = timeout(WAIT, accept_session(listener)).await.unwrap();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();
    (session, conn, state)
}

#[tokio::test]
async fn test_out_of_range_qos_is_sent_at_qos_zero() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut session, mut conn, _state) = connected_session(&listener, WAIT).await;

    let publisher = session.publisher();
    let (published, (header, body)) = timeout(WAIT, async {
        tokio::join!(publisher.publish("devices/state", 3, "up"), read_packet(&mut conn))
    })
    .await
    .unwrap();

    published.unwrap();
    assert_eq!(header, 0x30, "expected a QoS 0 PUBLISH");
    let (topic, pkid, payload) = publish_parts(header, &body);
    assert_eq!(topic, "devices/state");
    assert_eq!(pkid, None);
    assert_eq!(payload, b"up");

    timeout(WAIT, session.stop()).await.unwrap();
}

#[tokio::test]
async fn test_failed_publish_is_not_resent_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut session, mut conn, mut state) =
        connected_session(&listener, Duration::from_millis(500)).await;

    // the connection drops before the broker acknowledges
    let publisher = session.publisher();
    let lost =
        tokio::spawn(async move { publisher.publish_application("message", 1, "first").await });
    let (header, body) = timeout(WAIT, read_packet(&mut conn)).await.unwrap();
    assert_eq!(publish_parts(header, &body).2, b"first");
    drop(conn);

    let err = timeout(WAIT, lost).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err.as_label(), "publish_connection_lost");

    // only the announce and the subscribe arrive on the new connection
    let (mut conn, status, _) = timeout(WAIT, accept_session(&listener)).await.unwrap();
    assert_eq!(status["Status"], "on-line");
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();

    // a new publish is not credited with an acknowledgement meant for another packet
    let publisher = session.publisher();
    let fresh =
        tokio::spawn(async move { publisher.publish_application("message", 1, "second").await });
    let (header, body) = timeout(WAIT, read_packet(&mut conn)).await.unwrap();
    let (topic, pkid, payload) = publish_parts(header, &body);
    assert_eq!(topic, "message/dev-7");
    assert!(pkid.is_some());
    assert_eq!(payload, b"second");

    let err = timeout(WAIT, fresh).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err.as_label(), "publish_timeout");
    assert!(
        timeout(Duration::from_millis(200), read_packet(&mut conn)).await.is_err(),
        "no further packet expected"
    );

    timeout(WAIT, session.stop()).await.unwrap();
}

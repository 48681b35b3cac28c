//! Tests for `MqttLink` against a scripted in-process broker speaking just
//! enough MQTT 3.1.1.

use std::net::SocketAddr;
use std::time::Duration;

use brokerdesk_core::config::MqttConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::MqttConnector;
use crate::link::{
    BrokerLink, ConnectParams, Connected, InboundMessage, LinkConnector, LinkError, LinkEvent,
    LinkState, QoS,
};

/// Topics the scripted broker answers with a SUBACK failure code.
const DENIED: &str = "denied/#";
/// Topics the scripted broker never acknowledges.
const SILENT: &str = "silent/#";
/// Subscribing to this makes the scripted broker close the connection.
const DROP: &str = "drop/#";

#[derive(Debug, Clone, Copy)]
struct Script {
    connack_code: u8,
    answer_pings: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connack_code: 0,
            answer_pings: true,
        }
    }
}

fn config() -> MqttConfig {
    MqttConfig {
        keep_alive_secs: 30,
        operation_timeout_secs: 1,
        connect_timeout_secs: 2,
        ..MqttConfig::default()
    }
}

fn params(addr: SocketAddr) -> ConnectParams {
    ConnectParams {
        host: addr.ip().to_string(),
        port: addr.port(),
        client_id: "desk-test".into(),
        username: "alice".into(),
        password: "secret".into(),
    }
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn frame(header: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(body);
    out
}

fn first_topic(body: &[u8]) -> String {
    let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
    String::from_utf8_lossy(&body[2..2 + len]).into_owned()
}

async fn serve(mut stream: TcpStream, script: Script) -> std::io::Result<()> {
    let (header, _) = read_packet(&mut stream).await?;
    assert_eq!(header, 0x10, "expected CONNECT");
    stream
        .write_all(&[0x20, 0x02, 0x00, script.connack_code])
        .await?;

    loop {
        let (header, body) = read_packet(&mut stream).await?;
        match header >> 4 {
            // SUBSCRIBE
            8 => {
                let topic = first_topic(&body[2..]);
                if topic == SILENT {
                    continue;
                }
                if topic == DROP {
                    return Ok(());
                }
                let code = if topic == DENIED { 0x80 } else { 0x01 };
                stream
                    .write_all(&frame(0x90, &[body[0], body[1], code]))
                    .await?;
            }
            // UNSUBSCRIBE
            10 => stream.write_all(&frame(0xB0, &body[..2])).await?,
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                let topic = first_topic(&body);
                let mut offset = 2 + topic.len();
                if qos > 0 {
                    stream
                        .write_all(&frame(0x40, &body[offset..offset + 2]))
                        .await?;
                    offset += 2;
                }
                if topic.starts_with("echo/") {
                    let mut echo = Vec::new();
                    echo.extend_from_slice(&body[..2 + topic.len()]);
                    echo.extend_from_slice(&body[offset..]);
                    stream.write_all(&frame(0x30, &echo)).await?;
                }
            }
            // PINGREQ
            12 if script.answer_pings => stream.write_all(&[0xD0, 0x00]).await?,
            // DISCONNECT
            14 => return Ok(()),
            _ => {}
        }
    }
}

/// Accepts any number of connections, so reconnects can be observed.
async fn spawn_scripted(script: Script) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = serve(stream, script).await;
            });
        }
    });
    addr
}

async fn spawn_broker(connack_code: u8) -> SocketAddr {
    spawn_scripted(Script {
        connack_code,
        ..Script::default()
    })
    .await
}

async fn connect_with(
    addr: SocketAddr,
    config: MqttConfig,
) -> (
    Result<Connected, LinkError>,
    mpsc::Receiver<InboundMessage>,
    mpsc::Receiver<LinkEvent>,
) {
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let (events_tx, events_rx) = mpsc::channel(4);
    let result = MqttConnector::new(config)
        .connect(params(addr), inbound_tx, events_tx)
        .await;
    (result, inbound_rx, events_rx)
}

async fn connect(
    addr: SocketAddr,
) -> (
    Result<Connected, LinkError>,
    mpsc::Receiver<InboundMessage>,
    mpsc::Receiver<LinkEvent>,
) {
    connect_with(addr, config()).await
}

#[tokio::test]
async fn connects_and_reports_fresh_session() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let connected = result.unwrap();

    assert!(!connected.session_present);
    assert_eq!(connected.link.state(), LinkState::Connected);
    assert!(connected.link.is_connected());
    assert!(connected.link.is_connection_open());
}

#[tokio::test]
async fn refused_connack_is_refused_error() {
    // 5 = not authorized
    let addr = spawn_broker(5).await;
    let (result, _, _) = connect(addr).await;
    assert!(matches!(result, Err(LinkError::Refused(_))));
}

#[tokio::test]
async fn unreachable_broker_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (result, _, _) = connect(addr).await;
    assert!(matches!(result, Err(LinkError::Connect(_))));
}

#[tokio::test]
async fn silent_broker_times_out_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let (inbound_tx, _inbound_rx) = mpsc::channel(1);
    let (events_tx, _events_rx) = mpsc::channel(1);
    let connector = MqttConnector::new(MqttConfig {
        connect_timeout_secs: 1,
        ..config()
    });
    let result = connector.connect(params(addr), inbound_tx, events_tx).await;
    assert!(matches!(result, Err(LinkError::Timeout)));
}

#[tokio::test]
async fn empty_client_id_is_rejected_before_dialing() {
    let (inbound_tx, _inbound_rx) = mpsc::channel(1);
    let (events_tx, _events_rx) = mpsc::channel(1);
    let mut params = params("127.0.0.1:1".parse().unwrap());
    params.client_id = String::new();

    let result = MqttConnector::new(config())
        .connect(params, inbound_tx, events_tx)
        .await;
    assert!(matches!(result, Err(LinkError::Connect(_))));
}

#[tokio::test]
async fn subscribe_waits_for_suback() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let link = result.unwrap().link;

    link.subscribe("sensors/+/temp", QoS::AtLeastOnce)
        .await
        .unwrap();
    link.subscribe("sensors/#", QoS::AtMostOnce).await.unwrap();
    link.unsubscribe("sensors/#").await.unwrap();
}

#[tokio::test]
async fn suback_failure_is_rejection() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let link = result.unwrap().link;

    let err = link.subscribe(DENIED, QoS::AtLeastOnce).await.unwrap_err();
    assert!(matches!(err, LinkError::Rejected(_)));

    // The link is still usable afterwards.
    link.subscribe("ok/#", QoS::AtLeastOnce).await.unwrap();
}

#[tokio::test]
async fn missing_ack_times_out() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let link = result.unwrap().link;

    let err = link.subscribe(SILENT, QoS::AtLeastOnce).await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout));
}

#[tokio::test]
async fn acks_stay_paired_after_an_unanswered_subscribe() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let link = result.unwrap().link;

    let err = link.subscribe(SILENT, QoS::AtLeastOnce).await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout));

    // Enough requests to wrap the client's packet id space past the id the
    // unanswered SUBSCRIBE used.
    let mut failures = Vec::new();
    for i in 0..110 {
        let topic = format!("ok/{i}");
        if let Err(e) = link.subscribe(&topic, QoS::AtMostOnce).await {
            failures.push((i, e));
        }
    }
    assert!(failures.is_empty(), "failed after the timeout: {failures:?}");

    link.unsubscribe("ok/0").await.unwrap();
}

#[tokio::test]
async fn connection_drop_fails_in_flight_subscribe_then_recovers() {
    let addr = spawn_scripted(Script::default()).await;
    let (result, _, mut events) = connect_with(
        addr,
        MqttConfig {
            operation_timeout_secs: 4,
            ..config()
        },
    )
    .await;
    let link = result.unwrap().link;

    let err = link.subscribe(DROP, QoS::AtLeastOnce).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectionLost), "{err:?}");

    // Sent once the client has reconnected; the lost SUBSCRIBE is not resent
    // and must not be credited with this ack.
    link.subscribe("ok/after", QoS::AtLeastOnce).await.unwrap();
    link.subscribe("ok/again", QoS::AtLeastOnce).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap();
    assert!(matches!(event, Some(LinkEvent::SessionLost)));
    assert_eq!(link.state(), LinkState::Connected);
}

#[tokio::test]
async fn unanswered_ping_drops_the_connection() {
    let addr = spawn_scripted(Script {
        answer_pings: false,
        ..Script::default()
    })
    .await;
    let (result, _, mut events) = connect_with(
        addr,
        MqttConfig {
            keep_alive_secs: 3,
            ping_timeout_secs: 1,
            ..config()
        },
    )
    .await;
    let _link = result.unwrap().link;

    // PINGREQ goes out after 3s and is given 1s. The client's own
    // keep-alive check would only fire on the next tick, at 6s.
    let event = tokio::time::timeout(Duration::from_millis(5500), events.recv())
        .await
        .unwrap();
    assert!(matches!(event, Some(LinkEvent::SessionLost)));
}

#[tokio::test]
async fn qos2_is_rejected_locally() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let link = result.unwrap().link;

    let err = link
        .publish("a/b", QoS::ExactlyOnce, false, b"x".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Rejected(_)));
}

#[tokio::test]
async fn publishes_are_acknowledged_and_delivered_inbound() {
    let addr = spawn_broker(0).await;
    let (result, mut inbound, _) = connect(addr).await;
    let link = result.unwrap().link;

    link.publish("echo/a", QoS::AtLeastOnce, false, b"hello".to_vec())
        .await
        .unwrap();
    link.publish("echo/b", QoS::AtMostOnce, false, b"world".to_vec())
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.topic, "echo/a");
    assert_eq!(first.payload, b"hello");
    assert_eq!(first.qos, 0);

    let second = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.topic, "echo/b");
    assert_eq!(second.payload, b"world");
}

#[tokio::test]
async fn disconnect_closes_the_link() {
    let addr = spawn_broker(0).await;
    let (result, _, _) = connect(addr).await;
    let link = result.unwrap().link;

    link.disconnect(Duration::from_millis(500)).await;

    assert!(matches!(link.state(), LinkState::Disconnected(_)));
    assert!(!link.is_connected());
    let err = link.subscribe("a/b", QoS::AtMostOnce).await.unwrap_err();
    assert!(matches!(err, LinkError::Closed));
}

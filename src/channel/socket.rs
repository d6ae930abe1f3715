use super::wire::{Frame, Handshake};
use super::{ChannelError, ClientEvent, Connection, Connector, ServerEvent};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const SOCKET_PATH: &str = "/socket.io/";
const SOCKET_QUERY: &str = "EIO=4&transport=websocket";
const CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Turn a backend or socket URL into an Engine.IO WebSocket endpoint.
///
/// `http(s)` becomes `ws(s)`; a bare origin gets the default `/socket.io/`
/// path and transport query. Explicit paths and queries are kept.
pub fn socket_endpoint(url: &Url) -> Result<Url, ChannelError> {
    let mut endpoint = url.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(ChannelError::InvalidEndpoint(url.to_string())),
    };
    endpoint
        .set_scheme(scheme)
        .map_err(|_| ChannelError::InvalidEndpoint(url.to_string()))?;

    if endpoint.path().is_empty() || endpoint.path() == "/" {
        endpoint.set_path(SOCKET_PATH);
    }
    if endpoint.query().is_none() {
        endpoint.set_query(Some(SOCKET_QUERY));
    }
    Ok(endpoint)
}

/// Connects sessions to a Socket.IO server over WebSocket.
pub struct SocketConnector {
    endpoint: Url,
}

impl SocketConnector {
    pub fn new(url: &Url) -> Result<Self, ChannelError> {
        Ok(Self {
            endpoint: socket_endpoint(url)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Connector for SocketConnector {
    fn connect(&self) -> Connection {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            match drive(&endpoint, out_rx, in_tx).await {
                Ok(()) => info!("Socket session with {} ended", endpoint),
                Err(e) => error!("Socket session with {} failed: {}", endpoint, e),
            }
        });

        Connection::new(out_tx, in_rx)
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Runs one socket session until either side goes away
async fn drive(
    endpoint: &Url,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), ChannelError> {
    // A session released while still connecting never reaches the namespace,
    // so nothing buffered for it is ever sent.
    let (socket, handshake) = tokio::select! {
        biased;
        _ = inbound.closed() => {
            info!("Session released before {} finished the handshake", endpoint);
            return Ok(());
        }
        opened = open_session(endpoint) => opened?,
    };
    let (mut sink, mut stream) = socket.split();

    // The server pings every interval; a silent server is considered gone
    let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);

    loop {
        tokio::select! {
            biased;
            _ = inbound.closed() => break,
            event = outbound.recv() => match event {
                Some(event) => send_frame(&mut sink, &event.to_frame()?).await?,
                None => break,
            },
            frame = timeout(liveness, next_frame(&mut stream)) => {
                let frame = match frame {
                    Ok(frame) => frame?,
                    Err(_) => return Err(ChannelError::Timeout("server ping")),
                };
                match frame {
                    Some(Frame::Ping) => send_frame(&mut sink, &Frame::Pong).await?,
                    Some(Frame::Event { name, data }) => match ServerEvent::from_event(&name, data) {
                        Ok(Some(event)) => {
                            if inbound.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => debug!("Ignoring unhandled event {}", name),
                        Err(e) => warn!("Dropping malformed {} event: {}", name, e),
                    },
                    Some(Frame::Disconnect) | Some(Frame::Close) | None => {
                        info!("Server closed the session");
                        return Ok(());
                    }
                    Some(other) => debug!("Ignoring {:?}", other),
                }
            }
        }
    }

    // Local teardown: leave the namespace, then close the socket
    send_frame(&mut sink, &Frame::Disconnect).await?;
    sink.send(Message::Close(None)).await?;
    Ok(())
}

// WebSocket upgrade, Engine.IO open, then Socket.IO connect on the default namespace
async fn open_session(endpoint: &Url) -> Result<(Socket, Handshake), ChannelError> {
    let connect_timeout = Duration::from_secs(CONNECT_TIMEOUT_SECONDS);
    let (mut socket, _) = timeout(connect_timeout, connect_async(endpoint.as_str()))
        .await
        .map_err(|_| ChannelError::Timeout("websocket upgrade"))??;
    info!("Connected to {}", endpoint);

    let handshake: Handshake = loop {
        let frame = timeout(connect_timeout, next_frame(&mut socket))
            .await
            .map_err(|_| ChannelError::Timeout("engine handshake"))??;
        match frame {
            Some(Frame::Open(handshake)) => break handshake,
            Some(other) => debug!("Ignoring {:?} before handshake", other),
            None => return Err(ChannelError::Closed),
        }
    };
    debug!(
        "Engine session {} (ping every {}ms, upgrades {:?}, max payload {:?})",
        handshake.sid, handshake.ping_interval, handshake.upgrades, handshake.max_payload
    );

    send_frame(&mut socket, &Frame::Connect(None)).await?;
    loop {
        let frame = timeout(connect_timeout, next_frame(&mut socket))
            .await
            .map_err(|_| ChannelError::Timeout("namespace connect"))??;
        match frame {
            Some(Frame::Connect(_)) => break,
            Some(Frame::ConnectError(reason)) => return Err(ChannelError::Refused(reason)),
            Some(Frame::Ping) => send_frame(&mut socket, &Frame::Pong).await?,
            Some(other) => debug!("Ignoring {:?} before namespace connect", other),
            None => return Err(ChannelError::Closed),
        }
    }

    Ok((socket, handshake))
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = frame.encode()?;
    debug!("-> {}", text);
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

// Next decodable frame, Ok(None) once the socket is closed. Undecodable text is logged and skipped.
async fn next_frame<S>(stream: &mut S) -> Result<Option<Frame>, ChannelError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => {
                debug!("<- {}", text.as_str());
                match Frame::decode(text.as_str()) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(e) => warn!("Skipping undecodable packet {:?}: {}", text.as_str(), e),
                }
            }
            Message::Close(_) => return Ok(None),
            // websocket-level ping/pong is answered by tungstenite itself
            _ => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LiveChannel;
    use crate::models::VoteRequest;
    use axum::{
        extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        routing::get,
        Router,
    };
    use serde_json::json;
    use std::sync::Arc;

    // What the fake server saw, in order
    type Seen = mpsc::UnboundedSender<Frame>;

    async fn recv_frame(socket: &mut WebSocket) -> Option<Frame> {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                WsMessage::Text(text) => return Some(Frame::decode(text.as_str()).unwrap()),
                WsMessage::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    async fn send(socket: &mut WebSocket, frame: Frame) {
        socket
            .send(WsMessage::Text(frame.encode().unwrap().into()))
            .await
            .unwrap();
    }

    // Minimal Socket.IO server: handshake, answer join with a snapshot, reject votes as duplicates
    async fn fake_server(mut socket: WebSocket, seen: Seen) {
        send(
            &mut socket,
            Frame::Open(Handshake {
                sid: "sid-1".into(),
                upgrades: vec![],
                ping_interval: 25_000,
                ping_timeout: 20_000,
                max_payload: None,
            }),
        )
        .await;

        while let Some(frame) = recv_frame(&mut socket).await {
            let _ = seen.send(frame.clone());
            match frame {
                Frame::Connect(_) => {
                    send(&mut socket, Frame::Connect(Some(json!({"sid": "ns-1"})))).await;
                    // make the client answer a ping before anything else
                    send(&mut socket, Frame::Ping).await;
                }
                Frame::Event { name, data } if name == "join_poll" => {
                    send(
                        &mut socket,
                        Frame::event(
                            "update_poll",
                            json!({
                                "_id": data,
                                "question": "Tea or coffee?",
                                "options": [
                                    {"_id": "a", "text": "Tea", "votes": 3},
                                    {"_id": "b", "text": "Coffee", "votes": 1}
                                ]
                            }),
                        ),
                    )
                    .await;
                }
                Frame::Event { name, .. } if name == "vote" => {
                    send(
                        &mut socket,
                        Frame::event("error", json!({"message": "Already voted", "code": "duplicate_vote"})),
                    )
                    .await;
                }
                Frame::Disconnect => break,
                _ => {}
            }
        }
    }

    async fn serve() -> (Url, mpsc::UnboundedReceiver<Frame>) {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/socket.io/",
            get(move |ws: WebSocketUpgrade| {
                let seen = seen_tx.clone();
                async move { ws.on_upgrade(move |socket| fake_server(socket, seen)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{}", addr)).unwrap(), seen_rx)
    }

    // Holds the Engine.IO open back, then records whatever the client still sends
    async fn slow_server(mut socket: WebSocket, seen: Seen) {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let open = Frame::Open(Handshake {
            sid: "sid-slow".into(),
            upgrades: vec![],
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: None,
        });
        if socket
            .send(WsMessage::Text(open.encode().unwrap().into()))
            .await
            .is_err()
        {
            return;
        }

        while let Some(frame) = recv_frame(&mut socket).await {
            let _ = seen.send(frame.clone());
            if let Frame::Connect(_) = frame {
                send(&mut socket, Frame::Connect(Some(json!({"sid": "ns-slow"})))).await;
            }
        }
    }

    #[test]
    fn derives_endpoint_from_backend_url() {
        let endpoint = socket_endpoint(&Url::parse("https://polls.example.com").unwrap()).unwrap();
        assert_eq!(
            endpoint.as_str(),
            "wss://polls.example.com/socket.io/?EIO=4&transport=websocket"
        );

        let explicit = socket_endpoint(&Url::parse("ws://localhost:5000/rt/?EIO=4&transport=websocket").unwrap()).unwrap();
        assert_eq!(explicit.as_str(), "ws://localhost:5000/rt/?EIO=4&transport=websocket");

        assert!(matches!(
            socket_endpoint(&Url::parse("ftp://example.com").unwrap()),
            Err(ChannelError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn teardown_during_handshake_never_joins() {
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/socket.io/",
            get(move |ws: WebSocketUpgrade| {
                let seen = seen_tx.clone();
                async move { ws.on_upgrade(move |socket| slow_server(socket, seen)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = Url::parse(&format!("http://{}", addr)).unwrap();
        let channel = LiveChannel::new(Arc::new(SocketConnector::new(&base).unwrap()));

        let mut subscription = channel.join("p1").unwrap();
        subscription.submit_vote("a").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        subscription.teardown();
        assert!(!channel.is_busy());

        // give the delayed open time to land and anything buffered time to leak
        tokio::time::sleep(Duration::from_millis(600)).await;
        let mut frames = Vec::new();
        while let Ok(frame) = seen.try_recv() {
            frames.push(frame);
        }
        assert!(
            frames.iter().all(|frame| !matches!(frame, Frame::Event { .. } | Frame::Connect(_))),
            "frames after teardown: {:?}",
            frames
        );
    }

    #[tokio::test]
    async fn full_session_over_websocket() {
        let (base, mut seen) = serve().await;
        let connector = SocketConnector::new(&base).unwrap();
        let channel = LiveChannel::new(Arc::new(connector));

        let mut subscription = channel.join("p1").unwrap();

        // join answered with a full snapshot
        match subscription.next_event().await {
            Some(ServerEvent::UpdatePoll(poll)) => {
                assert_eq!(poll.id, "p1");
                assert_eq!(poll.total_votes(), 4);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        subscription.submit_vote("a").unwrap();
        match subscription.next_event().await {
            Some(ServerEvent::Error(payload)) => {
                assert_eq!(payload.kind(), crate::channel::ErrorKind::DuplicateVote)
            }
            other => panic!("expected error, got {:?}", other),
        }

        subscription.teardown();
        assert!(!channel.is_busy());

        let mut frames = Vec::new();
        while let Some(frame) = seen.recv().await {
            let done = frame == Frame::Disconnect;
            frames.push(frame);
            if done {
                break;
            }
        }

        // the pong may interleave with the buffered join, everything else is ordered
        assert_eq!(frames.first(), Some(&Frame::Connect(None)));
        assert_eq!(frames.last(), Some(&Frame::Disconnect));
        assert!(frames.contains(&Frame::Pong));
        let events: Vec<&Frame> = frames
            .iter()
            .filter(|frame| matches!(frame, Frame::Event { .. }))
            .collect();
        assert_eq!(
            events,
            vec![
                &Frame::event("join_poll", json!("p1")),
                &Frame::event(
                    "vote",
                    serde_json::to_value(VoteRequest {
                        poll_id: "p1".into(),
                        option_id: "a".into()
                    })
                    .unwrap()
                ),
            ]
        );
    }
}

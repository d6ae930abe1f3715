pub mod socket;
pub mod wire;

use crate::models::{ErrorPayload, Poll, VoteRequest};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use wire::{Frame, WireError};

// Event names shared with the server
pub const JOIN_POLL_EVENT: &str = "join_poll";
pub const VOTE_EVENT: &str = "vote";
pub const UPDATE_POLL_EVENT: &str = "update_poll";
pub const ERROR_EVENT: &str = "error";

// Structured code for "this voter already voted in this poll"
pub const DUPLICATE_VOTE_CODE: &str = "duplicate_vote";
// Texts sent by servers that predate the code field
const LEGACY_DUPLICATE_EMAIL_MESSAGE: &str = "You have already voted with this email.";
const LEGACY_DUPLICATE_MESSAGE: &str = "Already voted";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("a poll session is already active on this channel")]
    SessionActive,

    #[error("channel is closed")]
    Closed,

    #[error("invalid channel endpoint {0}")]
    InvalidEndpoint(String),

    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("server refused the connection: {0}")]
    Refused(Value),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Events this client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    JoinPoll(String),
    Vote(VoteRequest),
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    UpdatePoll(Poll),
    Error(ErrorPayload),
}

impl ClientEvent {
    pub fn to_frame(&self) -> Result<Frame, WireError> {
        Ok(match self {
            ClientEvent::JoinPoll(poll_id) => Frame::event(JOIN_POLL_EVENT, Value::String(poll_id.clone())),
            ClientEvent::Vote(vote) => Frame::event(VOTE_EVENT, serde_json::to_value(vote)?),
        })
    }
}

impl ServerEvent {
    // Ok(None) for events this client doesn't listen to
    pub fn from_event(name: &str, data: Value) -> Result<Option<Self>, WireError> {
        match name {
            UPDATE_POLL_EVENT => Ok(Some(ServerEvent::UpdatePoll(serde_json::from_value(data)?))),
            ERROR_EVENT => Ok(Some(ServerEvent::Error(serde_json::from_value(data)?))),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateVote,
    Other,
}

impl ErrorPayload {
    pub fn kind(&self) -> ErrorKind {
        match self.code.as_deref() {
            Some(DUPLICATE_VOTE_CODE) => ErrorKind::DuplicateVote,
            Some(_) => ErrorKind::Other,
            None if self.message == LEGACY_DUPLICATE_EMAIL_MESSAGE
                || self.message == LEGACY_DUPLICATE_MESSAGE =>
            {
                ErrorKind::DuplicateVote
            }
            None => ErrorKind::Other,
        }
    }

    // Text shown to the user
    pub fn notice(&self) -> String {
        if self.code.is_none() && self.message == LEGACY_DUPLICATE_MESSAGE {
            return "You have already voted.".to_string();
        }
        self.message.clone()
    }
}

/// Both ends a session talks through; the transport driver holds the opposite ends.
pub struct Connection {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Connection {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientEvent>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens transport connections. Must not block: the returned connection
/// buffers outbound events until the transport is ready.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Connection;
}

/// The process-wide live update channel.
///
/// Exactly one poll session may be active at a time. Each session gets a
/// fresh connection, so nothing registered by an earlier session can observe
/// events meant for a later one.
pub struct LiveChannel {
    connector: Arc<dyn Connector>,
    busy: Arc<AtomicBool>,
}

impl LiveChannel {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Open a connection and join the update group of `poll_id`.
    ///
    /// The receiving end is owned before `join_poll` is queued, so no update
    /// sent in response to the join can be missed.
    pub fn join(&self, poll_id: &str) -> Result<Subscription, ChannelError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::SessionActive);
        }

        info!("Joining live updates for poll {}", poll_id);
        let mut subscription = Subscription {
            poll_id: poll_id.to_string(),
            connection: Some(self.connector.connect()),
            busy: Arc::clone(&self.busy),
        };
        if let Err(e) = subscription.emit(ClientEvent::JoinPoll(poll_id.to_string())) {
            subscription.teardown();
            return Err(e);
        }
        Ok(subscription)
    }
}

/// Handle for one joined poll. Dropping it, or calling [`Subscription::teardown`],
/// releases every registration and closes the connection.
pub struct Subscription {
    poll_id: String,
    connection: Option<Connection>,
    busy: Arc<AtomicBool>,
}

impl Subscription {
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn emit(&self, event: ClientEvent) -> Result<(), ChannelError> {
        let connection = self.connection.as_ref().ok_or(ChannelError::Closed)?;
        debug!("Emitting {:?}", event);
        connection.outbound.send(event).map_err(|_| ChannelError::Closed)
    }

    // Fire and forget: the server answers with `update_poll` or `error`
    pub fn submit_vote(&self, option_id: &str) -> Result<(), ChannelError> {
        self.emit(ClientEvent::Vote(VoteRequest {
            poll_id: self.poll_id.clone(),
            option_id: option_id.to_string(),
        }))
    }

    /// Next event for this poll, or `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            let connection = self.connection.as_mut()?;
            let received = connection.inbound.recv().await;
            match received {
                Some(ServerEvent::UpdatePoll(poll)) if poll.id != self.poll_id => {
                    warn!("Dropping snapshot for poll {} on session for {}", poll.id, self.poll_id);
                }
                Some(event) => return Some(event),
                None => {
                    info!("Live channel for poll {} closed by transport", self.poll_id);
                    self.teardown();
                    return None;
                }
            }
        }
    }

    pub fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!("Leaving live updates for poll {}", self.poll_id);
            drop(connection);
            self.busy.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::LoopbackConnector;
    use super::*;
    use crate::models::sample_poll;
    use serde_json::json;

    fn channel() -> (Arc<LoopbackConnector>, LiveChannel) {
        let connector = Arc::new(LoopbackConnector::default());
        let channel = LiveChannel::new(connector.clone());
        (connector, channel)
    }

    #[tokio::test]
    async fn join_emits_exactly_one_join() {
        let (connector, channel) = channel();
        let _subscription = channel.join("p1").unwrap();

        let mut remote = connector.take_remote(0);
        assert_eq!(remote.drain(), vec![ClientEvent::JoinPoll("p1".into())]);
    }

    #[tokio::test]
    async fn only_one_session_at_a_time() {
        let (connector, channel) = channel();
        let mut first = channel.join("p1").unwrap();
        assert!(matches!(channel.join("p2"), Err(ChannelError::SessionActive)));
        assert_eq!(connector.connections(), 1);

        first.teardown();
        first.teardown();
        assert!(!channel.is_busy());

        let _second = channel.join("p2").unwrap();
        assert!(channel.is_busy());
    }

    #[tokio::test]
    async fn drop_releases_the_session() {
        let (connector, channel) = channel();
        {
            let _subscription = channel.join("p1").unwrap();
        }
        assert!(!channel.is_busy());

        // the transport side sees the session go away
        let mut remote = connector.take_remote(0);
        remote.drain();
        assert!(remote.sent.recv().await.is_none());
        assert!(remote.push.is_closed());
    }

    #[tokio::test]
    async fn vote_is_emitted_with_poll_id() {
        let (connector, channel) = channel();
        let subscription = channel.join("p1").unwrap();
        subscription.submit_vote("a").unwrap();

        let mut remote = connector.take_remote(0);
        assert_eq!(
            remote.drain(),
            vec![
                ClientEvent::JoinPoll("p1".into()),
                ClientEvent::Vote(VoteRequest {
                    poll_id: "p1".into(),
                    option_id: "a".into()
                }),
            ]
        );
    }

    #[tokio::test]
    async fn foreign_snapshots_are_dropped() {
        let (connector, channel) = channel();
        let mut subscription = channel.join("p2").unwrap();
        let remote = connector.take_remote(0);

        remote
            .push
            .send(ServerEvent::UpdatePoll(sample_poll("p1", &[("a", "Tea", 9)])))
            .unwrap();
        let own = sample_poll("p2", &[("a", "Tea", 1)]);
        remote.push.send(ServerEvent::UpdatePoll(own.clone())).unwrap();

        assert_eq!(subscription.next_event().await, Some(ServerEvent::UpdatePoll(own)));
    }

    #[tokio::test]
    async fn closed_transport_ends_the_session() {
        let (connector, channel) = channel();
        let mut subscription = channel.join("p1").unwrap();
        drop(connector.take_remote(0));

        assert_eq!(subscription.next_event().await, None);
        assert!(!subscription.is_open());
        assert!(!channel.is_busy());
        assert!(matches!(subscription.submit_vote("a"), Err(ChannelError::Closed)));
    }

    #[test]
    fn classifies_duplicate_votes_by_code_first() {
        let coded = ErrorPayload {
            message: "Whatever the server says today".into(),
            code: Some(DUPLICATE_VOTE_CODE.into()),
        };
        assert_eq!(coded.kind(), ErrorKind::DuplicateVote);

        // a code always wins over the text
        let other_code = ErrorPayload {
            message: LEGACY_DUPLICATE_MESSAGE.into(),
            code: Some("poll_closed".into()),
        };
        assert_eq!(other_code.kind(), ErrorKind::Other);
    }

    #[test]
    fn classifies_legacy_duplicate_messages() {
        let email = ErrorPayload {
            message: LEGACY_DUPLICATE_EMAIL_MESSAGE.into(),
            code: None,
        };
        assert_eq!(email.kind(), ErrorKind::DuplicateVote);
        assert_eq!(email.notice(), LEGACY_DUPLICATE_EMAIL_MESSAGE);

        let short = ErrorPayload {
            message: LEGACY_DUPLICATE_MESSAGE.into(),
            code: None,
        };
        assert_eq!(short.kind(), ErrorKind::DuplicateVote);
        assert_eq!(short.notice(), "You have already voted.");

        let near_miss = ErrorPayload {
            message: "already voted".into(),
            code: None,
        };
        assert_eq!(near_miss.kind(), ErrorKind::Other);
    }

    #[test]
    fn maps_events_to_frames_and_back() {
        let frame = ClientEvent::Vote(VoteRequest {
            poll_id: "p1".into(),
            option_id: "b".into(),
        })
        .to_frame()
        .unwrap();
        assert_eq!(frame, Frame::event(VOTE_EVENT, json!({"pollId": "p1", "optionId": "b"})));

        let event = ServerEvent::from_event(ERROR_EVENT, json!({"message": "Poll closed"})).unwrap();
        assert_eq!(
            event,
            Some(ServerEvent::Error(ErrorPayload {
                message: "Poll closed".into(),
                code: None
            }))
        );
        assert_eq!(ServerEvent::from_event("presence", json!({})).unwrap(), None);
        assert!(ServerEvent::from_event(UPDATE_POLL_EVENT, json!({"bogus": true})).is_err());
    }
}

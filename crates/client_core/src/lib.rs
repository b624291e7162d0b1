use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{CourseId, MessageId, MessageKind, RoomId},
    protocol::{
        Attachment, AttachmentKind, ClientRequest, FileUploadResponse, MessagePayload,
        RoomSummary, ServerEvent, TypingUser,
    },
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

pub mod connection;
pub mod timeline;
pub mod typing;

pub use connection::{
    AuthCredential, ConnectError, ConnectionState, SocketConnector, SocketSession, WsConnector,
    MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};
pub use timeline::{RoomTimeline, DEFAULT_PAGE_SIZE};
pub use typing::{TypingDebouncer, TypingRoster, TYPING_EXPIRY, TYPING_IDLE_WINDOW};

/// Notifications pushed to consumers. Connection trouble is surfaced here as
/// state, never as errors thrown from send/join calls.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionStateChanged(ConnectionState),
    MessageReceived(MessagePayload),
    TypingStarted(TypingUser),
    TypingStopped(TypingUser),
    Error(String),
}

struct ClientStateInner {
    credential: Option<AuthCredential>,
    connection: ConnectionState,
    /// Bumped on every connect/disconnect; tasks spawned for an older epoch
    /// drop their results instead of touching fresh state.
    epoch: u64,
    /// Bumped on every room switch and room-state clear. In-flight history
    /// fetches carry the value they started under, so a stale page is
    /// discarded even when the consumer has switched back to the same room.
    room_generation: u64,
    outbound: Option<mpsc::UnboundedSender<ClientRequest>>,
    current_room: Option<RoomId>,
    timeline: RoomTimeline,
    typing: TypingRoster,
    debouncer: TypingDebouncer,
}

impl ClientStateInner {
    fn new() -> Self {
        Self {
            credential: None,
            connection: ConnectionState::Disconnected,
            epoch: 0,
            room_generation: 0,
            outbound: None,
            current_room: None,
            timeline: RoomTimeline::new(),
            typing: TypingRoster::default(),
            debouncer: TypingDebouncer::default(),
        }
    }

    /// Drops everything scoped to the active room. Leaves the connection
    /// itself alone.
    fn clear_room_state(&mut self) {
        self.room_generation += 1;
        self.current_room = None;
        self.timeline.reset();
        self.typing.clear();
        self.debouncer.reset();
    }

    /// Fire-and-forget emit. A closed channel means the connection is
    /// already gone; the driver task surfaces that as state.
    fn send_frame(&self, request: ClientRequest) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(request);
        }
    }
}

#[derive(Serialize)]
struct ListMessagesQuery {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<i64>,
}

#[derive(Serialize)]
struct FileUploadQuery<'a> {
    filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
}

/// The consumer-facing surface of the course-room chat core.
#[async_trait]
pub trait RoomChatHandle: Send + Sync {
    /// Opens (or reuses) the single live connection for this credential.
    async fn connect(&self, credential: AuthCredential);
    /// Tears the connection down and clears all dependent state so nothing
    /// leaks into the next session.
    async fn disconnect(&self);
    /// Joins a room, leaving the previous one first. Silently no-ops when
    /// not connected; the consumer reacts to connection state instead.
    async fn join_room(&self, room_id: RoomId) -> Result<()>;
    async fn leave_room(&self);
    /// Fire-and-forget send. No optimistic echo: the authoritative copy
    /// arrives via the live stream and is deduplicated there.
    async fn send_message(
        &self,
        room_id: RoomId,
        content: &str,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    );
    async fn start_typing(&self, room_id: RoomId);
    async fn stop_typing(&self, room_id: RoomId);
    async fn mark_read(&self, message_id: MessageId, room_id: RoomId);
    /// Fetches the page older than the oldest held message. Returns how
    /// many entries were added; 0 when no room is joined or history is
    /// exhausted. A failed fetch propagates and leaves the list untouched.
    async fn load_older_messages(&self) -> Result<usize>;
    async fn fetch_room_by_course(&self, course_id: CourseId) -> Result<RoomSummary>;
    async fn upload_file(
        &self,
        filename: &str,
        mime_type: Option<String>,
        bytes: Vec<u8>,
        kind: AttachmentKind,
    ) -> Result<Attachment>;
    async fn connection_state(&self) -> ConnectionState;
    async fn current_room(&self) -> Option<RoomId>;
    async fn messages(&self) -> Vec<MessagePayload>;
    async fn typing_users(&self) -> Vec<TypingUser>;
    async fn has_more_history(&self) -> bool;
    async fn clear_messages(&self);
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

pub struct CourseRoomClient {
    http: Client,
    server_url: String,
    connector: Arc<dyn SocketConnector>,
    inner: Mutex<ClientStateInner>,
    events: broadcast::Sender<ClientEvent>,
}

impl CourseRoomClient {
    pub fn new(server_url: impl Into<String>) -> Result<Arc<Self>> {
        let server_url = server_url.into();
        let connector = WsConnector::from_server_url(&server_url)?;
        Ok(Self::with_connector(server_url, Arc::new(connector)))
    }

    pub fn with_connector(
        server_url: impl Into<String>,
        connector: Arc<dyn SocketConnector>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            server_url: server_url.into(),
            connector,
            inner: Mutex::new(ClientStateInner::new()),
            events,
        })
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Connection driver: one task per `connect` call, invalidated by epoch
    /// when superseded. Auth rejection is terminal; transient failures are
    /// retried with a constant delay and a bounded attempt budget that
    /// resets after every successful connect.
    async fn run_connection(self: Arc<Self>, credential: AuthCredential, epoch: u64) {
        let mut attempts = 0u32;
        loop {
            match self.connector.connect(&credential.token).await {
                Ok(session) => {
                    let SocketSession {
                        outbound,
                        mut inbound,
                    } = session;
                    {
                        let mut state = self.inner.lock().await;
                        if state.epoch != epoch {
                            return;
                        }
                        state.outbound = Some(outbound);
                        state.connection = ConnectionState::Connected;
                    }
                    attempts = 0;
                    info!("chat: connected");
                    self.emit(ClientEvent::ConnectionStateChanged(
                        ConnectionState::Connected,
                    ));

                    while let Some(event) = inbound.recv().await {
                        if !self.handle_server_event(event, epoch).await {
                            return;
                        }
                    }

                    // Unexpected drop. Room state must not survive into the
                    // next session: no auto-rejoin, no stale typing entries.
                    {
                        let mut state = self.inner.lock().await;
                        if state.epoch != epoch {
                            return;
                        }
                        state.outbound = None;
                        state.clear_room_state();
                        state.connection = ConnectionState::Connecting;
                    }
                    warn!("chat: live connection dropped, reconnecting");
                    self.emit(ClientEvent::ConnectionStateChanged(
                        ConnectionState::Connecting,
                    ));
                }
                Err(err) if err.is_terminal() => {
                    {
                        let mut state = self.inner.lock().await;
                        if state.epoch != epoch {
                            return;
                        }
                        state.outbound = None;
                        state.clear_room_state();
                        state.connection = ConnectionState::Disconnected;
                    }
                    warn!("chat: {err}");
                    self.emit(ClientEvent::ConnectionStateChanged(
                        ConnectionState::Disconnected,
                    ));
                    return;
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        {
                            let mut state = self.inner.lock().await;
                            if state.epoch != epoch {
                                return;
                            }
                            state.outbound = None;
                            state.clear_room_state();
                            state.connection = ConnectionState::Disconnected;
                        }
                        warn!("chat: giving up after {attempts} connect attempts: {err}");
                        self.emit(ClientEvent::ConnectionStateChanged(
                            ConnectionState::Disconnected,
                        ));
                        return;
                    }
                    warn!(attempt = attempts, "chat: connect failed: {err}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    let state = self.inner.lock().await;
                    if state.epoch != epoch {
                        return;
                    }
                }
            }
        }
    }

    /// Routes one inbound frame. Returns false when the session this event
    /// belongs to has been superseded.
    async fn handle_server_event(self: &Arc<Self>, event: ServerEvent, epoch: u64) -> bool {
        let mut notify: Option<ClientEvent> = None;
        let mut expiry: Option<(TypingUser, u64)> = None;
        {
            let mut state = self.inner.lock().await;
            if state.epoch != epoch {
                return false;
            }
            match event {
                ServerEvent::MessageCreated { message } => {
                    // Events for rooms we are not in are dropped; duplicate
                    // delivery is absorbed by the merge.
                    if state.current_room == Some(message.room_id)
                        && state.timeline.merge_live(message.clone())
                    {
                        notify = Some(ClientEvent::MessageReceived(message));
                    }
                }
                ServerEvent::UserTyping { user } => {
                    if state.current_room.is_some() {
                        let (generation, newly_added) = state.typing.note_start(user.clone());
                        expiry = Some((user.clone(), generation));
                        if newly_added {
                            notify = Some(ClientEvent::TypingStarted(user));
                        }
                    }
                }
                ServerEvent::UserStoppedTyping { user } => {
                    if state.typing.note_stop(user.user_id) {
                        notify = Some(ClientEvent::TypingStopped(user));
                    }
                }
                ServerEvent::Error(api_error) => {
                    notify = Some(ClientEvent::Error(api_error.to_string()));
                }
            }
        }
        if let Some((user, generation)) = expiry {
            self.spawn_typing_expiry(user, generation, epoch);
        }
        if let Some(event) = notify {
            self.emit(event);
        }
        true
    }

    /// Every typing-start re-arms the silence timeout; the timer removes
    /// the entry only if its generation is still the freshest.
    fn spawn_typing_expiry(self: &Arc<Self>, user: TypingUser, generation: u64, epoch: u64) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            let expired = {
                let mut state = client.inner.lock().await;
                state.epoch == epoch && state.typing.expire(user.user_id, generation)
            };
            if expired {
                client.emit(ClientEvent::TypingStopped(user));
            }
        });
    }

    /// Fetches one reverse-chronological page and merges it. The merge is
    /// skipped when the room scope changed while the fetch was in flight
    /// (`generation` no longer current), and any fetch error propagates
    /// before the timeline is touched.
    async fn load_history_page(
        &self,
        room_id: RoomId,
        before: Option<MessageId>,
        generation: u64,
    ) -> Result<usize> {
        let page = self
            .fetch_messages(room_id, DEFAULT_PAGE_SIZE, before)
            .await?;
        let mut state = self.inner.lock().await;
        if state.room_generation != generation {
            return Ok(0);
        }
        Ok(state.timeline.ingest_page(page, DEFAULT_PAGE_SIZE))
    }

    async fn fetch_messages(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessagePayload>> {
        let messages: Vec<MessagePayload> = self
            .http
            .get(format!("{}/rooms/{}/messages", self.server_url, room_id.0))
            .query(&ListMessagesQuery {
                limit: limit.clamp(1, 100),
                before: before.map(|id| id.0),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }
}

#[async_trait]
impl RoomChatHandle for Arc<CourseRoomClient> {
    async fn connect(&self, credential: AuthCredential) {
        let epoch = {
            let mut state = self.inner.lock().await;
            if state.connection.is_connected() && state.credential.as_ref() == Some(&credential) {
                return;
            }
            state.epoch += 1;
            state.credential = Some(credential.clone());
            state.outbound = None;
            state.clear_room_state();
            state.connection = ConnectionState::Connecting;
            state.epoch
        };
        self.emit(ClientEvent::ConnectionStateChanged(
            ConnectionState::Connecting,
        ));
        let client = Arc::clone(self);
        tokio::spawn(client.run_connection(credential, epoch));
    }

    async fn disconnect(&self) {
        let was_disconnected = {
            let mut state = self.inner.lock().await;
            state.epoch += 1;
            state.credential = None;
            state.outbound = None;
            state.clear_room_state();
            let was = state.connection;
            state.connection = ConnectionState::Disconnected;
            was == ConnectionState::Disconnected
        };
        info!("chat: disconnected");
        if !was_disconnected {
            self.emit(ClientEvent::ConnectionStateChanged(
                ConnectionState::Disconnected,
            ));
        }
    }

    async fn join_room(&self, room_id: RoomId) -> Result<()> {
        let generation = {
            let mut state = self.inner.lock().await;
            if !state.connection.is_connected() {
                return Ok(());
            }
            if state.current_room == Some(room_id) {
                return Ok(());
            }
            // Leaving the old room and joining the new one under one lock
            // keeps the switch atomic: no interleaved events from two rooms.
            if let Some(previous) = state.current_room.take() {
                state.send_frame(ClientRequest::LeaveRoom { room_id: previous });
                state.timeline.reset();
                state.typing.clear();
                state.debouncer.reset();
            }
            state.send_frame(ClientRequest::JoinRoom { room_id });
            state.current_room = Some(room_id);
            state.room_generation += 1;
            state.room_generation
        };
        info!(room_id = room_id.0, "chat: joined room");
        self.load_history_page(room_id, None, generation).await?;
        Ok(())
    }

    async fn leave_room(&self) {
        let mut state = self.inner.lock().await;
        let Some(room_id) = state.current_room else {
            return;
        };
        state.send_frame(ClientRequest::LeaveRoom { room_id });
        state.clear_room_state();
        info!(room_id = room_id.0, "chat: left room");
    }

    async fn send_message(
        &self,
        room_id: RoomId,
        content: &str,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    ) {
        let state = self.inner.lock().await;
        // Silent by design: the UI disables sending from connection state
        // rather than handling errors here.
        if !state.connection.is_connected() || state.current_room != Some(room_id) {
            return;
        }
        state.send_frame(ClientRequest::SendMessage {
            room_id,
            content: content.to_string(),
            kind,
            attachments,
        });
    }

    async fn start_typing(&self, room_id: RoomId) {
        let press = {
            let mut state = self.inner.lock().await;
            if !state.connection.is_connected() || state.current_room != Some(room_id) {
                return;
            }
            let press = state.debouncer.key_pressed(room_id);
            if press.emit_start {
                state.send_frame(ClientRequest::TypingStart { room_id });
            }
            press
        };
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE_WINDOW).await;
            let mut state = client.inner.lock().await;
            if let Some(room_id) = state.debouncer.idle_elapsed(press.generation) {
                state.send_frame(ClientRequest::TypingStop { room_id });
            }
        });
    }

    async fn stop_typing(&self, room_id: RoomId) {
        let mut state = self.inner.lock().await;
        if state.debouncer.explicit_stop(room_id) {
            state.send_frame(ClientRequest::TypingStop { room_id });
        }
    }

    async fn mark_read(&self, message_id: MessageId, room_id: RoomId) {
        let mut state = self.inner.lock().await;
        if !state.connection.is_connected() || state.current_room != Some(room_id) {
            return;
        }
        let Some(reader) = state.credential.as_ref().map(|c| c.user_id) else {
            return;
        };
        state.send_frame(ClientRequest::MarkRead {
            message_id,
            room_id,
        });
        state.timeline.mark_read(message_id, reader);
    }

    async fn load_older_messages(&self) -> Result<usize> {
        let (room_id, before, generation) = {
            let state = self.inner.lock().await;
            let Some(room_id) = state.current_room else {
                return Ok(0);
            };
            if !state.timeline.has_more() {
                return Ok(0);
            }
            (room_id, state.timeline.oldest_id(), state.room_generation)
        };
        self.load_history_page(room_id, before, generation).await
    }

    async fn fetch_room_by_course(&self, course_id: CourseId) -> Result<RoomSummary> {
        let room: RoomSummary = self
            .http
            .get(format!("{}/courses/{}/room", self.server_url, course_id.0))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(room)
    }

    async fn upload_file(
        &self,
        filename: &str,
        mime_type: Option<String>,
        bytes: Vec<u8>,
        kind: AttachmentKind,
    ) -> Result<Attachment> {
        let response: FileUploadResponse = self
            .http
            .post(format!("{}/files/upload", self.server_url))
            .query(&FileUploadQuery {
                filename,
                mime_type: mime_type.as_deref(),
            })
            .body(bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.into_attachment(kind))
    }

    async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection
    }

    async fn current_room(&self) -> Option<RoomId> {
        self.inner.lock().await.current_room
    }

    async fn messages(&self) -> Vec<MessagePayload> {
        self.inner.lock().await.timeline.messages().to_vec()
    }

    async fn typing_users(&self) -> Vec<TypingUser> {
        self.inner.lock().await.typing.users()
    }

    async fn has_more_history(&self) -> bool {
        self.inner.lock().await.timeline.has_more()
    }

    async fn clear_messages(&self) {
        self.inner.lock().await.timeline.reset();
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

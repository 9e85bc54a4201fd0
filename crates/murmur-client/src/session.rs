//! Session: the single task that owns the [`Reconciler`].
//!
//! Every mutation goes through this task. UI commands arrive on one channel;
//! push events, HTTP results and reconnect timers are funnelled into a second,
//! internal one. Network calls run on spawned tasks and re-enter the loop as
//! inputs, so the loop itself never awaits the network.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_shared::protocol::{
    ChatMessage, ClientFrame, ConversationSummary, Notification, ServerEvent,
};
use murmur_shared::types::{RoomId, UserId};

use crate::api::{ChatApi, HttpChatApi};
use crate::config::ClientConfig;
use crate::conversations::ConversationView;
use crate::cursors::{FileCursorStore, ReadCursorStore};
use crate::error::{ClientError, Result};
use crate::reconciler::{Effect, Reconciler};
use crate::timeline::TimelineEntry;
use crate::transport::{PushConnector, PushLink, WsConnector};

const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Command / update types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    OpenConversation(RoomId),
    CloseConversation,
    /// Resolve (or create) the direct conversation with `peer` and open it.
    OpenDirect {
        peer: UserId,
        reply: oneshot::Sender<Result<RoomId>>,
    },
    Send {
        room: RoomId,
        content: String,
        reply: oneshot::Sender<Result<ChatMessage>>,
    },
    RefreshConversations,
    RefreshNotifications,
    MarkNotificationRead(Uuid),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Updates sent *from* the session task to the UI.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Connected,
    Disconnected,
    ConversationsChanged,
    TimelineChanged(RoomId),
    NotificationReceived(Notification),
    NotificationsChanged,
    SendFailed { room: RoomId, error: String },
}

/// Point-in-time copy of what the UI renders.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub connected: bool,
    pub active: Option<RoomId>,
    pub conversations: Vec<ConversationView>,
    /// Timeline of the active conversation.
    pub timeline: Vec<TimelineEntry>,
    pub notifications: Vec<Notification>,
    pub unread_notifications: usize,
}

/// Internal inputs produced by spawned work.
enum Input {
    Connected {
        generation: u64,
        frames: mpsc::Sender<ClientFrame>,
    },
    Push(ServerEvent),
    PushClosed {
        generation: u64,
    },
    Reconnect,
    SendCompleted {
        local_id: Uuid,
        room: RoomId,
        outcome: Result<ChatMessage>,
        reply: oneshot::Sender<Result<ChatMessage>>,
    },
    MessagesFetched {
        room: RoomId,
        outcome: Result<Vec<ChatMessage>>,
    },
    ConversationsFetched(Result<Vec<ConversationSummary>>),
    NotificationsFetched(Result<Vec<Notification>>),
    NotificationMarked {
        id: Uuid,
        outcome: Result<bool>,
    },
    DirectResolved {
        outcome: Result<RoomId>,
        reply: oneshot::Sender<Result<RoomId>>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn command(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }

    pub async fn open_conversation(&self, room: RoomId) -> Result<()> {
        self.command(SessionCommand::OpenConversation(room)).await
    }

    pub async fn close_conversation(&self) -> Result<()> {
        self.command(SessionCommand::CloseConversation).await
    }

    pub async fn open_direct(&self, peer: UserId) -> Result<RoomId> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::OpenDirect { peer, reply }).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Send a message. Resolves once the server has persisted it or the
    /// send has failed and been rolled back.
    pub async fn send(&self, room: RoomId, content: impl Into<String>) -> Result<ChatMessage> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Send {
            room,
            content: content.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    pub async fn refresh_conversations(&self) -> Result<()> {
        self.command(SessionCommand::RefreshConversations).await
    }

    pub async fn refresh_notifications(&self) -> Result<()> {
        self.command(SessionCommand::RefreshNotifications).await
    }

    pub async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        self.command(SessionCommand::MarkNotificationRead(id)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.command(SessionCommand::Shutdown).await
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Start a session against a real server: HTTP API, WebSocket push and the
/// on-disk read-cursor file.
pub fn start(config: ClientConfig) -> Result<(SessionHandle, mpsc::Receiver<SessionUpdate>)> {
    let api = Arc::new(HttpChatApi::new(&config)?);
    let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
    let cursors = match &config.cursor_path {
        Some(path) => FileCursorStore::open(path)?,
        None => FileCursorStore::open_default()?,
    };
    info!(path = %cursors.path().display(), "Read cursors loaded");

    Ok(spawn(config, api, connector, Box::new(cursors)))
}

/// Spawn the session task. Must be called from within a tokio runtime.
pub fn spawn(
    config: ClientConfig,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn PushConnector>,
    cursors: Box<dyn ReadCursorStore>,
) -> (SessionHandle, mpsc::Receiver<SessionUpdate>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(CHANNEL_CAPACITY);
    let (input_tx, input_rx) = mpsc::channel::<Input>(CHANNEL_CAPACITY);
    let (update_tx, update_rx) = mpsc::channel::<SessionUpdate>(CHANNEL_CAPACITY);

    let reconciler = Reconciler::new(config.user_id.clone(), cursors, config.send_cooldown);
    let session = Session {
        config,
        api,
        connector,
        reconciler,
        input_tx,
        updates: update_tx,
        frames: None,
        generation: 0,
    };
    tokio::spawn(session.run(cmd_rx, input_rx));

    (SessionHandle { commands: cmd_tx }, update_rx)
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct Session {
    config: ClientConfig,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn PushConnector>,
    reconciler: Reconciler,
    input_tx: mpsc::Sender<Input>,
    updates: mpsc::Sender<SessionUpdate>,
    /// Outgoing frames of the current push connection, if open.
    frames: Option<mpsc::Sender<ClientFrame>>,
    /// Bumped on every connection attempt; stale closes are ignored.
    generation: u64,
}

impl Session {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut input_rx: mpsc::Receiver<Input>,
    ) {
        info!(user = %self.config.user_id, "Session started");
        self.connect_push();

        loop {
            tokio::select! {
                // --- UI commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown) => {
                            info!("Session shutdown requested");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            info!("All session handles dropped, shutting down");
                            break;
                        }
                    }
                }

                // --- Push events and completed work ---
                Some(input) = input_rx.recv() => self.handle_input(input),
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::OpenConversation(room) => {
                let effects = self.reconciler.open_conversation(room.clone());
                self.apply(effects);
                self.notify(SessionUpdate::ConversationsChanged);
                self.notify(SessionUpdate::TimelineChanged(room));
            }
            SessionCommand::CloseConversation => {
                let effects = self.reconciler.close_conversation();
                self.apply(effects);
            }
            SessionCommand::OpenDirect { peer, reply } => {
                let api = Arc::clone(&self.api);
                let user = self.config.user_id.clone();
                self.spawn_call(async move {
                    let outcome = api.resolve_direct(&user, &peer).await;
                    Input::DirectResolved { outcome, reply }
                });
            }
            SessionCommand::Send {
                room,
                content,
                reply,
            } => {
                let local_id = match self.reconciler.begin_send(&room, &content) {
                    Ok(id) => id,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                self.notify(SessionUpdate::TimelineChanged(room.clone()));

                let api = Arc::clone(&self.api);
                let sender = self.config.user_id.clone();
                self.spawn_call(async move {
                    let outcome = api.send_message(&room, &sender, &content).await;
                    Input::SendCompleted {
                        local_id,
                        room,
                        outcome,
                        reply,
                    }
                });
            }
            SessionCommand::RefreshConversations => self.perform(Effect::RefreshConversations),
            SessionCommand::RefreshNotifications => self.perform(Effect::RefreshNotifications),
            SessionCommand::MarkNotificationRead(id) => {
                let api = Arc::clone(&self.api);
                let user = self.config.user_id.clone();
                self.spawn_call(async move {
                    let outcome = api.mark_notification_read(id, &user).await;
                    Input::NotificationMarked { id, outcome }
                });
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Connected { generation, frames } => {
                if generation != self.generation {
                    return;
                }
                info!(generation, "Push connected");
                self.frames = Some(frames);
                self.notify(SessionUpdate::Connected);
                let effects = self.reconciler.reconnected();
                self.apply(effects);
            }
            Input::PushClosed { generation } => {
                if generation != self.generation {
                    return;
                }
                let was_connected = self.frames.take().is_some();
                if was_connected {
                    self.notify(SessionUpdate::Disconnected);
                }
                warn!(
                    delay_ms = self.config.reconnect_delay.as_millis() as u64,
                    "Push connection lost, reconnecting"
                );
                let input_tx = self.input_tx.clone();
                let delay = self.config.reconnect_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = input_tx.send(Input::Reconnect).await;
                });
            }
            Input::Reconnect => self.connect_push(),
            Input::Push(event) => self.handle_push(event),
            Input::SendCompleted {
                local_id,
                room,
                outcome,
                reply,
            } => {
                let result = self.reconciler.complete_send(local_id, outcome);
                if let Err(e) = &result {
                    warn!(room = %room, error = %e, "Send failed");
                    self.notify(SessionUpdate::SendFailed {
                        room: room.clone(),
                        error: e.user_message(),
                    });
                }
                self.notify(SessionUpdate::TimelineChanged(room));
                let _ = reply.send(result);
            }
            Input::MessagesFetched { room, outcome } => match outcome {
                Ok(messages) => {
                    debug!(room = %room, count = messages.len(), "Messages fetched");
                    self.reconciler.apply_messages(&room, messages);
                    self.notify(SessionUpdate::TimelineChanged(room));
                }
                Err(e) => warn!(room = %room, error = %e, "Failed to fetch messages"),
            },
            Input::ConversationsFetched(outcome) => match outcome {
                Ok(summaries) => {
                    debug!(count = summaries.len(), "Conversations fetched");
                    self.reconciler.apply_conversations(summaries);
                    self.notify(SessionUpdate::ConversationsChanged);
                }
                Err(e) => warn!(error = %e, "Failed to fetch conversations"),
            },
            Input::NotificationsFetched(outcome) => match outcome {
                Ok(notifications) => {
                    self.reconciler.apply_notifications(notifications);
                    self.notify(SessionUpdate::NotificationsChanged);
                }
                Err(e) => warn!(error = %e, "Failed to fetch notifications"),
            },
            Input::NotificationMarked { id, outcome } => match outcome {
                Ok(_) => {
                    if self.reconciler.mark_notification_read(id) {
                        self.notify(SessionUpdate::NotificationsChanged);
                    }
                }
                Err(e) => warn!(id = %id, error = %e, "Failed to mark notification read"),
            },
            Input::DirectResolved { outcome, reply } => {
                if let Ok(room) = &outcome {
                    if self.reconciler.conversations().get(room).is_none() {
                        self.perform(Effect::RefreshConversations);
                    }
                    let effects = self.reconciler.open_conversation(room.clone());
                    self.apply(effects);
                    self.notify(SessionUpdate::TimelineChanged(room.clone()));
                }
                let _ = reply.send(outcome);
            }
        }
    }

    fn handle_push(&mut self, event: ServerEvent) {
        let update = match &event {
            ServerEvent::NewMessage(message) => {
                Some(SessionUpdate::TimelineChanged(message.room_id.clone()))
            }
            ServerEvent::ConversationTouched(_) => Some(SessionUpdate::ConversationsChanged),
            ServerEvent::NotificationNew(n) => Some(SessionUpdate::NotificationReceived(n.clone())),
            ServerEvent::NotificationRead { .. } => Some(SessionUpdate::NotificationsChanged),
            _ => None,
        };

        let effects = self.reconciler.on_event(event);
        self.apply(effects);
        if let Some(update) = update {
            self.notify(update);
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::Join(room) => self.send_frame(ClientFrame::Join { room }),
            Effect::Leave(room) => self.send_frame(ClientFrame::Leave { room }),
            Effect::FetchMessages(room) => {
                let api = Arc::clone(&self.api);
                self.spawn_call(async move {
                    let outcome = api.list_messages(&room).await;
                    Input::MessagesFetched { room, outcome }
                });
            }
            Effect::RefreshConversations => {
                let api = Arc::clone(&self.api);
                let user = self.config.user_id.clone();
                self.spawn_call(async move {
                    Input::ConversationsFetched(api.list_conversations(&user).await)
                });
            }
            Effect::RefreshNotifications => {
                let api = Arc::clone(&self.api);
                let user = self.config.user_id.clone();
                self.spawn_call(async move {
                    Input::NotificationsFetched(api.list_notifications(&user, false).await)
                });
            }
        }
    }

    /// Frames are dropped while disconnected; [`Reconciler::reconnected`]
    /// re-joins the active room.
    fn send_frame(&mut self, frame: ClientFrame) {
        let Some(frames) = &self.frames else {
            debug!(?frame, "Not connected, frame dropped");
            return;
        };
        if let Err(e) = frames.try_send(frame) {
            debug!(error = %e, "Push link busy or closed, frame dropped");
        }
    }

    fn spawn_call<F>(&self, call: F)
    where
        F: std::future::Future<Output = Input> + Send + 'static,
    {
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            let input = call.await;
            let _ = input_tx.send(input).await;
        });
    }

    fn connect_push(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let user = self.config.user_id.clone();
        let input_tx = self.input_tx.clone();

        tokio::spawn(async move {
            match connector.connect(&user).await {
                Ok(PushLink { frames, mut events }) => {
                    if input_tx
                        .send(Input::Connected { generation, frames })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    while let Some(event) = events.recv().await {
                        if input_tx.send(Input::Push(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Push connect failed"),
            }
            let _ = input_tx.send(Input::PushClosed { generation }).await;
        });
    }

    fn notify(&self, update: SessionUpdate) {
        if let Err(e) = self.updates.try_send(update) {
            debug!(error = %e, "Update dropped");
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let active = self.reconciler.active().cloned();
        let timeline = active
            .as_ref()
            .and_then(|room| self.reconciler.timeline(room))
            .map(|t| t.entries().to_vec())
            .unwrap_or_default();
        let inbox = self.reconciler.inbox();

        SessionSnapshot {
            user_id: self.reconciler.user().clone(),
            connected: self.frames.is_some(),
            active,
            conversations: self.reconciler.conversations().items().to_vec(),
            timeline,
            notifications: inbox.items().to_vec(),
            unread_notifications: inbox.unread_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use murmur_shared::protocol::ConversationTouched;
    use murmur_shared::types::ConversationKind;

    use super::*;
    use crate::cursors::MemoryCursorStore;

    #[derive(Default)]
    struct FakeState {
        messages: Vec<ChatMessage>,
        conversations: Vec<ConversationSummary>,
        send_calls: usize,
        fail_sends: bool,
    }

    #[derive(Default)]
    struct FakeApi {
        state: Mutex<FakeState>,
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn send_message(
            &self,
            room: &RoomId,
            sender: &UserId,
            content: &str,
        ) -> Result<ChatMessage> {
            let mut state = self.state.lock().unwrap();
            state.send_calls += 1;
            if state.fail_sends {
                return Err(ClientError::Api {
                    status: 503,
                    message: "store unavailable".into(),
                });
            }
            let message = ChatMessage {
                id: Uuid::new_v4(),
                seq: state.messages.len() as u64 + 1,
                room_id: room.clone(),
                sender_id: sender.clone(),
                content: content.to_string(),
                created_at: Utc::now(),
            };
            state.messages.push(message.clone());
            Ok(message)
        }

        async fn list_messages_page(
            &self,
            room: &RoomId,
            limit: u32,
            offset: u32,
        ) -> Result<Vec<ChatMessage>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .messages
                .iter()
                .filter(|m| &m.room_id == room)
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn list_conversations(&self, _user: &UserId) -> Result<Vec<ConversationSummary>> {
            Ok(self.state.lock().unwrap().conversations.clone())
        }

        async fn resolve_direct(&self, _user: &UserId, _peer: &UserId) -> Result<RoomId> {
            Ok(RoomId::from("dm:resolved"))
        }

        async fn list_notifications(
            &self,
            _user: &UserId,
            _unread_only: bool,
        ) -> Result<Vec<Notification>> {
            Ok(Vec::new())
        }

        async fn mark_notification_read(&self, _id: Uuid, _user: &UserId) -> Result<bool> {
            Ok(true)
        }
    }

    struct FakeLink {
        events: mpsc::Sender<ServerEvent>,
        frames: mpsc::Receiver<ClientFrame>,
    }

    #[derive(Default)]
    struct FakeConnector {
        links: Mutex<Vec<FakeLink>>,
    }

    impl FakeConnector {
        fn connects(&self) -> usize {
            self.links.lock().unwrap().len()
        }

        async fn push(&self, event: ServerEvent) {
            let events = self.links.lock().unwrap().last().unwrap().events.clone();
            events.send(event).await.unwrap();
        }

        fn drop_link(&self) {
            let mut links = self.links.lock().unwrap();
            let (closed, _) = mpsc::channel(1);
            links.last_mut().unwrap().events = closed;
        }

        fn sent_frames(&self) -> Vec<ClientFrame> {
            let mut links = self.links.lock().unwrap();
            let mut frames = Vec::new();
            for link in links.iter_mut() {
                while let Ok(frame) = link.frames.try_recv() {
                    frames.push(frame);
                }
            }
            frames
        }
    }

    #[async_trait]
    impl PushConnector for FakeConnector {
        async fn connect(&self, _user: &UserId) -> Result<PushLink> {
            let (frames_tx, frames_rx) = mpsc::channel(64);
            let (events_tx, events_rx) = mpsc::channel(64);
            self.links.lock().unwrap().push(FakeLink {
                events: events_tx,
                frames: frames_rx,
            });
            Ok(PushLink {
                frames: frames_tx,
                events: events_rx,
            })
        }
    }

    struct Harness {
        handle: SessionHandle,
        updates: mpsc::Receiver<SessionUpdate>,
        api: Arc<FakeApi>,
        connector: Arc<FakeConnector>,
    }

    async fn harness(user: &str) -> Harness {
        let mut config = ClientConfig::new("http://localhost:1", user).unwrap();
        config.reconnect_delay = Duration::from_millis(10);
        let api = Arc::new(FakeApi::default());
        let connector = Arc::new(FakeConnector::default());
        let (handle, updates) = spawn(
            config,
            api.clone(),
            connector.clone(),
            Box::new(MemoryCursorStore::new()),
        );
        let mut harness = Harness {
            handle,
            updates,
            api,
            connector,
        };
        harness
            .wait_for(|u| matches!(u, SessionUpdate::Connected))
            .await;
        harness
    }

    impl Harness {
        async fn wait_for(&mut self, pred: impl Fn(&SessionUpdate) -> bool) -> SessionUpdate {
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let update = self.updates.recv().await.expect("session ended");
                    if pred(&update) {
                        return update;
                    }
                }
            })
            .await
            .expect("timed out waiting for update")
        }

        fn drain(&mut self) {
            while self.updates.try_recv().is_ok() {}
        }

        async fn snapshot_until(&self, pred: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let snapshot = self.handle.snapshot().await.unwrap();
                    if pred(&snapshot) {
                        return snapshot;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("timed out waiting for snapshot")
        }
    }

    #[tokio::test]
    async fn test_send_then_echo_shows_one_entry() {
        let mut h = harness("alice").await;
        let room = RoomId::from("dm:1");
        h.handle.open_conversation(room.clone()).await.unwrap();

        let message = h.handle.send(room.clone(), "hello").await.unwrap();
        h.drain();
        h.connector
            .push(ServerEvent::NewMessage(message.clone()))
            .await;
        h.wait_for(|u| matches!(u, SessionUpdate::TimelineChanged(_)))
            .await;

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.timeline.len(), 1);
        assert_eq!(snapshot.timeline[0].content, "hello");
        assert!(!snapshot.timeline[0].key.is_provisional());
    }

    #[tokio::test]
    async fn test_double_submit_persists_once() {
        let h = harness("alice").await;
        let room = RoomId::from("dm:1");

        h.handle.send(room.clone(), "hi").await.unwrap();
        let second = h.handle.send(room.clone(), "hi").await;

        assert!(matches!(second, Err(ClientError::DuplicateSend)));
        assert_eq!(h.api.state.lock().unwrap().send_calls, 1);
    }

    #[tokio::test]
    async fn test_failed_send_is_rolled_back() {
        let mut h = harness("alice").await;
        let room = RoomId::from("dm:1");
        h.handle.open_conversation(room.clone()).await.unwrap();
        h.api.state.lock().unwrap().fail_sends = true;

        let result = h.handle.send(room.clone(), "hello").await;
        assert!(matches!(result, Err(ClientError::Api { status: 503, .. })));

        let update = h
            .wait_for(|u| matches!(u, SessionUpdate::SendFailed { .. }))
            .await;
        assert!(matches!(update, SessionUpdate::SendFailed { error, .. } if error == "store unavailable"));
        assert!(h.handle.snapshot().await.unwrap().timeline.is_empty());
    }

    #[tokio::test]
    async fn test_first_direct_message_appears_with_unread() {
        let h = harness("bob").await;
        let room = RoomId::from("dm:first");
        let now = Utc::now();

        h.api.state.lock().unwrap().conversations = vec![ConversationSummary {
            id: room.clone(),
            name: "alice".into(),
            kind: ConversationKind::Direct,
            last_message: Some("hello".into()),
            last_message_at: Some(now),
            message_count: 1,
        }];
        h.connector
            .push(ServerEvent::ConversationTouched(ConversationTouched {
                room_id: room.clone(),
                sender_id: "alice".into(),
                preview: "hello".into(),
                message_count: 1,
                last_message_at: now,
            }))
            .await;

        let snapshot = h.snapshot_until(|s| !s.conversations.is_empty()).await;
        assert_eq!(snapshot.conversations[0].unread, 1);
        assert_eq!(snapshot.conversations[0].last_message.as_deref(), Some("hello"));

        h.handle.open_conversation(room.clone()).await.unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.conversations[0].unread, 0);
        assert!(h
            .connector
            .sent_frames()
            .contains(&ClientFrame::Join { room }));
    }

    #[tokio::test]
    async fn test_open_direct_opens_resolved_room() {
        let h = harness("alice").await;
        let room = h.handle.open_direct("bob".into()).await.unwrap();
        assert_eq!(room, RoomId::from("dm:resolved"));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active, Some(room));
    }

    #[tokio::test]
    async fn test_reconnects_after_push_drop() {
        let mut h = harness("alice").await;
        let room = RoomId::from("g-1");
        h.handle.open_conversation(room.clone()).await.unwrap();
        h.connector.sent_frames();

        h.connector.drop_link();
        h.wait_for(|u| matches!(u, SessionUpdate::Disconnected)).await;
        h.wait_for(|u| matches!(u, SessionUpdate::Connected)).await;

        assert_eq!(h.connector.connects(), 2);
        let snapshot = h.snapshot_until(|s| s.connected).await;
        assert_eq!(snapshot.active, Some(room.clone()));
        assert!(h
            .connector
            .sent_frames()
            .contains(&ClientFrame::Join { room }));
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let h = harness("alice").await;
        h.handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            h.handle.snapshot().await,
            Err(ClientError::SessionClosed)
        ));
    }
}

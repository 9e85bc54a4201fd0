//! Client reconciliation engine.
//!
//! Merges three asynchronous sources into one duplicate-free view: the
//! optimistic local insert, the send response, and the pushed fan-out echo.
//! The [`Reconciler`] does no I/O; it returns [`Effect`]s that the session
//! loop carries out and feeds the results back in.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use murmur_shared::protocol::{ChatMessage, ConversationSummary, Notification, ServerEvent};
use murmur_shared::types::{RoomId, UserId};

use crate::conversations::{ConversationList, TouchOutcome};
use crate::cursors::ReadCursorStore;
use crate::error::{ClientError, Result};
use crate::inbox::NotificationInbox;
use crate::rate_guard::SendGuard;
use crate::timeline::Timeline;

/// Work the reconciler asks the session to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RefreshConversations,
    RefreshNotifications,
    FetchMessages(RoomId),
    Join(RoomId),
    Leave(RoomId),
}

#[derive(Debug)]
struct PendingSend {
    room: RoomId,
    content: String,
}

pub struct Reconciler {
    user: UserId,
    active: Option<RoomId>,
    timelines: HashMap<RoomId, Timeline>,
    in_flight: HashMap<Uuid, PendingSend>,
    conversations: ConversationList,
    inbox: NotificationInbox,
    cursors: Box<dyn ReadCursorStore>,
    guard: SendGuard,
}

impl Reconciler {
    pub fn new(user: UserId, cursors: Box<dyn ReadCursorStore>, send_cooldown: Duration) -> Self {
        Self {
            user,
            active: None,
            timelines: HashMap::new(),
            in_flight: HashMap::new(),
            conversations: ConversationList::new(),
            inbox: NotificationInbox::new(),
            cursors,
            guard: SendGuard::new(send_cooldown),
        }
    }

    // ─── Sending ───

    /// Validate a send and insert its provisional entry.
    ///
    /// Returns the local id to pass to [`Reconciler::complete_send`] once the
    /// request resolves.
    pub fn begin_send(&mut self, room: &RoomId, content: &str) -> Result<Uuid> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if !self.guard.check(room, content) {
            debug!(room = %room, "Suppressed duplicate send");
            return Err(ClientError::DuplicateSend);
        }

        let user = self.user.clone();
        let local_id = self.timeline_mut(room).insert_provisional(&user, content);
        self.in_flight.insert(
            local_id,
            PendingSend {
                room: room.clone(),
                content: content.to_string(),
            },
        );
        Ok(local_id)
    }

    /// Resolve a provisional entry with the outcome of its request.
    ///
    /// On failure the provisional entry is removed and the guard forgets the
    /// attempt so the user can retry at once.
    pub fn complete_send(
        &mut self,
        local_id: Uuid,
        outcome: Result<ChatMessage>,
    ) -> Result<ChatMessage> {
        let pending = self.in_flight.remove(&local_id);

        match outcome {
            Ok(message) => {
                let timeline = self.timeline_mut(&message.room_id);
                if !timeline.confirm_provisional(local_id, message.clone()) {
                    debug!(id = %message.id, "Echo arrived before the send response");
                }
                Ok(message)
            }
            Err(e) => {
                if let Some(PendingSend { room, content }) = pending {
                    if let Some(timeline) = self.timelines.get_mut(&room) {
                        timeline.discard_provisional(local_id);
                    }
                    self.guard.forget(&room, &content);
                }
                Err(e)
            }
        }
    }

    // ─── Push ───

    pub fn on_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            ServerEvent::NewMessage(message) => {
                let room = message.room_id.clone();
                if !self.timeline_mut(&room).confirm(message) {
                    debug!(room = %room, "Duplicate message push ignored");
                }
            }
            ServerEvent::ConversationTouched(touched) => {
                if self.conversations.apply_touched(&touched) == TouchOutcome::Unknown {
                    debug!(room = %touched.room_id, "Touched conversation not listed, refreshing");
                    effects.push(Effect::RefreshConversations);
                }

                let viewing = self.active.as_ref() == Some(&touched.room_id);
                if viewing || touched.sender_id == self.user {
                    self.acknowledge(&touched.room_id, touched.message_count);
                } else {
                    let ack = self.cursors.get(&touched.room_id);
                    self.conversations.set_acknowledged(&touched.room_id, ack);
                }
            }
            ServerEvent::NotificationNew(notification) => {
                self.inbox.insert(notification);
            }
            ServerEvent::NotificationRead { id } => {
                self.inbox.mark_read(id);
            }
            ServerEvent::Error { message } => {
                warn!(message = %message, "Server reported an error");
            }
            ServerEvent::Joined { room } => debug!(room = %room, "Joined room"),
            ServerEvent::Left { room } => debug!(room = %room, "Left room"),
            ServerEvent::Pong => {}
        }

        effects
    }

    // ─── Navigation ───

    /// Make `room` the viewed conversation.
    ///
    /// Acknowledges the count known at the moment of the switch; messages that
    /// arrive afterwards are handled as they come.
    pub fn open_conversation(&mut self, room: RoomId) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(previous) = self.active.take() {
            if previous != room {
                effects.push(Effect::Leave(previous));
            }
        }

        if let Some(total) = self.conversations.get(&room).map(|c| c.message_count) {
            self.acknowledge(&room, total);
        }
        self.timeline_mut(&room);

        effects.push(Effect::Join(room.clone()));
        effects.push(Effect::FetchMessages(room.clone()));
        self.active = Some(room);
        effects
    }

    pub fn close_conversation(&mut self) -> Vec<Effect> {
        match self.active.take() {
            Some(room) => vec![Effect::Leave(room)],
            None => Vec::new(),
        }
    }

    /// Everything to redo after the push connection (re)opens. Publishes
    /// missed while disconnected are never replayed.
    pub fn reconnected(&self) -> Vec<Effect> {
        let mut effects = vec![Effect::RefreshConversations, Effect::RefreshNotifications];
        if let Some(room) = &self.active {
            effects.push(Effect::Join(room.clone()));
            effects.push(Effect::FetchMessages(room.clone()));
        }
        effects
    }

    // ─── Fetch results ───

    pub fn apply_messages(&mut self, room: &RoomId, messages: Vec<ChatMessage>) {
        self.timeline_mut(room).merge_confirmed(messages);
    }

    pub fn apply_conversations(&mut self, summaries: Vec<ConversationSummary>) {
        let cursors = &self.cursors;
        self.conversations
            .replace_all(summaries, |room| cursors.get(room));

        if let Some(room) = self.active.clone() {
            if let Some(total) = self.conversations.get(&room).map(|c| c.message_count) {
                self.acknowledge(&room, total);
            }
        }
    }

    pub fn apply_notifications(&mut self, notifications: Vec<Notification>) {
        self.inbox.replace_all(notifications);
    }

    pub fn mark_notification_read(&mut self, id: Uuid) -> bool {
        self.inbox.mark_read(id)
    }

    // ─── Accessors ───

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn active(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    pub fn timeline(&self, room: &RoomId) -> Option<&Timeline> {
        self.timelines.get(room)
    }

    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    pub fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    pub fn unread(&self, room: &RoomId) -> u64 {
        self.conversations.get(room).map(|c| c.unread).unwrap_or(0)
    }

    pub fn acknowledged(&self, room: &RoomId) -> u64 {
        self.cursors.get(room)
    }

    fn timeline_mut(&mut self, room: &RoomId) -> &mut Timeline {
        self.timelines
            .entry(room.clone())
            .or_insert_with(|| Timeline::new(room.clone()))
    }

    /// Advance the read cursor to `total`. Never moves it backwards.
    fn acknowledge(&mut self, room: &RoomId, total: u64) {
        let ack = self.cursors.get(room).max(total);
        if let Err(e) = self.cursors.set(room, ack) {
            warn!(room = %room, error = %e, "Failed to persist read cursor");
        }
        self.conversations.set_acknowledged(room, ack);
    }
}

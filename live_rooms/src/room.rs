//! Per-room state machine.
//!
//! [`RoomState`] holds the membership and lifecycle of one room and exposes
//! every mutation as a pure transition: it returns the resulting view plus the
//! effects (broadcasts and durable writes) the mutation calls for, without
//! performing any of them. [`Room`] wraps the state in the room's critical
//! section, resolves broadcast recipients under that same lock, and executes
//! the effects once the lock is released.

use std::collections::VecDeque;

use parking_lot::Mutex;
use room_api::{MemberNotice, RoomEnded, ServerEvent};

use crate::channel::{ClientChannel, ConnId};
use crate::error::RoomError;
use crate::fanout::{Audience, Delivery};
use crate::model::{now_ms, Identity, Message, Participant, RoomSpec, RoomStatus, RoomView};
use crate::outbox::{Intent, Outbox};

/// A participant's membership record.
#[derive(Debug, Clone)]
pub struct Membership {
    pub identity: Identity,
    pub joined_at: i64,
    /// Absent when the member is known but not currently connected.
    pub channel: Option<ClientChannel>,
}

/// Side effect requested by a transition.
#[derive(Debug)]
pub enum Effect {
    Broadcast { audience: Audience, event: ServerEvent },
    PersistRoom(RoomView),
    PersistMessage(Message),
    UpdateMessage(Message),
}

/// Outcome of a state transition.
#[derive(Debug)]
pub struct Transition {
    pub view: RoomView,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    id: String,
    title: String,
    description: Option<String>,
    category: Option<String>,
    admin: Identity,
    created_at: i64,
    participants: Vec<Membership>,
    status: RoomStatus,
    max_participants: usize,
    last_activity: i64,
    ended_at: Option<i64>,
}

impl RoomState {
    /// A new live room whose only member is its admin.
    pub fn new(
        id: String,
        spec: &RoomSpec,
        admin: Identity,
        channel: Option<ClientChannel>,
        max_participants: usize,
        now: i64,
    ) -> Self {
        Self {
            id,
            title: spec.title.trim().to_string(),
            description: spec.description.clone(),
            category: spec.category.clone(),
            admin: admin.clone(),
            created_at: now,
            participants: vec![Membership {
                identity: admin,
                joined_at: now,
                channel,
            }],
            status: RoomStatus::Live,
            max_participants,
            last_activity: now,
            ended_at: None,
        }
    }

    /// Rebuild from a stored snapshot. Members come back without channels.
    pub fn from_record(record: RoomView) -> Self {
        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            category: record.category,
            admin: record.admin,
            created_at: record.created_at,
            participants: record
                .participants
                .into_iter()
                .map(|p| Membership {
                    identity: p.identity,
                    joined_at: p.joined_at,
                    channel: None,
                })
                .collect(),
            status: record.status,
            max_participants: record.max_participants,
            last_activity: record.last_activity,
            ended_at: record.ended_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn ended_at(&self) -> Option<i64> {
        self.ended_at
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn member(&self, uid: &str) -> Option<&Membership> {
        self.participants.iter().find(|m| m.identity.uid == uid)
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.member(uid).is_some()
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            admin: self.admin.clone(),
            participants: self
                .participants
                .iter()
                .map(|m| Participant {
                    identity: m.identity.clone(),
                    joined_at: m.joined_at,
                })
                .collect(),
            current_participants: self.participants.len(),
            max_participants: self.max_participants,
            status: self.status,
            created_at: self.created_at,
            last_activity: self.last_activity,
            ended_at: self.ended_at,
        }
    }

    /// Connected channels of the members selected by `audience`.
    pub fn recipients(&self, audience: &Audience) -> Vec<ClientChannel> {
        self.participants
            .iter()
            .filter(|m| audience.includes(&m.identity.uid))
            .filter_map(|m| m.channel.clone())
            .collect()
    }

    fn ensure_live(&self) -> Result<(), RoomError> {
        if self.status == RoomStatus::Live {
            Ok(())
        } else {
            Err(RoomError::NotLive)
        }
    }

    fn ensure_member(&self, uid: &str) -> Result<(), RoomError> {
        if self.is_member(uid) {
            Ok(())
        } else {
            Err(RoomError::NotAMember(uid.to_string()))
        }
    }

    /// Effects announcing a freshly created room to its admin.
    pub fn created(&self) -> Transition {
        let view = self.view();
        Transition {
            effects: vec![
                Effect::Broadcast {
                    audience: Audience::Member(self.admin.uid.clone()),
                    event: ServerEvent::RoomCreated(view.clone()),
                },
                Effect::PersistRoom(view.clone()),
            ],
            view,
        }
    }

    /// Add a member, or swap the channel of an existing one.
    pub fn join(
        &mut self,
        identity: Identity,
        channel: Option<ClientChannel>,
        now: i64,
    ) -> Result<Transition, RoomError> {
        self.ensure_live()?;
        let uid = identity.uid.clone();
        let rejoined = match self.participants.iter_mut().find(|m| m.identity.uid == uid) {
            Some(existing) => {
                existing.channel = channel;
                existing.identity = identity.clone();
                true
            }
            None => {
                if self.participants.len() >= self.max_participants {
                    return Err(RoomError::Full);
                }
                self.participants.push(Membership {
                    identity: identity.clone(),
                    joined_at: now,
                    channel,
                });
                false
            }
        };
        self.tick(now);

        let view = self.view();
        let mut effects = vec![Effect::Broadcast {
            audience: Audience::Member(uid.clone()),
            event: ServerEvent::RoomUpdated(view.clone()),
        }];
        if !rejoined {
            effects.push(Effect::Broadcast {
                audience: Audience::Others(uid.clone()),
                event: ServerEvent::UserJoined(MemberNotice {
                    room_id: self.id.clone(),
                    user: identity,
                }),
            });
        }
        effects.push(Effect::Broadcast {
            audience: Audience::Others(uid),
            event: ServerEvent::RoomUpdated(view.clone()),
        });
        effects.push(Effect::PersistRoom(view.clone()));
        Ok(Transition { view, effects })
    }

    /// Remove a member. Leaving when not a member is a no-op.
    pub fn leave(&mut self, uid: &str, now: i64) -> Result<Transition, RoomError> {
        self.ensure_live()?;
        let removed = self
            .participants
            .iter()
            .position(|m| m.identity.uid == uid)
            .map(|idx| self.participants.remove(idx));
        Ok(self.after_leave(removed, now))
    }

    /// Remove a member only if its channel still belongs to `conn`.
    ///
    /// Used on disconnect: the same uid may since have re-joined from another
    /// connection, and that membership must survive.
    pub fn leave_connection(
        &mut self,
        uid: &str,
        conn: ConnId,
        now: i64,
    ) -> Result<Transition, RoomError> {
        self.ensure_live()?;
        let removed = self
            .participants
            .iter()
            .position(|m| {
                m.identity.uid == uid && m.channel.as_ref().map(|c| c.conn()) == Some(conn)
            })
            .map(|idx| self.participants.remove(idx));
        Ok(self.after_leave(removed, now))
    }

    fn after_leave(&mut self, removed: Option<Membership>, now: i64) -> Transition {
        self.tick(now);
        let view = self.view();
        let Some(gone) = removed else {
            return Transition {
                view,
                effects: Vec::new(),
            };
        };
        Transition {
            effects: vec![
                Effect::Broadcast {
                    audience: Audience::Everyone,
                    event: ServerEvent::UserLeft(MemberNotice {
                        room_id: self.id.clone(),
                        user: gone.identity,
                    }),
                },
                Effect::Broadcast {
                    audience: Audience::Everyone,
                    event: ServerEvent::RoomUpdated(view.clone()),
                },
                Effect::PersistRoom(view.clone()),
            ],
            view,
        }
    }

    /// Swap the channel of an existing member. Returns false for non-members.
    pub fn replace_channel(&mut self, uid: &str, channel: Option<ClientChannel>) -> bool {
        match self.participants.iter_mut().find(|m| m.identity.uid == uid) {
            Some(member) => {
                member.channel = channel;
                true
            }
            None => false,
        }
    }

    /// End the stream. Admin only and terminal.
    pub fn end_stream(&mut self, requester_uid: &str, now: i64) -> Result<Transition, RoomError> {
        if requester_uid != self.admin.uid {
            return Err(RoomError::Unauthorized);
        }
        self.ensure_live()?;
        let ended_at = self.tick(now);
        self.status = RoomStatus::Ended;
        self.ended_at = Some(ended_at);
        let view = self.view();
        Ok(Transition {
            effects: vec![
                Effect::Broadcast {
                    audience: Audience::Everyone,
                    event: ServerEvent::RoomDeleted(RoomEnded {
                        room_id: self.id.clone(),
                        ended_at,
                    }),
                },
                Effect::PersistRoom(view.clone()),
            ],
            view,
        })
    }

    pub fn touch(&mut self, now: i64) {
        self.tick(now);
    }

    /// Advance the room clock. Stamps are strictly increasing, so a message
    /// stamped before a join was never delivered live to that joiner.
    fn tick(&mut self, now: i64) -> i64 {
        self.last_activity = now.max(self.last_activity + 1);
        self.last_activity
    }

    /// Accept a new message from a member and fan it out to the whole room.
    /// The message is stamped with the room clock.
    pub fn post_message(&mut self, mut message: Message, now: i64) -> Result<Transition, RoomError> {
        self.ensure_live()?;
        self.ensure_member(&message.author.uid)?;
        message.created_at = self.tick(now);
        let view = self.view();
        Ok(Transition {
            effects: vec![
                Effect::PersistMessage(message.clone()),
                Effect::Broadcast {
                    audience: Audience::Everyone,
                    event: ServerEvent::NewMessage(message),
                },
                Effect::PersistRoom(view.clone()),
            ],
            view,
        })
    }

    /// Publish a changed message (edit, delete, reaction, pin) to the room.
    pub fn publish_update(&mut self, actor_uid: &str, message: Message) -> Result<Transition, RoomError> {
        self.ensure_live()?;
        self.ensure_member(actor_uid)?;
        Ok(Transition {
            effects: vec![
                Effect::UpdateMessage(message.clone()),
                Effect::Broadcast {
                    audience: Audience::Everyone,
                    event: ServerEvent::MessageUpdated(message),
                },
            ],
            view: self.view(),
        })
    }

    /// Relay an event from a member without changing state.
    pub fn relay(
        &self,
        from_uid: &str,
        audience: Audience,
        event: ServerEvent,
    ) -> Result<Transition, RoomError> {
        self.ensure_live()?;
        self.ensure_member(from_uid)?;
        Ok(Transition {
            effects: vec![Effect::Broadcast { audience, event }],
            view: self.view(),
        })
    }
}

enum Pending {
    Deliver(Delivery),
    Persist(Intent),
}

struct Guarded {
    state: RoomState,
    pending: VecDeque<Pending>,
}

/// A room together with its critical section.
///
/// Every mutation runs under `guarded`. Effects are queued in mutation order
/// under that lock and executed after it is released; `dispatch` makes sure
/// only one caller drains the queue at a time, so recipients observe events
/// in the room's serialization order.
pub struct Room {
    id: String,
    guarded: Mutex<Guarded>,
    dispatch: Mutex<()>,
    edits: tokio::sync::Mutex<()>,
}

impl Room {
    pub fn new(state: RoomState) -> Self {
        Self {
            id: state.id.clone(),
            guarded: Mutex::new(Guarded {
                state,
                pending: VecDeque::new(),
            }),
            dispatch: Mutex::new(()),
            edits: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn view(&self) -> RoomView {
        self.guarded.lock().state.view()
    }

    pub fn status(&self) -> RoomStatus {
        self.guarded.lock().state.status()
    }

    pub fn ended_at(&self) -> Option<i64> {
        self.guarded.lock().state.ended_at()
    }

    pub fn admin(&self) -> Identity {
        self.guarded.lock().state.admin().clone()
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.guarded.lock().state.is_member(uid)
    }

    /// Serializes read-modify-write cycles on this room's stored messages.
    pub async fn lock_edits(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.edits.lock().await
    }

    /// Run a transition under the room lock, then execute its effects.
    pub fn apply<F>(&self, outbox: &Outbox, transition: F) -> Result<RoomView, RoomError>
    where
        F: FnOnce(&mut RoomState) -> Result<Transition, RoomError>,
    {
        let view = {
            let mut guarded = self.guarded.lock();
            let Transition { view, effects } = transition(&mut guarded.state)?;
            for effect in effects {
                let pending = match effect {
                    Effect::Broadcast { audience, event } => {
                        let recipients = guarded.state.recipients(&audience);
                        Pending::Deliver(Delivery::new(recipients, event))
                    }
                    Effect::PersistRoom(room) => Pending::Persist(Intent::UpsertRoom(room)),
                    Effect::PersistMessage(msg) => Pending::Persist(Intent::AppendMessage(msg)),
                    Effect::UpdateMessage(msg) => Pending::Persist(Intent::UpdateMessage(msg)),
                };
                guarded.pending.push_back(pending);
            }
            view
        };
        self.flush(outbox);
        Ok(view)
    }

    fn flush(&self, outbox: &Outbox) {
        let _turn = self.dispatch.lock();
        loop {
            let batch: Vec<Pending> = self.guarded.lock().pending.drain(..).collect();
            if batch.is_empty() {
                break;
            }
            for item in batch {
                match item {
                    Pending::Deliver(delivery) => {
                        delivery.send();
                    }
                    Pending::Persist(intent) => outbox.enqueue(intent),
                }
            }
        }
    }

    pub fn announce_created(&self, outbox: &Outbox) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| Ok(state.created()))
    }

    pub fn join(
        &self,
        outbox: &Outbox,
        identity: Identity,
        channel: Option<ClientChannel>,
    ) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.join(identity, channel, now_ms()))
    }

    pub fn leave(&self, outbox: &Outbox, uid: &str) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.leave(uid, now_ms()))
    }

    pub fn leave_connection(
        &self,
        outbox: &Outbox,
        uid: &str,
        conn: ConnId,
    ) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.leave_connection(uid, conn, now_ms()))
    }

    pub fn replace_channel(&self, uid: &str, channel: Option<ClientChannel>) -> bool {
        self.guarded.lock().state.replace_channel(uid, channel)
    }

    pub fn end_stream(&self, outbox: &Outbox, requester_uid: &str) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.end_stream(requester_uid, now_ms()))
    }

    pub fn touch(&self) {
        self.guarded.lock().state.touch(now_ms());
    }

    pub fn post_message(&self, outbox: &Outbox, message: Message) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.post_message(message, now_ms()))
    }

    pub fn publish_update(
        &self,
        outbox: &Outbox,
        actor_uid: &str,
        message: Message,
    ) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.publish_update(actor_uid, message))
    }

    pub fn relay(
        &self,
        outbox: &Outbox,
        from_uid: &str,
        audience: Audience,
        event: ServerEvent,
    ) -> Result<RoomView, RoomError> {
        self.apply(outbox, |state| state.relay(from_uid, audience, event))
    }
}

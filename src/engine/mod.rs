mod availability;
mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;

pub use error::EngineError;
pub use mutations::{ReservationDraft, RoomDraft, UserChanges};
pub use policy::{BookingPolicy, RuleViolation};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalHandle};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// The authenticated identity a mutation runs as. Admins bypass ownership
/// checks, never policy checks.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// The reservation engine: all rooms, users and reservations, WAL-backed.
///
/// Each room's state sits behind its own `RwLock`; a mutation holds the
/// write lock from the conflict check through WAL append and application,
/// so two racing requests for the same room serialize and the second one
/// sees the first one's booking.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    users: DashMap<Ulid, User>,
    /// Lowercased email → user id.
    users_by_email: DashMap<String, Ulid>,
    /// Reservation id → room id.
    reservation_rooms: DashMap<Ulid, Ulid>,
    wal: WalHandle,
    policy: BookingPolicy,
}

/// Apply a room-scoped event to a RoomState (no locking — caller holds the
/// lock). `ReservationUpdated` here covers the same-room case only; moves
/// hold both room locks and are applied by the engine directly.
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated {
            name,
            description,
            capacity,
            image,
            position,
            ..
        } => {
            rs.room.name = name.clone();
            rs.room.description = description.clone();
            rs.room.capacity = *capacity;
            rs.room.image = image.clone();
            rs.room.position = *position;
        }
        Event::ReservationCreated {
            id,
            room_id,
            owner_id,
            title,
            description,
            slot,
        } => {
            rs.insert(Reservation {
                id: *id,
                title: title.clone(),
                description: description.clone(),
                slot: *slot,
                owner_id: *owner_id,
                room_id: *room_id,
            });
            index.insert(*id, *room_id);
        }
        Event::ReservationUpdated {
            id,
            room_id,
            owner_id,
            title,
            description,
            slot,
        } => {
            rs.remove(*id);
            rs.insert(Reservation {
                id: *id,
                title: title.clone(),
                description: description.clone(),
                slot: *slot,
                owner_id: *owner_id,
                room_id: *room_id,
            });
            index.insert(*id, *room_id);
        }
        Event::ReservationDeleted { id, .. } => {
            rs.remove(*id);
            index.remove(id);
        }
        // Room/user lifecycle is handled at the map level, not here
        _ => {}
    }
}

fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::ReservationCreated { room_id, .. }
        | Event::ReservationUpdated { room_id, .. }
        | Event::ReservationDeleted { room_id, .. } => Some(*room_id),
        _ => None,
    }
}

impl Engine {
    /// Replay the WAL at `wal_path`, then open it for appending.
    pub fn new(wal_path: PathBuf, policy: BookingPolicy) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            users_by_email: DashMap::new(),
            reservation_rooms: DashMap::new(),
            wal,
            policy,
        };

        // We are the sole owner of the Arcs during replay, so try_write
        // always succeeds instantly. Never blocking_write here — replay may
        // run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated {
                id,
                name,
                description,
                capacity,
                image,
                position,
            } => {
                let room = Room {
                    id: *id,
                    name: name.clone(),
                    description: description.clone(),
                    capacity: *capacity,
                    image: image.clone(),
                    position: *position,
                };
                self.rooms
                    .insert(*id, Arc::new(RwLock::new(RoomState::new(room))));
            }
            Event::RoomDeleted { id } => {
                if let Some((_, rs)) = self.rooms.remove(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    for r in &guard.reservations {
                        self.reservation_rooms.remove(&r.id);
                    }
                }
            }
            Event::UserRegistered {
                id,
                email,
                password_hash,
                role,
                created_at,
            } => {
                self.users_by_email.insert(email.clone(), *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        email: email.clone(),
                        password_hash: password_hash.clone(),
                        role: *role,
                        created_at: *created_at,
                    },
                );
            }
            Event::UserUpdated {
                id,
                email,
                password_hash,
                role,
            } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    if user.email != *email {
                        self.users_by_email.remove(&user.email);
                        self.users_by_email.insert(email.clone(), *id);
                    }
                    user.email = email.clone();
                    if let Some(hash) = password_hash {
                        user.password_hash = hash.clone();
                    }
                    user.role = *role;
                }
            }
            Event::UserDeleted { id } => {
                if let Some((_, user)) = self.users.remove(id) {
                    self.users_by_email.remove(&user.email);
                }
            }
            Event::ReservationUpdated { id, room_id, .. } => {
                // May be a move: detach from the previous room first.
                if let Some(prev) = self.reservation_rooms.get(id).map(|e| *e.value())
                    && prev != *room_id
                    && let Some(prev_rs) = self.get_room(&prev)
                {
                    prev_rs
                        .try_write()
                        .expect("replay: uncontended write")
                        .remove(*id);
                }
                if let Some(rs) = self.get_room(room_id) {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_room(&mut guard, event, &self.reservation_rooms);
                }
            }
            other => {
                if let Some(room_id) = event_room_id(other)
                    && let Some(rs) = self.get_room(&room_id)
                {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_room(&mut guard, other, &self.reservation_rooms);
                }
            }
        }
    }

    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal
            .append(event)
            .await
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append + apply under the caller's lock, in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_rooms);
        Ok(())
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_rooms.get(id).map(|e| *e.value())
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Resolve an explicit room id, or the sole room when the deployment has
    /// exactly one (the single-room setup never sends room ids).
    pub(super) fn resolve_room_id(&self, explicit: Option<Ulid>) -> Result<Ulid, EngineError> {
        match explicit {
            Some(id) => Ok(id),
            None => {
                let mut rooms = self.rooms.iter();
                match (rooms.next(), rooms.next()) {
                    (Some(only), None) => Ok(*only.key()),
                    _ => Err(EngineError::Invalid("room_id is required")),
                }
            }
        }
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            let u = entry.value();
            events.push(Event::UserRegistered {
                id: u.id,
                email: u.email.clone(),
                password_hash: u.password_hash.clone(),
                role: u.role,
                created_at: u.created_at,
            });
        }

        let room_states: Vec<SharedRoomState> =
            self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_states {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.room.id,
                name: guard.room.name.clone(),
                description: guard.room.description.clone(),
                capacity: guard.room.capacity,
                image: guard.room.image.clone(),
                position: guard.room.position,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    room_id: r.room_id,
                    owner_id: r.owner_id,
                    title: r.title.clone(),
                    description: r.description.clone(),
                    slot: r.slot,
                });
            }
        }

        self.wal
            .compact(events)
            .await
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}

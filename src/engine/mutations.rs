use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_local};
use super::{Actor, Engine, EngineError, RuleViolation, apply_to_room};

/// Caller-supplied reservation fields, parsed and typed at the boundary.
#[derive(Debug, Clone)]
pub struct ReservationDraft {
    pub title: String,
    pub description: String,
    pub slot: Slot,
    /// May be omitted in a single-room deployment.
    pub room_id: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct RoomDraft {
    pub name: String,
    pub description: String,
    pub capacity: u32,
    pub image: Option<String>,
    pub position: i64,
}

/// Partial update for a user; None fields stay unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
}

fn check_reservation_fields(title: &str, description: &str) -> Result<(), EngineError> {
    if title.is_empty() {
        return Err(EngineError::Validation(RuleViolation::MissingFields(
            "title, start and end are required",
        )));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

fn check_room_fields(draft: &RoomDraft) -> Result<(), EngineError> {
    if draft.name.trim().is_empty() {
        return Err(EngineError::Invalid("name and capacity are required"));
    }
    if draft.name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if draft.description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if draft.capacity == 0 {
        return Err(EngineError::Invalid("capacity must be greater than 0"));
    }
    if let Some(ref image) = draft.image
        && image.len() > MAX_IMAGE_REF_LEN
    {
        return Err(EngineError::LimitExceeded("image reference too long"));
    }
    Ok(())
}

impl Engine {
    // ── Reservation lifecycle ────────────────────────────────────

    /// Validate, conflict-check and persist a new reservation owned by the
    /// caller. The room's write lock is held from the conflict check until
    /// the booking is applied, so concurrent creates for the same room
    /// serialize and at most one of two overlapping requests succeeds.
    pub async fn create_reservation(
        &self,
        actor: Actor,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let title = draft.title.trim().to_string();
        check_reservation_fields(&title, &draft.description)?;

        let room_id = self.resolve_room_id(draft.room_id)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;

        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }

        self.policy
            .validate(&draft.slot, now_local())
            .map_err(EngineError::Validation)?;
        check_no_conflict(&guard, &draft.slot, None).inspect_err(|_| {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
        })?;

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            id,
            room_id,
            owner_id: actor.id,
            title: title.clone(),
            description: draft.description.clone(),
            slot: draft.slot,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);

        Ok(Reservation {
            id,
            title,
            description: draft.description,
            slot: draft.slot,
            owner_id: actor.id,
            room_id,
        })
    }

    /// Re-validate and persist new fields for an existing reservation,
    /// excluding it from its own conflict check. Only the owner or an admin
    /// may update; the stored owner is preserved either way.
    pub async fn update_reservation(
        &self,
        actor: Actor,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let title = draft.title.trim().to_string();
        check_reservation_fields(&title, &draft.description)?;

        let old_room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let new_room_id = match draft.room_id {
            Some(rid) => rid,
            None => old_room_id,
        };

        if new_room_id == old_room_id {
            let rs = self
                .get_room(&old_room_id)
                .ok_or(EngineError::NotFound(old_room_id))?;
            let mut guard = rs.write().await;

            let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
            if !actor.is_admin() && existing.owner_id != actor.id {
                return Err(EngineError::Forbidden("not the owner of this reservation"));
            }
            let owner_id = existing.owner_id;

            self.policy
                .validate(&draft.slot, now_local())
                .map_err(EngineError::Validation)?;
            check_no_conflict(&guard, &draft.slot, Some(id)).inspect_err(|_| {
                metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            })?;

            let event = Event::ReservationUpdated {
                id,
                room_id: old_room_id,
                owner_id,
                title: title.clone(),
                description: draft.description.clone(),
                slot: draft.slot,
            };
            self.persist_and_apply(&mut guard, &event).await?;

            return Ok(Reservation {
                id,
                title,
                description: draft.description,
                slot: draft.slot,
                owner_id,
                room_id: old_room_id,
            });
        }

        // Move between rooms: both write locks, acquired in sorted id order
        // so two concurrent moves cannot deadlock.
        let src = self
            .get_room(&old_room_id)
            .ok_or(EngineError::NotFound(old_room_id))?;
        let dst = self
            .get_room(&new_room_id)
            .ok_or(EngineError::NotFound(new_room_id))?;

        let (mut src_guard, mut dst_guard) = if old_room_id < new_room_id {
            let s = src.write_owned().await;
            let d = dst.write_owned().await;
            (s, d)
        } else {
            let d = dst.write_owned().await;
            let s = src.write_owned().await;
            (s, d)
        };

        let existing = src_guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !actor.is_admin() && existing.owner_id != actor.id {
            return Err(EngineError::Forbidden("not the owner of this reservation"));
        }
        let owner_id = existing.owner_id;

        if dst_guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }
        self.policy
            .validate(&draft.slot, now_local())
            .map_err(EngineError::Validation)?;
        check_no_conflict(&dst_guard, &draft.slot, Some(id)).inspect_err(|_| {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
        })?;

        let event = Event::ReservationUpdated {
            id,
            room_id: new_room_id,
            owner_id,
            title: title.clone(),
            description: draft.description.clone(),
            slot: draft.slot,
        };
        self.wal_append(&event).await?;
        src_guard.remove(id);
        apply_to_room(&mut dst_guard, &event, &self.reservation_rooms);

        Ok(Reservation {
            id,
            title,
            description: draft.description,
            slot: draft.slot,
            owner_id,
            room_id: new_room_id,
        })
    }

    /// Hard removal. Only the owner or an admin.
    pub async fn delete_reservation(&self, actor: Actor, id: Ulid) -> Result<(), EngineError> {
        let room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;

        let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !actor.is_admin() && existing.owner_id != actor.id {
            return Err(EngineError::Forbidden("not the owner of this reservation"));
        }

        let event = Event::ReservationDeleted { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Room management ──────────────────────────────────────────

    pub async fn create_room(&self, draft: RoomDraft) -> Result<Room, EngineError> {
        check_room_fields(&draft)?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let id = Ulid::new();
        let event = Event::RoomCreated {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            capacity: draft.capacity,
            image: draft.image.clone(),
            position: draft.position,
        };
        self.wal_append(&event).await?;

        let room = Room {
            id,
            name: draft.name,
            description: draft.description,
            capacity: draft.capacity,
            image: draft.image,
            position: draft.position,
        };
        self.rooms.insert(
            id,
            std::sync::Arc::new(tokio::sync::RwLock::new(RoomState::new(room.clone()))),
        );
        metrics::gauge!(observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        Ok(room)
    }

    pub async fn update_room(&self, id: Ulid, draft: RoomDraft) -> Result<Room, EngineError> {
        check_room_fields(&draft)?;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::RoomUpdated {
            id,
            name: draft.name,
            description: draft.description,
            capacity: draft.capacity,
            image: draft.image,
            position: draft.position,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.room.clone())
    }

    /// Deleting a room takes its reservations with it.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;

        for r in &guard.reservations {
            self.reservation_rooms.remove(&r.id);
        }
        drop(guard);
        self.rooms.remove(&id);
        metrics::gauge!(observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        Ok(())
    }

    // ── User management ──────────────────────────────────────────

    /// Store a new user. `email` is lowercased; the caller has already
    /// hashed the password.
    pub async fn register_user(
        &self,
        email: &str,
        password_hash: String,
        role: Role,
    ) -> Result<User, EngineError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(EngineError::Invalid("email and password are required"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users_by_email.contains_key(&email) {
            return Err(EngineError::EmailTaken);
        }

        let id = Ulid::new();
        let created_at = now_local();
        let event = Event::UserRegistered {
            id,
            email: email.clone(),
            password_hash: password_hash.clone(),
            role,
            created_at,
        };
        self.wal_append(&event).await?;

        let user = User {
            id,
            email: email.clone(),
            password_hash,
            role,
            created_at,
        };
        self.users_by_email.insert(email, id);
        self.users.insert(id, user.clone());
        metrics::gauge!(observability::USERS_ACTIVE).set(self.users.len() as f64);
        Ok(user)
    }

    /// Admin-side user update. An admin cannot change their own role.
    pub async fn update_user(
        &self,
        actor: Actor,
        id: Ulid,
        changes: UserChanges,
    ) -> Result<User, EngineError> {
        if changes.email.is_none() && changes.password_hash.is_none() && changes.role.is_none() {
            return Err(EngineError::Invalid("nothing to update"));
        }

        let existing = self
            .users
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        // Self-action guard, separate from general ownership logic.
        if id == actor.id
            && let Some(role) = changes.role
            && role != existing.role
        {
            return Err(EngineError::Forbidden("you cannot change your own role"));
        }

        let new_email = match changes.email {
            Some(ref e) => {
                let e = e.trim().to_lowercase();
                if e.is_empty() {
                    return Err(EngineError::Invalid("email must not be empty"));
                }
                if e.len() > MAX_EMAIL_LEN {
                    return Err(EngineError::LimitExceeded("email too long"));
                }
                if e != existing.email && self.users_by_email.contains_key(&e) {
                    return Err(EngineError::EmailTaken);
                }
                e
            }
            None => existing.email.clone(),
        };
        let new_role = changes.role.unwrap_or(existing.role);

        let event = Event::UserUpdated {
            id,
            email: new_email.clone(),
            password_hash: changes.password_hash.clone(),
            role: new_role,
        };
        self.wal_append(&event).await?;

        if new_email != existing.email {
            self.users_by_email.remove(&existing.email);
            self.users_by_email.insert(new_email.clone(), id);
        }
        let mut updated = existing;
        updated.email = new_email;
        if let Some(hash) = changes.password_hash {
            updated.password_hash = hash;
        }
        updated.role = new_role;
        self.users.insert(id, updated.clone());
        Ok(updated)
    }

    /// Admin-side user removal. An admin cannot delete their own account.
    /// The user's reservations stay — listings fall back to a placeholder
    /// owner label.
    pub async fn delete_user(&self, actor: Actor, id: Ulid) -> Result<(), EngineError> {
        if id == actor.id {
            return Err(EngineError::Forbidden("you cannot delete your own account"));
        }
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::UserDeleted { id };
        self.wal_append(&event).await?;

        if let Some((_, user)) = self.users.remove(&id) {
            self.users_by_email.remove(&user.email);
        }
        metrics::gauge!(observability::USERS_ACTIVE).set(self.users.len() as f64);
        Ok(())
    }
}

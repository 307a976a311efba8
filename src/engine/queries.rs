use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_windows;
use super::conflict::conflicts;
use super::{Engine, EngineError, SharedRoomState};

impl Engine {
    fn view(&self, r: &Reservation) -> ReservationView {
        let owner = self.users.get(&r.owner_id);
        ReservationView {
            id: r.id,
            title: r.title.clone(),
            description: r.description.clone(),
            start: r.slot.start,
            end: r.slot.end,
            room_id: r.room_id,
            owner_id: r.owner_id,
            owner_email: owner.as_ref().map(|u| u.email.clone()),
            owner_name: owner
                .as_ref()
                .map(|u| display_name_from_email(&u.email)),
        }
    }

    fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    async fn collect_reservations<F>(&self, mut keep: F) -> Vec<ReservationView>
    where
        F: FnMut(&Reservation) -> bool,
    {
        let mut out = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| keep(r))
                    .map(|r| self.view(r)),
            );
        }
        // start ascending; id breaks ties so repeated reads are identical
        out.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        out
    }

    /// All reservations across all rooms, ordered by start.
    pub async fn list_reservations(&self) -> Vec<ReservationView> {
        self.collect_reservations(|_| true).await
    }

    /// Reservations fully contained in `[from, to]`.
    pub async fn list_reservations_in_period(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Vec<ReservationView> {
        self.collect_reservations(|r| r.slot.start >= from && r.slot.end <= to)
            .await
    }

    pub async fn list_reservations_by_owner(&self, owner_id: Ulid) -> Vec<ReservationView> {
        self.collect_reservations(|r| r.owner_id == owner_id).await
    }

    /// Empty when the room does not exist.
    pub async fn list_reservations_in_room(&self, room_id: Ulid) -> Vec<ReservationView> {
        let Some(rs) = self.get_room(&room_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard.reservations.iter().map(|r| self.view(r)).collect()
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<ReservationView, EngineError> {
        let room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .get(id)
            .map(|r| self.view(r))
            .ok_or(EngineError::NotFound(id))
    }

    /// True iff no reservation in the room overlaps the slot, ignoring
    /// `exclude` (the reservation being edited).
    pub async fn is_available(
        &self,
        room_id: Option<Ulid>,
        slot: Slot,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let room_id = self.resolve_room_id(room_id)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(conflicts(&guard, &slot, exclude).next().is_none())
    }

    /// The gaps left in `window` for a room.
    pub async fn free_windows(
        &self,
        room_id: Option<Ulid>,
        window: Slot,
    ) -> Result<Vec<Slot>, EngineError> {
        if window.start >= window.end {
            return Err(EngineError::Validation(
                super::RuleViolation::EndNotAfterStart,
            ));
        }
        if (window.end - window.start).num_days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let room_id = self.resolve_room_id(room_id)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, &window))
    }

    // ── Rooms ────────────────────────────────────────────────────

    /// All rooms in display order.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
        rooms
    }

    pub async fn get_room_info(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    // ── Users ────────────────────────────────────────────────────

    pub fn get_user(&self, id: Ulid) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let email = email.trim().to_lowercase();
        let id = *self.users_by_email.get(&email)?;
        self.get_user(id)
    }

    /// All users, newest first, without password hashes.
    pub fn list_users(&self) -> Vec<UserView> {
        let mut users: Vec<UserView> = self
            .users
            .iter()
            .map(|e| UserView::from(e.value()))
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        users
    }
}

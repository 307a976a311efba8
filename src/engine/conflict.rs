use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::{Reservation, RoomState, Slot};

use super::EngineError;

/// Request-processing-time clock. Naive local wall-clock, like every other
/// timestamp in the system.
pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Every reservation in the room whose slot overlaps the candidate window,
/// minus `exclude` (the reservation being edited, so it never conflicts with
/// itself).
pub(crate) fn conflicts<'a>(
    room: &'a RoomState,
    slot: &Slot,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Reservation> {
    room.overlapping(slot)
        .filter(move |r| exclude != Some(r.id))
}

/// Err(Conflict) carrying the first overlapping reservation's id.
/// Caller holds the room's write lock, which it keeps until the subsequent
/// insert/update is applied — that lock is what makes check-then-write atomic
/// per room.
pub(crate) fn check_no_conflict(
    room: &RoomState,
    slot: &Slot,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match conflicts(room, slot, exclude).next() {
        Some(hit) => Err(EngineError::Conflict(hit.id)),
        None => Ok(()),
    }
}

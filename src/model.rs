use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Wire format for timestamps. Times are naive local wall-clock throughout:
/// no timezone is recorded and no UTC conversion happens on any path.
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a wall-clock timestamp. Accepts a space or `T` separator, with or
/// without seconds; fractional seconds are truncated.
pub fn parse_wallclock(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .and_then(|dt| dt.with_nanosecond(0))
}

pub fn format_wallclock(t: &NaiveDateTime) -> String {
    t.format(WIRE_TIME_FORMAT).to_string()
}

/// serde adapter emitting/accepting the wire format.
pub mod wallclock {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::format_wallclock(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(de)?;
        super::parse_wallclock(&s).ok_or_else(|| D::Error::custom("invalid timestamp"))
    }
}

/// Half-open time slot `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "wallclock")]
    pub start: NaiveDateTime,
    #[serde(with = "wallclock")]
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// The one overlap predicate every conflict check reduces to.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    /// Stored lowercased; uniqueness is case-insensitive.
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    /// Seats in the room. Metadata only — conflict detection never reads it.
    pub capacity: u32,
    /// Opaque reference to an image; upload/storage is out of scope.
    pub image: Option<String>,
    /// Display order in listings.
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub slot: Slot,
    pub owner_id: Ulid,
    pub room_id: Ulid,
}

/// One room plus its reservations, kept sorted by `slot.start`.
/// Invariant (enforced by the engine, not here): no two entries overlap.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by slot.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.slot.start, |r| r.slot.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose slot overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Slot) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.slot.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.slot.end > query.start)
    }
}

/// WAL record format — flat, no nesting. Every state change is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        description: String,
        capacity: u32,
        image: Option<String>,
        position: i64,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        description: String,
        capacity: u32,
        image: Option<String>,
        position: i64,
    },
    RoomDeleted {
        id: Ulid,
    },
    UserRegistered {
        id: Ulid,
        email: String,
        password_hash: String,
        role: Role,
        created_at: NaiveDateTime,
    },
    UserUpdated {
        id: Ulid,
        email: String,
        /// None means the stored hash is unchanged.
        password_hash: Option<String>,
        role: Role,
    },
    UserDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        room_id: Ulid,
        owner_id: Ulid,
        title: String,
        description: String,
        slot: Slot,
    },
    /// `room_id` is the room the reservation lives in after the update —
    /// it may differ from before (a move).
    ReservationUpdated {
        id: Ulid,
        room_id: Ulid,
        owner_id: Ulid,
        title: String,
        description: String,
        slot: Slot,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Read projections ─────────────────────────────────────────────

/// Reservation joined with its owner, as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    #[serde(with = "wallclock")]
    pub start: NaiveDateTime,
    #[serde(with = "wallclock")]
    pub end: NaiveDateTime,
    pub room_id: Ulid,
    pub owner_id: Ulid,
    pub owner_email: Option<String>,
    pub owner_name: Option<String>,
}

/// User without the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(with = "wallclock")]
    pub created_at: NaiveDateTime,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: display_name_from_email(&u.email),
            role: u.role,
            created_at: u.created_at,
        }
    }
}

/// Derive a display name from the email local part: `jean-marie.dupont@x`
/// becomes `jean marie dupont`.
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    local.replace(['.', '-', '_'], " ")
}

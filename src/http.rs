use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, MatchedPath, Path, Query, Request, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ulid::Ulid;

use crate::auth::{self, Identity, TokenIssuer};
use crate::engine::{
    Actor, Engine, EngineError, ReservationDraft, RoomDraft, RuleViolation, UserChanges,
};
use crate::limits::MAX_PASSWORD_LEN;
use crate::model::{Role, Slot, UserView, parse_wallclock};
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub tokens: TokenIssuer,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/users", get(list_users))
        .route("/api/auth/users/{id}", axum::routing::put(update_user).delete(delete_user))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route(
            "/api/rooms/{id}",
            get(get_room).put(update_room).delete(delete_room),
        )
        .route(
            "/api/reservations",
            post(create_reservation).get(list_reservations),
        )
        .route("/api/reservations/period", get(list_period))
        .route("/api/reservations/my", get(list_my))
        .route("/api/reservations/availability", get(availability))
        .route("/api/reservations/free", get(free))
        .route(
            "/api/reservations/{id}",
            get(get_reservation)
                .put(update_reservation)
                .delete(delete_reservation),
        )
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────

pub enum ApiError {
    Engine(EngineError),
    Unauthorized(&'static str),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_)
                | EngineError::Invalid(_)
                | EngineError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                EngineError::Conflict(_) | EngineError::EmailTaken => {
                    (StatusCode::CONFLICT, e.to_string())
                }
                EngineError::Forbidden(_) => (StatusCode::FORBIDDEN, e.to_string()),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                EngineError::Wal(_) => {
                    // internal detail stays in the log, not the response
                    tracing::error!("storage failure: {e}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
                }
            },
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, (*msg).to_string()),
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn validation(v: RuleViolation) -> ApiError {
    ApiError::Engine(EngineError::Validation(v))
}

// ── Authentication extractors ────────────────────────────────────

impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized("authentication required"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized("authentication required"))?;
        state.tokens.verify(token).ok_or_else(|| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            ApiError::Unauthorized("invalid or expired token")
        })
    }
}

/// An authenticated admin. 401 when unauthenticated, 403 otherwise.
pub struct AdminIdentity(pub Identity);

impl FromRequestParts<AppState> for AdminIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        if !identity.role.is_admin() {
            return Err(EngineError::Forbidden("admin role required").into());
        }
        Ok(Self(identity))
    }
}

fn actor(identity: &Identity) -> Actor {
    Actor::new(identity.id, identity.role)
}

// ── Request/response bodies ──────────────────────────────────────

#[derive(Deserialize)]
pub struct CredentialsRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct AuthResponse {
    user: UserView,
    token: String,
}

#[derive(Deserialize)]
pub struct ReservationRequest {
    title: Option<String>,
    description: Option<String>,
    start: Option<String>,
    end: Option<String>,
    room_id: Option<Ulid>,
}

#[derive(Deserialize)]
pub struct RoomRequest {
    name: Option<String>,
    description: Option<String>,
    capacity: Option<u32>,
    image: Option<String>,
    position: Option<i64>,
}

#[derive(Deserialize)]
pub struct UserUpdateRequest {
    email: Option<String>,
    role: Option<Role>,
    password: Option<String>,
}

#[derive(Deserialize)]
pub struct PeriodQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    start: Option<String>,
    end: Option<String>,
    room_id: Option<Ulid>,
    exclude_id: Option<Ulid>,
}

/// Parse required start/end into a slot; ordering is validated by policy.
fn required_slot(
    start: Option<&str>,
    end: Option<&str>,
    missing: &'static str,
) -> Result<Slot, ApiError> {
    let (Some(start), Some(end)) = (start, end) else {
        return Err(validation(RuleViolation::MissingFields(missing)));
    };
    let start = parse_wallclock(start).ok_or_else(|| validation(RuleViolation::BadTimestamp))?;
    let end = parse_wallclock(end).ok_or_else(|| validation(RuleViolation::BadTimestamp))?;
    Ok(Slot::new(start, end))
}

fn reservation_draft(body: ReservationRequest) -> Result<ReservationDraft, ApiError> {
    let Some(title) = body.title else {
        return Err(validation(RuleViolation::MissingFields(
            "title, start and end are required",
        )));
    };
    let slot = required_slot(
        body.start.as_deref(),
        body.end.as_deref(),
        "title, start and end are required",
    )?;
    Ok(ReservationDraft {
        title,
        description: body.description.unwrap_or_default(),
        slot,
        room_id: body.room_id,
    })
}

fn room_draft(body: RoomRequest) -> Result<RoomDraft, ApiError> {
    let (Some(name), Some(capacity)) = (body.name, body.capacity) else {
        return Err(EngineError::Invalid("name and capacity are required").into());
    };
    Ok(RoomDraft {
        name,
        description: body.description.unwrap_or_default(),
        capacity,
        image: body.image,
        position: body.position.unwrap_or(0),
    })
}

fn hash_new_password(password: &str) -> Result<String, ApiError> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(EngineError::LimitExceeded("password too long").into());
    }
    auth::hash_password(password).map_err(|e| ApiError::Internal(e.to_string()))
}

// ── Auth & user management ───────────────────────────────────────

async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(email), Some(password)) = (body.email, body.password) else {
        return Err(EngineError::Invalid("email and password are required").into());
    };
    if password.is_empty() {
        return Err(EngineError::Invalid("email and password are required").into());
    }
    let hash = hash_new_password(&password)?;
    let user = state.engine.register_user(&email, hash, Role::User).await?;
    let token = state
        .tokens
        .issue(user.id, &user.email, user.role)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserView::from(&user),
            token,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(email), Some(password)) = (body.email, body.password) else {
        return Err(EngineError::Invalid("email and password are required").into());
    };
    let user = state.engine.find_user_by_email(&email);
    let Some(user) = user.filter(|u| auth::verify_password(&password, &u.password_hash)) else {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Err(ApiError::Unauthorized("invalid credentials"));
    };
    let token = state
        .tokens
        .issue(user.id, &user.email, user.role)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(AuthResponse {
        user: UserView::from(&user),
        token,
    }))
}

async fn me(
    identity: Identity,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .engine
        .get_user(identity.id)
        .ok_or(ApiError::Unauthorized("invalid or expired token"))?;
    Ok(Json(json!({ "user": UserView::from(&user) })))
}

async fn list_users(
    _admin: AdminIdentity,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(state.engine.list_users())
}

async fn update_user(
    AdminIdentity(admin): AdminIdentity,
    Path(id): Path<Ulid>,
    State(state): State<AppState>,
    Json(body): Json<UserUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password_hash = match body.password.as_deref() {
        Some(p) if !p.is_empty() => Some(hash_new_password(p)?),
        _ => None,
    };
    let changes = UserChanges {
        email: body.email,
        password_hash,
        role: body.role,
    };
    let user = state.engine.update_user(actor(&admin), id, changes).await?;
    Ok(Json(json!({ "user": UserView::from(&user) })))
}

async fn delete_user(
    AdminIdentity(admin): AdminIdentity,
    Path(id): Path<Ulid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_user(actor(&admin), id).await?;
    Ok(Json(json!({ "message": "user deleted" })))
}

// ── Rooms ────────────────────────────────────────────────────────

async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_rooms().await)
}

async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_room_info(id).await?))
}

async fn create_room(
    _admin: AdminIdentity,
    State(state): State<AppState>,
    Json(body): Json<RoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state.engine.create_room(room_draft(body)?).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn update_room(
    _admin: AdminIdentity,
    Path(id): Path<Ulid>,
    State(state): State<AppState>,
    Json(body): Json<RoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.update_room(id, room_draft(body)?).await?))
}

async fn delete_room(
    _admin: AdminIdentity,
    Path(id): Path<Ulid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_room(id).await?;
    Ok(Json(json!({ "message": "room deleted" })))
}

// ── Reservations ─────────────────────────────────────────────────

async fn create_reservation(
    identity: Identity,
    State(state): State<AppState>,
    Json(body): Json<ReservationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reservation = state
        .engine
        .create_reservation(actor(&identity), reservation_draft(body)?)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn list_reservations(
    _identity: Identity,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(state.engine.list_reservations().await)
}

async fn list_period(
    _identity: Identity,
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let window = required_slot(
        query.start.as_deref(),
        query.end.as_deref(),
        "start and end parameters are required",
    )?;
    Ok(Json(
        state
            .engine
            .list_reservations_in_period(window.start, window.end)
            .await,
    ))
}

async fn list_my(identity: Identity, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_reservations_by_owner(identity.id).await)
}

async fn availability(
    _identity: Identity,
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = required_slot(
        query.start.as_deref(),
        query.end.as_deref(),
        "start and end parameters are required",
    )?;
    let available = state
        .engine
        .is_available(query.room_id, slot, query.exclude_id)
        .await?;
    Ok(Json(json!({ "available": available })))
}

async fn free(
    _identity: Identity,
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let window = required_slot(
        query.start.as_deref(),
        query.end.as_deref(),
        "start and end parameters are required",
    )?;
    Ok(Json(state.engine.free_windows(query.room_id, window).await?))
}

async fn get_reservation(
    _identity: Identity,
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_reservation(id).await?))
}

async fn update_reservation(
    identity: Identity,
    Path(id): Path<Ulid>,
    State(state): State<AppState>,
    Json(body): Json<ReservationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reservation = state
        .engine
        .update_reservation(actor(&identity), id, reservation_draft(body)?)
        .await?;
    Ok(Json(reservation))
}

async fn delete_reservation(
    identity: Identity,
    Path(id): Path<Ulid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .delete_reservation(actor(&identity), id)
        .await?;
    Ok(Json(json!({ "message": "reservation deleted" })))
}

// ── Metrics middleware ───────────────────────────────────────────

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let start = std::time::Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    response
}

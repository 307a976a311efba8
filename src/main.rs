use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

use roombook::auth::{self, TokenIssuer};
use roombook::compactor;
use roombook::engine::{BookingPolicy, Engine, RoomDraft};
use roombook::http::{AppState, router};
use roombook::model::Role;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("ROOMBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    roombook::observability::init(metrics_port);

    let port = std::env::var("ROOMBOOK_PORT").unwrap_or_else(|_| "3000".into());
    let bind = std::env::var("ROOMBOOK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("ROOMBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let jwt_secret = std::env::var("ROOMBOOK_JWT_SECRET").unwrap_or_else(|_| {
        warn!("ROOMBOOK_JWT_SECRET not set, using an insecure default");
        "roombook-dev-secret".into()
    });
    let jwt_expires_hours: i64 = std::env::var("ROOMBOOK_JWT_EXPIRES_HOURS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(168); // 7 days
    let compact_threshold: u64 = std::env::var("ROOMBOOK_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let policy = policy_from_env();

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("roombook.wal");
    let engine = Arc::new(Engine::new(wal_path, policy.clone())?);

    seed(&engine).await?;

    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, compact_threshold).await;
    });

    let state = AppState {
        engine,
        tokens: TokenIssuer::new(&jwt_secret, jwt_expires_hours),
    };

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("roombook listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!(
        "  policy: min {}min, close {}, weekdays_only {}",
        policy.min_duration_minutes,
        policy
            .latest_end
            .map_or("none".to_string(), |t| t.format("%H:%M").to_string()),
        policy.weekdays_only
    );
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("roombook stopped");
    Ok(())
}

fn policy_from_env() -> BookingPolicy {
    let defaults = BookingPolicy::default();
    let min_duration_minutes = std::env::var("ROOMBOOK_MIN_DURATION_MINUTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.min_duration_minutes);
    // "none" disables the closing-time rule
    let latest_end = match std::env::var("ROOMBOOK_CLOSE_TIME") {
        Ok(s) if s.eq_ignore_ascii_case("none") => None,
        Ok(s) => match NaiveTime::parse_from_str(&s, "%H:%M") {
            Ok(t) => Some(t),
            Err(_) => {
                warn!("unparseable ROOMBOOK_CLOSE_TIME {s:?}, using default");
                defaults.latest_end
            }
        },
        Err(_) => defaults.latest_end,
    };
    let weekdays_only = std::env::var("ROOMBOOK_WEEKDAYS_ONLY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.weekdays_only);
    BookingPolicy {
        min_duration_minutes,
        latest_end,
        weekdays_only,
    }
}

/// First-run bootstrap: an admin account and a default room, so the service
/// is usable before any admin exists to create either.
async fn seed(engine: &Arc<Engine>) -> Result<(), Box<dyn std::error::Error>> {
    if engine.user_count() == 0 {
        match (
            std::env::var("ROOMBOOK_ADMIN_EMAIL"),
            std::env::var("ROOMBOOK_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => {
                let hash = auth::hash_password(&password)?;
                let admin = engine.register_user(&email, hash, Role::Admin).await?;
                info!("seeded admin account {}", admin.email);
            }
            _ => warn!(
                "no users exist and ROOMBOOK_ADMIN_EMAIL/ROOMBOOK_ADMIN_PASSWORD \
                 are not set; the admin surface will be unreachable"
            ),
        }
    }

    if engine.room_count() == 0 {
        let name =
            std::env::var("ROOMBOOK_DEFAULT_ROOM").unwrap_or_else(|_| "Main room".into());
        let room = engine
            .create_room(RoomDraft {
                name,
                description: String::new(),
                capacity: 10,
                image: None,
                position: 0,
            })
            .await?;
        info!("seeded default room {:?}", room.name);
    }

    Ok(())
}

/// Resolve on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

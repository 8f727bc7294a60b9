//! `AmaServer`: router assembly, shared state and the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, patch};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use ama_store::{Database, MessageRepo, RoomRepo};

use crate::config::ServerSettings;
use crate::error::ServerError;
use crate::handlers;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{Broadcaster, SessionConfig, SubscriberRegistry};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomRepo,
    pub messages: MessageRepo,
    /// Live subscribers per room.
    pub registry: Arc<SubscriberRegistry>,
    pub broadcaster: Broadcaster,
    /// Settings handed to every room session.
    pub session: SessionConfig,
    /// When the server started.
    pub start_time: Instant,
}

/// The AMA server.
pub struct AmaServer {
    settings: ServerSettings,
    rooms: RoomRepo,
    messages: MessageRepo,
    registry: Arc<SubscriberRegistry>,
    broadcaster: Broadcaster,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl AmaServer {
    /// Create a new server over an opened database.
    ///
    /// Every subscription signal is a child of the shutdown token, so
    /// shutting down ends every room session.
    ///
    /// Settings that fail [`ServerSettings::validate`] are logged; sessions
    /// clamp zero queue sizes and ping periods rather than panicking.
    pub fn new(settings: ServerSettings, db: Database) -> Self {
        if let Err(e) = settings.validate() {
            warn!(error = %e, "server settings out of range, session limits will be clamped");
        }
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = Arc::new(SubscriberRegistry::with_shutdown(
            shutdown.token(),
            settings.max_subscribers_per_room,
        ));
        Self {
            rooms: RoomRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            shutdown,
            start_time: Instant::now(),
            settings,
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_queue: self.settings.outbound_queue,
            heartbeat_interval: Duration::from_secs(self.settings.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.settings.heartbeat_timeout_secs),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            rooms: self.rooms.clone(),
            messages: self.messages.clone(),
            registry: self.registry.clone(),
            broadcaster: self.broadcaster.clone(),
            session: self.session_config(),
            start_time: self.start_time,
        };

        let api = Router::new()
            .route(
                "/{room_id}/messages",
                get(handlers::list_messages).post(handlers::create_message),
            )
            .route("/{room_id}/messages/{message_id}", get(handlers::get_message))
            .route(
                "/{room_id}/messages/{message_id}/react",
                patch(handlers::react_to_message).delete(handlers::remove_reaction),
            )
            .route(
                "/{room_id}/messages/{message_id}/answer",
                patch(handlers::mark_answered),
            );

        Router::new()
            .route("/health", get(handlers::health))
            .route("/subscribe/{room_id}", get(handlers::subscribe))
            .route("/api/rooms", get(handlers::list_rooms).post(handlers::create_room))
            .nest("/api/rooms", api)
            .layer(cors_layer(self.settings.cors_origin.as_deref()))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.settings.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(addr = %local_addr, "server listening");
        Ok((local_addr, handle))
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn rooms(&self) -> &RoomRepo {
        &self.rooms
    }

    pub fn messages(&self) -> &MessageRepo {
        &self.messages
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .max_age(Duration::from_secs(300));

    match origin {
        Some(raw) => match HeaderValue::from_str(raw) {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                warn!(origin = raw, "unusable CORS origin, allowing any origin");
                layer.allow_origin(Any)
            }
        },
        None => layer.allow_origin(Any),
    }
}

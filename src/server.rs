use crate::config::Config;
use crate::error::{LimiterError, Result};
use crate::handlers::{admin_stats, forwarded, health_check, reset_key, AppState};
use crate::middleware::{
    client_identity_middleware, enforce_policy, logging_middleware, require_admin_token,
    AdminToken, TrustedProxies,
};
use crate::registry::{Policy, PolicyRegistry};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use url::Url;

/// Build the application router.
///
/// Guarded routes mirror the service this limiter fronts; their handlers are
/// stand-ins for the real business endpoints.
pub fn create_app(config: &Config, registry: Arc<PolicyRegistry>) -> Result<Router> {
    let guard = |policy: Policy| {
        middleware::from_fn_with_state(registry.guard(policy).clone(), enforce_policy)
    };

    let mut app = Router::new()
        .route(
            "/api/auth/login",
            post(forwarded).route_layer(guard(Policy::Auth)),
        )
        .route(
            "/api/auth/signup",
            post(forwarded).route_layer(guard(Policy::Auth)),
        )
        .route(
            "/api/auth/reset-password",
            post(forwarded).route_layer(guard(Policy::Strict)),
        )
        .route(
            "/api/users/friend-request/:id",
            post(forwarded).route_layer(guard(Policy::General)),
        )
        .route("/auth/google", get(forwarded).route_layer(guard(Policy::Oauth)))
        .route("/health", get(health_check));

    if config.enable_admin {
        let token = config
            .admin_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .map(AdminToken::new)
            .ok_or_else(|| {
                LimiterError::Configuration(
                    "ADMIN_TOKEN must be set when admin routes are enabled".to_string(),
                )
            })?;

        let admin: Router<AppState> = Router::new()
            .route("/admin/stats", get(admin_stats))
            .route("/admin/policies/:policy/keys/:key", delete(reset_key))
            .route_layer(middleware::from_fn_with_state(token, require_admin_token));
        app = app.merge(admin);
    }

    let proxies = TrustedProxies {
        hops: config.trust_proxy_hops,
    };

    Ok(app.with_state(AppState::new(registry)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.frontend_url)?)
            .layer(middleware::from_fn_with_state(
                proxies,
                client_identity_middleware,
            ))
            .layer(middleware::from_fn(logging_middleware)),
    ))
}

fn cors_layer(frontend_url: &str) -> Result<CorsLayer> {
    let origin = Url::parse(frontend_url)
        .map_err(|e| LimiterError::Configuration(format!("Invalid frontend URL: {}", e)))?
        .origin()
        .ascii_serialization();
    let origin = HeaderValue::from_str(&origin)
        .map_err(|e| LimiterError::Configuration(format!("Invalid CORS origin: {}", e)))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::HeaderName::from_static("x-csrf-token"),
        ]))
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: &Config, registry: Arc<PolicyRegistry>) -> Result<Self> {
        Ok(Self {
            app: create_app(config, registry)?,
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("auth-throttle listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        // Graceful shutdown keeps in-flight refunds from being cut off.
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

//! Application startup and lifecycle management.

use crate::config::{Config, CorsConfig, StoreBackend};
use crate::handlers;
use crate::models::CanonicalId;
use crate::services::{
    CollectGateway, EdvironGateway, MemoryStore, MongoStore, PaymentService, PaymentStore,
    WebhookReconciler,
};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn PaymentStore>,
    pub payments: PaymentService,
    pub reconciler: WebhookReconciler,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let store = connect_store(&config).await?;

        let gateway = EdvironGateway::new(config.gateway.clone()).map_err(|e| {
            tracing::error!("Failed to build gateway client: {}", e);
            AppError::ConfigError(e)
        })?;

        Self::build_with(config, store, Arc::new(gateway)).await
    }

    /// Build around an existing store and gateway client.
    pub async fn build_with(
        config: Config,
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn CollectGateway>,
    ) -> Result<Self, AppError> {
        let school_id = CanonicalId::parse(&config.gateway.school_id)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("GATEWAY_SCHOOL_ID: {}", e)))?;

        let state = AppState {
            payments: PaymentService::new(store.clone(), gateway, school_id),
            reconciler: WebhookReconciler::new(store.clone(), config.webhook),
            store,
            config: config.clone(),
        };

        // Port 0 picks a random port for tests
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, store = ?config.store, "Collect service listening");

        Ok(Self {
            port,
            listener,
            router: router(state, &config.cors),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }

    pub async fn run_with_shutdown<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await
    }
}

async fn connect_store(config: &Config) -> Result<Arc<dyn PaymentStore>, AppError> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Mongo => {
            let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to parse MongoDB connection string: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
            client_options.app_name = Some(config.service_name.clone());

            let client = Client::with_options(client_options).map_err(|e| {
                tracing::error!("Failed to create MongoDB client: {}", e);
                AppError::DatabaseError(e.into())
            })?;
            let store = MongoStore::new(&client.database(&config.database.db_name));

            store.init_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize database indexes: {}", e);
                AppError::from(e)
            })?;

            Ok(Arc::new(store))
        }
    }
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-payment", post(handlers::payments::create_payment))
        .route("/webhook", post(handlers::payments::webhook))
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions),
        )
        .route(
            "/transactions/school/:school_id",
            get(handlers::transactions::list_school_transactions),
        )
        .route(
            "/transaction-status/:order_id",
            get(handlers::payments::transaction_status),
        )
}

fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    let origin = config.allowed_origin.as_deref()?;
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origin == "*" {
        return Some(layer.allow_origin(Any));
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => Some(layer.allow_origin(value)),
        Err(_) => {
            tracing::warn!(origin, "Ignoring invalid CORS_ALLOWED_ORIGIN");
            None
        }
    }
}

pub fn router(state: AppState, cors: &CorsConfig) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/payments", payment_routes())
        .nest("/payments", payment_routes())
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        );

    let router = match cors_layer(cors) {
        Some(layer) => router.layer(layer),
        None => router,
    };

    router.with_state(state)
}

//! ticket-fulfillment server entry point.
//!
//! Starts the Axum HTTP server with the webhook, payment and system
//! endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ticket_fulfillment::api;
use ticket_fulfillment::app_state::AppState;
use ticket_fulfillment::config::{ServiceConfig, StoreBackend};
use ticket_fulfillment::domain::EventBus;
use ticket_fulfillment::gateway::{HttpPaymentGateway, PaymentGateway};
use ticket_fulfillment::persistence::FulfillmentStore;
use ticket_fulfillment::persistence::memory::MemoryStore;
use ticket_fulfillment::persistence::postgres::PostgresStore;
use ticket_fulfillment::service::{FulfillmentService, PaymentService, WebhookService};
use ticket_fulfillment::signing::TicketSigner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ServiceConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, backend = ?config.store_backend, "starting ticket-fulfillment");

    // Build persistence and collaborators
    let store: Arc<dyn FulfillmentStore> = match config.store_backend {
        StoreBackend::Postgres => Arc::new(
            PostgresStore::connect(&config)
                .await
                .context("connecting to PostgreSQL")?,
        ),
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(
        config.payment_gateway_base_url.clone(),
        config.payment_gateway_api_key.clone(),
        Duration::from_secs(config.payment_gateway_timeout_secs),
    )?);
    let signer = TicketSigner::new(config.ticket_signing_secret.clone());
    let event_bus = EventBus::new(config.event_bus_capacity);

    // Build service layer
    let fulfillment = FulfillmentService::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        signer,
        event_bus.clone(),
    );
    let webhook_service = Arc::new(WebhookService::new(Arc::clone(&store), fulfillment));
    let payment_service = Arc::new(PaymentService::new(
        store,
        gateway,
        config.payment_expiration_secs,
    ));

    // Build application state
    let app_state = AppState {
        webhook_service,
        payment_service,
        event_bus,
    };

    // Build router
    let app = Router::new().merge(api::build_router());
    #[cfg(feature = "swagger-ui")]
    let app = {
        use utoipa::OpenApi;
        app.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

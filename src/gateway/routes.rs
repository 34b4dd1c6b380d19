// HTTP routes configuration

use super::handlers::{
    claude_messages, event_logging_handler, gemini_cli_generate, gemini_generate, health_handler,
    metrics_handler, openai_chat, openai_responses,
};
use super::middleware::request_id_layers;
use super::Dispatcher;
use crate::config::AppConfig;
use crate::error::Result;
use crate::manage;
use crate::pool::AccountPool;
use crate::store::CredentialStore;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub pool: Arc<AccountPool>,
    pub store: Arc<dyn CredentialStore>,
}

pub fn create_router(
    config: AppConfig,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<AccountPool>,
    store: Arc<dyn CredentialStore>,
) -> Result<Router> {
    let state = AppState {
        config,
        dispatcher,
        pool,
        store,
    };

    let (set_request_id, propagate_request_id) = request_id_layers();

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Inbound wire protocols, one route per registered client format
        .route("/v1/messages", post(claude_messages))
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1beta/models/:model_action", post(gemini_generate))
        .route("/v1internal/:action", post(gemini_cli_generate))
        .route("/api/event_logging/batch", post(event_logging_handler))
        // Management surface
        .route("/admin/accounts", get(manage::list_accounts))
        .route("/admin/accounts/export", get(manage::export_accounts))
        .route("/admin/accounts/import", post(manage::import_accounts))
        .route("/admin/accounts/:provider/:id", delete(manage::remove_account))
        .route("/admin/accounts/:provider/:id/refresh", post(manage::refresh_account))
        .route("/admin/accounts/:provider/:id/enable", post(manage::enable_account))
        .route("/admin/accounts/:provider/:id/disable", post(manage::disable_account))
        .route("/admin/cooldowns", get(manage::cooldown_summary))
        // Allow large request bodies for base64-encoded images
        .layer(tower_http::limit::RequestBodyLimitLayer::new(50 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state);

    Ok(app)
}

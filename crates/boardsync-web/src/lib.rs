//! Boardsync Web Server
//!
//! Axum-based REST proxy for the Trello API with WebSocket fan-out and an
//! optional hosted reconciliation session for one board.

pub mod routes;
pub mod state;
pub mod websocket;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use state::{AppState, ServerMessage, WireMessage};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Boards
        .route("/boards", get(routes::boards::list_boards))
        .route("/board", post(routes::boards::create_board))
        .route("/board/{board_id}/lists", get(routes::boards::board_lists))
        .route("/lists/{list_id}/cards", get(routes::boards::list_cards))
        // Cards
        .route("/task", post(routes::tasks::create_task))
        .route(
            "/task/{card_id}",
            put(routes::tasks::update_task).delete(routes::tasks::delete_task),
        )
        .route("/task/{card_id}/close", put(routes::tasks::close_task))
        // Hosted session
        .route("/sync/lists", get(routes::sync::lists))
        .route("/sync/intents", post(routes::sync::submit_intent))
        .with_state(state.clone());

    Router::new()
        .route("/", get(routes::index))
        .nest("/api", api_routes)
        .route(
            "/webhook/trello",
            get(routes::webhook::verify).post(routes::webhook::receive),
        )
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the web server until it fails.
pub async fn run_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    state.spawn_relay();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!("Web server listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

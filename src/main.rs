// Define data modules
mod day_window; // Logical days, day windows, window cache
mod error; // Shared error taxonomy
mod materialize; // Idempotent live-quest materialization
mod models; // Data structures (definitions, rules, live quests, Db)
mod planner; // Per-user day materialization
mod recurrence; // Cadence / anchor resolution
mod rollover; // Day-boundary sweep
mod routes_definitions; // HTTP handlers for definitions & settings APIs
mod routes_plan; // HTTP handlers for plan / rollover / quest APIs
mod store; // Persistent storage (load/save db.json)
#[cfg(test)]
mod test_support; // In-memory collaborator doubles

// Import axum routing utilities and Router
use axum::{
    routing::{get, post, put}, // HTTP method helpers
    Router,                    // Main router type
};
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let api = Router::new()
        // plan & rollover
        .route("/plan/today", get(routes_plan::get_today_plan))
        .route("/rollover", post(routes_plan::post_rollover))
        // live quest status transitions (live keys may contain '/')
        .route("/quests/:day/complete/*live_key", post(routes_plan::complete_quest))
        .route("/quests/:day/cancel/*live_key", post(routes_plan::cancel_quest))
        // definitions
        .route(
            "/definitions",
            get(routes_definitions::get_definitions).post(routes_definitions::create_definition),
        )
        .route(
            "/definitions/:id",
            put(routes_definitions::update_definition)
                .delete(routes_definitions::delete_definition),
        )
        .route("/definitions/:id/schedule", get(routes_definitions::get_schedule))
        // settings
        .route(
            "/settings",
            get(routes_definitions::get_settings).put(routes_definitions::put_settings),
        );

    let app = Router::new().nest("/api", api);

    let addr: SocketAddr = "127.0.0.1:3000".parse().expect("bad listen address");

    info!("server running at http://{addr}");
    info!("API base: http://{addr}/api");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind failed");

    axum::serve(listener, app).await.expect("server error");
}

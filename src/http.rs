//! The read-only HTTP render surface: two unauthenticated
//! handlers exposing the active and all-known tunnel lists as `<option>`
//! elements, for operator dashboards to page against.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;

use crate::pool::{TunnelListKind, TunnelPool};

/// Build the router for the two render-list views. Merged into the
/// binary's `axum::Router` alongside any other routes it serves.
pub fn router(pool: Arc<TunnelPool>) -> Router {
    Router::new()
        .route("/tunnels/active.html", get(active_list))
        .route("/tunnels/all.html", get(all_list))
        .with_state(pool)
}

async fn active_list(State(pool): State<Arc<TunnelPool>>) -> Html<String> {
    Html(pool.render_list(TunnelListKind::Active).await)
}

async fn all_list(State(pool): State<Arc<TunnelPool>>) -> Html<String> {
    Html(pool.render_list(TunnelListKind::All).await)
}

use axum::routing::{any, get};
use axum::Router;

use crate::serve::handlers;
use crate::serve::state::AppState;
use crate::strategy::Strategy;

/// The registry facade. `serve_local_blobs` adds `/blobs/{key}` for stores
/// whose redirect URLs point back at this service.
pub fn build_router<S: Strategy>(state: AppState<S>, serve_local_blobs: bool) -> Router {
    let mut router = Router::new()
        .route("/v2", get(handlers::v2_base))
        .route("/v2/", get(handlers::v2_base))
        .route("/v2/{*path}", any(handlers::oci_dispatch::<S>));
    if serve_local_blobs {
        router = router.route("/blobs/{key}", get(handlers::local_blob::<S>));
    }
    router.with_state(state)
}

//! tierstack-demo — the posts service the compute tier runs.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | GET | `/` | `Hello World` |
//! | GET | `/health` | 200, probed by the load balancer |
//! | GET | `/posts` | JSON list of posts |
//! | POST | `/posts` | 201 with the created post, `400 Invalid!` without a string `title` |

pub mod error;
pub mod handlers;
pub mod store;

use axum::Router;
use axum::routing::get;

pub use error::{StoreError, StoreResult};
pub use store::{Post, PostStore};

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: PostStore,
}

pub fn build_router(store: PostStore) -> Router {
    Router::new()
        .route("/", get(handlers::hello))
        .route("/health", get(handlers::health))
        .route("/posts", get(handlers::list_posts).post(handlers::create_post))
        .with_state(AppState { store })
}

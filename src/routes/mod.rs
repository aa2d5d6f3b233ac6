use axum::{routing::get, Router};

pub mod stream;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .route("/", get(health))
        .merge(stream::router())
        .nest("/ws", ws::router())
}

/* 部署平台的 keep-alive 探針 */
async fn health() -> &'static str {
    "Jam server is alive and ready for streaming"
}

mod state;
mod error;
mod utils {
    pub mod range;
}
mod routes;

use axum::{Extension, Router};
use tower_http::services::ServeDir;

use crate::state::{MediaAsset, RoomMap};
use error::AppErr;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let asset = MediaAsset::new(
        std::env::var("MUSIC_FILE").unwrap_or_else(|_| "music/sample.mp3".into()),
    );
    let rooms = RoomMap::default();

    let app = Router::new()
        .merge(routes::router())
        .fallback_service(ServeDir::new("static"))   // 內建試聽頁
        .layer(Extension(asset))
        .layer(Extension(rooms));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(%port, "jam server ready");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

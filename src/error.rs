use axum::{http::StatusCode, response::IntoResponse};

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        // 對外一律固定字串,I/O 細節只進 log
        let (code, body) = match self {
            AppErr::Bad(msg)      => (StatusCode::BAD_REQUEST, msg),
            AppErr::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppErr::Io(e) => {
                tracing::error!(error = %e, "stream io failure");
                (StatusCode::INTERNAL_SERVER_ERROR,
                 "Internal Server Error during streaming".into())
            }
        };
        (code, body).into_response()
    }
}

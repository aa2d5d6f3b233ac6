use axum::{
    body::Body,
    extract::Extension,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::io::SeekFrom;
use tokio::{fs, io::{AsyncReadExt, AsyncSeekExt}};
use tokio_util::io::ReaderStream;

use crate::{
    error::{AppErr, AppResult},
    state::MediaAsset,
    utils::range,
};

/// 開放式 Range 單次回應上限(5 MiB,換較少往返)
const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

pub fn router() -> Router {
    Router::new().route("/stream-audio", get(stream_audio).options(preflight))
}

/* ---------------- GET / HEAD ---------------- */

async fn stream_audio(
    Extension(asset): Extension<MediaAsset>,
    headers: HeaderMap,
) -> AppResult<Response> {
    // 大小每次重查,檔案可能已被換掉
    let size = fs::metadata(&asset.path)
        .await
        .map_err(|_| AppErr::NotFound("Music file not found".into()))?
        .len();

    let wanted = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(range::parse);

    let Some((start, req_end)) = wanted else {
        // 無 Range(或格式不符)⇒ 整檔 200,串流回傳
        let file = fs::File::open(&asset.path).await?;
        let mut h = base_headers(&asset);
        h.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        let body = Body::from_stream(ReaderStream::new(file));
        return Ok((StatusCode::OK, h, body).into_response());
    };

    let Some((start, end)) = range::resolve(start, req_end, size, CHUNK_SIZE) else {
        let mut h = base_headers(&asset);
        h.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes */{size}"))
                .map_err(|e| AppErr::Bad(e.to_string()))?,
        );
        return Ok((StatusCode::RANGE_NOT_SATISFIABLE, h, ()).into_response());
    };

    // 讀滿整段再決定狀態碼,不會送出殘缺的 206
    let len = end - start + 1;
    let mut file = fs::File::open(&asset.path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;

    let mut h = base_headers(&asset);
    h.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    h.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
            .map_err(|e| AppErr::Bad(e.to_string()))?,
    );
    Ok((StatusCode::PARTIAL_CONTENT, h, buf).into_response())
}

/* ---------------- OPTIONS(CORS 預檢) ---------------- */

async fn preflight() -> impl IntoResponse {
    let mut h = cors_headers();
    h.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("3600"));
    (StatusCode::NO_CONTENT, h, ())
}

/* ---------------- headers ---------------- */

fn cors_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type, Accept"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD"),
    );
    h
}

fn base_headers(asset: &MediaAsset) -> HeaderMap {
    let mut h = cors_headers();
    h.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    h.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&asset.content_type())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    h
}

/* ---------------- tests ---------------- */

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
};
use tokio::sync::{broadcast, RwLock};

/* ------------ 同步房間 ------------ */

/// (發送者 session id, JSON 文字)。轉送迴圈靠第一欄過濾自己的訊息
pub type Frame = (String, String);
pub type Tx = broadcast::Sender<Frame>;

pub struct RoomState {
    pub tx:      Tx,
    pub members: HashSet<String>,          // session id 集合
}

impl RoomState {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx, members: HashSet::new() }
    }
}

pub type RoomMap = Arc<RwLock<HashMap<String, RoomState>>>;

/* ------------ 音訊資產 ------------ */

/// 單一唯讀音檔;大小每次請求重新查,不在這裡快取
#[derive(Clone)]
pub struct MediaAsset {
    pub path: PathBuf,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .to_string()
    }
}

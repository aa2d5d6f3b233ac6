use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::state::{Frame, RoomMap, RoomState};

pub fn router() -> Router {
    Router::new().route("/sync", get(sync_handler))
}

async fn sync_handler(
    ws: WebSocketUpgrade,
    Extension(rooms): Extension<RoomMap>,
) -> impl IntoResponse {
    ws.on_upgrade(move |s| sync_ws(s, rooms))
}

/* ---------------- 事件格式 ---------------- */

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Join {
        chat_id: Option<Value>,
    },
    Control {
        chat_id: Option<Value>,
        action: Option<String>,
        #[serde(default)]
        time: f64,
        video_id: Option<String>,
    },
}

/// chat_id 可能是字串或數字,統一轉成標準字串;空值 ⇒ None
fn room_key(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/* ---------------- per connection ---------------- */

struct Session {
    id: String,
    room: Option<String>,
    rx: Option<broadcast::Receiver<Frame>>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room: None,
            rx: None,
        }
    }
}

async fn sync_ws(mut sock: WebSocket, rooms: RoomMap) {
    let mut sess = Session::new();
    loop {
        tokio::select! {
            inbound = sock.next() => match inbound {
                Some(Ok(Message::Text(raw))) => handle_event(&raw, &rooms, &mut sess).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}                              // ping/pong 等
                Some(Err(_)) => break,
            },
            frame = room_frame(&mut sess.rx) => match frame {
                Ok((from, text)) => {
                    // 自己發出的 frame 不回送
                    if from != sess.id && sock.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(session = %sess.id, skipped = n, "slow sync client");
                }
                Err(RecvError::Closed) => sess.rx = None,
            },
        }
    }
    /* 斷線:一定把自己從房間移掉 */
    leave_room(&rooms, &mut sess).await;
}

/// 尚未 join 任何房間時永遠 pending,select! 只會走 socket 分支
async fn room_frame(rx: &mut Option<broadcast::Receiver<Frame>>) -> Result<Frame, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/* ---------------- 事件處理 ---------------- */

async fn handle_event(raw: &str, rooms: &RoomMap, sess: &mut Session) {
    let ev = match serde_json::from_str::<Inbound>(raw) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable sync event dropped");
            return;
        }
    };
    match ev {
        Inbound::Join { chat_id } => match room_key(chat_id.as_ref()) {
            Some(key) => join_room(rooms, sess, key).await,
            None => tracing::warn!(session = %sess.id, "join without chat_id dropped"),
        },
        Inbound::Control { chat_id, action, time, video_id } => {
            let key = room_key(chat_id.as_ref());
            let action = action.filter(|a| !a.trim().is_empty());
            let (Some(key), Some(action)) = (key, action) else {
                tracing::warn!(session = %sess.id, "control without room or action dropped");
                return;
            };
            relay_control(rooms, sess, &key, &action, time, video_id.as_deref()).await;
        }
    }
}

async fn join_room(rooms: &RoomMap, sess: &mut Session, key: String) {
    if sess.room.as_deref() == Some(key.as_str()) {
        return; // 重複 join 視為 no-op
    }
    leave_room(rooms, sess).await; // join 取代先前的房間

    // 鎖只包成員異動,廣播在解鎖後送
    let tx = {
        let mut m = rooms.write().await;
        let st = m.entry(key.clone()).or_insert_with(RoomState::new);
        st.members.insert(sess.id.clone());
        sess.rx = Some(st.tx.subscribe());
        st.tx.clone()
    };
    tracing::debug!(room = %key, session = %sess.id, "joined");
    sess.room = Some(key);

    tx.send((
        sess.id.clone(),
        json!({"type":"status_message","message":"a new listener joined the jam"}).to_string(),
    ))
    .ok();
}

async fn leave_room(rooms: &RoomMap, sess: &mut Session) {
    let Some(key) = sess.room.take() else { return };
    sess.rx = None;

    let tx = {
        let mut m = rooms.write().await;
        let Some(st) = m.get_mut(&key) else { return };
        st.members.remove(&sess.id);
        if st.members.is_empty() {
            m.remove(&key); // 空房立即回收
            tracing::debug!(room = %key, "room reclaimed");
            return;
        }
        st.tx.clone()
    };

    tx.send((
        sess.id.clone(),
        json!({"type":"status_message","message":"a listener left the jam"}).to_string(),
    ))
    .ok();
}

async fn relay_control(
    rooms: &RoomMap,
    sess: &Session,
    key: &str,
    action: &str,
    time: f64,
    video_id: Option<&str>,
) {
    let tx = rooms.read().await.get(key).map(|st| st.tx.clone());
    let Some(tx) = tx else {
        tracing::warn!(room = %key, "control for unknown room dropped");
        return;
    };
    tx.send((
        sess.id.clone(),
        json!({"type":"sync_control","action":action,"time":time,"video_id":video_id}).to_string(),
    ))
    .ok();
}

/* ---------------- tests ---------------- */

#[cfg(test)]
mod tests {
    use super::*;

    async fn send(rooms: &RoomMap, sess: &mut Session, ev: Value) {
        handle_event(&ev.to_string(), rooms, sess).await;
    }

    /// 收光 rx 裡的 frame,套用和轉送迴圈相同的「自己不收」過濾
    fn drain(sess: &mut Session) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(rx) = sess.rx.as_mut() {
            while let Ok((from, text)) = rx.try_recv() {
                if from != sess.id {
                    out.push(serde_json::from_str(&text).unwrap());
                }
            }
        }
        out
    }

    fn of_type(frames: &[Value], t: &str) -> usize {
        frames.iter().filter(|f| f["type"] == t).count()
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let rooms = RoomMap::default();
        let mut a = Session::new();

        send(&rooms, &mut a, json!({"type":"join","chat_id":"42"})).await;
        send(&rooms, &mut a, json!({"type":"join","chat_id":"42"})).await;

        let m = rooms.read().await;
        assert_eq!(m.len(), 1);
        assert_eq!(m["42"].members.len(), 1);
        assert_eq!(a.room.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn numeric_chat_id_shares_room_with_string_form() {
        let rooms = RoomMap::default();
        let mut a = Session::new();
        let mut b = Session::new();

        send(&rooms, &mut a, json!({"type":"join","chat_id":42})).await;
        send(&rooms, &mut b, json!({"type":"join","chat_id":"42"})).await;

        let m = rooms.read().await;
        assert_eq!(m.len(), 1);
        assert_eq!(m["42"].members.len(), 2);
    }

    #[tokio::test]
    async fn join_replaces_previous_room() {
        let rooms = RoomMap::default();
        let mut a = Session::new();

        send(&rooms, &mut a, json!({"type":"join","chat_id":"1"})).await;
        send(&rooms, &mut a, json!({"type":"join","chat_id":"2"})).await;

        let m = rooms.read().await;
        assert!(!m.contains_key("1")); // 空房已回收
        assert_eq!(m["2"].members.len(), 1);
        assert_eq!(a.room.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn join_without_room_key_is_rejected() {
        let rooms = RoomMap::default();
        let mut a = Session::new();

        send(&rooms, &mut a, json!({"type":"join"})).await;
        send(&rooms, &mut a, json!({"type":"join","chat_id":""})).await;
        send(&rooms, &mut a, json!({"type":"join","chat_id":null})).await;

        assert!(rooms.read().await.is_empty());
        assert!(a.room.is_none());
    }

    #[tokio::test]
    async fn garbage_input_leaves_no_trace() {
        let rooms = RoomMap::default();
        let mut a = Session::new();

        handle_event("not json at all", &rooms, &mut a).await;
        handle_event("{\"type\":\"unknown\"}", &rooms, &mut a).await;

        assert!(rooms.read().await.is_empty());
    }

    #[tokio::test]
    async fn control_reaches_everyone_else_exactly_once() {
        let rooms = RoomMap::default();
        let (mut a, mut b, mut c) = (Session::new(), Session::new(), Session::new());

        for s in [&mut a, &mut b, &mut c] {
            send(&rooms, s, json!({"type":"join","chat_id":"42"})).await;
        }
        send(
            &rooms,
            &mut b,
            json!({"type":"control","chat_id":"42","action":"seek","time":37.5}),
        )
        .await;

        for other in [&mut a, &mut c] {
            let frames = drain(other);
            assert_eq!(of_type(&frames, "sync_control"), 1);
            let ctl = frames.iter().find(|f| f["type"] == "sync_control").unwrap();
            assert_eq!(ctl["action"], "seek");
            assert_eq!(ctl["time"], json!(37.5));
        }
        // 發送者自己收不到 echo
        assert_eq!(of_type(&drain(&mut b), "sync_control"), 0);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let rooms = RoomMap::default();
        let (mut a, mut b) = (Session::new(), Session::new());

        send(&rooms, &mut a, json!({"type":"join","chat_id":"1"})).await;
        send(&rooms, &mut b, json!({"type":"join","chat_id":"2"})).await;
        send(
            &rooms,
            &mut a,
            json!({"type":"control","chat_id":"1","action":"play","time":0.0,"video_id":"abc"}),
        )
        .await;

        assert_eq!(of_type(&drain(&mut b), "sync_control"), 0);
    }

    #[tokio::test]
    async fn control_without_action_is_dropped() {
        let rooms = RoomMap::default();
        let (mut a, mut b) = (Session::new(), Session::new());

        send(&rooms, &mut a, json!({"type":"join","chat_id":"9"})).await;
        send(&rooms, &mut b, json!({"type":"join","chat_id":"9"})).await;
        drain(&mut a);

        send(&rooms, &mut b, json!({"type":"control","chat_id":"9","action":"","time":1.0})).await;
        send(&rooms, &mut b, json!({"type":"control","chat_id":"9","time":1.0})).await;

        assert_eq!(of_type(&drain(&mut a), "sync_control"), 0);
    }

    #[tokio::test]
    async fn join_announced_to_others_only() {
        let rooms = RoomMap::default();
        let (mut a, mut b) = (Session::new(), Session::new());

        send(&rooms, &mut a, json!({"type":"join","chat_id":"7"})).await;
        send(&rooms, &mut b, json!({"type":"join","chat_id":"7"})).await;

        assert_eq!(of_type(&drain(&mut a), "status_message"), 1);
        assert_eq!(of_type(&drain(&mut b), "status_message"), 0); // 不通知 joiner 本人
    }

    #[tokio::test]
    async fn disconnect_cleans_up_and_reclaims_empty_room() {
        let rooms = RoomMap::default();
        let (mut a, mut b) = (Session::new(), Session::new());

        send(&rooms, &mut a, json!({"type":"join","chat_id":"42"})).await;
        send(&rooms, &mut b, json!({"type":"join","chat_id":"42"})).await;
        drain(&mut a);

        leave_room(&rooms, &mut b).await;
        {
            let m = rooms.read().await;
            assert_eq!(m["42"].members.len(), 1);
        }
        assert_eq!(of_type(&drain(&mut a), "status_message"), 1);

        leave_room(&rooms, &mut a).await;
        assert!(rooms.read().await.is_empty());
    }
}

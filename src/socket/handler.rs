use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::AppState;
use crate::socket::protocol::ServerEvent;
use crate::socket::session::{Flow, Session};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.connections.add(&conn_id, tx);

    // 写任务：连接表中的发送端全部释放后结束
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode outbound frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let mut session = Session::new(
        conn_id.clone(),
        state.presence.clone(),
        state.connections.clone(),
    );
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if session.handle_text(text.as_str()).await == Flow::Disconnect {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, "websocket error: {}", e);
                    break;
                }
            },
            _ = heartbeat.tick() => session.heartbeat().await,
        }
    }

    session.close().await;
    let _ = writer.await;
}

//! ============================================================================
//! WebSocket Channel - Streamed chat over a persistent connection
//! ============================================================================
//! Inbound:  {type: "chat", message, anonymousId}
//! Outbound: {type: "token", content}*, then {type: "done"} or
//!           {type: "error", message}
//!
//! Every chat frame runs as its own task. Outbound frames from all tasks go
//! through one writer. Closing the socket cancels in-flight generations.
//! ============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use relay_core::{ChatInput, Orchestrator, RelayError, ReplyEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::http::UPSTREAM_ERROR_MESSAGE;
use super::AppState;

const OUTBOUND_CAPACITY: usize = 128;
const TOKEN_CAPACITY: usize = 64;

const CHAT_FRAME_TYPE: &str = "chat";

/// Body of a `{type: "chat"}` frame
#[derive(Debug, Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "anonymousId")]
    anonymous_id: Option<String>,
}

impl From<ChatFrame> for ChatInput {
    fn from(frame: ChatFrame) -> Self {
        ChatInput {
            message: frame.message,
            identity: frame.anonymous_id,
        }
    }
}

/// Chat frames become input. Frames of any other type, or with no type at
/// all, yield `None`.
fn parse_frame(text: &str) -> serde_json::Result<Option<ChatInput>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("type").and_then(|t| t.as_str()) != Some(CHAT_FRAME_TYPE) {
        return Ok(None);
    }
    let frame: ChatFrame = serde_json::from_value(value)?;
    Ok(Some(frame.into()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outbound {
    Token { content: String },
    Done,
    Error { message: String },
}

impl From<ReplyEvent> for Outbound {
    fn from(event: ReplyEvent) -> Self {
        match event {
            ReplyEvent::Token(content) => Outbound::Token { content },
            ReplyEvent::Done => Outbound::Done,
        }
    }
}

/// GET / and GET /ws
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Client connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let connection = CancellationToken::new();

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode outbound frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch(text.as_str(), &state, &out_tx, &connection).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket receive failed: {}", e);
                break;
            }
        }
    }

    connection.cancel();
    info!("Client disconnected");
}

async fn dispatch(
    text: &str,
    state: &AppState,
    out: &mpsc::Sender<Outbound>,
    connection: &CancellationToken,
) {
    let input = match parse_frame(text) {
        Ok(Some(input)) => input,
        Ok(None) => return,
        Err(e) => {
            warn!("Unreadable WebSocket frame: {}", e);
            let _ = out
                .send(Outbound::Error {
                    message: UPSTREAM_ERROR_MESSAGE.to_string(),
                })
                .await;
            return;
        }
    };

    tokio::spawn(run_chat(
        state.orchestrator.clone(),
        input,
        out.clone(),
        connection.child_token(),
    ));
}

async fn run_chat(
    orchestrator: Arc<Orchestrator>,
    input: ChatInput,
    out: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<ReplyEvent>(TOKEN_CAPACITY);

    let forward = {
        let out = out.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if out.send(Outbound::from(event)).await.is_err() {
                    break;
                }
            }
        })
    };

    let result = orchestrator.stream_reply(input, tx, cancel).await;
    let _ = forward.await;

    let message = match result {
        Ok(_) | Err(RelayError::Cancelled) => return,
        Err(e) if e.is_client_error() => e.to_string(),
        Err(e) => {
            error!("WebSocket chat failed: {}", e);
            UPSTREAM_ERROR_MESSAGE.to_string()
        }
    };
    let _ = out.send(Outbound::Error { message }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use crate::server::test_support::harness;
    use relay_core::testing::{Script, ScriptedModel};
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[test]
    fn test_outbound_frame_shapes() {
        let token = serde_json::to_value(Outbound::Token {
            content: "Hi".into(),
        })
        .unwrap();
        assert_eq!(token, json!({"type": "token", "content": "Hi"}));
        assert_eq!(serde_json::to_value(Outbound::Done).unwrap(), json!({"type": "done"}));
        assert_eq!(
            serde_json::to_value(Outbound::Error {
                message: "AI error".into()
            })
            .unwrap(),
            json!({"type": "error", "message": "AI error"})
        );
    }

    #[test]
    fn test_chat_frame_becomes_input() {
        let input = parse_frame(r#"{"type":"chat","message":"hi","anonymousId":"u1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(input.message.as_deref(), Some("hi"));
        assert_eq!(input.identity.as_deref(), Some("u1"));
    }

    #[test]
    fn test_frames_without_chat_type_are_ignored() {
        for text in [
            r#"{"type":"ping"}"#,
            r#"{"message":"hi","anonymousId":"u1"}"#,
            r#"{"type":7,"message":"hi"}"#,
            r#"{"type":"ping","message":5}"#,
            r#"[1,2,3]"#,
        ] {
            assert!(parse_frame(text).unwrap().is_none(), "{}", text);
        }
    }

    #[test]
    fn test_unreadable_frame_is_an_error() {
        assert!(parse_frame("{not json").is_err());
    }

    async fn spawn_relay(model: ScriptedModel) -> (String, crate::server::test_support::Harness) {
        let h = harness(model);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(h.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}/ws", addr), h)
    }

    /// Read frames until a terminal one (done or error)
    async fn read_until_terminal<S>(socket: &mut S) -> Vec<Value>
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let mut frames = Vec::new();
        while let Some(Ok(message)) = socket.next().await {
            if let WsMessage::Text(text) = message {
                let frame: Value = serde_json::from_str(&text).unwrap();
                let terminal = frame["type"] == "done" || frame["type"] == "error";
                frames.push(frame);
                if terminal {
                    break;
                }
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_streams_tokens_then_done() {
        let (url, h) = spawn_relay(ScriptedModel::streaming(&["Hel", "lo"])).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        socket
            .send(WsMessage::Text(
                json!({"type": "chat", "message": "hello", "anonymousId": "u1"}).to_string(),
            ))
            .await
            .unwrap();

        let frames = read_until_terminal(&mut socket).await;
        assert_eq!(
            frames,
            vec![
                json!({"type": "token", "content": "Hel"}),
                json!({"type": "token", "content": "lo"}),
                json!({"type": "done"}),
            ]
        );

        let points = h.index.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_upstream_failure_sends_error_frame_and_keeps_socket_open() {
        let (url, _h) = spawn_relay(ScriptedModel::new(Script::Fail("boom".into()))).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let chat = json!({"type": "chat", "message": "hello", "anonymousId": "u1"}).to_string();
        for _ in 0..2 {
            socket.send(WsMessage::Text(chat.clone())).await.unwrap();
            let frames = read_until_terminal(&mut socket).await;
            assert_eq!(frames, vec![json!({"type": "error", "message": "AI error"})]);
        }
    }

    #[tokio::test]
    async fn test_untyped_frame_gets_no_reply() {
        let (url, h) = spawn_relay(ScriptedModel::streaming(&["Hi"])).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        socket
            .send(WsMessage::Text(
                json!({"message": "ignored", "anonymousId": "u1"}).to_string(),
            ))
            .await
            .unwrap();
        socket
            .send(WsMessage::Text(
                json!({"type": "chat", "message": "hello", "anonymousId": "u1"}).to_string(),
            ))
            .await
            .unwrap();

        // Only the typed chat frame is answered
        let frames = read_until_terminal(&mut socket).await;
        assert_eq!(
            frames,
            vec![json!({"type": "token", "content": "Hi"}), json!({"type": "done"})]
        );
        assert_eq!(h.model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_identity_sends_error_without_upstream_calls() {
        let (url, h) = spawn_relay(ScriptedModel::replying("unused")).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        socket
            .send(WsMessage::Text(json!({"type": "chat", "message": "hello"}).to_string()))
            .await
            .unwrap();

        let frames = read_until_terminal(&mut socket).await;
        assert_eq!(
            frames,
            vec![json!({"type": "error", "message": "Missing message or anonymousId"})]
        );
        assert!(h.embedder.calls().is_empty());
        assert!(h.model.prompts().is_empty());
    }
}

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() {
    // usage: client <token> <game_id> [mode] [server]
    // modes: watch (default) | ready | start
    let token = std::env::args().nth(1).unwrap_or_else(|| "token-alice".to_string());
    let game_id = std::env::args().nth(2).unwrap_or_default();
    let mode = std::env::args().nth(3).unwrap_or_else(|| "watch".to_string());
    let server = std::env::args()
        .nth(4)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string());

    let url = format!("{server}?token={token}&gameId={game_id}");
    let (mut ws, _resp) = connect_async(url.as_str()).await.expect("connect");

    match mode.as_str() {
        "ready" => {
            let ready = serde_json::json!({"type": 0, "currRound": 1});
            ws.send(Message::Text(ready.to_string())).await.unwrap();
        }
        "start" => {
            let ready = serde_json::json!({"type": 0, "currRound": 1});
            ws.send(Message::Text(ready.to_string())).await.unwrap();
            let start = serde_json::json!({"type": 1, "currRound": 1});
            ws.send(Message::Text(start.to_string())).await.unwrap();
        }
        _ => {}
    }

    let mut reads = 0;
    while reads < 200 {
        if let Some(msg) = ws.next().await {
            let txt = match msg {
                Ok(msg) => msg.to_string(),
                Err(err) => {
                    eprintln!("read error: {err}");
                    break;
                }
            };
            println!("<- {txt}");
            if let Ok(value) = serde_json::from_str::<Value>(&txt) {
                if value.get("msgType").and_then(|t| t.as_i64()) == Some(10) {
                    eprintln!("server error: {}", value.get("message").unwrap_or(&Value::Null));
                }
            }
        }
        reads += 1;
    }
}

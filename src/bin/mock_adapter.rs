//! Mock DAP debugger for integration tests
//!
//! Speaks just enough of the protocol to let the debug orchestrator run a
//! full attach session: it acknowledges the standard request sequence,
//! emits `initialized` after attach and `exited`/`terminated` after
//! configuration is done. With `--dump <path>` it writes the arguments of
//! every received setExceptionBreakpoints request to that file, so tests
//! can observe what actually crossed the wire after interception.

use std::path::PathBuf;

use serde_json::{json, Value};
use testbridge::dap::transport::DapTransport;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut dump_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--dump" {
            dump_path = args.next().map(PathBuf::from);
        }
    }

    let mut transport = DapTransport::new(tokio::io::stdin(), tokio::io::stdout());
    let mut seq: i64 = 0;

    loop {
        let message = match transport.recv().await {
            Ok(message) => message,
            Err(_) => break,
        };
        if message.get("type").and_then(Value::as_str) != Some("request") {
            continue;
        }

        let request_seq = message.get("seq").and_then(Value::as_i64).unwrap_or(0);
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if command == "setExceptionBreakpoints" {
            if let Some(path) = &dump_path {
                let arguments = message.get("arguments").cloned().unwrap_or(Value::Null);
                let _ = std::fs::write(path, arguments.to_string());
            }
        }

        seq += 1;
        let response = json!({
            "seq": seq,
            "type": "response",
            "request_seq": request_seq,
            "success": true,
            "command": command,
            "body": {},
        });
        if transport.send(&response).await.is_err() {
            break;
        }

        match command.as_str() {
            "attach" => {
                seq += 1;
                let event = json!({ "seq": seq, "type": "event", "event": "initialized" });
                let _ = transport.send(&event).await;
            }
            "configurationDone" => {
                seq += 1;
                let exited = json!({
                    "seq": seq,
                    "type": "event",
                    "event": "exited",
                    "body": { "exitCode": 0 },
                });
                let _ = transport.send(&exited).await;
                seq += 1;
                let terminated =
                    json!({ "seq": seq, "type": "event", "event": "terminated" });
                let _ = transport.send(&terminated).await;
                break;
            }
            "disconnect" => break,
            _ => {}
        }
    }
}

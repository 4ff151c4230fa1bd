//! JSON-RPC 2.0 framing over newline-delimited streams.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Any failure raised while a handler runs.
pub const HANDLER_ERROR: i64 = -32000;

/// An inbound request. `params` defaults to `null`, which handlers read as `{}`.
/// A missing `method` is kept as `None` and answered as an unknown method.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

/// Writes one JSON document per line and flushes after each, so the peer
/// sees every frame as soon as it is produced.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    out: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_frame(&mut self, frame: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, frame)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }

    pub fn send_result(&mut self, id: Option<&Value>, result: Value) -> io::Result<()> {
        self.write_frame(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))
    }

    pub fn send_error(&mut self, id: Option<&Value>, error: &ErrorObject) -> io::Result<()> {
        self.write_frame(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        }))
    }

    pub fn notify(&mut self, method: &str, params: Value) -> io::Result<()> {
        self.write_frame(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
    }
}

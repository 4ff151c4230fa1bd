//! Serial request dispatch.
//!
//! One line in, zero or more notifications plus exactly one response out.
//! A failing handler turns into an error response; the worker keeps serving.

use std::collections::HashMap;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use tts_core::{ChunkEvent, EventSink, VoiceService};

use crate::error::RpcError;
use crate::handlers;
use crate::protocol::{FrameWriter, Request};
use crate::validation::Params;

/// What a handler gets to work with for the duration of one request.
pub struct HandlerContext<'a> {
    pub service: &'a mut VoiceService,
    pub events: &'a mut dyn EventSink,
}

pub type Handler = fn(&mut HandlerContext<'_>, &Params) -> Result<Value, RpcError>;

/// Routes progress and chunk events of one request onto the output stream.
pub struct RequestEvents<'a, W: Write> {
    out: &'a mut FrameWriter<W>,
    request_id: Option<Value>,
}

impl<'a, W: Write> RequestEvents<'a, W> {
    pub fn new(out: &'a mut FrameWriter<W>, request_id: Option<Value>) -> Self {
        Self { out, request_id }
    }

    fn send(&mut self, method: &str, params: Value) {
        if let Err(e) = self.out.notify(method, params) {
            warn!("Failed to send {} notification: {}", method, e);
        }
    }
}

impl<W: Write> EventSink for RequestEvents<'_, W> {
    fn progress(&mut self, percent: u8, message: &str) {
        self.send("progress", json!({ "percent": percent, "message": message }));
    }

    fn chunk(&mut self, event: &ChunkEvent) {
        let Some(request_id) = self.request_id.clone() else {
            return;
        };
        self.send(
            "generation_chunk",
            json!({
                "request_id": request_id,
                "chunk_index": event.chunk_index,
                "chunk_path": event.chunk_path.to_string_lossy(),
                "is_final": event.is_final,
            }),
        );
    }

    fn accepts_chunks(&self) -> bool {
        self.request_id.is_some()
    }
}

pub struct Dispatcher<W: Write> {
    service: VoiceService,
    registry: HashMap<&'static str, Handler>,
    out: FrameWriter<W>,
}

impl<W: Write> Dispatcher<W> {
    pub fn new(service: VoiceService, out: W) -> Self {
        Self {
            service,
            registry: handlers::registry(),
            out: FrameWriter::new(out),
        }
    }

    pub fn service(&self) -> &VoiceService {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut VoiceService {
        &mut self.service
    }

    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.registry.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn into_writer(self) -> W {
        self.out.into_inner()
    }

    /// The one-time `ready` notification sent before any request is read.
    pub fn announce_ready(&mut self) -> io::Result<()> {
        self.out
            .notify("ready", json!({ "version": env!("CARGO_PKG_VERSION") }))
    }

    /// Answer an undecodable frame with a parse error and a null id.
    pub fn reject_frame(&mut self, reason: &str) -> io::Result<()> {
        let error = RpcError::Parse(reason.to_string()).to_error_object();
        self.out.send_error(None, &error)
    }

    /// Process one raw input line. Bytes that are not UTF-8 are rejected
    /// like any other malformed frame.
    pub fn handle_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match std::str::from_utf8(frame) {
            Ok(line) => self.handle_line(line),
            Err(e) => self.reject_frame(&e.to_string()),
        }
    }

    /// Process one input line. Only a failure to write to the output stream
    /// is returned; everything else becomes an error response.
    pub fn handle_line(&mut self, line: &str) -> io::Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => return self.reject_frame(&e.to_string()),
        };

        let Request { id, method, params } = request;
        let Some((method, handler)) = method
            .as_deref()
            .and_then(|name| self.registry.get_key_value(name))
            .map(|(name, handler)| (*name, *handler))
        else {
            let name = method.unwrap_or_else(|| "<missing>".to_string());
            let error = RpcError::MethodNotFound(name).to_error_object();
            return self.out.send_error(id.as_ref(), &error);
        };

        debug!("Handling {}", method);
        let outcome = Params::from_value(params).and_then(|params| {
            let mut events = RequestEvents::new(&mut self.out, id.clone());
            let mut ctx = HandlerContext {
                service: &mut self.service,
                events: &mut events,
            };
            panic::catch_unwind(AssertUnwindSafe(|| handler(&mut ctx, &params)))
                .unwrap_or_else(|_| Err(RpcError::Internal(format!("{method} handler panicked"))))
        });
        self.service.after_request();

        match outcome {
            Ok(result) => {
                info!("{} completed", method);
                self.out.send_result(id.as_ref(), result)
            }
            Err(err) => {
                let error = err.to_error_object();
                self.out.send_error(id.as_ref(), &error)
            }
        }
    }
}

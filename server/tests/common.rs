//! Common utilities for integration tests

#![allow(dead_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;
use tts_core::testing::{CountingConverter, ScriptedEngine};
use tts_core::{ServiceConfig, VoiceService};
use tts_worker::dispatcher::Dispatcher;

pub const CLONE_FOLDER: &str = "Qwen3-TTS-12Hz-1.7B-Base-8bit";
pub const CUSTOM_FOLDER: &str = "Qwen3-TTS-12Hz-1.7B-CustomVoice-8bit";
pub const DESIGN_FOLDER: &str = "Qwen3-TTS-12Hz-1.7B-VoiceDesign-8bit";

/// Output sink that can be read while the dispatcher still owns a handle.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Drain and parse every frame written so far.
    pub fn take_frames(&self) -> Vec<Value> {
        let bytes = std::mem::take(&mut *self.0.lock().unwrap());
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).expect("every frame is one JSON document"))
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct TestWorker {
    pub dir: TempDir,
    pub dispatcher: Dispatcher<SharedBuffer>,
    pub output: SharedBuffer,
    pub engine: ScriptedEngine,
    pub converter: CountingConverter,
}

impl TestWorker {
    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Send one line and return every frame it produced.
    pub fn call(&mut self, line: &str) -> Vec<Value> {
        self.dispatcher.handle_line(line).unwrap();
        self.output.take_frames()
    }

    /// Send raw bytes, which need not be valid UTF-8.
    pub fn call_frame(&mut self, frame: &[u8]) -> Vec<Value> {
        self.dispatcher.handle_frame(frame).unwrap();
        self.output.take_frames()
    }

    /// Send a request object and return its response frame, asserting that
    /// exactly one response was produced.
    pub fn request(&mut self, request: Value) -> Value {
        let frames = self.call(&request.to_string());
        let responses: Vec<Value> = frames
            .into_iter()
            .filter(|f| f.get("result").is_some() || f.get("error").is_some())
            .collect();
        assert_eq!(responses.len(), 1, "expected exactly one response");
        responses.into_iter().next().unwrap()
    }

    pub fn model_dir(&self, folder: &str) -> PathBuf {
        let dir = self.base().join("models").join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

/// Create a worker rooted in a fresh temporary directory. When `engine` is
/// `None` no engine is attached, like the shipped binary.
pub fn create_test_worker(engine: Option<ScriptedEngine>) -> TestWorker {
    let dir = tempfile::tempdir().unwrap();
    let converter = CountingConverter::new();
    let mut service = VoiceService::new(
        ServiceConfig::new(dir.path()),
        Box::new(converter.clone()),
    );
    let engine_attached = engine.is_some();
    let engine = engine.unwrap_or_default();
    if engine_attached {
        service.attach_engine(Box::new(engine.clone()));
    }

    let output = SharedBuffer::default();
    let dispatcher = Dispatcher::new(service, output.clone());

    TestWorker {
        dir,
        dispatcher,
        output,
        engine,
        converter,
    }
}

pub fn write_fake_mp3(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("compressed bytes of {name}")).unwrap();
    path
}

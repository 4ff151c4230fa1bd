//! One function per JSON-RPC method.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{json, Value};
use tts_core::catalog;
use tts_core::GenerateParams;

use crate::dispatcher::{Handler, HandlerContext};
use crate::error::RpcError;
use crate::validation::Params;

/// The fixed method table.
pub fn registry() -> HashMap<&'static str, Handler> {
    let mut table: HashMap<&'static str, Handler> = HashMap::new();
    table.insert("ping", ping);
    table.insert("init", init);
    table.insert("load_model", load_model);
    table.insert("unload_model", unload_model);
    table.insert("generate", generate);
    table.insert("convert_audio", convert_audio);
    table.insert("list_voices", list_voices);
    table.insert("enroll_voice", enroll_voice);
    table.insert("delete_voice", delete_voice);
    table.insert("get_model_info", get_model_info);
    table.insert("get_speakers", get_speakers);
    table
}

fn ping(_ctx: &mut HandlerContext<'_>, _params: &Params) -> Result<Value, RpcError> {
    Ok(json!({ "status": "ok" }))
}

fn init(ctx: &mut HandlerContext<'_>, params: &Params) -> Result<Value, RpcError> {
    let base_dir = params.optional_path("app_support_dir")?;
    let outcome = ctx.service.init(base_dir.as_deref())?;
    Ok(serde_json::to_value(outcome)?)
}

fn load_model(ctx: &mut HandlerContext<'_>, params: &Params) -> Result<Value, RpcError> {
    let model_id = params.optional_str("model_id")?.filter(|s| !s.is_empty());
    let model_path = params.optional_path("model_path")?;

    let outcome = ctx
        .service
        .load_model(model_id, model_path.as_deref(), &mut *ctx.events)?;

    let mut result = json!({
        "success": true,
        "model_path": outcome.model_path.to_string_lossy(),
    });
    if outcome.cached {
        result["cached"] = Value::Bool(true);
    }
    Ok(result)
}

fn unload_model(ctx: &mut HandlerContext<'_>, _params: &Params) -> Result<Value, RpcError> {
    ctx.service.unload_model();
    Ok(json!({ "success": true }))
}

fn generate(ctx: &mut HandlerContext<'_>, params: &Params) -> Result<Value, RpcError> {
    let request = GenerateParams {
        text: params.optional_str("text")?.unwrap_or_default().to_string(),
        output_path: params.optional_path("output_path")?,
        voice: params.optional_str("voice")?.map(str::to_string),
        instruct: params.optional_str("instruct")?.map(str::to_string),
        speed: params.optional_f32("speed")?,
        ref_audio: params.optional_path("ref_audio")?,
        ref_text: params.optional_str("ref_text")?.map(str::to_string),
        temperature: params.optional_f32("temperature")?,
        max_tokens: params.optional_u32("max_tokens")?,
        stream: params.flag("stream")?,
        streaming_interval: params.optional_f32("streaming_interval")?,
        benchmark: params.flag("benchmark")?,
        benchmark_label: params.optional_str("benchmark_label")?.map(str::to_string),
    };

    let outcome = ctx.service.generate(&request, &mut *ctx.events)?;
    Ok(serde_json::to_value(outcome)?)
}

fn convert_audio(ctx: &mut HandlerContext<'_>, params: &Params) -> Result<Value, RpcError> {
    let input = params.required_str("input_path")?;
    let output = params.optional_path("output_path")?;

    let wav_path = ctx
        .service
        .convert_audio(Path::new(input), output.as_deref())?;
    Ok(json!({ "wav_path": wav_path.to_string_lossy() }))
}

fn list_voices(ctx: &mut HandlerContext<'_>, _params: &Params) -> Result<Value, RpcError> {
    Ok(serde_json::to_value(ctx.service.list_voices()?)?)
}

fn enroll_voice(ctx: &mut HandlerContext<'_>, params: &Params) -> Result<Value, RpcError> {
    let (Ok(name), Ok(audio_path)) = (
        params.required_str("name"),
        params.required_str("audio_path"),
    ) else {
        return Err(RpcError::invalid("Missing required params: name, audio_path"));
    };
    let transcript = params.optional_str("transcript")?;

    let entry = ctx
        .service
        .enroll_voice(name, Path::new(audio_path), transcript)?;
    Ok(json!({
        "success": true,
        "name": entry.name,
        "wav_path": entry.wav_path.to_string_lossy(),
    }))
}

fn delete_voice(ctx: &mut HandlerContext<'_>, params: &Params) -> Result<Value, RpcError> {
    let name = params.required_str("name")?;
    let deleted = ctx.service.delete_voice(name)?;
    Ok(json!({ "success": deleted }))
}

fn get_model_info(ctx: &mut HandlerContext<'_>, _params: &Params) -> Result<Value, RpcError> {
    Ok(serde_json::to_value(ctx.service.model_info())?)
}

fn get_speakers(_ctx: &mut HandlerContext<'_>, _params: &Params) -> Result<Value, RpcError> {
    Ok(serde_json::to_value(catalog::speaker_map())?)
}

//! Embedded helper script and its deployment.
//!
//! The script is stored as a string constant and written to disk on first use
//! or when the embedded version changes (detected via hash comparison).

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::PathsConfig;
use crate::error::IoResultExt;
use crate::Result;

/// Python requirements for the converter virtual environment.
pub const REQUIREMENTS: &str = "\
torch>=2.1.0
transformers>=4.56.0
accelerate>=0.33.0
bitsandbytes>=0.43.0
safetensors>=0.4.0
sentencepiece>=0.2.0
protobuf>=4.25.0
pillow>=10.0.0
";

/// Long-running helper answering JSON-lines requests on stdin.
pub const HELPER_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Model toolkit helper for the bnb4 converter.

Reads one JSON request per line on stdin and answers each with one JSON line
on stdout. Everything else the libraries print goes to stderr.
"""
import gc
import json
import os
import sys
import traceback

PROTOCOL_OUT = os.fdopen(os.dup(1), "w", buffering=1)
os.dup2(2, 1)
sys.stdout = sys.stderr

STATE = {"model": None, "tokenizer": None, "processor": None}


def reply(request_id, ok, result=None, error=None):
    line = {"id": request_id, "ok": ok}
    if ok:
        line["result"] = result
    else:
        line["error"] = error
    PROTOCOL_OUT.write(json.dumps(line) + "\n")
    PROTOCOL_OUT.flush()


def classify(exc):
    name = type(exc).__name__
    if isinstance(exc, ImportError):
        return "unavailable"
    if isinstance(exc, OSError) or "NotFound" in name:
        return "not_found"
    if isinstance(exc, ValueError) and "Unrecognized" in str(exc):
        return "not_found"
    return "failed"


def torch_dtype(name):
    if not name:
        return None
    import torch
    return getattr(torch, name)


def op_capabilities(_request):
    import torch
    cuda = torch.cuda.is_available()
    info = {
        "cuda_available": cuda,
        "bf16_supported": bool(cuda and torch.cuda.is_bf16_supported()),
    }
    if cuda:
        props = torch.cuda.get_device_properties(0)
        info["gpu_name"] = props.name
        info["gpu_memory_bytes"] = int(props.total_memory)
    return info


def op_load_model(request):
    import transformers

    loaders = {
        "image_text_to_text": "AutoModelForImageTextToText",
        "causal_lm": "AutoModelForCausalLM",
    }
    loader = getattr(transformers, loaders[request["loader"]], None)
    if loader is None:
        raise ImportError(f"transformers has no {loaders[request['loader']]}")

    kwargs = {
        "device_map": request["device_map"],
        "trust_remote_code": bool(request.get("trust_remote_code", True)),
    }
    quant = request.get("quantization")
    if quant:
        kwargs["quantization_config"] = transformers.BitsAndBytesConfig(
            load_in_4bit=quant["load_in_4bit"],
            bnb_4bit_use_double_quant=quant["double_quant"],
            bnb_4bit_quant_type=quant["quant_type"],
            bnb_4bit_compute_dtype=torch_dtype(quant["compute_dtype"]),
        )
    dtype = torch_dtype(request.get("dtype"))
    if dtype is not None:
        kwargs["dtype"] = dtype

    STATE["model"] = None
    gc.collect()
    STATE["model"] = loader.from_pretrained(request["source"], **kwargs)
    return {"class": type(STATE["model"]).__name__}


def op_load_tokenizer(request):
    from transformers import AutoTokenizer

    STATE["tokenizer"] = AutoTokenizer.from_pretrained(
        request["source"],
        trust_remote_code=True,
        model_max_length=int(request["max_length"]),
    )
    return None


def op_load_image_processor(request):
    from transformers import AutoImageProcessor

    STATE["processor"] = AutoImageProcessor.from_pretrained(
        request["source"], trust_remote_code=True, use_fast=True
    )
    return None


def op_release_memory(request):
    gc.collect()
    if request.get("device_map") != "cpu":
        import torch
        if torch.cuda.is_available():
            torch.cuda.empty_cache()
    return None


def op_save(request):
    if STATE["model"] is None:
        raise RuntimeError("No model loaded")
    target = request["dir"]
    os.makedirs(target, exist_ok=True)
    STATE["model"].save_pretrained(
        target, safe_serialization=bool(request["safe_serialization"])
    )
    for key in ("tokenizer", "processor"):
        if STATE[key] is not None:
            STATE[key].save_pretrained(target)
    return {"files": sorted(os.listdir(target))}


def op_shutdown(_request):
    return None


HANDLERS = {
    "capabilities": op_capabilities,
    "load_model": op_load_model,
    "load_tokenizer": op_load_tokenizer,
    "load_image_processor": op_load_image_processor,
    "release_memory": op_release_memory,
    "save": op_save,
    "shutdown": op_shutdown,
}


def main():
    while True:
        raw = sys.stdin.readline()
        if not raw:
            break
        raw = raw.strip()
        if not raw:
            continue
        try:
            request = json.loads(raw)
        except ValueError as exc:
            print(f"Ignoring malformed request: {exc}", file=sys.stderr, flush=True)
            continue

        request_id = request.get("id")
        op = request.get("op")
        handler = HANDLERS.get(op)
        if handler is None:
            reply(request_id, False, error={
                "kind": "failed",
                "message": f"Unknown operation: {op}",
                "traceback": None,
            })
            continue

        try:
            result = handler(request)
        except Exception as exc:
            reply(request_id, False, error={
                "kind": classify(exc),
                "message": str(exc) or type(exc).__name__,
                "traceback": traceback.format_exc(),
            })
            continue

        reply(request_id, True, result=result)
        if op == "shutdown":
            break


if __name__ == "__main__":
    main()
"#;

/// Short content hash used for the `.hash` sidecar files.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Write the helper script and requirements file into `dir` if missing or
/// outdated.
pub fn ensure_scripts_deployed(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_path(dir)?;

    let script_written = deploy(dir, PathsConfig::HELPER_SCRIPT_NAME, HELPER_SCRIPT)?;
    let requirements_written = deploy(dir, PathsConfig::REQUIREMENTS_FILE_NAME, REQUIREMENTS)?;

    if script_written || requirements_written {
        info!("Helper scripts deployed to {}", dir.display());
    } else {
        debug!("Helper scripts in {} are up to date", dir.display());
    }
    Ok(())
}

/// Whether both deployed files match the embedded versions.
pub fn scripts_up_to_date(dir: &Path) -> bool {
    [
        (PathsConfig::HELPER_SCRIPT_NAME, HELPER_SCRIPT),
        (PathsConfig::REQUIREMENTS_FILE_NAME, REQUIREMENTS),
    ]
    .iter()
    .all(|(name, content)| is_current(dir, name, content))
}

fn is_current(dir: &Path, filename: &str, content: &str) -> bool {
    if !dir.join(filename).exists() {
        return false;
    }
    std::fs::read_to_string(dir.join(format!("{filename}.hash")))
        .map(|stored| stored.trim() == content_hash(content))
        .unwrap_or(false)
}

/// Returns whether the file was (re)written.
fn deploy(dir: &Path, filename: &str, content: &str) -> Result<bool> {
    if is_current(dir, filename, content) {
        return Ok(false);
    }

    let path = dir.join(filename);
    let hash_path = dir.join(format!("{filename}.hash"));
    std::fs::write(&path, content).with_path(&path)?;
    std::fs::write(&hash_path, content_hash(content)).with_path(&hash_path)?;
    Ok(true)
}

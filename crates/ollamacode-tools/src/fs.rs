use crate::{
    FileContent, READ_FILE, Tool, ToolContext, ToolData, ToolResult, WRITE_FILE, WriteMode,
    WriteOutcome, guess_mime, is_binary, parse_params,
};
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;

const READ_MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ReadParams {
    file_path: String,
}

pub struct FileReaderTool;

impl Tool for FileReaderTool {
    fn name(&self) -> &str {
        READ_FILE
    }

    fn description(&self) -> &str {
        "Read a text or image file inside the working directory"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult {
        let params: ReadParams = match parse_params(READ_FILE, params) {
            Ok(params) => params,
            Err(result) => return result,
        };
        let full = match ctx.resolve(&params.file_path) {
            Ok(full) => full,
            Err(result) => return result,
        };
        let meta = match fs::metadata(&full) {
            Ok(meta) => meta,
            Err(err) => {
                return ToolResult::failure(format!(
                    "cannot read {}: {err}",
                    params.file_path
                ));
            }
        };
        if meta.is_dir() {
            return ToolResult::failure(format!("{} is a directory", params.file_path));
        }
        if meta.len() > READ_MAX_BYTES {
            return ToolResult::failure(format!(
                "{} is too large ({} bytes, limit {READ_MAX_BYTES})",
                params.file_path,
                meta.len()
            ));
        }
        let bytes = match fs::read(&full) {
            Ok(bytes) => bytes,
            Err(err) => {
                return ToolResult::failure(format!(
                    "cannot read {}: {err}",
                    params.file_path
                ));
            }
        };
        let size = bytes.len() as u64;
        let mime = guess_mime(&full);
        if mime.starts_with("image/") {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            return ToolResult::ok(
                ToolData::File(FileContent::Image {
                    base64: encoded,
                    mime_type: mime.to_string(),
                    size,
                }),
                format!("read image {} ({size} bytes)", ctx.display_path(&full)),
            );
        }
        if is_binary(&bytes) {
            return ToolResult::failure(format!(
                "{} looks like a binary file",
                params.file_path
            ));
        }
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        let content = String::from_utf8_lossy(&bytes).to_string();
        ToolResult::ok(
            ToolData::File(FileContent::Text {
                content,
                size,
                sha256,
            }),
            format!("read {} ({size} bytes)", ctx.display_path(&full)),
        )
    }
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    file_path: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    mode: WriteMode,
    #[serde(default)]
    old_text: Option<String>,
    #[serde(default)]
    new_text: Option<String>,
}

pub struct FileWriterTool;

impl Tool for FileWriterTool {
    fn name(&self) -> &str {
        WRITE_FILE
    }

    fn description(&self) -> &str {
        "Create, append to, or replace text in a file inside the working directory"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ToolContext, params: &serde_json::Value) -> ToolResult {
        let params: WriteParams = match parse_params(WRITE_FILE, params) {
            Ok(params) => params,
            Err(result) => return result,
        };
        let full = match ctx.resolve(&params.file_path) {
            Ok(full) => full,
            Err(result) => return result,
        };
        if full.is_dir() {
            return ToolResult::failure(format!("{} is a directory", params.file_path));
        }
        let display = ctx.display_path(&full);

        let written = match params.mode {
            WriteMode::Create => {
                let Some(content) = params.content else {
                    return ToolResult::failure("content is required for mode create");
                };
                if let Some(parent) = full.parent()
                    && let Err(err) = fs::create_dir_all(parent)
                {
                    return ToolResult::failure(format!("cannot create {}: {err}", parent.display()));
                }
                fs::write(&full, content.as_bytes()).map(|_| None)
            }
            WriteMode::Append => {
                let Some(content) = params.content else {
                    return ToolResult::failure("content is required for mode append");
                };
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&full)
                    .and_then(|mut file| file.write_all(content.as_bytes()))
                    .map(|_| None)
            }
            WriteMode::Replace => {
                let (Some(old_text), Some(new_text)) = (params.old_text, params.new_text) else {
                    return ToolResult::failure("old_text and new_text are required for mode replace");
                };
                if old_text.is_empty() {
                    return ToolResult::failure("old_text must not be empty");
                }
                let before = match fs::read_to_string(&full) {
                    Ok(before) => before,
                    Err(err) => {
                        return ToolResult::failure(format!("cannot read {display}: {err}"));
                    }
                };
                let count = before.matches(old_text.as_str()).count();
                if count == 0 {
                    return ToolResult::failure(format!("old_text not found in {display}"));
                }
                fs::write(&full, before.replace(old_text.as_str(), &new_text)).map(|_| Some(count))
            }
        };

        let replacements = match written {
            Ok(replacements) => replacements,
            Err(err) => return ToolResult::failure(format!("cannot write {display}: {err}")),
        };
        let size = fs::metadata(&full).map(|m| m.len()).unwrap_or_default();
        ToolResult::ok(
            ToolData::Write(WriteOutcome {
                path: display.clone(),
                size,
                mode: params.mode,
                replacements,
            }),
            format!("{} {display} ({size} bytes)", params.mode),
        )
    }
}

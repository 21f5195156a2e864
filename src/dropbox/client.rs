use crate::dropbox::content_hash::content_hash;
use crate::error::MeyemError;
use crate::logging;
use crate::meyem::remote::{RemoteEntry, RemoteStore, join_remote};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";
const REQUEST_TIMEOUT_SECS: u64 = 300;
/// Largest file `files/upload` accepts; anything bigger goes through a session.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 150 * 1024 * 1024;
const SESSION_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ListFolderPage {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    #[serde(default)]
    content_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionStart {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_summary: String,
}

enum Reply {
    Success(Response),
    /// HTTP 409 carries an endpoint-specific error; the summary is enough to
    /// tell a missing path from a real failure.
    Conflict(String),
}

/// Dropbox paths have no trailing separator and the root is the empty string.
fn api_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn is_not_found(error_summary: &str) -> bool {
    error_summary.starts_with("path/not_found") || error_summary.starts_with("path_lookup/not_found")
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// JSON for the `Dropbox-API-Arg` header. HTTP headers must be ASCII, so
/// everything outside it is written as `\uXXXX` escapes.
pub fn header_safe_json(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    let mut units = [0u16; 2];
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

fn entries_from_page(dir: &str, page: &ListFolderPage) -> Vec<RemoteEntry> {
    page.entries
        .iter()
        .filter(|meta| meta.tag != "deleted")
        .map(|meta| RemoteEntry::new(join_remote(dir, &meta.name), meta.tag == "folder"))
        .collect()
}

fn read_chunk(file: &mut File, size: u64) -> std::io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size as usize);
    file.take(size).read_to_end(&mut chunk)?;
    Ok(chunk)
}

pub struct DropboxClient {
    http: Client,
    token: String,
    retries: usize,
    api_base: String,
    content_base: String,
}

impl DropboxClient {
    pub fn new(token: &str, retries: usize) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build dropbox http client")?;
        Ok(Self {
            http,
            token: token.to_string(),
            retries,
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
        })
    }

    fn rpc(&self, endpoint: &str, body: &Value) -> RequestBuilder {
        self.http
            .post(format!("{}/{endpoint}", self.api_base))
            .bearer_auth(&self.token)
            .json(body)
    }

    fn content(&self, endpoint: &str, arg: &Value, body: Vec<u8>) -> RequestBuilder {
        self.http
            .post(format!("{}/{endpoint}", self.content_base))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", header_safe_json(arg))
            .header("Content-Type", "application/octet-stream")
            .body(body)
    }

    /// Send with up to `retries` extra attempts on throttling, server errors,
    /// and transport failures, backing off 250ms per attempt.
    fn send(&self, endpoint: &str, path: &str, build: impl Fn() -> RequestBuilder) -> Result<Reply> {
        let mut last_failure = String::new();
        for attempt in 0..=self.retries {
            match build().send() {
                Ok(response) if response.status().is_success() => {
                    return Ok(Reply::Success(response));
                }
                Ok(response) if response.status() == StatusCode::CONFLICT => {
                    let body = response.text().unwrap_or_default();
                    let summary = serde_json::from_str::<ApiError>(&body)
                        .map(|err| err.error_summary)
                        .unwrap_or(body);
                    return Ok(Reply::Conflict(summary));
                }
                Ok(response) if is_retryable(response.status()) => {
                    last_failure = format!("{endpoint} returned {}", response.status());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().unwrap_or_default();
                    return Err(MeyemError::remote(
                        path,
                        format!("{endpoint} returned {status}: {}", body.trim()),
                    )
                    .into());
                }
                Err(err) => {
                    last_failure = format!("{endpoint} request failed: {err}");
                }
            }
            if attempt < self.retries {
                logging::debug(format!("{last_failure}; retrying"));
                let delay_ms = 250 * (attempt + 1) as u64;
                thread::sleep(Duration::from_millis(delay_ms));
            }
        }
        Err(MeyemError::remote(path, last_failure).into())
    }

    fn send_ok(&self, endpoint: &str, path: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        match self.send(endpoint, path, build)? {
            Reply::Success(response) => Ok(response),
            Reply::Conflict(summary) => {
                Err(MeyemError::remote(path, format!("{endpoint} failed: {summary}")).into())
            }
        }
    }

    fn commit_arg(path: &str) -> Value {
        json!({
            "path": api_path(path),
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        })
    }

    fn upload_simple(&self, path: &str, source: &Path) -> Result<Metadata> {
        let bytes = std::fs::read(source)
            .map_err(|err| MeyemError::filesystem(source, err))?;
        let arg = Self::commit_arg(path);
        let response = self.send_ok("files/upload", path, || {
            self.content("files/upload", &arg, bytes.clone())
        })?;
        response
            .json::<Metadata>()
            .map_err(|err| MeyemError::remote(path, format!("bad upload response: {err}")).into())
    }

    fn upload_session(&self, path: &str, source: &Path, size: u64) -> Result<Metadata> {
        let mut file = File::open(source).map_err(|err| MeyemError::filesystem(source, err))?;
        let first = read_chunk(&mut file, SESSION_CHUNK_SIZE)
            .map_err(|err| MeyemError::filesystem(source, err))?;
        let mut offset = first.len() as u64;
        let start_arg = json!({ "close": false });
        let session = self
            .send_ok("files/upload_session/start", path, || {
                self.content("files/upload_session/start", &start_arg, first.clone())
            })?
            .json::<SessionStart>()
            .map_err(|err| MeyemError::remote(path, format!("bad session response: {err}")))?;

        while offset < size {
            let chunk = read_chunk(&mut file, SESSION_CHUNK_SIZE)
                .map_err(|err| MeyemError::filesystem(source, err))?;
            if chunk.is_empty() {
                break;
            }
            logging::debug(format!("uploading {path}: {offset}/{size} bytes"));
            let arg = json!({
                "cursor": { "session_id": session.session_id, "offset": offset },
                "close": false,
            });
            self.send_ok("files/upload_session/append_v2", path, || {
                self.content("files/upload_session/append_v2", &arg, chunk.clone())
            })?;
            offset += chunk.len() as u64;
        }

        let finish_arg = json!({
            "cursor": { "session_id": session.session_id, "offset": offset },
            "commit": Self::commit_arg(path),
        });
        self.send_ok("files/upload_session/finish", path, || {
            self.content("files/upload_session/finish", &finish_arg, Vec::new())
        })?
        .json::<Metadata>()
        .map_err(|err| MeyemError::remote(path, format!("bad finish response: {err}")).into())
    }
}

impl RemoteStore for DropboxClient {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let body = json!({ "path": api_path(dir) });
        let mut page = match self.send("files/list_folder", dir, || {
            self.rpc("files/list_folder", &body)
        })? {
            Reply::Success(response) => response.json::<ListFolderPage>().map_err(|err| {
                MeyemError::remote(dir, format!("bad list_folder response: {err}"))
            })?,
            Reply::Conflict(summary) if is_not_found(&summary) => return Ok(Vec::new()),
            Reply::Conflict(summary) => {
                return Err(MeyemError::remote(dir, format!("list_folder failed: {summary}")).into());
            }
        };

        let mut out = entries_from_page(dir, &page);
        while page.has_more {
            let body = json!({ "cursor": page.cursor });
            page = self
                .send_ok("files/list_folder/continue", dir, || {
                    self.rpc("files/list_folder/continue", &body)
                })?
                .json::<ListFolderPage>()
                .map_err(|err| MeyemError::remote(dir, format!("bad continue response: {err}")))?;
            out.extend(entries_from_page(dir, &page));
        }
        Ok(out)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let body = json!({ "path": api_path(path) });
        match self.send("files/delete_v2", path, || self.rpc("files/delete_v2", &body))? {
            Reply::Success(_) => Ok(()),
            Reply::Conflict(summary) if is_not_found(&summary) => Ok(()),
            Reply::Conflict(summary) => {
                Err(MeyemError::remote(path, format!("delete failed: {summary}")).into())
            }
        }
    }

    fn put(&self, path: &str, source: &Path) -> Result<()> {
        let size = std::fs::metadata(source)
            .map_err(|err| MeyemError::filesystem(source, err))?
            .len();
        let uploaded = if size <= SIMPLE_UPLOAD_LIMIT {
            self.upload_simple(path, source)?
        } else {
            self.upload_session(path, source, size)?
        };

        let local_hash = content_hash(source)?;
        match uploaded.content_hash.as_deref() {
            Some(remote_hash) if remote_hash == local_hash => Ok(()),
            Some(remote_hash) => {
                // A corrupt copy must not count as uploaded on the next run.
                self.delete(path)?;
                Err(MeyemError::remote(
                    path,
                    format!("content hash mismatch: local {local_hash}, remote {remote_hash}"),
                )
                .into())
            }
            None => {
                logging::debug(format!("{path}: no content_hash in upload response"));
                Ok(())
            }
        }
    }
}

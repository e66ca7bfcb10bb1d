use super::{AfanasyError, Farm, Job};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Plain TCP client: one connection per request. The reply ends at its framed length
/// or when the server closes the connection.
#[derive(Debug, Clone)]
pub struct AfanasyClient {
    address: String,
    timeout: Duration,
}

impl AfanasyClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one JSON message and return the parsed reply.
    pub async fn request(&self, message: &Value) -> Result<Value, AfanasyError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| AfanasyError::Protocol(e.to_string()))?;
        let timeout = self.timeout;

        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| AfanasyError::Timeout(timeout))?
            .map_err(|source| AfanasyError::Connection {
                address: self.address.clone(),
                source,
            })?;

        let mut packet = format!("AFANASY {} JSON", body.len()).into_bytes();
        packet.extend_from_slice(&body);
        tokio::time::timeout(timeout, stream.write_all(&packet))
            .await
            .map_err(|_| AfanasyError::Timeout(timeout))?
            .map_err(|e| AfanasyError::Protocol(format!("write failed: {e}")))?;

        let read = async {
            let mut reply = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                reply.extend_from_slice(&chunk[..n]);
                if framed_len(&reply).is_some_and(|len| reply.len() >= len) {
                    break;
                }
            }
            Ok::<_, std::io::Error>(reply)
        };
        let reply = tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| AfanasyError::Timeout(timeout))?
            .map_err(|e| AfanasyError::Protocol(format!("read failed: {e}")))?;

        tracing::trace!(bytes = reply.len(), "Afanasy reply");
        parse_reply(&reply)
    }
}

/// Strip the `AFANASY <len> JSON` header and parse the body.
/// A reply carrying an `error` key is a rejection.
pub(crate) fn parse_reply(reply: &[u8]) -> Result<Value, AfanasyError> {
    let start = reply
        .iter()
        .position(|b| *b == b'{')
        .ok_or_else(|| AfanasyError::Protocol("reply holds no JSON".to_owned()))?;
    let value: Value = serde_json::from_slice(trim_nul(&reply[start..]))
        .map_err(|e| AfanasyError::Protocol(e.to_string()))?;

    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(AfanasyError::Rejected(message));
    }
    Ok(value)
}

/// Total message size announced by an `AFANASY <len> JSON` header, once the header is in.
pub(crate) fn framed_len(buf: &[u8]) -> Option<usize> {
    let rest = buf.strip_prefix(b"AFANASY ")?;
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    let body = rest[digits..].strip_prefix(b" JSON")?;
    let len: usize = std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()?;
    Some(buf.len() - body.len() + len)
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

// Output replies vary between server versions, so take the first string under a known key.
fn find_output(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for key in ["output", "task_output", "data"] {
                match map.get(key) {
                    Some(Value::String(text)) => return Some(text.clone()),
                    Some(Value::Array(lines)) if lines.iter().all(Value::is_string) => {
                        let text: Vec<&str> = lines.iter().filter_map(Value::as_str).collect();
                        return Some(text.join("\n"));
                    }
                    _ => {}
                }
            }
            map.values().find_map(find_output)
        }
        Value::Array(items) => items.iter().find_map(find_output),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Farm for AfanasyClient {
    async fn submit(&self, job: &Job) -> Result<i64, AfanasyError> {
        tracing::info!(job = %job.name, blocks = job.blocks.len(), server = %self.address, "Submitting job");
        let reply = self.request(&json!({ "job": job })).await?;
        reply
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AfanasyError::Protocol(format!("no job id in reply: {reply}")))
    }

    async fn job_info(&self, id: i64) -> Result<Value, AfanasyError> {
        let reply = self
            .request(&json!({
                "get": { "type": "jobs", "ids": [id], "mode": "full" }
            }))
            .await?;
        reply
            .get("jobs")
            .and_then(Value::as_array)
            .and_then(|jobs| jobs.first())
            .cloned()
            .ok_or(AfanasyError::JobNotFound(id))
    }

    async fn task_output(&self, id: i64, block: i64, task: i64) -> Result<String, AfanasyError> {
        let reply = self
            .request(&json!({
                "get": {
                    "type": "jobs",
                    "mode": "output",
                    "ids": [id],
                    "block_ids": [block],
                    "task_ids": [task]
                }
            }))
            .await?;
        find_output(&reply)
            .ok_or_else(|| AfanasyError::Protocol(format!("no task output in reply: {reply}")))
    }
}

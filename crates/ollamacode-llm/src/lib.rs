use ollamacode_core::{CancellationToken, Message, ModelSpec};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::io::BufReader;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::Duration;

/// Fixed per-request deadline imposed by every client.
pub const REQUEST_TIMEOUT_SECS: u64 = 300;
pub const CHAT_PATH: &str = "/api/chat";

/// How often a blocked caller re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("backend request canceled")]
    Canceled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub system_prompt: Option<String>,
}

impl ChatOptions {
    pub fn from_spec(spec: &ModelSpec) -> Self {
        Self {
            temperature: Some(spec.temperature),
            max_tokens: Some(spec.max_tokens),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// A chat-completions backend.
///
/// `on_chunk` in [`LlmClient::complete_streaming`] is invoked on the calling
/// thread between network reads. It must not call back into the client and
/// must not take the conversation lock; write to a thread-safe sink only.
pub trait LlmClient: Send + Sync {
    fn model(&self) -> String;

    fn set_model(&self, name: &str);

    fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError>;

    /// Streams the answer, passing every non-empty fragment to `on_chunk`, and
    /// returns the accumulated text.
    fn complete_streaming(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, BackendError>;
}

// ── Wire format ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "RequestOptions::is_empty")]
    options: RequestOptions,
}

#[derive(Debug, Default, Serialize)]
struct RequestOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl RequestOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.num_predict.is_none()
            && self.top_k.is_none()
            && self.top_p.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct ChatRecord {
    #[serde(default)]
    message: Option<RecordMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordMessage {
    #[serde(default)]
    content: String,
}

/// JSON body for `POST /api/chat`. The system prompt, when set, goes first;
/// `messages` itself is left untouched.
pub fn build_request_body(
    model: &str,
    messages: &[Message],
    options: &ChatOptions,
    stream: bool,
) -> serde_json::Value {
    let mut all = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = &options.system_prompt {
        all.push(Message::system(system.clone()));
    }
    all.extend_from_slice(messages);
    let request = ChatRequest {
        model: model.to_string(),
        messages: all,
        stream,
        options: RequestOptions {
            temperature: options.temperature,
            num_predict: options.max_tokens,
            top_k: options.top_k,
            top_p: options.top_p,
        },
    };
    serde_json::to_value(request).unwrap_or(serde_json::Value::Null)
}

// ── Ollama client ─────────────────────────────────────────────────────────

pub fn http_client() -> Result<Client, BackendError> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|err| format_transport_error(&err))
}

#[derive(Debug)]
pub struct OllamaClient {
    endpoint: String,
    model: RwLock<String>,
    http: Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, BackendError> {
        Ok(Self::with_http(base_url, model, http_client()?))
    }

    /// Build on an existing HTTP client; clones of one `Client` share a pool.
    pub fn with_http(base_url: &str, model: impl Into<String>, http: Client) -> Self {
        Self {
            endpoint: format!("{}{CHAT_PATH}", base_url.trim_end_matches('/')),
            model: RwLock::new(model.into()),
            http,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn spawn_request(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> mpsc::Receiver<Frame> {
        let body = build_request_body(&self.model(), messages, options, stream);
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let response = match http.post(&endpoint).json(&body).send() {
                Ok(resp) => resp,
                Err(err) => {
                    let _ = tx.send(Frame::Failed(format_transport_error(&err)));
                    return;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                let _ = tx.send(Frame::Failed(BackendError::Status {
                    code: status.as_u16(),
                    body,
                }));
                return;
            }
            if stream {
                read_stream(response, &tx);
            } else {
                let frame = match response.text() {
                    Ok(text) => match parse_complete_body(&text) {
                        Ok(content) => Frame::Chunk(content),
                        Err(err) => Frame::Failed(err),
                    },
                    Err(err) => Frame::Failed(format_transport_error(&err)),
                };
                let _ = tx.send(frame);
                let _ = tx.send(Frame::Done);
            }
        });
        rx
    }
}

impl LlmClient for OllamaClient {
    fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_model(&self, name: &str) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        let rx = self.spawn_request(messages, options, false);
        drain_frames(&rx, cancel, &mut |_| {})
    }

    fn complete_streaming(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        let rx = self.spawn_request(messages, options, true);
        drain_frames(&rx, cancel, on_chunk)
    }
}

// The HTTP exchange runs on a helper thread so that a cancelled caller can
// walk away from a blocked read; the helper notices on its next send.
enum Frame {
    Chunk(String),
    Done,
    Failed(BackendError),
}

fn drain_frames(
    rx: &mpsc::Receiver<Frame>,
    cancel: &CancellationToken,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<String, BackendError> {
    let mut text = String::new();
    loop {
        if cancel.is_cancelled() {
            return Err(BackendError::Canceled);
        }
        match rx.recv_timeout(CANCEL_POLL) {
            Ok(Frame::Chunk(fragment)) => {
                if !fragment.is_empty() {
                    on_chunk(&fragment);
                    text.push_str(&fragment);
                }
            }
            Ok(Frame::Done) => return Ok(text),
            Ok(Frame::Failed(err)) => return Err(err),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BackendError::Transport(
                    "request worker stopped before the response completed".to_string(),
                ));
            }
        }
    }
}

fn read_stream(response: reqwest::blocking::Response, tx: &mpsc::Sender<Frame>) {
    let records = serde_json::Deserializer::from_reader(BufReader::new(response))
        .into_iter::<ChatRecord>();
    for record in records {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io() => {
                let _ = tx.send(Frame::Failed(BackendError::Transport(format!(
                    "stream read error: {err}"
                ))));
                return;
            }
            Err(err) => {
                let _ = tx.send(Frame::Failed(BackendError::Decode(err.to_string())));
                return;
            }
        };
        if let Some(error) = record.error {
            let _ = tx.send(Frame::Failed(BackendError::Decode(format!(
                "backend reported: {error}"
            ))));
            return;
        }
        if let Some(message) = record.message
            && !message.content.is_empty()
            && tx.send(Frame::Chunk(message.content)).is_err()
        {
            return;
        }
        if record.done {
            break;
        }
    }
    let _ = tx.send(Frame::Done);
}

fn parse_complete_body(body: &str) -> Result<String, BackendError> {
    let record: ChatRecord =
        serde_json::from_str(body).map_err(|err| BackendError::Decode(err.to_string()))?;
    if let Some(error) = record.error {
        return Err(BackendError::Decode(format!("backend reported: {error}")));
    }
    record
        .message
        .map(|m| m.content)
        .ok_or_else(|| BackendError::Decode("response has no message".to_string()))
}

fn format_transport_error(err: &reqwest::Error) -> BackendError {
    let inner = err.source().map(|e| e.to_string()).unwrap_or_default();
    if err.is_timeout() {
        BackendError::Transport(format!(
            "request timed out after {REQUEST_TIMEOUT_SECS}s; the model may still be loading"
        ))
    } else if err.is_connect() {
        BackendError::Transport(format!(
            "connection refused ({inner}); is `ollama serve` running?"
        ))
    } else {
        BackendError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    #[derive(Clone)]
    struct Scripted {
        status: u16,
        body: String,
        delay: Duration,
    }

    fn ok(body: &str) -> Scripted {
        Scripted {
            status: 200,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    struct MockServer {
        base_url: String,
        requests: Arc<Mutex<Vec<String>>>,
        stop: Arc<AtomicBool>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl MockServer {
        fn request_bodies(&self) -> Vec<serde_json::Value> {
            self.requests
                .lock()
                .expect("test lock")
                .iter()
                .map(|raw| serde_json::from_str(raw).expect("request json"))
                .collect()
        }
    }

    impl Drop for MockServer {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn start_mock_server(script: Vec<Scripted>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let requests_thread = Arc::clone(&requests);
        let stop_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut served = 0usize;
            while !stop_thread.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).expect("blocking stream");
                        let body = read_request_body(&mut stream);
                        requests_thread.lock().expect("test lock").push(body);
                        let selected = script
                            .get(served)
                            .or_else(|| script.last())
                            .cloned()
                            .expect("scripted response");
                        served += 1;
                        let deadline = Instant::now() + selected.delay;
                        while Instant::now() < deadline && !stop_thread.load(Ordering::SeqCst) {
                            thread::sleep(Duration::from_millis(5));
                        }
                        let response = format!(
                            "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            selected.status,
                            selected.body.len(),
                            selected.body
                        );
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });
        MockServer {
            base_url: format!("http://{addr}"),
            requests,
            stop,
            handle: Some(handle),
        }
    }

    fn read_request_body(stream: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        let header_end = loop {
            let read = stream.read(&mut chunk).unwrap_or(0);
            if read == 0 {
                return String::new();
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(idx) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break idx + 4;
            }
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let content_length = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = buffer[header_end..].to_vec();
        while body.len() < content_length {
            let read = stream.read(&mut chunk).unwrap_or(0);
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        String::from_utf8_lossy(&body).to_string()
    }

    fn record(content: &str, done: bool) -> String {
        serde_json::json!({
            "model": "m",
            "created_at": "2024-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": content},
            "done": done,
        })
        .to_string()
    }

    #[test]
    fn complete_returns_message_content() {
        let server = start_mock_server(vec![ok(&record("hi there", true))]);
        let client = OllamaClient::new(&server.base_url, "qwen").expect("client");
        let text = client
            .complete(
                &[Message::user("hello")],
                &ChatOptions::default(),
                &CancellationToken::new(),
            )
            .expect("complete");
        assert_eq!(text, "hi there");

        let bodies = server.request_bodies();
        assert_eq!(bodies[0]["model"], "qwen");
        assert_eq!(bodies[0]["stream"], false);
        assert!(bodies[0].get("options").is_none());
    }

    #[test]
    fn system_prompt_is_prepended_without_touching_caller_messages() {
        let server = start_mock_server(vec![ok(&record("ok", true))]);
        let client = OllamaClient::new(&server.base_url, "qwen").expect("client");
        let messages = vec![Message::user("hello")];
        let options = ChatOptions {
            temperature: Some(0.2),
            max_tokens: Some(64),
            ..ChatOptions::default()
        }
        .with_system_prompt("be brief");
        client
            .complete(&messages, &options, &CancellationToken::new())
            .expect("complete");

        assert_eq!(messages.len(), 1);
        let body = &server.request_bodies()[0];
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn non_success_status_surfaces_body_verbatim() {
        let server = start_mock_server(vec![Scripted {
            status: 404,
            body: r#"{"error":"model 'nope' not found"}"#.to_string(),
            delay: Duration::ZERO,
        }]);
        let client = OllamaClient::new(&server.base_url, "nope").expect("client");
        let err = client
            .complete(
                &[Message::user("x")],
                &ChatOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Status {
                code: 404,
                body: r#"{"error":"model 'nope' not found"}"#.to_string()
            }
        );
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let server = start_mock_server(vec![ok("<html>not json</html>")]);
        let client = OllamaClient::new(&server.base_url, "m").expect("client");
        let err = client
            .complete(
                &[Message::user("x")],
                &ChatOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)), "{err:?}");
    }

    #[test]
    fn unreachable_backend_is_a_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let client = OllamaClient::new(&format!("http://127.0.0.1:{port}"), "m").expect("client");
        let err = client
            .complete(
                &[Message::user("x")],
                &ChatOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)), "{err:?}");
    }

    #[test]
    fn streaming_passes_only_non_empty_fragments() {
        let body = [
            record("Hello", false),
            record("", false),
            record(" ", false),
            record("World", true),
        ]
        .join("\n");
        let server = start_mock_server(vec![ok(&body)]);
        let client = OllamaClient::new(&server.base_url, "m").expect("client");
        let mut seen = Vec::new();
        let text = client
            .complete_streaming(
                &[Message::user("greet")],
                &ChatOptions::default(),
                &CancellationToken::new(),
                &mut |chunk| seen.push(chunk.to_string()),
            )
            .expect("stream");
        assert_eq!(text, "Hello World");
        assert_eq!(seen, vec!["Hello", " ", "World"]);
        assert_eq!(server.request_bodies()[0]["stream"], true);
    }

    #[test]
    fn streaming_stops_at_done_record() {
        let body = format!("{}{}{}", record("a", false), record("b", true), record("c", false));
        let server = start_mock_server(vec![ok(&body)]);
        let client = OllamaClient::new(&server.base_url, "m").expect("client");
        let text = client
            .complete_streaming(
                &[Message::user("x")],
                &ChatOptions::default(),
                &CancellationToken::new(),
                &mut |_| {},
            )
            .expect("stream");
        assert_eq!(text, "ab");
    }

    #[test]
    fn streaming_without_done_ends_at_end_of_stream() {
        let body = format!("{}\n{}\n", record("x", false), record("y", false));
        let server = start_mock_server(vec![ok(&body)]);
        let client = OllamaClient::new(&server.base_url, "m").expect("client");
        let text = client
            .complete_streaming(
                &[Message::user("x")],
                &ChatOptions::default(),
                &CancellationToken::new(),
                &mut |_| {},
            )
            .expect("stream");
        assert_eq!(text, "xy");
    }

    #[test]
    fn cancellation_aborts_in_flight_request() {
        let server = start_mock_server(vec![Scripted {
            status: 200,
            body: record("late", true),
            delay: Duration::from_secs(3),
        }]);
        let client = OllamaClient::new(&server.base_url, "m").expect("client");
        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });
        let started = Instant::now();
        let err = client
            .complete(&[Message::user("x")], &ChatOptions::default(), &cancel)
            .unwrap_err();
        assert_eq!(err, BackendError::Canceled);
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().expect("join");
    }

    #[test]
    fn set_model_changes_outgoing_model() {
        let server = start_mock_server(vec![ok(&record("ok", true))]);
        let client = OllamaClient::new(&server.base_url, "first").expect("client");
        client.set_model("second");
        assert_eq!(client.model(), "second");
        client
            .complete(
                &[Message::user("x")],
                &ChatOptions::default(),
                &CancellationToken::new(),
            )
            .expect("complete");
        assert_eq!(server.request_bodies()[0]["model"], "second");
    }

    #[test]
    fn endpoint_joins_chat_path() {
        let client = OllamaClient::new("http://localhost:11434/", "m").expect("client");
        assert_eq!(client.endpoint(), "http://localhost:11434/api/chat");
    }
}

//! Test doubles shared by the workspace: a scripted in-process backend client
//! and a mock Ollama HTTP server.

use ollamacode_core::{CancellationToken, Message};
use ollamacode_llm::{BackendError, ChatOptions, LlmClient};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

// ── Scripted client ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Chunks(Vec<String>),
    Fail(BackendError),
    /// Block until the caller's token is cancelled.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: ChatOptions,
    pub streaming: bool,
}

/// `LlmClient` that answers from a queue. An empty queue yields a transport
/// error so that unexpected calls are visible in assertions.
pub struct ScriptedClient {
    model: RwLock<String>,
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: RwLock::new(model.to_string()),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(model: &str, replies: Vec<ScriptedReply>) -> Self {
        let client = Self::new(model);
        for reply in replies {
            client.push(reply);
        }
        client
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
    }

    pub fn push_text(&self, text: &str) {
        self.push(ScriptedReply::Text(text.to_string()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        streaming: bool,
    ) -> Option<ScriptedReply> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedCall {
            model: self.model(),
            messages: messages.to_vec(),
            options: options.clone(),
            streaming,
        });
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

fn hang(cancel: &CancellationToken) -> BackendError {
    while !cancel.wait(Duration::from_millis(50)) {}
    BackendError::Canceled
}

impl LlmClient for ScriptedClient {
    fn model(&self) -> String {
        self.model.read().unwrap_or_else(PoisonError::into_inner).clone()
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
        match self.next(messages, options, false) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Chunks(chunks)) => Ok(chunks.concat()),
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Hang) => Err(hang(cancel)),
            None => Err(BackendError::Transport("no scripted reply".to_string())),
        }
    }

    fn complete_streaming(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, BackendError> {
        let chunks = match self.next(messages, options, true) {
            Some(ScriptedReply::Text(text)) => vec![text],
            Some(ScriptedReply::Chunks(chunks)) => chunks,
            Some(ScriptedReply::Fail(err)) => return Err(err),
            Some(ScriptedReply::Hang) => return Err(hang(cancel)),
            None => return Err(BackendError::Transport("no scripted reply".to_string())),
        };
        let mut text = String::new();
        for chunk in chunks.iter().filter(|c| !c.is_empty()) {
            if cancel.is_cancelled() {
                return Err(BackendError::Canceled);
            }
            on_chunk(chunk);
            text.push_str(chunk);
        }
        Ok(text)
    }
}

/// A factory that hands the same client out for every model name.
pub fn shared_client_factory(
    client: Arc<ScriptedClient>,
) -> Arc<dyn Fn(&str) -> Arc<dyn LlmClient> + Send + Sync> {
    Arc::new(move |_name: &str| Arc::clone(&client) as Arc<dyn LlmClient>)
}

// ── Mock Ollama HTTP server ───────────────────────────────────────────────

/// One `/api/chat` record as Ollama sends it.
pub fn chat_record(content: &str, done: bool) -> String {
    serde_json::json!({
        "model": "mock",
        "created_at": "2024-01-01T00:00:00Z",
        "message": {"role": "assistant", "content": content},
        "done": done,
    })
    .to_string()
}

/// Newline-delimited stream of records, `done` on the last one.
pub fn stream_body(fragments: &[&str]) -> String {
    let last = fragments.len().saturating_sub(1);
    fragments
        .iter()
        .enumerate()
        .map(|(idx, fragment)| chat_record(fragment, idx == last))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
}

impl MockResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Serves scripted responses in request order; the last one repeats.
pub struct MockOllamaServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockOllamaServer {
    pub fn start(script: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("mock addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let requests_thread = Arc::clone(&requests);
        let stop_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut served = 0usize;
            while !stop_thread.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                        let body = read_request_body(&mut stream);
                        requests_thread.lock().expect("mock requests").push(body);
                        let Some(reply) = script.get(served).or_else(|| script.last()).cloned()
                        else {
                            break;
                        };
                        served += 1;
                        let response = format!(
                            "HTTP/1.1 {} MOCK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            reply.status,
                            reply.body.len(),
                            reply.body
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
        Self {
            base_url: format!("http://{addr}"),
            requests,
            stop,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Parsed JSON bodies of every request received so far.
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .expect("mock requests")
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    /// Wait until at least `count` requests arrived or `timeout` passes.
    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.requests.lock().expect("mock requests").len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
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

/// Fresh temporary workspace directory.
pub fn temp_workspace() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp workspace")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ollamacode_llm::OllamaClient;

    #[test]
    fn scripted_client_replays_queue_then_fails() {
        let client = ScriptedClient::with_replies("m", vec![ScriptedReply::Text("one".into())]);
        let cancel = CancellationToken::new();
        let options = ChatOptions::default();
        assert_eq!(
            client
                .complete(&[Message::user("a")], &options, &cancel)
                .expect("first"),
            "one"
        );
        assert!(matches!(
            client.complete(&[Message::user("b")], &options, &cancel),
            Err(BackendError::Transport(_))
        ));
        assert_eq!(client.calls().len(), 2);
    }

    #[test]
    fn hang_returns_when_cancelled() {
        let client = Arc::new(ScriptedClient::with_replies("m", vec![ScriptedReply::Hang]));
        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });
        let err = client
            .complete(&[], &ChatOptions::default(), &cancel)
            .unwrap_err();
        assert_eq!(err, BackendError::Canceled);
        handle.join().expect("join");
    }

    #[test]
    fn mock_server_speaks_ollama_chat() {
        let server = MockOllamaServer::start(vec![
            MockResponse::ok(chat_record("pong", true)),
            MockResponse::ok(stream_body(&["a", "b"])),
        ]);
        let client = OllamaClient::new(server.base_url(), "mock").expect("client");
        let cancel = CancellationToken::new();
        let first = client
            .complete(&[Message::user("ping")], &ChatOptions::default(), &cancel)
            .expect("complete");
        assert_eq!(first, "pong");
        let second = client
            .complete_streaming(
                &[Message::user("ping")],
                &ChatOptions::default(),
                &cancel,
                &mut |_| {},
            )
            .expect("stream");
        assert_eq!(second, "ab");
        assert_eq!(server.requests().len(), 2);
    }
}

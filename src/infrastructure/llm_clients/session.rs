//! Persistent agent session spoken over JSON lines.
//!
//! The agent is a long-lived child process. Commands go to its stdin, events
//! come back on stdout, one JSON object per line. A session is opened lazily on
//! the first call with the system prompt appended once; later calls reuse it.
//! Every `session.send` carries a fresh request id and only events with that id
//! (or no id at all) count toward the reply. `session.idle` completes a call,
//! `session.error` fails it.

use super::{GenerationRequest, SqlBackend};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::SessionConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageMode {
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMessage {
    pub mode: SystemMessageMode,
    pub content: String,
}

/// Outbound line sent to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SessionCommand {
    #[serde(rename = "session.create", rename_all = "camelCase")]
    Create {
        model: String,
        system_message: SystemMessage,
    },
    #[serde(rename = "session.send", rename_all = "camelCase")]
    Send { request_id: String, prompt: String },
    #[serde(rename = "session.close")]
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    AssistantMessage(String),
    AssistantDelta(String),
    Idle,
    Error(String),
    ToolStart { tool_call_id: String },
    ToolComplete { tool_call_id: String },
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub request_id: Option<String>,
    pub kind: SessionEventKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    data: WireEventData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEventData {
    content: Option<String>,
    delta_content: Option<String>,
    message: Option<String>,
    tool_call_id: Option<String>,
}

impl SessionEvent {
    pub fn new(request_id: Option<&str>, kind: SessionEventKind) -> Self {
        Self {
            request_id: request_id.map(str::to_string),
            kind,
        }
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let wire: WireEvent = serde_json::from_str(line)
            .map_err(|e| AppError::ParseError(format!("Invalid session event: {}", e)))?;
        let data = wire.data;

        let kind = match wire.kind.as_str() {
            "assistant.message" => SessionEventKind::AssistantMessage(data.content.unwrap_or_default()),
            "assistant.message_delta" => {
                SessionEventKind::AssistantDelta(data.delta_content.unwrap_or_default())
            }
            "session.idle" => SessionEventKind::Idle,
            "session.error" => SessionEventKind::Error(
                data.message.unwrap_or_else(|| "unknown error".to_string()),
            ),
            "tool.execution_start" => SessionEventKind::ToolStart {
                tool_call_id: data.tool_call_id.unwrap_or_default(),
            },
            "tool.execution_complete" => SessionEventKind::ToolComplete {
                tool_call_id: data.tool_call_id.unwrap_or_default(),
            },
            other => SessionEventKind::Other(other.to_string()),
        };

        Ok(Self {
            request_id: wire.request_id,
            kind,
        })
    }

    fn belongs_to(&self, request_id: &str) -> bool {
        self.request_id.as_deref().map_or(true, |id| id == request_id)
    }
}

/// Both ends of a running agent.
pub struct SessionChannel {
    pub commands: mpsc::Sender<SessionCommand>,
    pub events: mpsc::Receiver<SessionEvent>,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Start the agent. Starting again replaces any running agent.
    async fn start(&self) -> Result<SessionChannel>;

    /// Stop the agent and reap it. Never fails.
    async fn stop(&self);
}

/// Runs the agent as a child process speaking JSON lines on stdin/stdout.
pub struct ProcessTransport {
    config: SessionConfig,
    child: AsyncMutex<Option<Child>>,
}

impl ProcessTransport {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            child: AsyncMutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.child.lock().await.is_some()
    }

    async fn reap(child: &mut Child, command: &str) {
        let _ = child.kill().await;
        let _ = child.wait().await;
        info!(command = %command, "Session process stopped");
    }
}

#[async_trait]
impl SessionTransport for ProcessTransport {
    async fn start(&self) -> Result<SessionChannel> {
        let mut slot = self.child.lock().await;
        if let Some(mut previous) = slot.take() {
            Self::reap(&mut previous, &self.config.command).await;
        }

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::ConnectionError(format!(
                    "Failed to start session process '{}': {}",
                    self.config.command, e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Internal("Session stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("Session stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("Session stderr unavailable".to_string()))?;

        let (command_tx, mut command_rx) = mpsc::channel::<SessionCommand>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let mut line = match serde_json::to_string(&command) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode session command");
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    warn!(error = %e, "Session process stdin closed");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    warn!(error = %e, "Session process stdin closed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match SessionEvent::parse_line(line) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed session event"),
                }
            }
            debug!("Session event stream ended");
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "datagenie::session::stderr", "{}", line);
            }
        });

        info!(
            command = %self.config.command,
            pid = child.id().unwrap_or_default(),
            "Session process started"
        );
        *slot = Some(child);

        Ok(SessionChannel {
            commands: command_tx,
            events: event_rx,
        })
    }

    async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            Self::reap(&mut child, &self.config.command).await;
        }
    }
}

struct ActiveSession {
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    prompt_key: String,
    // Set while a call waits for its reply. Still set on the next call means
    // the previous one was cancelled and the agent may still be answering it.
    in_flight: bool,
}

/// Call-scoped reply text. When a whole message arrives the streamed deltas
/// are discarded rather than joined, since agents finish a stream by sending
/// the full text again.
#[derive(Default)]
struct ReplyBuffer {
    messages: String,
    deltas: String,
}

impl ReplyBuffer {
    fn finish(self) -> String {
        if self.messages.is_empty() {
            self.deltas
        } else {
            self.messages
        }
    }
}

pub struct SessionBackend {
    transport: Box<dyn SessionTransport>,
    model: String,
    active: AsyncMutex<Option<ActiveSession>>,
}

impl SessionBackend {
    pub fn new(transport: Box<dyn SessionTransport>, model: String) -> Self {
        Self {
            transport,
            model,
            active: AsyncMutex::new(None),
        }
    }

    fn prompt_key(system_prompt: &str) -> String {
        hex::encode(Sha256::digest(system_prompt.as_bytes()))
    }

    async fn open(&self, system_prompt: &str, prompt_key: String) -> Result<ActiveSession> {
        let channel = self.transport.start().await?;
        let create = SessionCommand::Create {
            model: self.model.clone(),
            system_message: SystemMessage {
                mode: SystemMessageMode::Append,
                content: system_prompt.to_string(),
            },
        };
        if channel.commands.send(create).await.is_err() {
            self.transport.stop().await;
            return Err(AppError::ConnectionError(
                "Session process closed before the session was created".to_string(),
            ));
        }

        info!(model = %self.model, "Agent session created");
        Ok(ActiveSession {
            commands: channel.commands,
            events: channel.events,
            prompt_key,
            in_flight: false,
        })
    }

    async fn close(&self, session: ActiveSession) {
        let _ = session.commands.send(SessionCommand::Close).await;
        drop(session);
        self.transport.stop().await;
    }

    async fn exchange(session: &mut ActiveSession, request: &GenerationRequest) -> Result<String> {
        while let Ok(stale) = session.events.try_recv() {
            debug!(event = ?stale.kind, "Discarding stale session event");
        }

        let request_id = Uuid::new_v4().to_string();
        let send = SessionCommand::Send {
            request_id: request_id.clone(),
            prompt: request.user_message(),
        };
        session.commands.send(send).await.map_err(|_| {
            AppError::ConnectionError("Session process is no longer accepting input".to_string())
        })?;
        debug!(request_id = %request_id, "Prompt sent to agent session");

        let mut reply = ReplyBuffer::default();
        loop {
            let Some(event) = session.events.recv().await else {
                return Err(AppError::ConnectionError(
                    "Session event stream closed before the reply completed".to_string(),
                ));
            };

            if !event.belongs_to(&request_id) {
                debug!(event = ?event.kind, "Skipping event for another request");
                continue;
            }

            match event.kind {
                SessionEventKind::AssistantMessage(content) => {
                    debug!("Received complete message from agent");
                    reply.messages.push_str(&content);
                }
                SessionEventKind::AssistantDelta(delta) => reply.deltas.push_str(&delta),
                SessionEventKind::Idle => {
                    debug!(request_id = %request_id, "Agent session idle, reply complete");
                    return Ok(reply.finish());
                }
                SessionEventKind::Error(message) => {
                    error!(error = %message, "Agent session error");
                    return Err(AppError::LLMError(format!("Session error: {}", message)));
                }
                SessionEventKind::ToolStart { tool_call_id } => {
                    debug!(tool_call_id = %tool_call_id, "Agent tool execution started");
                }
                SessionEventKind::ToolComplete { tool_call_id } => {
                    debug!(tool_call_id = %tool_call_id, "Agent tool execution completed");
                }
                SessionEventKind::Other(kind) => debug!(kind = %kind, "Ignoring session event"),
            }
        }
    }
}

#[async_trait]
impl SqlBackend for SessionBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut active = self.active.lock().await;
        let prompt_key = Self::prompt_key(&request.system_prompt);

        if active.as_ref().is_some_and(|s| s.in_flight) {
            warn!("Previous request was cancelled mid-reply, restarting agent session");
            if let Some(abandoned) = active.take() {
                self.close(abandoned).await;
            }
        }

        if active.as_ref().is_some_and(|s| s.prompt_key != prompt_key) {
            info!("System prompt changed, recreating agent session");
            if let Some(stale) = active.take() {
                self.close(stale).await;
            }
        }

        if active.is_none() {
            let opened = self.open(&request.system_prompt, prompt_key).await?;
            *active = Some(opened);
        }

        let Some(session) = active.as_mut() else {
            return Err(AppError::Internal("Agent session unavailable".to_string()));
        };

        session.in_flight = true;
        let result = Self::exchange(session, request).await;
        session.in_flight = false;
        if let Err(AppError::ConnectionError(_)) = &result {
            warn!("Agent session lost, it will be restarted on the next request");
            *active = None;
            self.transport.stop().await;
        }
        result
    }

    async fn shutdown(&self) {
        if let Some(session) = self.active.lock().await.take() {
            self.close(session).await;
            info!("Agent session closed");
        } else {
            self.transport.stop().await;
        }
    }

    fn name(&self) -> &'static str {
        "session"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::llm_clients::BackendDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Responder = dyn Fn(&str) -> Vec<SessionEventKind> + Send + Sync;

    /// In-memory agent: records commands and answers each `session.send`
    /// with scripted events tagged with the request id.
    struct ScriptedTransport {
        responder: Arc<Responder>,
        stale_before_reply: bool,
        commands: Arc<Mutex<Vec<SessionCommand>>>,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(responder: impl Fn(&str) -> Vec<SessionEventKind> + Send + Sync + 'static) -> Self {
            Self {
                responder: Arc::new(responder),
                stale_before_reply: false,
                commands: Arc::new(Mutex::new(Vec::new())),
                starts: Arc::new(AtomicUsize::new(0)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SessionTransport for ScriptedTransport {
        async fn start(&self) -> Result<SessionChannel> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let (command_tx, mut command_rx) = mpsc::channel::<SessionCommand>(16);
            let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(16);
            let responder = self.responder.clone();
            let commands = self.commands.clone();
            let stale = self.stale_before_reply;

            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    commands.lock().unwrap().push(command.clone());
                    if let SessionCommand::Send { request_id, prompt } = command {
                        if stale {
                            let other = SessionEvent::new(
                                Some("someone-else"),
                                SessionEventKind::AssistantMessage("SELECT 'wrong'".to_string()),
                            );
                            let _ = event_tx.send(other).await;
                        }
                        for kind in responder(&prompt) {
                            let _ = event_tx.send(SessionEvent::new(Some(&request_id), kind)).await;
                        }
                    }
                }
            });

            Ok(SessionChannel {
                commands: command_tx,
                events: event_rx,
            })
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Agent that answers with untagged events. The question "first" is
    /// answered only after 150 ms.
    struct SlowTransport {
        starts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionTransport for SlowTransport {
        async fn start(&self) -> Result<SessionChannel> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let (command_tx, mut command_rx) = mpsc::channel::<SessionCommand>(16);
            let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(16);

            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    let SessionCommand::Send { prompt, .. } = command else {
                        continue;
                    };
                    let (delay, answer) = if prompt.contains("QUERY: first") {
                        (Duration::from_millis(150), "SELECT 'first'")
                    } else {
                        (Duration::ZERO, "SELECT 'second'")
                    };
                    let events = event_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let message = SessionEventKind::AssistantMessage(answer.to_string());
                        let _ = events.send(SessionEvent::new(None, message)).await;
                        let _ = events.send(SessionEvent::new(None, SessionEventKind::Idle)).await;
                    });
                }
            });

            Ok(SessionChannel {
                commands: command_tx,
                events: event_rx,
            })
        }

        async fn stop(&self) {}
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new("How many orders?", Arc::from(prompt))
    }

    fn reply_with(text: &'static str) -> impl Fn(&str) -> Vec<SessionEventKind> + Send + Sync {
        move |_| {
            vec![
                SessionEventKind::AssistantMessage(text.to_string()),
                SessionEventKind::Idle,
            ]
        }
    }

    #[test]
    fn test_command_wire_format() {
        let create = SessionCommand::Create {
            model: "gpt-5".to_string(),
            system_message: SystemMessage {
                mode: SystemMessageMode::Append,
                content: "rules".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&create).unwrap(),
            serde_json::json!({
                "type": "session.create",
                "model": "gpt-5",
                "systemMessage": { "mode": "append", "content": "rules" }
            })
        );

        let send = SessionCommand::Send {
            request_id: "r1".to_string(),
            prompt: "QUERY: x".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&send).unwrap(),
            r#"{"type":"session.send","requestId":"r1","prompt":"QUERY: x"}"#
        );
        assert_eq!(
            serde_json::to_string(&SessionCommand::Close).unwrap(),
            r#"{"type":"session.close"}"#
        );
    }

    #[test]
    fn test_event_parsing() {
        let event = SessionEvent::parse_line(
            r#"{"type":"assistant.message_delta","requestId":"r1","data":{"deltaContent":"SEL"}}"#,
        )
        .unwrap();
        assert_eq!(event.request_id.as_deref(), Some("r1"));
        assert_eq!(event.kind, SessionEventKind::AssistantDelta("SEL".to_string()));

        let event = SessionEvent::parse_line(r#"{"type":"session.idle"}"#).unwrap();
        assert_eq!(event, SessionEvent::new(None, SessionEventKind::Idle));

        let event =
            SessionEvent::parse_line(r#"{"type":"session.error","data":{"message":"rate limited"}}"#)
                .unwrap();
        assert_eq!(event.kind, SessionEventKind::Error("rate limited".to_string()));

        let event = SessionEvent::parse_line(
            r#"{"type":"tool.execution_start","data":{"toolCallId":"t-9"}}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            SessionEventKind::ToolStart {
                tool_call_id: "t-9".to_string()
            }
        );

        let event = SessionEvent::parse_line(r#"{"type":"session.usage","data":{}}"#).unwrap();
        assert_eq!(event.kind, SessionEventKind::Other("session.usage".to_string()));

        assert!(matches!(
            SessionEvent::parse_line("not json"),
            Err(AppError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_session_is_created_once_and_reused() {
        let transport = ScriptedTransport::new(reply_with("SELECT COUNT(*) FROM Orders"));
        let commands = transport.commands.clone();
        let starts = transport.starts.clone();
        let backend = SessionBackend::new(Box::new(transport), "gpt-5".to_string());

        let first = backend.generate(&request("system rules")).await.unwrap();
        let second = backend.generate(&request("system rules")).await.unwrap();

        assert_eq!(first, "SELECT COUNT(*) FROM Orders");
        assert_eq!(second, first);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        let recorded = commands.lock().unwrap().clone();
        let creates = recorded
            .iter()
            .filter(|c| matches!(c, SessionCommand::Create { .. }))
            .count();
        assert_eq!(creates, 1);
        match &recorded[0] {
            SessionCommand::Create { system_message, .. } => {
                assert_eq!(system_message.content, "system rules");
                assert_eq!(system_message.mode, SystemMessageMode::Append);
            }
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_each_send_has_a_distinct_request_id() {
        let transport = ScriptedTransport::new(reply_with("SELECT 1"));
        let commands = transport.commands.clone();
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());

        backend.generate(&request("p")).await.unwrap();
        backend.generate(&request("p")).await.unwrap();

        let ids: Vec<String> = commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                SessionCommand::Send { request_id, .. } => Some(request_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_deltas_are_accumulated() {
        let transport = ScriptedTransport::new(|_| {
            vec![
                SessionEventKind::AssistantDelta("SELECT ".to_string()),
                SessionEventKind::ToolStart {
                    tool_call_id: "t1".to_string(),
                },
                SessionEventKind::ToolComplete {
                    tool_call_id: "t1".to_string(),
                },
                SessionEventKind::AssistantDelta("Name FROM Customers".to_string()),
                SessionEventKind::Idle,
            ]
        });
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        assert_eq!(
            backend.generate(&request("p")).await.unwrap(),
            "SELECT Name FROM Customers"
        );
    }

    #[tokio::test]
    async fn test_whole_message_wins_over_deltas() {
        let transport = ScriptedTransport::new(|_| {
            vec![
                SessionEventKind::AssistantDelta("SELECT ".to_string()),
                SessionEventKind::AssistantDelta("1".to_string()),
                SessionEventKind::AssistantMessage("SELECT 1".to_string()),
                SessionEventKind::Idle,
            ]
        });
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        assert_eq!(backend.generate(&request("p")).await.unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_events_for_other_requests_are_ignored() {
        let mut transport = ScriptedTransport::new(reply_with("SELECT 'right'"));
        transport.stale_before_reply = true;
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        assert_eq!(backend.generate(&request("p")).await.unwrap(), "SELECT 'right'");
    }

    #[tokio::test]
    async fn test_error_event_rejects_the_call() {
        let transport =
            ScriptedTransport::new(|_| vec![SessionEventKind::Error("model overloaded".to_string())]);
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        assert_eq!(
            backend.generate(&request("p")).await.unwrap_err(),
            AppError::LLMError("Session error: model overloaded".to_string())
        );
    }

    #[tokio::test]
    async fn test_closed_stream_is_connection_error_and_restarts() {
        let transport = ScriptedTransport::new(|prompt| {
            if prompt.contains("drop") {
                panic!("agent crashed");
            }
            vec![SessionEventKind::AssistantMessage("SELECT 1".to_string()), SessionEventKind::Idle]
        });
        let starts = transport.starts.clone();
        let stops = transport.stops.clone();
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());

        let crashing = GenerationRequest::new("drop everything", Arc::from("p"));
        let err = backend.generate(&crashing).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionError(_)), "{:?}", err);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        assert_eq!(backend.generate(&request("p")).await.unwrap(), "SELECT 1");
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_changed_prompt_recreates_session() {
        let transport = ScriptedTransport::new(reply_with("SELECT 1"));
        let starts = transport.starts.clone();
        let commands = transport.commands.clone();
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());

        backend.generate(&request("schema v1")).await.unwrap();
        backend.generate(&request("schema v2")).await.unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        let creates: Vec<String> = commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                SessionCommand::Create { system_message, .. } => Some(system_message.content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(creates, vec!["schema v1".to_string(), "schema v2".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_session_and_stops_transport() {
        let transport = ScriptedTransport::new(reply_with("SELECT 1"));
        let stops = transport.stops.clone();
        let commands = transport.commands.clone();
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());

        backend.generate(&request("p")).await.unwrap();
        backend.shutdown().await;

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        let mut closed = false;
        for _ in 0..50 {
            closed = commands
                .lock()
                .unwrap()
                .iter()
                .any(|c| matches!(c, SessionCommand::Close));
            if closed {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_timed_out_call_does_not_answer_the_next_one() {
        let starts = Arc::new(AtomicUsize::new(0));
        let transport = SlowTransport {
            starts: starts.clone(),
        };
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        let dispatcher = BackendDispatcher::new(Box::new(backend), Duration::from_millis(50));

        let first = GenerationRequest::new("first", Arc::from("p"));
        let err = dispatcher.generate(&first).await.unwrap_err();
        assert!(matches!(err, AppError::TimeoutError(_)), "{:?}", err);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = GenerationRequest::new("second", Arc::from("p"));
        assert_eq!(dispatcher.generate(&second).await.unwrap(), "SELECT 'second'");
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_without_session_is_harmless() {
        let transport = ScriptedTransport::new(reply_with("SELECT 1"));
        let starts = transport.starts.clone();
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        backend.shutdown().await;
        assert_eq!(starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let transport = ProcessTransport::new(SessionConfig {
            command: "datagenie-no-such-agent-binary".to_string(),
            args: Vec::new(),
        });
        let backend = SessionBackend::new(Box::new(transport), "m".to_string());
        let err = backend.generate(&request("p")).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionError(_)), "{:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_transport_round_trip() {
        let script = r#"while read line; do
  echo '{"type":"assistant.message","data":{"content":"SELECT 1"}}'
  echo '{"type":"session.idle"}'
done"#;
        let transport = ProcessTransport::new(SessionConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        });
        let mut channel = transport.start().await.unwrap();
        assert!(transport.is_running().await);

        channel
            .commands
            .send(SessionCommand::Send {
                request_id: "r1".to_string(),
                prompt: "QUERY: x".to_string(),
            })
            .await
            .unwrap();

        let first = channel.events.recv().await.unwrap();
        assert_eq!(first.kind, SessionEventKind::AssistantMessage("SELECT 1".to_string()));
        let second = channel.events.recv().await.unwrap();
        assert_eq!(second.kind, SessionEventKind::Idle);

        transport.stop().await;
        assert!(!transport.is_running().await);
    }
}

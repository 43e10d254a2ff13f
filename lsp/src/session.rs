//! Session lifecycle and method dispatch.
//!
//! Every method passd understands has one entry in [`ROUTES`]: the state it
//! is legal in, the capability that switches it on, and its handler. Replies
//! and notifications produced while handling a message are queued in an
//! outbox that the receive loop drains after each message.

use std::fmt;
use std::future::{Future, ready};
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use passd_pipeline::{Pipeline, StageSet};
use passd_types::{Document, DocumentUri};

use crate::analysis::{self, Analysis};
use crate::documents::DocumentStore;
use crate::protocol::{
    self, CancelParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, ExecuteCommandParams, Message, Outgoing, RequestId, Response,
    ResponseError, TextDocumentParams,
};
use crate::version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Exited,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::ShuttingDown => "shutting down",
            Self::Exited => "exited",
        })
    }
}

/// Optional server features; a disabled one answers its requests with `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Hover,
    CodeAction,
    CodeLens,
    ExecuteCommand,
}

pub const COMMAND_VERSION: &str = "version";
pub const COMMAND_RUN: &str = "run";
pub const COMMAND_TRACE: &str = "trace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub hover: bool,
    pub code_action: bool,
    pub code_lens: bool,
    /// Names accepted by `workspace/executeCommand`; empty disables the method.
    pub commands: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            hover: true,
            code_action: true,
            code_lens: true,
            commands: [COMMAND_VERSION, COMMAND_RUN, COMMAND_TRACE]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Capabilities {
    #[must_use]
    pub fn enables(&self, capability: Capability) -> bool {
        match capability {
            Capability::Hover => self.hover,
            Capability::CodeAction => self.code_action,
            Capability::CodeLens => self.code_lens,
            Capability::ExecuteCommand => !self.commands.is_empty(),
        }
    }

    /// `ServerCapabilities` as sent in the `initialize` result.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut caps = serde_json::Map::new();
        // Full document sync.
        caps.insert("textDocumentSync".into(), json!(1));
        if self.hover {
            caps.insert("hoverProvider".into(), json!(true));
        }
        if self.code_action {
            caps.insert("codeActionProvider".into(), json!(true));
        }
        if self.code_lens {
            caps.insert("codeLensProvider".into(), json!({ "resolveProvider": false }));
        }
        if !self.commands.is_empty() {
            caps.insert(
                "executeCommandProvider".into(),
                json!({ "commands": self.commands }),
            );
        }
        Value::Object(caps)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Program name in diagnostic messages and the diagnostic `source` field.
    pub source: String,
    /// Target of `run`/`trace` without an explicit URI argument.
    pub run_document: DocumentUri,
    pub capabilities: Capabilities,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            source: "passd".to_string(),
            run_document: DocumentUri::new("inmemory://model"),
            capabilities: Capabilities::default(),
        }
    }
}

type RequestResult = Result<Option<Value>, ResponseError>;
type RequestFut<'a> = Pin<Box<dyn Future<Output = RequestResult> + 'a>>;
type NotificationFut<'a> = Pin<Box<dyn Future<Output = ()> + 'a>>;

#[derive(Clone, Copy)]
pub(crate) enum Handler {
    Request(for<'a> fn(&'a mut Session, Option<Value>) -> RequestFut<'a>),
    Notification(for<'a> fn(&'a mut Session, Option<Value>) -> NotificationFut<'a>),
}

#[derive(Clone, Copy)]
pub(crate) struct Route {
    pub method: &'static str,
    /// `None` means legal in every state.
    pub state: Option<SessionState>,
    pub gate: Option<Capability>,
    pub handler: Handler,
}

impl Route {
    fn allows(&self, state: SessionState) -> bool {
        self.state.is_none_or(|required| required == state)
    }
}

pub(crate) static ROUTES: &[Route] = &[
    Route {
        method: "initialize",
        state: Some(SessionState::Uninitialized),
        gate: None,
        handler: Handler::Request(|s, p| Box::pin(ready(s.initialize(p)))),
    },
    Route {
        method: "initialized",
        state: Some(SessionState::Initialized),
        gate: None,
        handler: Handler::Notification(|_, p| Box::pin(ready(Session::initialized(p)))),
    },
    Route {
        method: "shutdown",
        state: Some(SessionState::Initialized),
        gate: None,
        handler: Handler::Request(|s, p| Box::pin(ready(s.shutdown(p)))),
    },
    Route {
        method: "exit",
        state: Some(SessionState::ShuttingDown),
        gate: None,
        handler: Handler::Notification(|s, p| Box::pin(ready(s.exit(p)))),
    },
    Route {
        method: "$/cancelRequest",
        state: None,
        gate: None,
        handler: Handler::Notification(|_, p| Box::pin(ready(Session::cancel(p)))),
    },
    Route {
        method: "textDocument/didOpen",
        state: Some(SessionState::Initialized),
        gate: None,
        handler: Handler::Notification(|s, p| Box::pin(s.did_open(p))),
    },
    Route {
        method: "textDocument/didChange",
        state: Some(SessionState::Initialized),
        gate: None,
        handler: Handler::Notification(|s, p| Box::pin(s.did_change(p))),
    },
    Route {
        method: "textDocument/didClose",
        state: Some(SessionState::Initialized),
        gate: None,
        handler: Handler::Notification(|s, p| Box::pin(ready(s.did_close(p)))),
    },
    Route {
        method: "textDocument/hover",
        state: Some(SessionState::Initialized),
        gate: Some(Capability::Hover),
        handler: Handler::Request(|_, p| Box::pin(ready(Session::hover(p)))),
    },
    Route {
        method: "textDocument/codeAction",
        state: Some(SessionState::Initialized),
        gate: Some(Capability::CodeAction),
        handler: Handler::Request(|_, p| Box::pin(ready(Session::code_action(p)))),
    },
    Route {
        method: "textDocument/codeLens",
        state: Some(SessionState::Initialized),
        gate: Some(Capability::CodeLens),
        handler: Handler::Request(|s, p| Box::pin(s.code_lens(p))),
    },
    Route {
        method: "workspace/executeCommand",
        state: Some(SessionState::Initialized),
        gate: Some(Capability::ExecuteCommand),
        handler: Handler::Request(|s, p| Box::pin(s.execute_command(p))),
    },
];

pub(crate) fn route(method: &str) -> Option<&'static Route> {
    ROUTES.iter().find(|route| route.method == method)
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ResponseError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|err| ResponseError {
        code: protocol::INVALID_PARAMS,
        message: format!("invalid params: {err}"),
    })
}

pub struct Session {
    state: SessionState,
    documents: DocumentStore,
    pipeline: Box<dyn Pipeline>,
    options: SessionOptions,
    outbox: Vec<Outgoing>,
}

impl Session {
    pub fn new(pipeline: Box<dyn Pipeline>, options: SessionOptions) -> Self {
        Self {
            state: SessionState::Uninitialized,
            documents: DocumentStore::new(),
            pipeline,
            options,
            outbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Take everything queued for the client, in emission order.
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Process one incoming message to completion.
    pub async fn handle(&mut self, message: Message) {
        match message {
            Message::Request { id, method, params } => {
                let response = self.handle_request(id, &method, params).await;
                self.outbox.push(response.into());
            }
            Message::Notification { method, params } => {
                self.handle_notification(&method, params).await;
            }
            Message::Response { id } => {
                tracing::debug!("ignoring client response to {id:?}");
            }
        }
    }

    async fn handle_request(
        &mut self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Response {
        let Some(route) = route(method) else {
            if self.state == SessionState::Uninitialized {
                return Response::error(
                    Some(id),
                    protocol::SERVER_NOT_INITIALIZED,
                    format!("{method} received before initialize"),
                );
            }
            tracing::debug!(method, "no handler, answering null");
            return Response::ok(id, None);
        };

        let Handler::Request(handler) = route.handler else {
            return Response::error(
                Some(id),
                protocol::METHOD_NOT_FOUND,
                format!("{method} is a notification, not a request"),
            );
        };

        if !route.allows(self.state) {
            let code = if self.state == SessionState::Uninitialized {
                protocol::SERVER_NOT_INITIALIZED
            } else {
                protocol::INVALID_REQUEST
            };
            tracing::warn!(method, state = %self.state, "request rejected");
            return Response::error(
                Some(id),
                code,
                format!("{method} is not allowed while {}", self.state),
            );
        }

        if let Some(gate) = route.gate
            && !self.options.capabilities.enables(gate)
        {
            tracing::debug!(method, "capability disabled, answering null");
            return Response::ok(id, None);
        }

        match handler(self, params).await {
            Ok(result) => Response::ok(id, result),
            Err(error) => Response::error(Some(id), error.code, error.message),
        }
    }

    async fn handle_notification(&mut self, method: &str, params: Option<Value>) {
        let Some(route) = route(method) else {
            tracing::debug!(method, "ignoring unknown notification");
            return;
        };
        let Handler::Notification(handler) = route.handler else {
            tracing::warn!(method, "request method sent as a notification, dropping");
            return;
        };
        if !route.allows(self.state) {
            tracing::warn!(method, state = %self.state, "notification dropped");
            return;
        }
        handler(self, params).await;
    }

    fn initialize(&mut self, _params: Option<Value>) -> RequestResult {
        tracing::info!("initialize");
        self.state = SessionState::Initialized;
        Ok(Some(json!({
            "capabilities": self.options.capabilities.to_json(),
            "serverInfo": {
                "name": self.options.source,
                "version": version::VERSION,
            },
        })))
    }

    fn initialized(_params: Option<Value>) {
        tracing::info!("initialized");
    }

    fn shutdown(&mut self, _params: Option<Value>) -> RequestResult {
        tracing::info!("shutdown");
        self.state = SessionState::ShuttingDown;
        Ok(None)
    }

    fn exit(&mut self, _params: Option<Value>) {
        tracing::info!("exit");
        self.state = SessionState::Exited;
    }

    fn cancel(params: Option<Value>) {
        match parse_params::<CancelParams>(params) {
            Ok(cancel) => tracing::debug!("cancel for request {} ignored", cancel.id),
            Err(err) => tracing::warn!("$/cancelRequest: {}", err.message),
        }
    }

    async fn did_open(&mut self, params: Option<Value>) {
        let params = match parse_params::<DidOpenTextDocumentParams>(params) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!("textDocument/didOpen: {}", err.message);
                return;
            }
        };
        let item = params.text_document;
        let uri = item.uri.clone();
        let document = Document::new(item.uri, item.language_id, item.text, item.version);
        if let Err(err) = self.documents.open(document) {
            tracing::error!("{err}");
            return;
        }
        self.publish_analysis(&uri, StageSet::Check).await;
    }

    async fn did_change(&mut self, params: Option<Value>) {
        let params = match parse_params::<DidChangeTextDocumentParams>(params) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!("textDocument/didChange: {}", err.message);
                return;
            }
        };
        let uri = params.text_document.uri.clone();
        let revision = params.text_document.version;
        let Some(text) = params.into_text() else {
            tracing::warn!(uri = %uri, "didChange without content changes");
            return;
        };
        if let Err(err) = self.documents.change(&uri, text, revision) {
            tracing::error!("{err}");
            return;
        }
        self.publish_analysis(&uri, StageSet::Check).await;
    }

    fn did_close(&mut self, params: Option<Value>) {
        let params = match parse_params::<DidCloseTextDocumentParams>(params) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!("textDocument/didClose: {}", err.message);
                return;
            }
        };
        match self.documents.close(&params.text_document.uri) {
            Ok(closed) => {
                let uri = closed.uri().clone();
                match protocol::publish_diagnostics(uri, Vec::new()) {
                    Ok(notification) => self.outbox.push(notification.into()),
                    Err(err) => tracing::error!("failed to clear diagnostics: {err}"),
                }
            }
            Err(err) => tracing::error!("{err}"),
        }
    }

    fn hover(_params: Option<Value>) -> RequestResult {
        Ok(None)
    }

    fn code_action(_params: Option<Value>) -> RequestResult {
        Ok(Some(json!([])))
    }

    async fn code_lens(&mut self, params: Option<Value>) -> RequestResult {
        let params = parse_params::<TextDocumentParams>(params)?;
        let uri = params.text_document.uri;
        if self.documents.get(&uri).is_none() {
            tracing::error!("unable to find text document '{uri}'");
        } else {
            self.publish_analysis(&uri, StageSet::Check).await;
        }
        Ok(Some(json!([])))
    }

    async fn execute_command(&mut self, params: Option<Value>) -> RequestResult {
        let params = parse_params::<ExecuteCommandParams>(params)?;
        if !self.options.capabilities.commands.contains(&params.command) {
            tracing::debug!(command = %params.command, "unknown command, answering null");
            return Ok(None);
        }

        match params.command.as_str() {
            COMMAND_VERSION => Ok(Some(Value::String(version::banner(&self.options.source)))),
            COMMAND_RUN => self.run(&params.arguments, StageSet::Execute).await,
            COMMAND_TRACE => self.run(&params.arguments, StageSet::Trace).await,
            _ => Ok(None),
        }
    }

    /// Execute a document and answer with its console output.
    async fn run(&mut self, arguments: &[Value], stages: StageSet) -> RequestResult {
        let uri = match arguments.first() {
            None => self.options.run_document.clone(),
            Some(Value::String(uri)) if url::Url::parse(uri).is_ok() => {
                DocumentUri::new(uri.as_str())
            }
            Some(other) => {
                return Err(ResponseError {
                    code: protocol::INVALID_PARAMS,
                    message: format!("expected a document URI argument, got {other}"),
                });
            }
        };

        match self.publish_analysis(&uri, stages).await {
            Some(Ok(analysis)) => Ok(Some(Value::String(analysis.stdout))),
            Some(Err(err)) => Err(ResponseError {
                code: protocol::INTERNAL_ERROR,
                message: format!("failed to encode diagnostics for '{uri}': {err}"),
            }),
            None => Err(ResponseError {
                code: protocol::REQUEST_FAILED,
                message: format!("unable to find text document '{uri}'"),
            }),
        }
    }

    /// Analyze an open document and queue its diagnostics. `None` if it is not open.
    async fn publish_analysis(
        &mut self,
        uri: &DocumentUri,
        stages: StageSet,
    ) -> Option<Result<Analysis, serde_json::Error>> {
        let Some(document) = self.documents.get(uri) else {
            tracing::error!("unable to find text document '{uri}'");
            return None;
        };
        tracing::info!(
            uri = %uri,
            revision = document.revision(),
            stages = stages.name(),
            "analyzing"
        );
        let analysis = analysis::analyze(
            self.pipeline.as_ref(),
            &self.options.source,
            document,
            stages,
        )
        .await;
        match analysis.notification() {
            Ok(notification) => self.outbox.push(notification.into()),
            Err(err) => {
                tracing::error!(uri = %uri, "failed to encode diagnostics: {err}");
                return Some(Err(err));
            }
        }
        Some(Ok(analysis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passd_pipeline::{Invocation, LogStream, PipelineFut, PipelineRun};
    use passd_types::{Level, Location, LogItem, SourcePosition};
    use std::sync::{Arc, Mutex};

    /// Reports one error at line 1 and prints the document text when executing.
    #[derive(Default)]
    struct Echo {
        calls: Arc<Mutex<Vec<StageSet>>>,
    }

    impl Pipeline for Echo {
        fn run<'a>(&'a self, invocation: &'a Invocation) -> PipelineFut<'a> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(invocation.stages());
                let item = LogItem::new(Level::Error, "parse")
                    .with_text("unexpected token")
                    .with_location(Location::new(
                        SourcePosition::new(1, 1),
                        SourcePosition::new(1, 2),
                    ));
                let stdout = if invocation.stages().executes() {
                    invocation.document().text().to_string()
                } else {
                    String::new()
                };
                PipelineRun::completed(LogStream::from_iter([item]), stdout)
            })
        }
    }

    fn session() -> (Session, Arc<Mutex<Vec<StageSet>>>) {
        let pipeline = Echo::default();
        let calls = pipeline.calls.clone();
        (
            Session::new(Box::new(pipeline), SessionOptions::default()),
            calls,
        )
    }

    fn request(id: i64, method: &str, params: Value) -> Message {
        Message::Request {
            id: RequestId::Number(id),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn notification(method: &str, params: Value) -> Message {
        Message::Notification {
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn outgoing_json(session: &mut Session) -> Vec<Value> {
        session
            .drain_outgoing()
            .iter()
            .map(|out| serde_json::from_slice(&out.to_bytes().unwrap()).unwrap())
            .collect()
    }

    async fn initialized_session() -> (Session, Arc<Mutex<Vec<StageSet>>>) {
        let (mut session, calls) = session();
        session.handle(request(1, "initialize", json!({}))).await;
        session.handle(notification("initialized", json!({}))).await;
        session.drain_outgoing();
        (session, calls)
    }

    fn open(uri: &str, text: &str) -> Message {
        notification(
            "textDocument/didOpen",
            json!({
                "textDocument": { "uri": uri, "languageId": "casm", "version": 1, "text": text }
            }),
        )
    }

    #[test]
    fn routes_are_unique() {
        for (i, route) in ROUTES.iter().enumerate() {
            assert!(
                ROUTES[i + 1..].iter().all(|other| other.method != route.method),
                "duplicate route {}",
                route.method
            );
        }
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let (mut session, _) = session();
        session.handle(request(1, "initialize", json!({}))).await;
        assert_eq!(session.state(), SessionState::Initialized);

        let out = outgoing_json(&mut session);
        let caps = &out[0]["result"]["capabilities"];
        assert_eq!(caps["textDocumentSync"], 1);
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(
            caps["executeCommandProvider"]["commands"],
            json!(["version", "run", "trace"])
        );
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        for method in [
            "shutdown",
            "textDocument/hover",
            "textDocument/codeAction",
            "textDocument/codeLens",
            "workspace/executeCommand",
            "custom/unknown",
        ] {
            let (mut session, _) = session();
            session.handle(request(7, method, json!({}))).await;
            let out = outgoing_json(&mut session);
            assert_eq!(out.len(), 1, "{method}");
            assert_eq!(out[0]["id"], 7);
            assert_eq!(out[0]["error"]["code"], protocol::SERVER_NOT_INITIALIZED);
            assert_eq!(session.state(), SessionState::Uninitialized, "{method}");
        }
    }

    #[tokio::test]
    async fn notifications_before_initialize_are_dropped() {
        let (mut session, calls) = session();
        session.handle(open("file:///a.casm", "x")).await;
        session.handle(notification("exit", json!(null))).await;
        assert!(session.drain_outgoing().is_empty());
        assert!(session.documents().is_empty());
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn notification_method_sent_as_request_is_not_found() {
        let (mut session, _) = initialized_session().await;
        session.handle(request(7, "exit", json!(null))).await;
        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["id"], 7);
        assert_eq!(out[0]["error"]["code"], protocol::METHOD_NOT_FOUND);
        assert_eq!(session.state(), SessionState::Initialized);
    }

    #[tokio::test]
    async fn second_initialize_is_invalid_request() {
        let (mut session, _) = initialized_session().await;
        session.handle(request(2, "initialize", json!({}))).await;
        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["error"]["code"], protocol::INVALID_REQUEST);
        assert_eq!(session.state(), SessionState::Initialized);
    }

    #[tokio::test]
    async fn unknown_request_after_initialize_answers_null() {
        let (mut session, _) = initialized_session().await;
        session
            .handle(request(3, "textDocument/semanticTokens/full", json!({})))
            .await;
        let out = outgoing_json(&mut session);
        assert!(out[0]["result"].is_null());
        assert!(out[0].get("error").is_none());
    }

    #[tokio::test]
    async fn did_open_publishes_diagnostics() {
        let (mut session, calls) = initialized_session().await;
        session.handle(open("file:///a.casm", "rule main = skip")).await;

        let out = outgoing_json(&mut session);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["method"], "textDocument/publishDiagnostics");
        assert_eq!(out[0]["params"]["uri"], "file:///a.casm");
        let diagnostic = &out[0]["params"]["diagnostics"][0];
        assert_eq!(diagnostic["message"], "passd: error: unexpected token");
        assert_eq!(diagnostic["range"]["start"], json!({ "line": 0, "character": 0 }));
        assert_eq!(calls.lock().unwrap().as_slice(), &[StageSet::Check]);
    }

    #[tokio::test]
    async fn reopen_keeps_first_document() {
        let (mut session, _) = initialized_session().await;
        session.handle(open("file:///a.casm", "first")).await;
        session.handle(open("file:///a.casm", "second")).await;
        let doc = session.documents().get(&"file:///a.casm".into()).unwrap();
        assert_eq!(doc.text(), "first");
        assert_eq!(session.documents().len(), 1);
    }

    #[tokio::test]
    async fn did_change_replaces_text() {
        let (mut session, _) = initialized_session().await;
        session.handle(open("file:///u.casm", "a")).await;
        session
            .handle(notification(
                "textDocument/didChange",
                json!({
                    "textDocument": { "uri": "file:///u.casm", "version": 2 },
                    "contentChanges": [{ "text": "b" }]
                }),
            ))
            .await;

        assert_eq!(session.documents().len(), 1);
        let doc = session.documents().get(&"file:///u.casm".into()).unwrap();
        assert_eq!(doc.text(), "b");
        assert_eq!(doc.revision(), 2);
    }

    #[tokio::test]
    async fn did_close_clears_diagnostics() {
        let (mut session, _) = initialized_session().await;
        session.handle(open("file:///a.casm", "x")).await;
        session.drain_outgoing();
        session
            .handle(notification(
                "textDocument/didClose",
                json!({ "textDocument": { "uri": "file:///a.casm" } }),
            ))
            .await;

        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["params"]["diagnostics"], json!([]));
        assert!(session.documents().is_empty());
    }

    #[tokio::test]
    async fn version_command_leaves_documents_alone() {
        let (mut session, calls) = initialized_session().await;
        session
            .handle(request(
                4,
                "workspace/executeCommand",
                json!({ "command": "version" }),
            ))
            .await;
        let out = outgoing_json(&mut session);
        let banner = out[0]["result"].as_str().unwrap();
        assert!(banner.contains(version::VERSION));
        assert!(session.documents().is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_without_document_fails() {
        let (mut session, _) = initialized_session().await;
        session
            .handle(request(5, "workspace/executeCommand", json!({ "command": "run" })))
            .await;
        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["error"]["code"], protocol::REQUEST_FAILED);
        assert!(
            out[0]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("inmemory://model")
        );
    }

    #[tokio::test]
    async fn run_returns_output_after_diagnostics() {
        let (mut session, calls) = initialized_session().await;
        session.handle(open("inmemory://model", "42")).await;
        session.drain_outgoing();
        session
            .handle(request(6, "workspace/executeCommand", json!({ "command": "run" })))
            .await;

        let out = outgoing_json(&mut session);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["method"], "textDocument/publishDiagnostics");
        assert_eq!(out[1]["id"], 6);
        assert_eq!(out[1]["result"], "42");
        assert_eq!(calls.lock().unwrap().last(), Some(&StageSet::Execute));
    }

    #[tokio::test]
    async fn trace_uses_named_document() {
        let (mut session, calls) = initialized_session().await;
        session.handle(open("file:///t.casm", "trace me")).await;
        session.drain_outgoing();
        session
            .handle(request(
                8,
                "workspace/executeCommand",
                json!({ "command": "trace", "arguments": ["file:///t.casm"] }),
            ))
            .await;

        let out = outgoing_json(&mut session);
        assert_eq!(out[1]["result"], "trace me");
        assert_eq!(calls.lock().unwrap().last(), Some(&StageSet::Trace));
    }

    #[tokio::test]
    async fn unknown_command_answers_null() {
        let (mut session, _) = initialized_session().await;
        session
            .handle(request(9, "workspace/executeCommand", json!({ "command": "deploy" })))
            .await;
        let out = outgoing_json(&mut session);
        assert!(out[0]["result"].is_null());
    }

    #[tokio::test]
    async fn code_lens_triggers_analysis() {
        let (mut session, calls) = initialized_session().await;
        session.handle(open("file:///a.casm", "x")).await;
        session.drain_outgoing();
        session
            .handle(request(
                10,
                "textDocument/codeLens",
                json!({ "textDocument": { "uri": "file:///a.casm" } }),
            ))
            .await;

        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["method"], "textDocument/publishDiagnostics");
        assert_eq!(out[1]["result"], json!([]));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_capability_answers_null() {
        let options = SessionOptions {
            capabilities: Capabilities {
                code_lens: false,
                ..Capabilities::default()
            },
            ..SessionOptions::default()
        };
        let mut session = Session::new(Box::new(Echo::default()), options);
        session.handle(request(1, "initialize", json!({}))).await;
        let out = outgoing_json(&mut session);
        assert!(out[0]["result"]["capabilities"].get("codeLensProvider").is_none());

        session
            .handle(request(
                2,
                "textDocument/codeLens",
                json!({ "textDocument": { "uri": "file:///a.casm" } }),
            ))
            .await;
        let out = outgoing_json(&mut session);
        assert!(out[0]["result"].is_null());
    }

    #[tokio::test]
    async fn invalid_params_are_reported() {
        let (mut session, _) = initialized_session().await;
        session
            .handle(request(11, "workspace/executeCommand", json!({ "arguments": [] })))
            .await;
        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["error"]["code"], protocol::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn shutdown_then_exit() {
        let (mut session, _) = initialized_session().await;
        session.handle(notification("exit", json!(null))).await;
        assert_eq!(session.state(), SessionState::Initialized);

        session.handle(request(12, "shutdown", json!(null))).await;
        assert_eq!(session.state(), SessionState::ShuttingDown);
        let out = outgoing_json(&mut session);
        assert!(out[0]["result"].is_null());

        session.handle(request(13, "textDocument/hover", json!({}))).await;
        let out = outgoing_json(&mut session);
        assert_eq!(out[0]["error"]["code"], protocol::INVALID_REQUEST);

        session.handle(notification("exit", json!(null))).await;
        assert_eq!(session.state(), SessionState::Exited);
    }

    #[tokio::test]
    async fn cancel_is_accepted_in_any_state() {
        let (mut session, _) = session();
        session
            .handle(notification("$/cancelRequest", json!({ "id": 1 })))
            .await;
        assert!(session.drain_outgoing().is_empty());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}

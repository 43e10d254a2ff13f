//! JSON-RPC message shapes exchanged with the editor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use passd_types::{Diagnostic, DocumentUri};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_NOT_INITIALIZED: i64 = -32002;
pub const REQUEST_FAILED: i64 = -32803;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a JSON-RPC request, notification, or response")]
    Shape,
}

impl ProtocolError {
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Json(_) => PARSE_ERROR,
            Self::Shape => INVALID_REQUEST,
        }
    }
}

/// Request ids may be numbers or strings and are echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// An incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Reply to something we sent; passd never sends requests, so these are dropped.
    Response { id: Option<RequestId> },
}

pub fn parse_message(payload: &[u8]) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(mut object) = value else {
        return Err(ProtocolError::Shape);
    };

    let id = match object.remove("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(serde_json::from_value::<RequestId>(id).map_err(|_| ProtocolError::Shape)?),
    };
    let method = match object.remove("method") {
        None => None,
        Some(Value::String(method)) => Some(method),
        Some(_) => return Err(ProtocolError::Shape),
    };
    let params = object.remove("params");
    let is_response = object.contains_key("result") || object.contains_key("error");

    match (id, method) {
        (Some(id), Some(method)) => Ok(Message::Request { id, method, params }),
        (None, Some(method)) => Ok(Message::Notification { method, params }),
        (id, None) if is_response => Ok(Message::Response { id }),
        _ => Err(ProtocolError::Shape),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    /// `null` only when the offending request's id could not be read.
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// Successful reply. A `None` result is sent as `"result": null`.
    pub fn ok(id: RequestId, result: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            result: Some(result.unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Anything passd writes to the client.
#[derive(Debug)]
pub enum Outgoing {
    Response(Response),
    Notification(Notification),
}

impl Outgoing {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Response(response) => serde_json::to_vec(response),
            Self::Notification(notification) => serde_json::to_vec(notification),
        }
    }
}

impl From<Response> for Outgoing {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<Notification> for Outgoing {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: DocumentUri,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: DocumentUri,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: DocumentUri,
    #[serde(default)]
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenTextDocumentParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDocumentContentChangeEvent {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeTextDocumentParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<TextDocumentContentChangeEvent>,
}

impl DidChangeTextDocumentParams {
    /// Full-sync text: only the last change matters.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        self.content_changes.into_iter().last().map(|change| change.text)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidCloseTextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

/// Params of every request that only names a document (codeLens, codeAction, hover).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandParams {
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishDiagnosticsParams {
    pub uri: DocumentUri,
    pub diagnostics: Vec<Diagnostic>,
}

pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

pub fn publish_diagnostics(
    uri: DocumentUri,
    diagnostics: Vec<Diagnostic>,
) -> Result<Notification, serde_json::Error> {
    let params = serde_json::to_value(PublishDiagnosticsParams { uri, diagnostics })?;
    Ok(Notification::new(PUBLISH_DIAGNOSTICS, Some(params)))
}

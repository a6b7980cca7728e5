use std::fmt::{Debug, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::messaging::request_id::RequestId;
use crate::model::ticket::Ticket;


/// message shown to the user when a command failed; the details are in the [ErrorDetail]
pub const ERROR_RESPONSE_MESSAGE: &str = "Сервер ответил с ошибкой.";

#[derive(Clone, Eq, PartialEq)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

impl AuthCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> AuthCredentials {
        AuthCredentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Debug for AuthCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthCredentials{{username:{:?}}}", self.username)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Args(Vec<String>),
    /// a command that ships a complete ticket, e.g. `add`
    WithTicket { args: Vec<String>, ticket: Ticket },
}

impl RequestBody {
    pub fn empty() -> RequestBody {
        RequestBody::Args(Vec::new())
    }

    pub fn args(&self) -> &[String] {
        match self {
            RequestBody::Args(args) => args,
            RequestBody::WithTicket { args, .. } => args,
        }
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args().get(i).map(|s| s.as_str())
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            RequestBody::Args(_) => None,
            RequestBody::WithTicket { ticket, .. } => Some(ticket),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    command_name: String,
    body: RequestBody,
    request_id: RequestId,
    auth: Option<AuthCredentials>,
}

impl Request {
    /// Creates a request for a new logical call, with a freshly generated [RequestId].
    pub fn new(command_name: impl Into<String>, body: RequestBody, auth: Option<AuthCredentials>) -> Request {
        Self::with_id(RequestId::random(), command_name, body, auth)
    }

    pub fn with_id(request_id: RequestId, command_name: impl Into<String>, body: RequestBody, auth: Option<AuthCredentials>) -> Request {
        Request {
            command_name: command_name.into(),
            body,
            request_id,
            auth,
        }
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn auth(&self) -> Option<&AuthCredentials> {
        self.auth.as_ref()
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ResponseKind {
    /// the answer to a specific request, correlated by its request id
    Normal = 1,
    /// a push notification for all clients, sent via multicast without correlation
    Broadcast = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ErrorKind {
    UnknownCommand = 1,
    WrongArgument = 2,
    Authentication = 3,
    NotFound = 4,
    Internal = 5,
}

/// An application level failure. This is data inside a [Response], never a control flow error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> ErrorDetail {
        ErrorDetail {
            kind,
            message: message.into(),
        }
    }
}

/// A single tagged response type covering plain, exception-bearing, credential-bearing and
///  broadcast responses. Responses are built with the constructors and `with_*` methods and
///  are immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    kind: ResponseKind,
    message: String,
    tickets: Option<Vec<Ticket>>,
    request_id: Option<RequestId>,
    error: Option<ErrorDetail>,
    auth: Option<AuthCredentials>,
}

impl Response {
    pub fn normal(request_id: RequestId, message: impl Into<String>) -> Response {
        Response {
            kind: ResponseKind::Normal,
            message: message.into(),
            tickets: None,
            request_id: Some(request_id),
            error: None,
            auth: None,
        }
    }

    pub fn error(request_id: RequestId, error: ErrorDetail) -> Response {
        Self::normal(request_id, ERROR_RESPONSE_MESSAGE)
            .with_error(error)
    }

    pub fn broadcast(message: impl Into<String>) -> Response {
        Response {
            kind: ResponseKind::Broadcast,
            message: message.into(),
            tickets: None,
            request_id: None,
            error: None,
            auth: None,
        }
    }

    pub fn with_tickets(self, tickets: Vec<Ticket>) -> Response {
        Response {
            tickets: Some(tickets),
            ..self
        }
    }

    pub fn with_error(self, error: ErrorDetail) -> Response {
        Response {
            error: Some(error),
            ..self
        }
    }

    pub fn with_auth(self, auth: AuthCredentials) -> Response {
        Response {
            auth: Some(auth),
            ..self
        }
    }

    pub(crate) fn from_parts(
        kind: ResponseKind,
        message: String,
        tickets: Option<Vec<Ticket>>,
        request_id: Option<RequestId>,
        error: Option<ErrorDetail>,
        auth: Option<AuthCredentials>,
    ) -> Response {
        Response { kind, message, tickets, request_id, error, auth }
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind == ResponseKind::Broadcast
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tickets(&self) -> Option<&[Ticket]> {
        self.tickets.as_deref()
    }

    /// The id of the triggering request. This is always `None` for broadcasts: they are not
    ///  correlated with any request.
    pub fn request_id(&self) -> Option<RequestId> {
        match self.kind {
            ResponseKind::Normal => self.request_id,
            ResponseKind::Broadcast => None,
        }
    }

    pub fn error_detail(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    pub fn auth(&self) -> Option<&AuthCredentials> {
        self.auth.as_ref()
    }
}

/// Everything that travels as a single datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
        }
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Message::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Message::Response(value)
    }
}

use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::client::correlator::Correlator;
use crate::client::multicast::{BroadcastListener, NotificationSink};
use crate::config::ClientConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::ClientError;
use crate::messaging::message::{AuthCredentials, Request, Response};
use crate::messaging::transport::bind_multicast_listener;


/// Commands whose only result is a broadcast. They are sent without waiting for a response.
pub const FIRE_AND_FORGET_COMMANDS: &[&str] = &["send_message"];

#[derive(Debug)]
pub enum Outcome {
    Response(Response),
    /// the request was sent, and any result arrives as a broadcast
    Sent,
}

/// A client session: the correlator for request/response, the listener for broadcasts, and the
///  credentials that are attached to every request.
pub struct Client {
    correlator: Correlator,
    listener: Option<BroadcastListener>,
    commands: Arc<dyn CommandDispatcher>,
    auth: Option<AuthCredentials>,
    request_timeout: Duration,
}

impl Client {
    /// Binds the unicast socket and joins the multicast group. Failing to join the group is not
    ///  fatal: the session works without broadcasts.
    pub async fn connect(config: ClientConfig, commands: Arc<dyn CommandDispatcher>, sink: Arc<dyn NotificationSink>) -> anyhow::Result<Client> {
        config.validate()?;
        let running = Arc::new(AtomicBool::new(true));

        let socket = UdpSocket::bind(config.self_addr).await?;
        info!(local_addr = ?socket.local_addr()?, server = ?config.server_addr, "client socket bound");
        let correlator = Correlator::new(socket, config.server_addr, running.clone(), config.receive_poll_timeout, config.max_datagram_size);

        let listener = match bind_multicast_listener(config.multicast_group, config.multicast_port, config.multicast_interface) {
            Ok(socket) => Some(BroadcastListener::spawn(socket, sink, running, config.receive_poll_timeout, config.max_datagram_size)),
            Err(e) => {
                warn!("could not join multicast group {}:{}, broadcasts will not be received: {}", config.multicast_group, config.multicast_port, e);
                None
            }
        };

        Ok(Client {
            correlator,
            listener,
            commands,
            auth: None,
            request_timeout: config.request_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.correlator.local_addr()
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn is_listening_for_broadcasts(&self) -> bool {
        self.listener.is_some()
    }

    pub fn auth(&self) -> Option<&AuthCredentials> {
        self.auth.as_ref()
    }

    /// Stores credentials locally; they are attached to all subsequent requests. Verifying them
    ///  is the server's business.
    pub fn login(&mut self, auth: AuthCredentials) {
        debug!(username = %auth.username, "credentials set");
        self.auth = Some(auth);
    }

    pub fn logout(&mut self) {
        self.auth = None;
    }

    /// Packages user input into a request and sends it, waiting for the response unless the
    ///  command is answered by broadcast.
    pub async fn execute(&mut self, command_name: &str, args: &[String]) -> Result<Outcome, ClientError> {
        let body = self.commands.package_body(command_name, args)?;
        let request = Request::new(command_name, body, self.auth.clone());

        if FIRE_AND_FORGET_COMMANDS.iter().any(|c| *c == command_name) {
            self.correlator.send(request).await?;
            return Ok(Outcome::Sent);
        }

        let response = self.correlator.send_and_await(request, self.request_timeout).await?;
        if let Some(auth) = response.auth() {
            self.auth = Some(auth.clone());
        }
        Ok(Outcome::Response(response))
    }

    pub async fn shutdown(&mut self) {
        self.correlator.shutdown().await;
        if let Some(listener) = self.listener.as_mut() {
            listener.shutdown().await;
        }
    }
}

/// The text shown to the user for a response: the message, the error if any, and the tickets.
pub fn render(response: &Response) -> String {
    let mut result = response.message().to_string();
    if let Some(error) = response.error_detail() {
        let _ = write!(result, "\n{:?}: {}", error.kind, error.message);
    }
    if let Some(tickets) = response.tickets() {
        for ticket in tickets {
            let _ = write!(result, "\n{}", ticket);
        }
    }
    result
}

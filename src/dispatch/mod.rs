pub mod collection;
pub mod commands;
pub mod persistence;

#[cfg(test)] use mockall::automock;

use crate::error::CommandExecuteError;
use crate::messaging::message::{Request, RequestBody, Response};


/// The boundary between the networking core and the application's commands.
///
/// `execute` is total: every failure, including an unknown command name, is reported as an
///  error-carrying [Response]. Implementations may block (e.g. on persistence) since the server
///  runs them on a blocking-capable pool, and they are called concurrently for distinct requests.
#[cfg_attr(test, automock)]
pub trait CommandDispatcher: Send + Sync + 'static {
    fn execute(&self, request: &Request) -> Response;

    /// used on the client side to turn user input into a request body before it is sent
    fn package_body(&self, command_name: &str, args: &[String]) -> Result<RequestBody, CommandExecuteError>;
}

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod messaging;
pub mod model;
pub mod server;
pub mod util;
pub mod test_util;

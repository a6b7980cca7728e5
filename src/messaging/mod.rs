pub mod codec;
pub mod message;
pub mod request_id;
pub mod transport;

pub mod correlator;
pub mod multicast;
pub mod pending;
pub mod session;

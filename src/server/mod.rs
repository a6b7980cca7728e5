//! The server: a single ingestion loop feeding a three-stage pipeline (decode, dispatch, send)
//!  of worker pools, plus the multicast fan-out for broadcasts.

pub mod broadcast;
pub mod ingest;
pub mod stages;
pub mod udp_server;
pub mod worker_pool;

//! Tool-call gateway daemon: sessions, admission control, dispatch and
//! provider routing over a WebSocket protocol

pub mod admission;
pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod providers;
pub mod router;
pub mod server;
pub mod session;
pub mod tools;
pub mod warmup;

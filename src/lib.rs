//! echo_client: the session core of the ECHO learning platform client.
//!
//! The crate is split the same way the running client is wired together:
//! - `identity`: user record, role model and the process-wide `SessionStore`.
//! - `storage`: durable client storage the session is restored from on startup.
//! - `gateway`: the backend session API (login, register, password, preferences).
//! - `realtime`: the notification socket that follows the session's credentials.
//! - `guard`: the route guard deciding whether a protected page may render.

pub mod error;
pub mod config;
pub mod storage;
pub mod identity;
pub mod gateway;
pub mod realtime;
pub mod guard;

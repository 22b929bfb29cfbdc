//! Chat request handling and its HTTP surface.

pub mod auth;
pub mod routes;
pub mod service;

pub use routes::{AppState, chat_routes};
pub use service::{ChatQueued, ChatRequest, ChatService, MAX_USER_ID_LENGTH};

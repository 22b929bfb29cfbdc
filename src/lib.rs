//! Texet — SMS chat backend.

pub mod channels;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod store;

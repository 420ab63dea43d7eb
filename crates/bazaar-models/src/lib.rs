pub mod chat;
pub mod gateway;
pub mod ids;
pub mod payloads;
pub mod user;

pub mod chat;
pub mod directory;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod storage;

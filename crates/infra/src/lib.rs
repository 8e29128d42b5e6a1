pub mod config;
pub mod db;
pub mod http;
pub mod kafka;
pub mod kv;
pub mod llm;
pub mod logging;
pub mod media;
pub mod mysql;
pub mod notifications;
pub mod search;
pub mod storage;

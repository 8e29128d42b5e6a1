use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod db;
pub mod kv;
pub mod log;
pub mod models;
pub mod notifications;
pub mod search;
pub mod store;

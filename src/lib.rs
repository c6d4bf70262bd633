pub mod cache;
pub mod config;
pub mod event;
pub mod list;
pub mod poller;
pub mod query;
pub mod stories;

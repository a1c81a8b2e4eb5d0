pub mod api;
pub mod app;
pub mod cities;
pub mod config;
pub mod error;
pub mod events;
pub mod kv;
pub mod logging;
pub mod models;
pub mod providers;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod ui;

#[cfg(test)]
mod testing;

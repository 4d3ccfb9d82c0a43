pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod health;
pub mod messaging;
pub mod metrics;
pub mod repository;
pub mod utils;

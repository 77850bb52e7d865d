pub mod activity;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod routes;
pub mod services;
pub mod state;
pub mod substrate;
pub mod utils;

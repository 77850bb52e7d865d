pub mod activity;
pub mod health;
pub mod metrics;
pub mod stores;

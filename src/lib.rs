pub mod api;
pub mod arb;
pub mod config;
pub mod domain;
pub mod history;
pub mod profit;
pub mod service;
pub mod store;
pub mod stream;

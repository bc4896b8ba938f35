//! Task billing ledger and invoice lifecycle engine.

pub mod config;
pub mod dtos;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::AppState;

//! Clinic scheduling and client funnel service.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod funnel;
pub mod models;
pub mod routes;
pub mod scheduling;
pub mod seed;
pub mod state;
pub mod store;

//! Shadowban Monitor
//!
//! Check pipeline for monitored social-media accounts: queued jobs are claimed
//! atomically, checked against the detection API with bounded retries, and the
//! resulting account state is upserted. A scheduler drives the pipeline on a
//! fixed cadence with a single-flight guard and a per-tick time budget.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

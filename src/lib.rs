//! SINTEGRA/GO registry scraper
//!
//! Task orchestration for asynchronous CNPJ lookups: an HTTP API that records
//! tasks in a Redis result store and publishes them to a work queue, and
//! workers that drive each task to a terminal state, optionally persisting
//! results to PostgreSQL.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

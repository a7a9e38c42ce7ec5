//! Library-to-project script assignment with graceful stop, backup and undo.
//!
//! The [`engine::Engine`] is the whole system; [`api`] exposes it over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;

//! Presence and direct messaging server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod ws;

/// Integer user id issued by the external identity service.
pub type UserId = i64;

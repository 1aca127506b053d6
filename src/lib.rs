//! Repair Desk Server library.
//!
//! Service orders for the phone and computer repair desks: OS number
//! allocation, order media drafts, and the HTTP API on top of them.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod models;
pub mod services;

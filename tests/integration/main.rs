//! Integration test suite.
//!
//! Drives order creation, media drafts and the HTTP API end to end with
//! in-memory stores, so no PostgreSQL or S3 is needed.
//!
//! Run with: cargo test --test integration

mod test_helpers;

mod test_allocation;
mod test_integration_api;
mod test_media_drafts;
mod test_orders_api;

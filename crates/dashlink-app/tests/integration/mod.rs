//! Integration tests for dashlink-app.
//!
//! These tests run the stream stack against a local mock provider:
//! - Connection and subscription lifecycle
//! - Reconnection with resubscription
//! - Live chart sync driven by stream data

pub mod common;

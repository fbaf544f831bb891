//! `SmartDobi` - machine lifecycle and reservation orchestrator for a
//! self-service laundromat.
//!
//! This crate keeps one authoritative, race-free lifecycle per physical
//! washing machine: an optimistic-concurrency reservation protocol, a
//! server-side wash countdown, at-most-once WhatsApp notification intents,
//! and per-day usage/revenue aggregation that stays consistent with the
//! accepted state transitions. Kiosk, payment, waiting-screen, and dashboard
//! clients all go through the same boundary facade and can never overwrite
//! each other silently.

// Deny the most critical lints that could lead to bugs or security issues
#![deny(
    // Security and correctness
    unsafe_code,
    unsafe_op_in_unsafe_fn,

    // Code quality - things that are almost always bugs
    unreachable_code,
    unreachable_patterns,
    unused_must_use,

    // Documentation - broken links are bugs
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
)]
// Warn on things that should be fixed but aren't necessarily bugs
#![warn(
    // Clippy categories for overall code quality
    clippy::all,
    clippy::pedantic,

    // Performance
    clippy::inefficient_to_string,
    clippy::needless_pass_by_value,

    // Correctness
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::float_cmp,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,

    // Style consistency
    clippy::enum_glob_use,
    clippy::semicolon_if_nothing_returned,
    clippy::wildcard_imports,

    // Future compatibility
    future_incompatible,
    rust_2018_idioms,
)]
// Allow some pedantic lints that are too noisy or not applicable
#![allow(
    clippy::module_name_repetitions,  // Common pattern in Rust
    clippy::missing_errors_doc,        // Will add gradually
    clippy::missing_panics_doc,        // Will add gradually
)]

/// Configuration management for database and scheduler settings
pub mod config;
/// Core business logic - transition engine, scheduler, notifications, stats
pub mod core;
/// Storage layer - machine registry, transactions, daily records
pub mod db;
/// Unified error types and result handling
pub mod errors;
/// Row-level data structures shared across the crate
pub mod models;

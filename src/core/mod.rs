/// Transition engine - guarded, versioned lifecycle edges
pub mod engine;
/// Notification dispatcher and transport seam
pub mod notify;
/// Countdown scheduler and reservation expiry
pub mod scheduler;
/// Boundary facade for UI, auth, and hardware layers
pub mod service;
/// Per-day usage and revenue aggregation
pub mod stats;

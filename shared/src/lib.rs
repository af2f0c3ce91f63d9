pub mod admin_service;
pub mod http;
pub mod metrics_defs;

#[doc(hidden)]
pub use metrics as __metrics;

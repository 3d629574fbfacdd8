/// Audit logging for workspace lifecycle events.
pub mod audit;
/// Configuration management.
pub mod config;
/// Telemetry setup for logging and tracing.
pub mod telemetry;

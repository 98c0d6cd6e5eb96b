pub mod config;
pub mod insights;
pub mod serve;

// Re-export command functions for convenience
pub use config::show_config;
pub use insights::insights;
pub use serve::{serve, ServeParams};

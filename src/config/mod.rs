//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → args.rs (command-line flags override file values)
//!     → validation.rs (semantic checks, all errors at once)
//!     → BridgeConfig (validated, immutable)
//!     → shared via Arc with startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod args;
pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use args::CliArgs;
pub use loader::{load_config, resolve_config, ConfigError};
pub use schema::{
    BridgeConfig, LogFormat, ObservabilityConfig, ProxySettings, RelayConfig, TimeoutConfig,
    TransportMode,
};
pub use validation::{validate_config, ValidationError};

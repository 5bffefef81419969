//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TesterConfig (validated, immutable)
//!     → shared via Arc with the orchestrator
//! ```
//!
//! # Design Decisions
//! - Config is read, never mutated, by the test engine
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdaptiveRateConfig, CircuitBreakerConfig, CircuitStrategy, EndpointOverride,
    ObservabilityConfig, RateLimitConfig, RateLimitStrategy, TestConfig, TesterConfig,
};
pub use validation::{validate_config, ValidationError};

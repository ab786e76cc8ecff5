//! Storage infrastructure: small files on local disk.
//!
//! - `credentials` keeps the saved Wi-Fi network as a JSON record.
//! - `config_file` reads the optional TOML configuration passed with
//!   `--config`.
//!
//! Both treat a missing file as "nothing stored" rather than an error.

pub mod config_file;
pub mod credentials;

pub use config_file::{load_config_file, ConfigError};
pub use credentials::{CredentialStore, StoreError};

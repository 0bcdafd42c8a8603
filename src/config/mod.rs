mod config;

pub use config::{BaseConfig, BaseKind, ConfigError, WorkspaceConfig};

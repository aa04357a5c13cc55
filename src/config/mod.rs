// Configuration management module
// TOML settings, environment overrides and the interactive setup flow

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChunkingConfig, Config, ConfigError, HashingConfig, OllamaConfig, OpenAiConfig, ProviderKind,
    StoreConfig,
};

/// Get the default base directory path
#[inline]
pub fn get_base_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_base_dir()
}

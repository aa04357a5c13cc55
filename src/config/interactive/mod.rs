
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{ChunkingConfig, Config, ConfigError, HashingConfig, OllamaConfig, OpenAiConfig};
use super::{ProviderKind, StoreConfig};
use crate::embeddings::{OllamaClient, OpenAiClient};

const PROVIDERS: &[ProviderKind] = &[
    ProviderKind::Ollama,
    ProviderKind::OpenAi,
    ProviderKind::Hashing,
];

#[inline]
pub fn run_interactive_config(base_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 RAG Store Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(base_dir);

    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Every store in this base directory embeds text with the same provider.");
    eprintln!();

    config.provider = select_provider(config.provider)?;
    eprintln!();

    match config.provider {
        ProviderKind::Ollama => configure_ollama(&mut config.ollama)?,
        ProviderKind::OpenAi => configure_openai(&mut config.openai)?,
        ProviderKind::Hashing => configure_hashing(&mut config.hashing)?,
    }

    eprintln!();
    eprintln!("{}", style("Chunking").bold().yellow());
    configure_chunking(&mut config.chunking)?;
    configure_store(&mut config.store)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());
    match test_provider_connection(&config) {
        Ok(()) => eprintln!("{}", style("✓ Embedding provider is reachable!").green()),
        Err(e) => {
            eprintln!(
                "{}",
                style(format!("⚠ Warning: provider check failed: {e:#}")).yellow()
            );
            eprintln!("You can continue, but ingest and search will fail until it is reachable.");
        }
    }

    eprintln!();
    eprintln!(
        "{}",
        style("Changing the provider or model requires `rag-store rebuild` for existing stores.")
            .dim()
    );
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(base_dir: &Path) -> Result<()> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();
    eprintln!("{}", style("Provider:").bold().yellow());
    eprintln!("  Kind: {}", style(provider_label(config.provider)).cyan());
    eprintln!("  Model: {}", style(config.embedding_model()).cyan());

    match config.provider {
        ProviderKind::Ollama => {
            eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
            match config.ollama_url() {
                Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
            }
        }
        ProviderKind::OpenAi => {
            eprintln!("  Base URL: {}", style(&config.openai.base_url).cyan());
            eprintln!("  Batch Size: {}", style(config.openai.batch_size).cyan());
            eprintln!(
                "  API Key: {}",
                style(if config.openai.api_key.is_empty() {
                    "not set"
                } else {
                    "set"
                })
                .cyan()
            );
            if !config.openai.proxy_url.is_empty() {
                eprintln!("  Proxy: {}", style(&config.openai.proxy_url).cyan());
            }
            if config.openai.disable_ssl {
                eprintln!("  TLS verification: {}", style("disabled").red());
            }
        }
        ProviderKind::Hashing => {
            eprintln!("  Dimension: {}", style(config.hashing.dimension).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!("  Max Chars: {}", style(config.chunking.max_chars).cyan());
    eprintln!("  Overlap: {}", style(config.chunking.overlap).cyan());
    eprintln!(
        "  Rebuild Batch Size: {}",
        style(config.store.rebuild_batch_size).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Stores: {}", style(config.stores_dir().display()).dim());

    Ok(())
}

fn load_existing_config(base_dir: &Path) -> Config {
    let exists = base_dir.join(super::settings::CONFIG_FILE_NAME).exists();
    match Config::load(base_dir) {
        Ok(config) if exists => {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        }
        Ok(config) => {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            config
        }
        Err(e) => {
            eprintln!(
                "{}",
                style(format!("Existing configuration is unusable ({e:#}). Using defaults."))
                    .yellow()
            );
            Config {
                base_dir: base_dir.to_path_buf(),
                ..Config::default()
            }
        }
    }
}

fn provider_label(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Ollama => "ollama (local server)",
        ProviderKind::OpenAi => "openai (compatible HTTP API)",
        ProviderKind::Hashing => "hashing (offline, no model)",
    }
}

fn select_provider(current: ProviderKind) -> Result<ProviderKind> {
    let labels: Vec<&str> = PROVIDERS.iter().copied().map(provider_label).collect();
    let default_index = PROVIDERS.iter().position(|&p| p == current).unwrap_or(0);

    let index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(&labels)
        .interact()?;

    Ok(PROVIDERS[index])
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let candidate = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            candidate.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model = prompt_model(&ollama.model)?;
    let batch_size = prompt_batch_size(ollama.batch_size)?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_openai(openai: &mut OpenAiConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(openai.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let candidate = OpenAiConfig {
                base_url: input.clone(),
                ..OpenAiConfig::default()
            };
            candidate.endpoint_url().map(|_| ())
        })
        .interact_text()?;

    eprintln!(
        "{}",
        style("The API key can also come from OPENAI_API_KEY; leave empty to keep the current one.")
            .dim()
    );
    let api_key: String = Input::new()
        .with_prompt("API key")
        .allow_empty(true)
        .interact_text()?;

    let model = prompt_model(&openai.model)?;
    let batch_size = prompt_batch_size(openai.batch_size)?;

    let proxy_url: String = Input::new()
        .with_prompt("Proxy URL (empty for none)")
        .default(openai.proxy_url.clone())
        .allow_empty(true)
        .interact_text()?;

    let disable_ssl = Confirm::new()
        .with_prompt("Disable TLS certificate verification?")
        .default(openai.disable_ssl)
        .interact()?;

    openai.base_url = base_url;
    if !api_key.trim().is_empty() {
        openai.api_key = api_key.trim().to_string();
    }
    openai.model = model;
    openai.batch_size = batch_size;
    openai.proxy_url = proxy_url.trim().to_string();
    openai.disable_ssl = disable_ssl;
    openai.validate()?;

    Ok(())
}

fn configure_hashing(hashing: &mut HashingConfig) -> Result<()> {
    let dimension: usize = Input::new()
        .with_prompt("Vector dimension")
        .default(hashing.dimension)
        .validate_with(|input: &usize| -> Result<(), ConfigError> {
            HashingConfig { dimension: *input }.validate()
        })
        .interact_text()?;

    hashing.dimension = dimension;
    Ok(())
}

fn configure_chunking(chunking: &mut ChunkingConfig) -> Result<()> {
    let max_chars: usize = Input::new()
        .with_prompt("Max characters per chunk")
        .default(chunking.max_chars)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Chunk size must be at least 1 character")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let overlap: usize = Input::new()
        .with_prompt("Overlap between consecutive chunks")
        .default(chunking.overlap.min(max_chars.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), ConfigError> {
            ChunkingConfig {
                max_chars,
                overlap: *input,
            }
            .validate()
        })
        .interact_text()?;

    chunking.max_chars = max_chars;
    chunking.overlap = overlap;
    Ok(())
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let rebuild_batch_size: usize = Input::new()
        .with_prompt("Chunks per rebuild batch")
        .default(store.rebuild_batch_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    store.rebuild_batch_size = rebuild_batch_size;
    Ok(())
}

fn prompt_model(current: &str) -> Result<String> {
    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(model)
}

fn prompt_batch_size(current: u32) -> Result<u32> {
    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding requests")
        .default(current)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(batch_size)
}

fn test_provider_connection(config: &Config) -> Result<()> {
    match config.provider {
        ProviderKind::Ollama => OllamaClient::new(&config.ollama)?
            .with_retry_attempts(1)
            .health_check(),
        ProviderKind::OpenAi => OpenAiClient::new(&config.openai)?
            .with_retry_attempts(1)
            .health_check(),
        ProviderKind::Hashing => Ok(()),
    }
}

use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// A page function given by `path` is read relative to the configuration file's
/// directory and stored in `page-function.source`.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use ripple_scraper::config::load_config;
///
/// let config = load_config(Path::new("crawl.toml")).unwrap();
/// println!("Start URLs: {}", config.crawler.start_urls.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&content, base_dir)
}

/// Parses and validates configuration text
///
/// # Arguments
///
/// * `content` - TOML text
/// * `base_dir` - Directory that a relative page function `path` is resolved against
pub fn parse_config(content: &str, base_dir: &Path) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;

    if config.page_function.source.is_none() {
        if let Some(relative) = &config.page_function.path {
            let full = base_dir.join(relative);
            let source = std::fs::read_to_string(&full).map_err(|e| {
                ConfigError::Validation(format!(
                    "Cannot read page function from {}: {}",
                    full.display(),
                    e
                ))
            })?;
            config.page_function.source = Some(source);
        }
    }

    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so that a run can be tied to the exact configuration it used.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

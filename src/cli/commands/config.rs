use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use clap::Subcommand;
use regex::Regex;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

static URL_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^:/@]+):([^@]+)@").expect("valid regex"));

const MASK: &str = "********";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(long, short = 'F', help = "Overwrite an existing config file")]
        force: bool,
    },
    #[command(about = "Show the effective configuration (secrets masked)")]
    Show,
    #[command(about = "Show the configuration file path")]
    Path,
}

/// `config_override` is the `--config` path, if given.
pub async fn handle_config(
    cmd: ConfigCommand,
    config: &Config,
    config_override: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { force } => handle_init(config_override, force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(config, format),
        ConfigCommand::Path => handle_path(config_override),
    }
}

fn target_path(config_override: Option<&Path>) -> Result<PathBuf> {
    config_override
        .map(Path::to_path_buf)
        .or_else(Config::config_path)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))
}

fn handle_init(config_override: Option<&Path>, force: bool, formatter: &dyn Formatter) -> Result<()> {
    let path = target_path(config_override)?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let written = Config::default()
        .save(Some(&path))
        .context("failed to write config")?;
    print!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", written.display()))
    );
    Ok(())
}

fn handle_show(config: &Config, format: OutputFormat) -> Result<()> {
    let masked = masked(config);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&masked)?);
    } else {
        print!("{}", toml::to_string_pretty(&masked)?);
    }
    Ok(())
}

fn handle_path(config_override: Option<&Path>) -> Result<()> {
    let path = target_path(config_override)?;
    let state = if path.exists() { "active" } else { "would be" };
    println!("Config file ({state}): {}", path.display());

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        }
    }
    Ok(())
}

/// Copy of `config` with the LLM key and URL passwords hidden.
fn masked(config: &Config) -> Config {
    let mut config = config.clone();
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some(MASK.to_string());
    }
    config.database.url = mask_url_password(&config.database.url);
    config.redis.url = mask_url_password(&config.redis.url);
    config
}

fn mask_url_password(url: &str) -> String {
    URL_PASSWORD
        .replace(url, format!("://${{1}}:{MASK}@").as_str())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_url_password() {
        assert_eq!(
            mask_url_password("postgres://kb:s3cret@db:5432/kb"),
            "postgres://kb:********@db:5432/kb"
        );
        assert_eq!(
            mask_url_password("redis://127.0.0.1:6379"),
            "redis://127.0.0.1:6379"
        );
    }

    #[test]
    fn test_masked_hides_api_key() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-live".to_string());

        let shown = masked(&config);
        assert_eq!(shown.llm.api_key.as_deref(), Some(MASK));
        assert!(!toml::to_string_pretty(&shown).unwrap().contains("sk-live"));
    }

    #[test]
    fn test_init_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let formatter = get_formatter(OutputFormat::Text);

        handle_init(Some(&path), false, formatter.as_ref()).unwrap();
        assert!(path.exists());
        assert!(handle_init(Some(&path), false, formatter.as_ref()).is_err());
        assert!(handle_init(Some(&path), true, formatter.as_ref()).is_ok());
    }
}

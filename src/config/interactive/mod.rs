
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input};
use std::path::Path;

use super::{Config, ConfigError};
use crate::crawler::validate_url;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Forensic Capture Configuration").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Capture Settings").bold().yellow());
    eprintln!("Control how far each capture follows links from the starting page.");
    eprintln!();

    configure_capture(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Periodic Capture").bold().yellow());
    eprintln!("Seeds are captured on every tick of the scheduler.");
    eprintln!();

    configure_schedule(&mut config)?;

    eprintln!();
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
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Capture:").bold().yellow());
    eprintln!("  Max depth: {}", style(config.capture.max_depth).cyan());
    eprintln!(
        "  Max links per page: {}",
        style(config.capture.max_links_per_page).cyan()
    );
    eprintln!(
        "  Delay between linked pages: {}-{} ms",
        config.capture.link_delay_min_ms, config.capture.link_delay_max_ms
    );

    eprintln!("{}", style("Fetching:").bold().yellow());
    eprintln!("  Attempts: {}", style(config.fetch.max_attempts).cyan());
    eprintln!(
        "  Page timeouts: connect {}s, read {}s",
        config.fetch.page_connect_timeout_secs, config.fetch.page_read_timeout_secs
    );
    eprintln!(
        "  Image timeouts: connect {}s, read {}s",
        config.fetch.image_connect_timeout_secs, config.fetch.image_read_timeout_secs
    );

    eprintln!("{}", style("Search:").bold().yellow());
    eprintln!(
        "  Hamming threshold: {}",
        style(config.search.hamming_threshold).cyan()
    );
    eprintln!("  Max results: {}", style(config.search.max_results).cyan());

    eprintln!("{}", style("Schedule:").bold().yellow());
    eprintln!(
        "  Interval: {} minutes",
        style(config.schedule.interval_minutes).cyan()
    );
    if config.seeds.is_empty() {
        eprintln!("  Seeds: {}", style("none").dim());
    } else {
        eprintln!("  Seeds:");
        for seed in &config.seeds {
            eprintln!("    - {}", style(seed).cyan());
        }
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Database: {}", style(config.database_path().display()).dim());

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    if !config_dir.join("config.toml").exists() {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
    }

    Config::load(config_dir).map_or_else(
        |e| {
            eprintln!(
                "{} {e:#}",
                style("Existing configuration is invalid, starting from defaults:").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        Ok,
    )
}

fn configure_capture(config: &mut Config) -> Result<()> {
    let max_depth: u32 = Input::new()
        .with_prompt("Maximum link depth")
        .default(config.capture.max_depth)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input > 10 {
                Err("Depth must be 10 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let max_links: u32 = Input::new()
        .with_prompt("Maximum links followed per page")
        .default(config.capture.max_links_per_page)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input > 1000 {
                Err("Links per page must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let threshold: u32 = Input::new()
        .with_prompt("Hamming distance threshold for image search")
        .default(config.search.hamming_threshold)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input > 64 {
                Err("Threshold must be 64 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    config.set_max_depth(max_depth)?;
    config.set_max_links_per_page(max_links)?;
    config.set_hamming_threshold(threshold)?;

    Ok(())
}

fn configure_schedule(config: &mut Config) -> Result<()> {
    let interval: u64 = Input::new()
        .with_prompt("Minutes between scheduled captures")
        .default(config.schedule.interval_minutes)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if (1..=10_080).contains(input) {
                Ok(())
            } else {
                Err("Interval must be between 1 and 10080 minutes")
            }
        })
        .interact_text()?;

    let seeds: String = Input::new()
        .with_prompt("Seed URLs (comma separated)")
        .default(config.seeds.join(", "))
        .allow_empty(true)
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            parse_seed_list(input).map(|_| ())
        })
        .interact_text()?;

    config.set_interval_minutes(interval)?;
    config.set_seeds(parse_seed_list(&seeds)?)?;

    Ok(())
}

/// Split a comma or whitespace separated list of seed URLs, validating each
fn parse_seed_list(input: &str) -> Result<Vec<String>, ConfigError> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|seed| !seed.is_empty())
        .map(|seed| {
            validate_url(seed)
                .map(|_| seed.to_string())
                .map_err(|_| ConfigError::InvalidSeed(seed.to_string()))
        })
        .collect()
}

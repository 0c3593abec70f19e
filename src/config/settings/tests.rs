use super::*;
use tempfile::TempDir;

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();

    assert_eq!(config.capture.max_depth, 1);
    assert_eq!(config.capture.max_links_per_page, 10);
    assert_eq!(config.search.hamming_threshold, 5);
    assert_eq!(config.search.max_results, 100);
    assert_eq!(config.fetch.max_attempts, 3);
    assert_eq!(config.image.min_bytes, 100);
    assert_eq!(config.image.thumbnail_max_side, 320);
    assert_eq!(config.schedule.interval_minutes, 60);
    assert!(config.seeds.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn load_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");

    let config = Config::load(temp_dir.path()).expect("missing config should load defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.capture, CaptureConfig::default());
    assert_eq!(config.database_path(), temp_dir.path().join("forensic.db"));
}

#[test]
fn save_and_reload() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config
        .set_seeds(vec!["https://example.com/news".to_string()])
        .expect("seed is valid");
    config.set_max_depth(2).expect("depth is valid");
    config.set_hamming_threshold(8).expect("threshold is valid");
    config.save().expect("config should save");

    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("config should reload");
    assert_eq!(loaded, config);
}

#[test]
fn partial_file_fills_defaults() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(
        temp_dir.path().join("config.toml"),
        r#"
            seeds = ["https://example.org/"]

            [capture]
            max_links_per_page = 3
        "#,
    )
    .expect("should write config file");

    let config = Config::load(temp_dir.path()).expect("partial config should load");

    assert_eq!(config.seeds, vec!["https://example.org/".to_string()]);
    assert_eq!(config.capture.max_links_per_page, 3);
    assert_eq!(config.capture.max_depth, 1);
    assert_eq!(config.search.hamming_threshold, 5);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(
        temp_dir.path().join("config.toml"),
        r#"
            [search]
            hamming_threshold = 65
        "#,
    )
    .expect("should write config file");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn load_keeps_unparseable_seeds() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(
        temp_dir.path().join("config.toml"),
        r#"seeds = ["https://example.org/", "ftp://files.example.org/"]"#,
    )
    .expect("should write config file");

    let config = Config::load(temp_dir.path()).expect("a bad seed must not block loading");
    assert_eq!(config.seeds.len(), 2);
}

#[test]
fn load_rejects_malformed_toml() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(temp_dir.path().join("config.toml"), "[capture\nmax_depth = ")
        .expect("should write config file");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn seed_validation() {
    let mut config = Config::default();

    assert!(config.set_seeds(vec!["https://example.com".to_string()]).is_ok());
    assert!(matches!(
        config.set_seeds(vec!["ftp://example.com".to_string()]),
        Err(ConfigError::InvalidSeed(_))
    ));
    assert!(config.set_seeds(vec!["not a url".to_string()]).is_err());
    assert_eq!(config.seeds, vec!["https://example.com".to_string()]);
}

#[test]
fn boundary_validation() {
    let mut config = Config::default();

    assert!(config.set_max_depth(0).is_ok());
    assert!(config.set_max_depth(10).is_ok());
    assert!(config.set_max_depth(11).is_err());

    assert!(config.set_max_links_per_page(0).is_ok());
    assert!(config.set_max_links_per_page(1001).is_err());

    assert!(config.set_hamming_threshold(0).is_ok());
    assert!(config.set_hamming_threshold(64).is_ok());
    assert!(config.set_hamming_threshold(65).is_err());

    assert!(config.set_interval_minutes(0).is_err());
    assert!(config.set_interval_minutes(1).is_ok());
}

#[test]
fn inverted_delay_range_is_rejected() {
    let mut config = Config::default();
    config.capture.link_delay_min_ms = 2000;
    config.capture.link_delay_max_ms = 1000;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidDelayRange(2000, 1000))
    ));
}

#[test]
fn zero_timeout_is_rejected() {
    let mut config = Config::default();
    config.fetch.image_read_timeout_secs = 0;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTimeout(0))
    ));
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidSeed("ftp://x".to_string()),
        ConfigError::InvalidMaxDepth(11),
        ConfigError::InvalidThreshold(65),
        ConfigError::InvalidInterval(0),
        ConfigError::InvalidThumbnailQuality(0),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}

use super::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.seeds = vec![
            "https://example.com/".to_string(),
            "http://news.example.org/front".to_string(),
        ];
        original_config.capture.max_depth = 3;
        original_config.search.hamming_threshold = 10;

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").expect("empty toml should parse");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [capture
            max_depth = "deep"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let invalid_toml = r#"
            [capture]
            max_depth = "deep"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn complete_valid_config() {
        let valid_toml = r#"
            seeds = ["https://example.com/"]

            [capture]
            max_depth = 2
            max_links_per_page = 5
            link_delay_min_ms = 0
            link_delay_max_ms = 0

            [fetch]
            max_attempts = 2

            [image]
            thumbnail_max_side = 160

            [search]
            hamming_threshold = 7

            [schedule]
            interval_minutes = 15
        "#;

        let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
        assert_eq!(config.capture.max_depth, 2);
        assert_eq!(config.capture.max_links_per_page, 5);
        assert_eq!(config.fetch.max_attempts, 2);
        assert_eq!(config.fetch.page_read_timeout_secs, 30);
        assert_eq!(config.image.thumbnail_max_side, 160);
        assert_eq!(config.search.hamming_threshold, 7);
        assert_eq!(config.schedule.interval_minutes, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn base_dir_env_override() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");

        // SAFETY: serialized with every other test that touches this variable
        unsafe { std::env::set_var(BASE_DIR_ENV, temp_dir.path()) };
        let dir = get_config_dir().expect("override should resolve");
        unsafe { std::env::remove_var(BASE_DIR_ENV) };

        assert_eq!(dir, temp_dir.path());
    }

    #[test]
    #[serial]
    fn base_dir_defaults_to_platform_dir() {
        // SAFETY: serialized with every other test that touches this variable
        unsafe { std::env::remove_var(BASE_DIR_ENV) };

        if let Ok(dir) = get_config_dir() {
            assert!(dir.ends_with("forensic-capture"));
        }
    }
}

use dupehound::actions::ShapeViolationPolicy;
use dupehound::config::{Config, ConfigError};
use dupehound::scanner::HashAlgorithm;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_explicit_file_over_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dupehound.toml");
    fs::write(
        &path,
        "hash_algorithm = \"sha256\"\nprogress_interval_ms = 40\nabort_on_error = true\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(config.progress_interval(), Duration::from_millis(40));
    assert!(config.mutation_policy().abort_on_first_error);
    assert_eq!(config.shape_violation, ShapeViolationPolicy::Skip);
}

#[test]
fn test_saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("saved.toml");
    let config = Config {
        hash_algorithm: HashAlgorithm::Blake3,
        use_cache: false,
        shape_violation: ShapeViolationPolicy::Stop,
        cache_dir: Some(dir.path().join("cache")),
        ..Config::default()
    };
    config.save(&path).unwrap();

    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded.hash_algorithm, HashAlgorithm::Blake3);
    assert!(!loaded.use_cache);
    assert_eq!(loaded.shape_violation, ShapeViolationPolicy::Stop);
    assert_eq!(loaded.resolved_cache_dir().unwrap(), dir.path().join("cache"));
}

#[test]
fn test_unknown_algorithm_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "hash_algorithm = \"crc32\"\n").unwrap();
    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Invalid(_))));
}

use clap::Parser;
use dupehound::cli::Cli;
use dupehound::error::ExitCode;
use dupehound::run_app;
use std::fs;
use tempfile::TempDir;

fn run(args: &[&str]) -> ExitCode {
    let mut argv = vec!["dupehound", "-q"];
    argv.extend_from_slice(args);
    run_app(Cli::parse_from(argv)).unwrap()
}

#[test]
fn test_scan_with_and_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_str().unwrap();
    fs::write(dir.path().join("one"), b"unique").unwrap();
    assert_eq!(run(&["scan", root, "--no-cache"]), ExitCode::NoDuplicates);

    fs::write(dir.path().join("two"), b"unique").unwrap();
    assert_eq!(run(&["scan", root, "--no-cache"]), ExitCode::Success);
}

#[test]
fn test_scan_writes_csv_and_deletes_extras() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(data.join(name), b"same words").unwrap();
    }
    let csv = dir.path().join("out.csv");

    let code = run(&[
        "scan",
        data.to_str().unwrap(),
        "--no-cache",
        "--csv",
        csv.to_str().unwrap(),
        "--action",
        "delete",
        "--permanent",
        "--yes",
    ]);
    assert_eq!(code, ExitCode::Success);

    // The export shows the groups as found, before the action.
    let text = fs::read_to_string(&csv).unwrap();
    assert_eq!(text.lines().filter(|l| l.starts_with(",,")).count(), 3);

    assert!(data.join("a.txt").exists());
    assert!(!data.join("b.txt").exists());
    assert!(!data.join("c.txt").exists());
}

#[test]
fn test_cache_dir_is_used_and_cleared() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let cache = dir.path().join("cache");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("x"), b"cached").unwrap();
    fs::write(data.join("y"), b"cached").unwrap();

    let code = run(&[
        "scan",
        data.to_str().unwrap(),
        "--cache-dir",
        cache.to_str().unwrap(),
        "--algorithm",
        "blake3",
    ]);
    assert_eq!(code, ExitCode::Success);
    assert!(fs::read_dir(&cache).unwrap().count() >= 1);

    let code = run(&["cache", "clear", "--cache-dir", cache.to_str().unwrap()]);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(fs::read_dir(&cache).unwrap().count(), 0);
}

#[test]
fn test_overlapping_roots_is_an_error() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("inner");
    fs::create_dir(&nested).unwrap();
    let cli = Cli::parse_from([
        "dupehound",
        "-q",
        "scan",
        dir.path().to_str().unwrap(),
        nested.to_str().unwrap(),
    ]);
    let err = run_app(cli).unwrap_err();
    assert!(format!("{err:#}").contains("overlap"));
}

#[test]
fn test_action_requires_confirmation() {
    let parsed = Cli::try_parse_from(["dupehound", "scan", ".", "--action", "delete"]);
    assert!(parsed.is_err());
}

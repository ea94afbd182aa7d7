use dupehound::cache::HashCache;
use dupehound::duplicates::CrcEngine;
use dupehound::output::csv::{DISCLAIMER_LINE, HEADER_LINE};
use dupehound::output::CsvOutput;
use dupehound::scanner::{HashAlgorithm, ScanConfig, Scanner};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_csv_of_real_scan() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("big1"), b"0123456789").unwrap();
    fs::write(root.join("sub/big2"), b"0123456789").unwrap();
    fs::write(root.join("small1"), b"abc").unwrap();
    fs::write(root.join("small2"), b"abc").unwrap();

    let outcome = Scanner::new(vec![root.clone()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let store = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap()
        .store;

    let out = TempDir::new().unwrap();
    let csv_path = out.path().join("groups.csv");
    CsvOutput::new(&store).write_file(&csv_path).unwrap();
    let text = fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], HEADER_LINE);
    assert_eq!(lines[1], DISCLAIMER_LINE);
    assert_eq!(
        lines[2],
        "10,87acec17cd9dcd20a716cc2cf67417b71c8a7016,"
    );
    assert_eq!(lines[3], format!(",,{}", root.join("big1").display()));
    assert_eq!(lines[4], format!(",,{}", root.join("sub/big2").display()));
    assert!(lines[5].starts_with("3,a9993e364706816aba3e25717850c26c9cd0d89d,"));
    assert_eq!(lines.len(), 8);
    assert!(text.ends_with('\n'));
}

#[test]
fn test_csv_to_unwritable_path_fails() {
    let store = dupehound::duplicates::DuplicateStore::default();
    let dir = TempDir::new().unwrap();
    let err = CsvOutput::new(&store)
        .write_file(&dir.path().join("missing/out.csv"))
        .unwrap_err();
    assert!(matches!(err, dupehound::output::CsvOutputError::Create { .. }));
}

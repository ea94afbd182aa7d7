use dupehound::cache::HashCache;
use dupehound::duplicates::CrcEngine;
use dupehound::scanner::{HashAlgorithm, ScanConfig, Scanner};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_duplicates_across_roots() {
    let dir = TempDir::new().unwrap();
    let r1 = dir.path().join("photos");
    let r2 = dir.path().join("backup");
    fs::create_dir_all(r1.join("2024")).unwrap();
    fs::create_dir_all(&r2).unwrap();
    fs::write(r1.join("2024/img.jpg"), b"jpeg bytes").unwrap();
    fs::write(r2.join("img-copy.jpg"), b"jpeg bytes").unwrap();
    fs::write(r2.join("other.jpg"), b"jpeg BYTES").unwrap();

    let outcome = Scanner::new(vec![r1.clone(), r2.clone()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let result = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();

    assert_eq!(result.store.len(), 1);
    let group = result.store.groups().next().unwrap();
    let roots: Vec<usize> = group.members.iter().map(|m| m.root_index).collect();
    assert_eq!(roots, vec![0, 1]);

    let paths: Vec<PathBuf> = group
        .members
        .iter()
        .map(|m| result.store.full_path(m))
        .collect();
    assert_eq!(
        paths,
        vec![
            r1.canonicalize().unwrap().join("2024/img.jpg"),
            r2.canonicalize().unwrap().join("img-copy.jpg"),
        ]
    );
}

#[test]
fn test_root_order_is_kept() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();

    let scanner = Scanner::new(vec![b.clone(), a.clone()], ScanConfig::default()).unwrap();
    assert_eq!(
        scanner.roots(),
        [b.canonicalize().unwrap(), a.canonicalize().unwrap()]
    );
}

#[cfg(unix)]
#[test]
fn test_same_file_through_two_roots_is_excluded() {
    // A bind mount is not available in tests; a hard link between roots
    // gives the same identity twice and must be reported, not grouped.
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fs::write(a.join("f"), b"shared").unwrap();
    fs::hard_link(a.join("f"), b.join("f")).unwrap();

    let outcome = Scanner::new(vec![a, b], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    assert_eq!(outcome.candidate_count(), 0);
    assert_eq!(outcome.report.already_linked.len(), 2);
}

use dupehound::cache::ImageCache;
use dupehound::duplicates::{GroupKey, ImageConfig, ImageEngine, SimilarityMode};
use dupehound::scanner::{ImageScanOutcome, ScanConfig, Scanner};
use image::{DynamicImage, Rgb, RgbImage};
use std::fs;
use tempfile::TempDir;

fn gradient(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, 64])
    }))
}

fn checker(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        let v = ((x * 7 + y * 3) % 256) as u8;
        let v = if (x / 8 + y / 8) % 2 == 0 { 255 - v } else { v };
        Rgb([v, v / 2, 255 - v])
    }))
}

fn scan_images(dir: &TempDir) -> ImageScanOutcome {
    Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan_images()
        .unwrap()
}

fn perceptual() -> ImageConfig {
    ImageConfig::default().with_mode(SimilarityMode::Perceptual {
        hash_size: 8,
        all_rotations: false,
        divergence: 15.0,
    })
}

/// Two copies of one picture in different folders and formats plus an
/// unrelated picture and a non-image file.
fn library() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("2023")).unwrap();
    fs::create_dir_all(dir.path().join("export")).unwrap();
    let base = gradient(80, 60);
    base.save(dir.path().join("2023/sunset.png")).unwrap();
    base.resize_exact(40, 30, image::imageops::FilterType::Triangle)
        .save(dir.path().join("export/sunset_small.bmp"))
        .unwrap();
    checker(80, 60).save(dir.path().join("2023/board.png")).unwrap();
    fs::write(dir.path().join("2023/notes.txt"), b"not an image").unwrap();
    dir
}

#[test]
fn test_image_scan_keeps_only_images() {
    let dir = library();
    let outcome = scan_images(&dir);
    let mut names: Vec<String> = outcome
        .images
        .iter()
        .map(|i| i.entry.file_name.to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["board.png", "sunset.png", "sunset_small.bmp"]);
    assert!(outcome.images.iter().any(|i| i.extension == "bmp"));
}

#[test]
fn test_resized_copy_across_folders_grouped() {
    let dir = library();
    let outcome = scan_images(&dir);
    let mut cache = ImageCache::in_memory();
    let result = ImageEngine::new(perceptual())
        .run(&outcome.roots, &outcome.images, &mut cache)
        .unwrap();

    assert_eq!(result.store.len(), 1);
    let group = result.store.group(&GroupKey::Similar { id: 0 }).unwrap();
    let paths: Vec<_> = group.members.iter().map(|m| m.relative_path()).collect();
    assert_eq!(
        paths,
        [
            std::path::PathBuf::from("2023/sunset.png"),
            std::path::PathBuf::from("export/sunset_small.bmp"),
        ]
    );
    assert_eq!(result.stats.failures, 0);
}

#[test]
fn test_corrupt_image_counted_as_failure() {
    let dir = library();
    fs::write(dir.path().join("broken.png"), b"\x89PNG but truncated").unwrap();
    let outcome = scan_images(&dir);
    let mut cache = ImageCache::in_memory();
    let result = ImageEngine::new(perceptual())
        .run(&outcome.roots, &outcome.images, &mut cache)
        .unwrap();
    assert_eq!(result.stats.failures, 1);
    assert_eq!(result.store.len(), 1);
}

#[test]
fn test_image_cache_persists_between_runs() {
    let dir = library();
    let cache_dir = TempDir::new().unwrap();
    let outcome = scan_images(&dir);

    let mut cache = ImageCache::load(cache_dir.path());
    let first = ImageEngine::new(perceptual())
        .run(&outcome.roots, &outcome.images, &mut cache)
        .unwrap();
    assert_eq!(first.stats.cache_hits, 0);
    assert!(ImageCache::file_path(cache_dir.path()).exists());

    let mut cache = ImageCache::load(cache_dir.path());
    assert!(!cache.is_empty());
    let second = ImageEngine::new(perceptual())
        .run(&outcome.roots, &outcome.images, &mut cache)
        .unwrap();
    assert_eq!(second.stats.cache_hits, 3);
    assert_eq!(second.store.member_count(), first.store.member_count());
}

#[test]
fn test_gps_mode_ignores_images_without_position() {
    let dir = library();
    let outcome = scan_images(&dir);
    let mut cache = ImageCache::in_memory();
    let result = ImageEngine::new(
        ImageConfig::default().with_mode(SimilarityMode::Gps { distance_km: 0.5 }),
    )
    .run(&outcome.roots, &outcome.images, &mut cache)
    .unwrap();
    assert_eq!(result.stats.without_gps, 3);
    assert_eq!(result.stats.points, 0);
    assert!(result.store.is_empty());
}

#[test]
fn test_max_dimensions_filter() {
    let dir = library();
    let outcome = scan_images(&dir);
    let mut cache = ImageCache::in_memory();
    let result = ImageEngine::new(perceptual().with_max_dimensions(Some((50, 50))))
        .run(&outcome.roots, &outcome.images, &mut cache)
        .unwrap();
    assert_eq!(result.stats.filtered, 2);
    assert!(result.store.is_empty());
}

//! Integration tests for texture loading.

use std::path::PathBuf;

use image::{Rgba, RgbaImage};
use tessera_resources::{ResourceError, TextureData, TextureRegistry};

fn temp_png(name: &str, width: u32, height: u32) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "tessera-{}-{}.png",
        name,
        std::process::id()
    ));
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 40) as u8, (y * 40) as u8, 128, 255])
    });
    image.save(&path).expect("Failed to write test PNG");
    path
}

#[test]
fn test_load_png_as_rgba8() {
    let path = temp_png("load", 3, 2);

    let data = TextureData::load(&path).expect("Failed to load PNG");
    assert_eq!(data.width, 3);
    assert_eq!(data.height, 2);
    assert_eq!(data.pixels.len(), 3 * 2 * 4);
    // Pixel (1, 1): x*40, y*40, 128, 255
    assert_eq!(&data.pixels[(3 + 1) * 4..(3 + 1) * 4 + 4], &[40, 40, 128, 255]);

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_registry_load_and_collision() {
    let path = temp_png("registry", 2, 2);
    let mut registry = TextureRegistry::new();

    let first = registry.load("stone", &path).expect("Failed to load texture");
    // Same name: the existing id is returned, even with a bogus path.
    let second = registry
        .load("stone", "does/not/exist.png")
        .expect("Collision should not read the file");

    assert_eq!(first, second);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(first).map(|t| t.extent()), Some((2, 2)));

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_missing_file() {
    let mut registry = TextureRegistry::new();
    let err = registry
        .load("ghost", "does/not/exist.png")
        .expect_err("Missing file should fail");

    assert!(matches!(err, ResourceError::FileNotFound(_)));
    assert!(registry.is_empty());
    assert_eq!(registry.find("ghost"), None);
}

#[test]
fn test_undecodable_file() {
    let path = std::env::temp_dir().join(format!("tessera-garbage-{}.png", std::process::id()));
    std::fs::write(&path, b"not an image").expect("Failed to write file");

    let err = TextureData::load(&path).expect_err("Garbage should not decode");
    assert!(matches!(err, ResourceError::Image(_)));

    let _ = std::fs::remove_file(path);
}

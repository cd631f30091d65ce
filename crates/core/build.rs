//! Build script for media_gallery_core
//! Copies the bundled service binary into OUT_DIR so it can be embedded

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=MEDIA_GALLERY_SERVICE_BIN");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap_or_default());
    let target = out_dir.join("service.bin");

    let copied = match std::env::var("MEDIA_GALLERY_SERVICE_BIN") {
        Ok(source) if !source.is_empty() => {
            println!("cargo:rerun-if-changed={}", source);
            match std::fs::copy(&source, &target) {
                Ok(_) => true,
                Err(e) => {
                    println!("cargo:warning=Failed to embed service binary {}: {}", source, e);
                    false
                }
            }
        }
        _ => false,
    };

    // An empty blob is reported as a missing resource at runtime
    if !copied {
        if let Err(e) = std::fs::write(&target, []) {
            panic!("Failed to write placeholder service blob: {}", e);
        }
    }
}

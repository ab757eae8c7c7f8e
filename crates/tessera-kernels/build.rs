//! Build script staging precompiled kernel images for embedding.
//!
//! With the `precompiled` feature, `radix_sort_kernels.hipfb` and
//! `radix_sort_kernels.fatbin` are copied from `TESSERA_PRECOMPILED_DIR` into
//! `OUT_DIR`. A missing image is staged as an empty file so the crate still
//! builds; loading from an empty image fails at runtime.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGES: [&str; 2] = ["radix_sort_kernels.hipfb", "radix_sort_kernels.fatbin"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=kernels/");
    println!("cargo:rerun-if-env-changed=TESSERA_PRECOMPILED_DIR");

    if env::var_os("CARGO_FEATURE_PRECOMPILED").is_none() {
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let source_dir = env::var_os("TESSERA_PRECOMPILED_DIR").map(PathBuf::from);

    for image in IMAGES {
        stage_image(source_dir.as_deref(), image, &out_dir.join(image));
    }
}

fn stage_image(source_dir: Option<&Path>, name: &str, output: &Path) {
    let bytes = match source_dir.map(|dir| dir.join(name)) {
        Some(path) if path.is_file() => {
            println!("cargo:rerun-if-changed={}", path.display());
            fs::read(&path).unwrap_or_else(|e| panic!("Failed to read {:?}: {}", path, e))
        }
        Some(path) => {
            println!("cargo:warning=Precompiled image {:?} not found, embedding empty image", path);
            Vec::new()
        }
        None => {
            println!("cargo:warning=TESSERA_PRECOMPILED_DIR not set, embedding empty {}", name);
            Vec::new()
        }
    };

    fs::write(output, bytes).unwrap_or_else(|e| panic!("Failed to write {:?}: {}", output, e));
}

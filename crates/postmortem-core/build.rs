//! Build script for postmortem-core
//!
//! This script checks build requirements before compilation:
//! - Minimum Rust version (const `mem::zeroed` needs Rust 1.75.0+)
//! - Target architecture (register layouts exist for x86-64 and ARM64 only)
//! - Target OS (the live process backend is Linux-only)
//!
//! Checks read the `CARGO_CFG_TARGET_*` variables so cross-compilation
//! reports on the target rather than on the build host.

use std::env;

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 75, 0);

        if rustc_version < min_rust_version {
            panic!(
                "postmortem-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_arch != "x86_64" && target_arch != "aarch64" {
        panic!("postmortem-core supports x86_64 and aarch64 targets, found {target_arch}");
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" {
        println!(
            "cargo:warning=postmortem-core has no live process backend for {target_os}; only the portable core is built"
        );
    }
}

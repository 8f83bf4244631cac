//! Build script for fathom-core
//!
//! This script checks build requirements before compilation:
//! - Minimum Rust version
//! - Whether the target has a process-control backend
//!
//! ## Requirements
//!
//! - **Rust**: 1.74.0 or newer (`io::Error::other`, `let ... else`)
//! - **Process control**: Linux x86-64 (`ptrace`). Other targets still build
//!   the layout index, DWARF loading, and expression resolution.

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match rustc_version::version() {
        Ok(rustc_version) => {
            let min_rust_version = rustc_version::Version::new(1, 74, 0);
            if rustc_version < min_rust_version {
                panic!("fathom-core requires Rust {min_rust_version} or newer, found {rustc_version}");
            }
        }
        // Some build environments hide the compiler version
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    // cfg!(target_os) in a build script describes the host, not the target
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_os != "linux" || target_arch != "x86_64" {
        println!(
            "cargo:warning=fathom-core has no process-control backend for {target_os}-{target_arch}; \
             create_debugger() will return Unsupported"
        );
    }
}

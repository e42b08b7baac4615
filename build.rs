use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Host builds of the library and its tests need no linker script
    if env::var_os("CARGO_FEATURE_FIRMWARE").is_none() {
        return;
    }

    // Tell the linker where to find memory.x
    let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::copy("memory.x", out.join("memory.x")).expect("memory.x is present in the crate root");
    println!("cargo:rustc-link-search={}", out.display());

    // Only re-run the build script when memory.x is changed
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}

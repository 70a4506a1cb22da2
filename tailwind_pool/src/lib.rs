// Copyright 2026 Tailwind Pool contributors.
// Licensed under the Apache License, Version 2.0.

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! A small pool of long-lived Tailwind CSS compiler subprocesses, keyed by a fingerprint of the
//! options they were started with.
//!
//! [`Pool::compile`] is the crate's one real entrypoint: given a rendered option map and a content
//! string, it finds or spawns a matching [`worker::Worker`], writes the request, and waits for
//! compiled output to land on disk. Binary resolution and CLI-flag rendering are left to the
//! embedder via the [`traits::BinaryProvider`] and [`traits::CliRenderer`] seams.

pub mod capture;
pub mod config;
pub mod error;
pub mod paths;
pub mod pool;
pub mod retry;
pub mod telemetry;
pub mod traits;
pub mod validation;
pub mod worker;

pub use config::PoolConfig;
pub use error::{DegradedReason, Error, ReadinessOutcome};
pub use fingerprint::{Fingerprint, OptionMap, OptionValue};
pub use pool::{CompileRequest, CompileResult, Pool, PoolStats};
pub use telemetry::{Event, LogSink, NullSink, TelemetrySink};
pub use traits::{BinaryProvider, CliRenderer, TailwindVersion};
pub use worker::{Health, Worker, WorkerStatus};

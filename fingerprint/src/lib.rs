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

//! Stable fingerprinting of normalized Tailwind compile option maps.
//!
//! A [`Fingerprint`] is the pool key: two option maps that are equal once null-valued entries are
//! dropped and keys are sorted must hash to the same value, regardless of the order the caller
//! built the map in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

pub const FINGERPRINT_SIZE: usize = 32;

/// A 32-byte digest over a normalized [`OptionMap`].
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub fn from_bytes_unsafe(bytes: &[u8]) -> Fingerprint {
        assert_eq!(
            bytes.len(),
            FINGERPRINT_SIZE,
            "Input value was not a fingerprint; had length: {}",
            bytes.len()
        );
        let mut fingerprint = [0; FINGERPRINT_SIZE];
        fingerprint.clone_from_slice(bytes);
        Fingerprint(fingerprint)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(hex_string: &str) -> Result<Fingerprint, String> {
        let bytes: [u8; FINGERPRINT_SIZE] = hex::decode(hex_string)
            .map_err(|e| format!("invalid fingerprint hex: {e}"))?
            .try_into()
            .map_err(|v: Vec<u8>| format!("fingerprint had {} bytes, expected 32", v.len()))?;
        Ok(Fingerprint(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

/// One value in a normalized compile option map (see the closed key set in the system spec).
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Path(String),
    PathList(Vec<String>),
}

impl OptionValue {
    fn is_null(&self) -> bool {
        matches!(self, OptionValue::Null)
    }

    /// Deterministic JSON representation used as fingerprint input; stable regardless of enum
    /// variant ordering because each variant renders to a distinct JSON shape.
    fn to_json(&self) -> JsonValue {
        match self {
            OptionValue::Null => JsonValue::Null,
            OptionValue::Bool(b) => JsonValue::Bool(*b),
            OptionValue::Path(p) => JsonValue::String(p.clone()),
            OptionValue::PathList(ps) => {
                JsonValue::Array(ps.iter().cloned().map(JsonValue::String).collect())
            }
        }
    }
}

/// A normalized compile option map: an ordered mapping of option name to value.
///
/// `BTreeMap` gives us the "sort by key" half of the fingerprint contract for free; the other
/// half (dropping null entries) happens in [`fingerprint`].
pub type OptionMap = BTreeMap<String, OptionValue>;

/// Hashes a normalized option map into a stable [`Fingerprint`].
///
/// Entries with a null value are elided before hashing, so `{a: null}` and `{}` fingerprint
/// identically. Content is never part of the option map, so callers must not smuggle request
/// content into it.
pub fn fingerprint(options: &OptionMap) -> Fingerprint {
    let mut hasher = Sha256::new();
    for (key, value) in options.iter().filter(|(_, v)| !v.is_null()) {
        hasher.update(key.as_bytes());
        hasher.update([0_u8]);
        hasher.update(value.to_json().to_string().as_bytes());
        hasher.update([0_u8]);
    }
    Fingerprint::from_bytes_unsafe(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, OptionValue)]) -> OptionMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn equal_maps_fingerprint_equal() {
        let a = opts(&[
            ("minify", OptionValue::Bool(true)),
            ("input", OptionValue::Path("/t/in.css".to_string())),
        ]);
        let b = opts(&[
            ("input", OptionValue::Path("/t/in.css".to_string())),
            ("minify", OptionValue::Bool(true)),
        ]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn null_entries_are_elided() {
        let with_null = opts(&[
            ("minify", OptionValue::Bool(true)),
            ("postcss", OptionValue::Null),
        ]);
        let without = opts(&[("minify", OptionValue::Bool(true))]);
        assert_eq!(fingerprint(&with_null), fingerprint(&without));
    }

    #[test]
    fn distinct_maps_fingerprint_distinct() {
        let a = opts(&[("minify", OptionValue::Bool(true))]);
        let b = opts(&[("minify", OptionValue::Bool(false))]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn content_is_not_part_of_the_key_set() {
        // OptionMap has no "content" variant capable of holding request payload bytes;
        // content is threaded through CompileRequest separately, never into the map.
        let a = opts(&[("input", OptionValue::Path("/t/in.css".to_string()))]);
        let b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn hex_round_trips() {
        let fp = fingerprint(&opts(&[("minify", OptionValue::Bool(true))]));
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(fp, parsed);
    }
}

//! Deterministic cache keys for transformation outputs.
//!
//! A key is `<transformation>-<sha256 hex>` over a canonical rendering of the
//! inputs: one `name=value` line per field, in the order fields were added.
//! Set-valued inputs are sorted and de-duplicated first, so callers never
//! depend on request order.

use std::collections::BTreeSet;

use crate::oci::digest::sha256_hex;

#[derive(Debug, Clone, Default)]
pub struct KeyMaterial {
    lines: Vec<String>,
}

impl KeyMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.lines.push(format!("{name}={}", escape(value.as_ref())));
        self
    }

    pub fn set<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: BTreeSet<String> = values
            .into_iter()
            .map(|value| escape(value.as_ref()))
            .collect();
        let joined = values.into_iter().collect::<Vec<_>>().join(",");
        self.lines.push(format!("{name}={joined}"));
        self
    }

    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

// Separators inside values must not let two different inputs render the same.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
}

pub fn derive_key(transformation: &str, material: &KeyMaterial) -> String {
    format!("{transformation}-{}", sha256_hex(material.canonical().as_bytes()))
}

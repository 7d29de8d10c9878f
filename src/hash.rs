//! Content-addressed hashing for records and artifacts.
//!
//! All identity in the pipeline is content-addressed: a strategy's
//! `definition_hash` names a testable configuration, a generator artifact's
//! `code_hash` names the exact emitted code, and ingestion idempotence is
//! keyed by the source-content hash. Hashes are SHA-256 over a canonical
//! JSON rendering so that key order and formatting never perturb identity.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hash of source-document content, used as the ingestion idempotence key.
///
/// Line endings are normalized and trailing whitespace stripped so that a
/// re-saved copy of the same document hashes identically.
pub fn source_content_hash(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for line in text.replace("\r\n", "\n").lines() {
        normalized.push_str(line.trim_end());
        normalized.push('\n');
    }
    sha256_hex(normalized.as_bytes())
}

/// Render a JSON value canonically: object keys sorted, no insignificant
/// whitespace. Array order is preserved; callers normalize unordered sets
/// before hashing (see `StrategyDefinition::canonical_value`).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&Value::String(s.clone()).to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Hash an arbitrary JSON value canonically.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Hash any serializable value via its canonical JSON form.
pub fn hash_serializable<T: Serialize>(value: &T) -> crate::error::Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(hash_value(&json))
}

/// Short prefix of a hash for log lines and display.
pub fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

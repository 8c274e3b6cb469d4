//! Provenance entries and stable content fingerprints.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detector::{DetectorKind, SkipReason};

/// Identity of one detector invocation: tool, version, checkpoint and a stable
/// hash of its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    pub tool: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ckpt: Option<String>,
    pub params_hash: String,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl Provenance {
    /// Build a provenance entry for a tool invocation.
    pub fn new<P: Serialize>(
        tool: impl Into<String>,
        version: impl Into<String>,
        ckpt: Option<String>,
        params: &P,
    ) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
            ckpt,
            params_hash: params_fingerprint(params),
            ts: Utc::now(),
            skipped_reason: None,
        }
    }

    /// Stub entry for a detector that never ran.
    pub fn skipped_stub(kind: DetectorKind, reason: SkipReason) -> Self {
        Self {
            tool: kind.as_str().to_string(),
            version: "-".to_string(),
            ckpt: None,
            params_hash: params_fingerprint(&serde_json::json!({ "skipped": true })),
            ts: Utc::now(),
            skipped_reason: Some(reason.as_str().to_string()),
        }
    }

    /// Dedup key: distinct `(tool, version, params_hash)` appears at most once
    /// in the bundle's top-level provenance list.
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.tool.clone(),
            self.version.clone(),
            self.params_hash.clone(),
        )
    }
}

/// Stable hash of a params structure. Serializes through `serde_json::Value`
/// so map keys are emitted in sorted order, then hashes the canonical string.
pub fn params_fingerprint<P: Serialize>(params: &P) -> String {
    let value = serde_json::to_value(params).unwrap_or(serde_json::Value::Null);
    let canonical = serde_json::to_string(&value).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Params {
        model: &'static str,
        conf: f64,
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = params_fingerprint(&Params {
            model: "m",
            conf: 0.18,
        });
        let b = params_fingerprint(&Params {
            model: "m",
            conf: 0.18,
        });
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_differs_on_params() {
        let a = params_fingerprint(&Params {
            model: "m",
            conf: 0.18,
        });
        let b = params_fingerprint(&Params {
            model: "m",
            conf: 0.25,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_ignores_field_order() {
        let a: serde_json::Value = serde_json::json!({"a": 1, "b": 2});
        let b: serde_json::Value = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(params_fingerprint(&a), params_fingerprint(&b));
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn skipped_stub_has_reason() {
        let p = Provenance::skipped_stub(DetectorKind::SuperRes, SkipReason::DisabledByAblation);
        assert_eq!(p.tool, "superres");
        assert_eq!(p.skipped_reason.as_deref(), Some("disabled_by_ablation"));
    }
}

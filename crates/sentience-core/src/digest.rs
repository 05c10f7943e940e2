//! Opaque snapshot digests used for `pre`/`post` comparison in step-end
//! events. Not a security boundary — just a cheap way to say "did the page
//! structure change" without comparing full snapshots.

use crate::model::Snapshot;
use sha2::{Digest, Sha256};

/// A stable hash of a snapshot's structure (url + element shape), hex
/// encoded. Two snapshots with the same digest are considered equivalent
/// for step-end diffing purposes.
pub fn snapshot_digest(snapshot: &Snapshot) -> String {
    // Canonicalize through serde_json rather than hashing the Rust Debug
    // representation so field-order changes in the source snapshot don't
    // perturb the digest.
    let canonical = serde_json::json!({
        "url": snapshot.url,
        "elements": snapshot.elements.iter().map(|e| {
            serde_json::json!({
                "id": e.id,
                "role": e.role,
                "text": e.text,
                "name": e.name,
                "bbox": e.bbox,
            })
        }).collect::<Vec<_>>(),
    });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Diagnostics, Element};

    fn snap(url: &str) -> Snapshot {
        Snapshot {
            url: url.into(),
            elements: vec![Element {
                id: 1,
                role: "button".into(),
                text: "Go".into(),
                name: "go".into(),
                bbox: BBox::default(),
                input_type: None,
                value: None,
                value_redacted: None,
            }],
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn same_structure_same_digest() {
        assert_eq!(snapshot_digest(&snap("https://a")), snapshot_digest(&snap("https://a")));
    }

    #[test]
    fn different_url_different_digest() {
        assert_ne!(snapshot_digest(&snap("https://a")), snapshot_digest(&snap("https://b")));
    }

    #[test]
    fn diagnostics_do_not_affect_digest() {
        let mut a = snap("https://a");
        let mut b = snap("https://a");
        a.diagnostics.confidence = 0.1;
        b.diagnostics.confidence = 0.9;
        assert_eq!(snapshot_digest(&a), snapshot_digest(&b));
    }
}

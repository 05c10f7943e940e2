//! Nearest-match diagnostics for failed selector-based assertions: a
//! bigram Jaccard-like similarity against every labelled element in the
//! last snapshot (spec.md §4.D step 3).

use sentience_core::Snapshot;
use serde_json::{json, Value};
use std::collections::HashSet;

fn char_bigrams(s: &str) -> HashSet<String> {
    let chars: Vec<char> = s.to_lowercase().chars().collect();
    if chars.len() < 2 {
        return HashSet::new();
    }
    chars
        .windows(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect()
}

/// `2*|common bigrams| / (|A|+|B|+eps)`.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let set_a = char_bigrams(a);
    let set_b = char_bigrams(b);
    let common = set_a.intersection(&set_b).count() as f64;
    let denom = set_a.len() as f64 + set_b.len() as f64 + f64::EPSILON;
    2.0 * common / denom
}

fn truncate80(s: &str) -> String {
    s.chars().take(80).collect()
}

fn round4(x: f64) -> f64 {
    (x * 1e4).round() / 1e4
}

/// Top 3 elements by similarity of `selector` against each element's
/// `name` (falling back to `text` when `name` is empty), among elements
/// whose `name || text` is non-empty. Deterministic: ties break by
/// original element order.
pub fn nearest_matches(snapshot: &Snapshot, selector: &str) -> Vec<Value> {
    let mut scored: Vec<(f64, usize, &sentience_core::Element)> = snapshot
        .elements
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.name.is_empty() || !e.text.is_empty())
        .map(|(idx, e)| {
            let candidate: &str = if !e.name.is_empty() { &e.name } else { &e.text };
            (bigram_similarity(selector, candidate), idx, e)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
    scored.truncate(3);

    scored
        .into_iter()
        .map(|(score, _, e)| {
            json!({
                "id": e.id,
                "role": e.role,
                "text": truncate80(&e.text),
                "name": truncate80(&e.name),
                "score": round4(score),
            })
        })
        .collect()
}

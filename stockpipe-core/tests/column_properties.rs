//! Property tests for column label deduplication.
//!
//! Uses proptest to verify:
//! 1. Output length equals input length
//! 2. Output labels are pairwise distinct
//! 3. The first occurrence of every label is left untouched
//! 4. Labels that were already unique pass through unchanged

use proptest::prelude::*;
use std::collections::HashSet;
use stockpipe_core::data::unique_labels;

// ── Strategies (proptest) ────────────────────────────────────────────

/// Small alphabet so duplicates (and `x.1`-style collisions) are common.
fn arb_label() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Close".to_string()),
        Just("Open".to_string()),
        Just("Close.1".to_string()),
        Just("a".to_string()),
        Just("a.1".to_string()),
        Just("a.2".to_string()),
        "[a-c]{1,2}",
    ]
}

fn arb_labels() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_label(), 0..24)
}

proptest! {
    #[test]
    fn preserves_length(labels in arb_labels()) {
        prop_assert_eq!(unique_labels(&labels).len(), labels.len());
    }

    #[test]
    fn output_is_unique(labels in arb_labels()) {
        let out = unique_labels(&labels);
        let distinct: HashSet<&String> = out.iter().collect();
        prop_assert_eq!(distinct.len(), out.len());
    }

    #[test]
    fn first_occurrence_is_unchanged(labels in arb_labels()) {
        let out = unique_labels(&labels);
        let mut seen = HashSet::new();
        for (i, label) in labels.iter().enumerate() {
            if seen.insert(label.clone()) {
                // A literal label can only be displaced by an earlier suffixed
                // duplicate that happened to produce the same text.
                if !out[..i].contains(label) {
                    prop_assert_eq!(&out[i], label);
                }
            }
        }
    }

    #[test]
    fn unique_input_passes_through(labels in prop::collection::hash_set("[a-z]{1,6}", 0..12)) {
        let labels: Vec<String> = labels.into_iter().collect();
        prop_assert_eq!(unique_labels(&labels), labels);
    }

    #[test]
    fn is_deterministic(labels in arb_labels()) {
        prop_assert_eq!(unique_labels(&labels), unique_labels(&labels));
    }
}

#[test]
fn documented_examples() {
    assert_eq!(
        unique_labels(&["a", "b", "a", "a"]),
        vec!["a", "b", "a.1", "a.2"]
    );
    assert_eq!(unique_labels(&["x"]), vec!["x"]);
    assert_eq!(unique_labels::<String>(&[]), Vec::<String>::new());
}

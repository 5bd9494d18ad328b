use std::collections::HashSet;

/// Make a sequence of column labels unique, preserving order.
///
/// The first occurrence of a label is kept as-is. Each later occurrence gets a
/// `.N` suffix, where `N` counts up from 1 until the candidate is not already taken
/// (including by an earlier suffixed label).
pub fn unique_labels<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(labels.len());
    let mut out = Vec::with_capacity(labels.len());

    for label in labels {
        let base = label.as_ref();
        let mut candidate = base.to_string();
        let mut counter = 0u32;
        while seen.contains(&candidate) {
            counter += 1;
            candidate = format!("{base}.{counter}");
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

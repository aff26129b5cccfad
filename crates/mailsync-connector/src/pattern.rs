//! Wildcard name patterns.
//!
//! Remote listings are filtered by name with `*` wildcards, compared without
//! regard to ASCII case.

/// Check whether `name` matches `pattern`, where `*` matches any run of
/// characters (including none).
#[must_use]
pub fn matches_name_pattern(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == name;
    }

    // Segments must appear in order: the first as a prefix, the last as a
    // suffix of what the earlier ones left over.
    let segments: Vec<&str> = pattern.split('*').collect();
    let last_index = segments.len() - 1;
    let mut remaining = name.as_str();

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(segment) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == last_index {
            return remaining.ends_with(segment);
        } else {
            match remaining.find(segment) {
                Some(pos) => remaining = &remaining[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

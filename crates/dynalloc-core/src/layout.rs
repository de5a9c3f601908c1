//! Task layout encoding.

/// Run-length encode per-node task counts.
///
/// Repeated neighbouring counts become `value(xN)`; a lone value is written
/// bare. `[4, 4, 4, 3, 2]` encodes as `4(x3),3,2`.
pub fn layout_to_string(counts: &[u32]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = counts.iter().peekable();
    while let Some(&value) = iter.next() {
        let mut run = 1;
        while iter.next_if_eq(&&value).is_some() {
            run += 1;
        }
        if run == 1 {
            parts.push(value.to_string());
        } else {
            parts.push(format!("{value}(x{run})"));
        }
    }
    parts.join(",")
}

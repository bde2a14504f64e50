//! Text representation of embedding vectors.
//!
//! Vectors are stored and passed to SQL as a bracketed, comma-separated
//! literal (`[0.1,0.2,0.3]`), the same shape pgvector and sqlite-vec accept.

/// Renders a vector as the storage literal. Each element uses the shortest
/// representation that round-trips back to the same `f32`.
pub fn format_vector(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

/// Parses a storage literal back into a vector. Returns `None` for anything
/// that is not a bracketed list of finite floats.
pub fn parse_vector(literal: &str) -> Option<Vec<f32>> {
    let inner = literal.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    inner
        .split(',')
        .map(|part| part.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect()
}

//! Embedding-vector math shared by clustering and ranking.

/// Cosine similarity mapped from [-1, 1] to [0, 1] and clamped. Mismatched or
/// empty vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    ((dot / denom + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Element-wise average of embedding vectors: the user's "interest profile".
pub fn average_embeddings(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dim = first.len();
    let mut avg = vec![0.0f32; dim];
    for emb in embeddings {
        for (slot, &v) in avg.iter_mut().zip(emb.iter()) {
            *slot += v;
        }
    }
    let n = embeddings.len() as f32;
    for slot in avg.iter_mut() {
        *slot /= n;
    }
    Some(avg)
}

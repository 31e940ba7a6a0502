use crate::types::Metric;

const EPSILON: f32 = 1e-6;

/// Cosine similarity of two embeddings, clamped to [-1, 1].
///
/// Returns 0.0 when either side is absent, has a (near) zero norm, or the
/// lengths differ, so a failed comparison never outranks a real one.
pub fn similarity(a: Option<&[f32]>, b: Option<&[f32]>) -> f32 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let (na, nb) = (na.sqrt(), nb.sqrt());
    if na < f64::from(EPSILON) || nb < f64::from(EPSILON) {
        return 0.0;
    }
    let cos = (dot / (na * nb)).clamp(-1.0, 1.0) as f32;
    if cos.is_nan() {
        0.0
    } else {
        cos
    }
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    sum.sqrt()
}

/// Distance under `metric`; cosine distance is `1 - similarity`.
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => (1.0 - similarity(Some(a), Some(b))).max(0.0),
        Metric::Euclidean => euclidean(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_similarity_is_one() {
        let a = [0.3, -1.2, 4.0, 0.01];
        assert!((similarity(Some(&a[..]), Some(&a[..])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn symmetric() {
        let a = [0.3, -1.2, 4.0];
        let b = [2.0, 0.5, -0.7];
        assert_eq!(
            similarity(Some(&a[..]), Some(&b[..])),
            similarity(Some(&b[..]), Some(&a[..]))
        );
    }

    #[test]
    fn magnitude_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert!((similarity(Some(&a[..]), Some(&b[..])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        let zero = [0.0, 0.0, 0.0];
        let b = [1.0, 2.0, 3.0];
        assert_eq!(similarity(Some(&zero[..]), Some(&b[..])), 0.0);
        assert_eq!(similarity(None, Some(&b[..])), 0.0);
        assert_eq!(similarity(Some(&b[..]), None), 0.0);
        assert_eq!(similarity(Some(&b[..2]), Some(&b[..])), 0.0);
    }

    #[test]
    fn opposite_and_orthogonal() {
        let (x, y, neg_x) = ([1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]);
        assert!((similarity(Some(&x[..]), Some(&neg_x[..])) + 1.0).abs() < 1e-6);
        assert_eq!(similarity(Some(&x[..]), Some(&y[..])), 0.0);
    }

    #[test]
    fn distances() {
        let (a, b) = ([0.0, 3.0], [4.0, 0.0]);
        assert_eq!(distance(Metric::Euclidean, &a, &b), 5.0);
        assert_eq!(distance(Metric::Cosine, &a, &b), 1.0);
        assert_eq!(distance(Metric::Cosine, &a, &a), 0.0);
    }
}

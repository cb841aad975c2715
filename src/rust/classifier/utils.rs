use ndarray::{Array1, ArrayView1};

/// Numerically stable softmax.
pub(crate) fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    if logits.is_empty() {
        return Array1::zeros(0);
    }
    let max = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exps = logits.mapv(|x| (x - max).exp());
    let sum = exps.sum();
    exps / sum
}

/// Indices and values of the `k` largest entries, descending.
///
/// The sort is stable: equal values keep ascending index order.
pub(crate) fn top_k(values: &Array1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.into_iter().take(k).map(|i| (i, values[i])).collect()
}

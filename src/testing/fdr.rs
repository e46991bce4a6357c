//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values.
///
/// NaN p-values are left out of the count of tests and stay NaN in the
/// output.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut padj = vec![f64::NAN; n];

    let mut order: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    // Step up from the largest p-value keeping a running minimum
    let mut cummin = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

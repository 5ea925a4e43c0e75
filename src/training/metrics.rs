//! Evaluation metrics for binary classification.

use crate::error::{Result, TabularError};

/// Area under the ROC curve
///
/// Labels above 0.5 are positives. Tied predictions share the average of
/// their ranks, so a constant predictor scores 0.5.
///
/// # Errors
/// Fails when lengths differ or only one class is present, in which case the
/// curve is undefined.
pub fn roc_auc(predictions: &[f64], labels: &[f32]) -> Result<f64> {
    if predictions.len() != labels.len() {
        return Err(TabularError::ShapeMismatch(format!(
            "{} predictions for {} labels",
            predictions.len(),
            labels.len()
        )));
    }

    let n = predictions.len();
    let n_pos = labels.iter().filter(|&&l| l > 0.5).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(TabularError::Evaluation(format!(
            "ROC AUC is undefined with {n_pos} positives and {n_neg} negatives"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| predictions[a].total_cmp(&predictions[b]));

    // Sum of the ascending ranks of the positives, ties averaged
    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && predictions[indices[j]] == predictions[indices[i]] {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        let positives = indices[i..j].iter().filter(|&&idx| labels[idx] > 0.5).count();
        rank_sum_pos += avg_rank * positives as f64;
        i = j;
    }

    let n_pos_f = n_pos as f64;
    let n_neg_f = n_neg as f64;
    Ok((rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg_f))
}

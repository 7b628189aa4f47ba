use anyhow::{ensure, Result};

use crate::structure::Structure;
use crate::tensor::Tensor;

pub trait Loss: Send {
    fn name(&self) -> &str;

    /// Scalar loss between targets and predictions of identical structure.
    fn compute(&self, y_true: &Structure<Tensor>, y_pred: &Structure<Tensor>) -> Result<f64>;
}

/// Mean of squared differences per output, summed over outputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredError;

impl Loss for MeanSquaredError {
    fn name(&self) -> &str {
        "mean_squared_error"
    }

    fn compute(&self, y_true: &Structure<Tensor>, y_pred: &Structure<Tensor>) -> Result<f64> {
        let mut total = 0.0;
        for (target, pred) in y_true.zip(y_pred)? {
            ensure!(
                target.shape() == pred.shape(),
                "target shape {} does not match prediction shape {}",
                target.shape(),
                pred.shape()
            );
            let (t, p) = (target.values(), pred.values());
            let n = t.len().max(1) as f64;
            total += t.iter().zip(p.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n;
        }
        Ok(total)
    }
}

//! Functional tensor kernels on host tensors.

use anyhow::{ensure, Result};

use crate::tensor::{DType, Shape, Tensor};

/// Contracts the last axis of `x` with a `[in, out]` matrix: `[..., in] -> [..., out]`.
pub fn matmul_last(x: &Tensor, w: &Tensor, dtype: DType) -> Result<Tensor> {
    let w_dims = w.shape().dims();
    ensure!(w_dims.len() == 2, "matmul weight must be 2D, got {}", w.shape());
    let (rows_in, cols) = (w_dims[0], w_dims[1]);
    let in_features = x.shape().last_dim().unwrap_or(1);
    ensure!(
        in_features == rows_in,
        "input features ({}) must match weight rows ({})",
        in_features,
        rows_in
    );
    let xs = x.values();
    let ws = w.values();
    let batch = x.len() / in_features.max(1);
    let mut out = vec![0.0; batch * cols];
    for b in 0..batch {
        let row = &xs[b * in_features..(b + 1) * in_features];
        let dst = &mut out[b * cols..(b + 1) * cols];
        for (i, &xv) in row.iter().enumerate() {
            if xv == 0.0 {
                continue;
            }
            let w_row = &ws[i * cols..(i + 1) * cols];
            for (o, &wv) in dst.iter_mut().zip(w_row) {
                *o += xv * wv;
            }
        }
    }
    Tensor::from_values(x.shape().with_last_dim(cols), dtype, out)
}

/// Adds a `[channels]` vector along the last axis.
pub fn add_bias(x: &Tensor, bias: &Tensor, dtype: DType) -> Result<Tensor> {
    let channels = x.shape().last_dim().unwrap_or(1);
    ensure!(
        bias.len() == channels,
        "bias length ({}) must match last dimension ({})",
        bias.len(),
        channels
    );
    let bs = bias.values();
    let values = x
        .values()
        .iter()
        .enumerate()
        .map(|(i, v)| v + bs[i % channels])
        .collect();
    Tensor::from_values(x.shape().clone(), dtype, values)
}

fn zip_same_shape(
    a: &Tensor,
    b: &Tensor,
    dtype: DType,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Tensor> {
    ensure!(
        a.shape() == b.shape(),
        "shape mismatch: {} vs {}",
        a.shape(),
        b.shape()
    );
    let values = a
        .values()
        .iter()
        .zip(b.values().iter())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Tensor::from_values(a.shape().clone(), dtype, values)
}

pub fn add(a: &Tensor, b: &Tensor, dtype: DType) -> Result<Tensor> {
    zip_same_shape(a, b, dtype, |x, y| x + y)
}

pub fn mul(a: &Tensor, b: &Tensor, dtype: DType) -> Result<Tensor> {
    zip_same_shape(a, b, dtype, |x, y| x * y)
}

/// Multiplies every element by `factor`.
pub fn scale(x: &Tensor, factor: f64, dtype: DType) -> Result<Tensor> {
    let values = x.values().iter().map(|v| v * factor).collect();
    Tensor::from_values(x.shape().clone(), dtype, values)
}

/// Numerically stable softmax over contiguous rows of length `width`.
pub(crate) fn softmax_rows(values: &mut [f64], width: usize) {
    if width == 0 {
        return;
    }
    for row in values.chunks_mut(width) {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        let inv = 1.0 / sum.max(1e-12);
        for v in row.iter_mut() {
            *v *= inv;
        }
    }
}

/// Softmax over the last axis.
pub fn softmax_last_dim(x: &Tensor, dtype: DType) -> Result<Tensor> {
    let width = x.shape().last_dim().unwrap_or(1);
    let mut values = x.values().into_owned();
    softmax_rows(&mut values, width);
    Tensor::from_values(x.shape().clone(), dtype, values)
}

/// Per-channel mean and biased variance over every axis except the last.
pub fn moments_last_axis(x: &Tensor) -> (Vec<f64>, Vec<f64>) {
    let channels = x.shape().last_dim().unwrap_or(1).max(1);
    let values = x.values();
    let count = (values.len() / channels).max(1) as f64;
    let mut mean = vec![0.0; channels];
    for (i, v) in values.iter().enumerate() {
        mean[i % channels] += v;
    }
    mean.iter_mut().for_each(|m| *m /= count);
    let mut var = vec![0.0; channels];
    for (i, v) in values.iter().enumerate() {
        let d = v - mean[i % channels];
        var[i % channels] += d * d;
    }
    var.iter_mut().for_each(|v| *v /= count);
    (mean, var)
}

/// Looks up rows of a `[vocab, dim]` table: `[...] -> [..., dim]`.
pub fn take_rows(table: &Tensor, indices: &Tensor, dtype: DType) -> Result<Tensor> {
    let dims = table.shape().dims();
    ensure!(dims.len() == 2, "lookup table must be 2D, got {}", table.shape());
    let (vocab, dim) = (dims[0], dims[1]);
    let rows = table.values();
    let mut out = Vec::with_capacity(indices.len() * dim);
    for &index in indices.values().iter() {
        ensure!(
            index >= 0.0 && (index as usize) < vocab,
            "index {index} out of range for table with {vocab} rows"
        );
        let i = index as usize;
        out.extend_from_slice(&rows[i * dim..(i + 1) * dim]);
    }
    let mut out_dims = indices.shape().dims().to_vec();
    out_dims.push(dim);
    Tensor::from_values(Shape::new(out_dims), dtype, out)
}

/// Scaled dot-product attention on rank-3 `[batch, steps, dim]` operands.
///
/// `query` is `[B, Tq, D]`, `key` is `[B, Tv, D]`, `value` is `[B, Tv, Dv]`; the result is
/// `[B, Tq, Dv]`.
pub fn dot_product_attention(
    query: &Tensor,
    key: &Tensor,
    value: &Tensor,
    scale: f64,
    dtype: DType,
) -> Result<Tensor> {
    let q = query.shape().dims();
    let k = key.shape().dims();
    let v = value.shape().dims();
    ensure!(
        q.len() == 3 && k.len() == 3 && v.len() == 3,
        "attention expects rank-3 query/key/value, got {}, {}, {}",
        query.shape(),
        key.shape(),
        value.shape()
    );
    ensure!(
        q[0] == k[0] && k[0] == v[0] && k[1] == v[1] && q[2] == k[2],
        "incompatible attention shapes: query {}, key {}, value {}",
        query.shape(),
        key.shape(),
        value.shape()
    );
    let (batch, tq, d) = (q[0], q[1], q[2]);
    let (tv, dv) = (v[1], v[2]);
    let (qs, ks, vs) = (query.values(), key.values(), value.values());
    let mut out = vec![0.0; batch * tq * dv];
    let mut scores = vec![0.0; tv];
    for b in 0..batch {
        for i in 0..tq {
            let q_row = &qs[(b * tq + i) * d..(b * tq + i + 1) * d];
            for (j, score) in scores.iter_mut().enumerate() {
                let k_row = &ks[(b * tv + j) * d..(b * tv + j + 1) * d];
                *score = scale * q_row.iter().zip(k_row).map(|(a, c)| a * c).sum::<f64>();
            }
            softmax_rows(&mut scores, tv);
            let dst = &mut out[(b * tq + i) * dv..(b * tq + i + 1) * dv];
            for (j, &weight) in scores.iter().enumerate() {
                let v_row = &vs[(b * tv + j) * dv..(b * tv + j + 1) * dv];
                for (o, &x) in dst.iter_mut().zip(v_row) {
                    *o += weight * x;
                }
            }
        }
    }
    Tensor::from_values(Shape::new([batch, tq, dv]), dtype, out)
}

/// Softmax-normalised attention weights `[B, Tq, Tv]` for rank-3 query and key.
pub fn attention_scores(query: &Tensor, key: &Tensor, scale: f64, dtype: DType) -> Result<Tensor> {
    let q = query.shape().dims();
    let k = key.shape().dims();
    ensure!(
        q.len() == 3 && k.len() == 3 && q[0] == k[0] && q[2] == k[2],
        "incompatible attention shapes: query {}, key {}",
        query.shape(),
        key.shape()
    );
    let (batch, tq, d, tv) = (q[0], q[1], q[2], k[1]);
    let (qs, ks) = (query.values(), key.values());
    let mut scores = vec![0.0; batch * tq * tv];
    for b in 0..batch {
        for i in 0..tq {
            let q_row = &qs[(b * tq + i) * d..(b * tq + i + 1) * d];
            for j in 0..tv {
                let k_row = &ks[(b * tv + j) * d..(b * tv + j + 1) * d];
                scores[(b * tq + i) * tv + j] =
                    scale * q_row.iter().zip(k_row).map(|(a, c)| a * c).sum::<f64>();
            }
        }
    }
    softmax_rows(&mut scores, tv);
    Tensor::from_values(Shape::new([batch, tq, tv]), dtype, scores)
}

/// `true` for every last-axis row that contains a value different from `mask_value`.
pub fn rows_not_equal(x: &Tensor, mask_value: f64) -> Vec<bool> {
    let width = x.shape().last_dim().unwrap_or(1).max(1);
    x.values()
        .chunks(width)
        .map(|row| row.iter().any(|&v| v != mask_value))
        .collect()
}

/// Sum of absolute values.
pub fn sum_abs(x: &Tensor) -> f64 {
    x.values().iter().map(|v| v.abs()).sum()
}

/// Sum of squares.
pub fn sum_squares(x: &Tensor) -> f64 {
    x.values().iter().map(|v| v * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attention_scores_rows_sum_to_one() {
        let q = Tensor::from_vec([1, 2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let k = Tensor::from_vec([1, 3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        let scores = attention_scores(&q, &k, 1.0, DType::F64).unwrap();
        assert_eq!(scores.shape().dims(), &[1, 2, 3]);
        for row in scores.values().chunks(3) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn matmul_last_matches_manual_product() {
        let x = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let w = Tensor::from_vec([2, 2], vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        let y = matmul_last(&x, &w, DType::F32).unwrap();
        assert_eq!(y.values().as_ref(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn matmul_last_accepts_sparse_input() {
        let x = Tensor::from_vec([1, 3], vec![0.0, 2.0, 0.0]).unwrap().to_sparse();
        let w = Tensor::ones([3, 2], DType::F32);
        let y = matmul_last(&x, &w, DType::F32).unwrap();
        assert!(!y.is_sparse());
        assert_eq!(y.values().as_ref(), &[2.0, 2.0]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = Tensor::from_vec([2, 3], vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0]).unwrap();
        let y = softmax_last_dim(&x, DType::F64).unwrap();
        for row in y.values().chunks(3) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn take_rows_rejects_out_of_range() {
        let table = Tensor::ones([3, 2], DType::F32);
        let indices = Tensor::from_values([2], DType::I32, vec![0.0, 3.0]).unwrap();
        assert!(take_rows(&table, &indices, DType::F32).is_err());
    }
}

use std::fmt;

/// 2-D tensor with contiguous row-major `f64` storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    /// Create a tensor from flat row-major data.
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "Tensor::new: {} elements do not fill shape ({rows}, {cols})",
            data.len()
        );
        Self { data, rows, cols }
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::full(rows, cols, 0.0)
    }

    /// Create a tensor filled with ones.
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self::full(rows, cols, 1.0)
    }

    pub fn full(rows: usize, cols: usize, value: f64) -> Self {
        Self::new(vec![value; rows * cols], rows, cols)
    }

    /// Zeros with the same shape as `other`.
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(other.rows, other.cols)
    }

    /// Create a tensor from a closure over `(row, col)`.
    pub fn from_fn(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self::new(data, rows, cols)
    }

    /// Build from nested rows. All rows must have the same length.
    pub fn from_rows(rows: &[&[f64]]) -> Self {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, r) in rows.iter().enumerate() {
            assert_eq!(r.len(), cols, "from_rows: row {i} has {} columns, expected {cols}", r.len());
            data.extend_from_slice(r);
        }
        Self::new(data, rows.len(), cols)
    }

    /// `(1, n)` row vector.
    pub fn row_vector(values: &[f64]) -> Self {
        Self::new(values.to_vec(), 1, values.len())
    }

    /// `(n, 1)` column vector.
    pub fn column_vector(values: &[f64]) -> Self {
        Self::new(values.to_vec(), values.len(), 1)
    }

    /// `(n, 1)` column of token ids.
    pub fn from_ids(ids: &[usize]) -> Self {
        Self::new(ids.iter().map(|&i| i as f64).collect(), ids.len(), 1)
    }

    /// `(1, 1)` tensor.
    pub fn scalar(value: f64) -> Self {
        Self::new(vec![value], 1, 1)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn numel(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn data(&self) -> &[f64] {
        &self.data
    }
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col] = value;
    }

    /// Borrow one row as a slice.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Interpret every element as a token id (row-major order).
    pub fn to_ids(&self) -> Vec<usize> {
        self.data
            .iter()
            .map(|&v| {
                assert!(v >= 0.0, "token id {v} is not a non-negative number");
                v.round() as usize
            })
            .collect()
    }

    // --- Element-wise operations ---

    /// Apply element-wise unary operation.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(self.data.iter().map(|&v| f(v)).collect(), self.rows, self.cols)
    }

    /// Element-wise binary operation with NumPy-style broadcasting of
    /// length-1 dimensions.
    pub fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        if self.shape() == other.shape() {
            let data = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Self::new(data, self.rows, self.cols);
        }

        let rows = broadcast_dim(self.rows, other.rows).unwrap_or_else(|| {
            panic!("zip_with: cannot broadcast {:?} with {:?}", self.shape(), other.shape())
        });
        let cols = broadcast_dim(self.cols, other.cols).unwrap_or_else(|| {
            panic!("zip_with: cannot broadcast {:?} with {:?}", self.shape(), other.shape())
        });
        Self::from_fn(rows, cols, |i, j| f(self.broadcast_get(i, j), other.broadcast_get(i, j)))
    }

    fn broadcast_get(&self, i: usize, j: usize) -> f64 {
        let i = if self.rows == 1 { 0 } else { i };
        let j = if self.cols == 1 { 0 } else { j };
        self.data[i * self.cols + j]
    }

    pub fn add(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a / b)
    }

    pub fn neg(&self) -> Self {
        self.map(|v| -v)
    }

    pub fn scale(&self, s: f64) -> Self {
        self.map(|v| v * s)
    }

    pub fn add_scalar(&self, s: f64) -> Self {
        self.map(|v| v + s)
    }

    /// In-place `self += other` for tensors of identical shape.
    pub fn add_assign(&mut self, other: &Self) {
        assert_eq!(
            self.shape(),
            other.shape(),
            "add_assign: shape mismatch {:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// Set every element to `value` without reallocating.
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    // --- Transcendentals ---

    pub fn exp(&self) -> Self {
        self.map(f64::exp)
    }
    pub fn ln(&self) -> Self {
        self.map(f64::ln)
    }
    pub fn tanh(&self) -> Self {
        self.map(f64::tanh)
    }
    pub fn sqrt(&self) -> Self {
        self.map(f64::sqrt)
    }
    pub fn square(&self) -> Self {
        self.map(|v| v * v)
    }

    pub fn sigmoid(&self) -> Self {
        self.map(|v| 1.0 / (1.0 + (-v).exp()))
    }

    pub fn relu(&self) -> Self {
        self.map(|v| if v > 0.0 { v } else { 0.0 })
    }

    // --- Reductions ---

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        self.sum() / self.numel() as f64
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Sum along an axis, keeping it as a length-1 dimension.
    /// Axis 0 gives `(1, cols)`, axis 1 gives `(rows, 1)`.
    pub fn sum_axis(&self, axis: usize) -> Self {
        match axis {
            0 => {
                let mut out = vec![0.0; self.cols];
                for i in 0..self.rows {
                    for (o, &v) in out.iter_mut().zip(self.row(i)) {
                        *o += v;
                    }
                }
                Self::new(out, 1, self.cols)
            }
            1 => {
                let out = (0..self.rows).map(|i| self.row(i).iter().sum()).collect();
                Self::new(out, self.rows, 1)
            }
            _ => panic!("sum_axis: axis {axis} out of range for a 2-D tensor"),
        }
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Column index of the largest value in each row. Ties resolve to the
    /// lowest index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.rows)
            .map(|i| {
                let mut best = 0;
                for (j, &v) in self.row(i).iter().enumerate() {
                    if v > self.row(i)[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }

    /// Numerically stable softmax over each row.
    pub fn softmax_rows(&self) -> Self {
        let mut out = Vec::with_capacity(self.numel());
        for i in 0..self.rows {
            let row = self.row(i);
            let max_val = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = row.iter().map(|&v| (v - max_val).exp()).collect();
            let sum: f64 = exps.iter().sum();
            out.extend(exps.into_iter().map(|e| e / sum));
        }
        Self::new(out, self.rows, self.cols)
    }

    // --- Matrix operations ---

    /// Matrix product `(m, k) @ (k, n) -> (m, n)`.
    pub fn matmul(&self, other: &Self) -> Self {
        assert_eq!(
            self.cols, other.rows,
            "matmul: inner dimensions differ, {:?} @ {:?}",
            self.shape(),
            other.shape()
        );
        let (m, k, n) = (self.rows, self.cols, other.cols);
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            let out_row = &mut out[i * n..(i + 1) * n];
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == 0.0 {
                    continue;
                }
                let b_row = &other.data[p * n..(p + 1) * n];
                for (o, &b) in out_row.iter_mut().zip(b_row) {
                    *o += a * b;
                }
            }
        }
        Self::new(out, m, n)
    }

    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |i, j| self.get(j, i))
    }

    /// Copy of columns `start..end`.
    pub fn slice_cols(&self, start: usize, end: usize) -> Self {
        assert!(
            start <= end && end <= self.cols,
            "slice_cols: range {start}..{end} out of bounds for {} columns",
            self.cols
        );
        Self::from_fn(self.rows, end - start, |i, j| self.get(i, start + j))
    }

    /// Copy of rows `start..end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        assert!(
            start <= end && end <= self.rows,
            "slice_rows: range {start}..{end} out of bounds for {} rows",
            self.rows
        );
        Self::new(self.data[start * self.cols..end * self.cols].to_vec(), end - start, self.cols)
    }

    /// Concatenate along columns. All parts must share the row count.
    pub fn hstack(parts: &[&Tensor]) -> Self {
        assert!(!parts.is_empty(), "hstack: need at least one tensor");
        let rows = parts[0].rows;
        for p in parts {
            assert_eq!(p.rows, rows, "hstack: row counts differ ({} vs {rows})", p.rows);
        }
        let cols: usize = parts.iter().map(|p| p.cols).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for p in parts {
                data.extend_from_slice(p.row(i));
            }
        }
        Self::new(data, rows, cols)
    }

    /// Concatenate along rows. All parts must share the column count.
    pub fn vstack(parts: &[&Tensor]) -> Self {
        assert!(!parts.is_empty(), "vstack: need at least one tensor");
        let cols = parts[0].cols;
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.numel()).sum());
        for p in parts {
            assert_eq!(p.cols, cols, "vstack: column counts differ ({} vs {cols})", p.cols);
            data.extend_from_slice(&p.data);
        }
        let rows = parts.iter().map(|p| p.rows).sum();
        Self::new(data, rows, cols)
    }

    /// Split into consecutive blocks of `rows_per_chunk` rows (inverse of `vstack`).
    pub fn split_rows(&self, rows_per_chunk: usize) -> Vec<Tensor> {
        assert!(rows_per_chunk > 0, "split_rows: chunk size must be positive");
        assert_eq!(
            self.rows % rows_per_chunk,
            0,
            "split_rows: {} rows do not divide into chunks of {rows_per_chunk}",
            self.rows
        );
        (0..self.rows / rows_per_chunk)
            .map(|c| self.slice_rows(c * rows_per_chunk, (c + 1) * rows_per_chunk))
            .collect()
    }

    /// Replicate length-1 dimensions up to `(rows, cols)`.
    pub fn broadcast_to(&self, rows: usize, cols: usize) -> Self {
        assert!(
            (self.rows == rows || self.rows == 1) && (self.cols == cols || self.cols == 1),
            "broadcast_to: cannot broadcast {:?} to ({rows}, {cols})",
            self.shape()
        );
        Self::from_fn(rows, cols, |i, j| self.broadcast_get(i, j))
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

fn broadcast_dim(a: usize, b: usize) -> Option<usize> {
    if a == b {
        Some(a)
    } else if a == 1 {
        Some(b)
    } else if b == 1 {
        Some(a)
    } else {
        None
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..self.rows {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "[")?;
            for (j, v) in self.row(i).iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{v}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_basics() {
        let t = Tensor::zeros(2, 3);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.shape(), (2, 3));
        assert_eq!(t.get(0, 0), 0.0);
    }

    #[test]
    fn tensor_from_fn() {
        let t = Tensor::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        assert_eq!(t.get(0, 0), 0.0);
        assert_eq!(t.get(0, 2), 2.0);
        assert_eq!(t.get(1, 1), 4.0);
    }

    #[test]
    fn tensor_broadcast_row_and_column() {
        let a = Tensor::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        let bias = Tensor::row_vector(&[10.0, 20.0, 30.0]);
        let c = a.add(&bias);
        assert_eq!(c.get(0, 0), 10.0);
        assert_eq!(c.get(0, 2), 32.0);
        assert_eq!(c.get(1, 0), 13.0);

        let weights = Tensor::column_vector(&[2.0, 0.5]);
        let d = a.mul(&weights);
        assert_eq!(d.row(0), &[0.0, 2.0, 4.0]);
        assert_eq!(d.row(1), &[1.5, 2.0, 2.5]);
    }

    #[test]
    #[should_panic(expected = "cannot broadcast")]
    fn tensor_broadcast_rejects_mismatch() {
        let a = Tensor::zeros(2, 3);
        let b = Tensor::zeros(2, 4);
        let _ = a.add(&b);
    }

    #[test]
    fn tensor_matmul() {
        // [[1, 2], [3, 4]] @ [[5, 6], [7, 8]] = [[19, 22], [43, 50]]
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let b = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
        let c = a.matmul(&b);
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn tensor_matmul_rectangular() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        let b = Tensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], 3, 2);
        assert_eq!(a.matmul(&b).data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn tensor_sum_axis() {
        // [[1, 2, 3], [4, 5, 6]]
        let t = Tensor::from_fn(2, 3, |i, j| (i * 3 + j + 1) as f64);
        let s0 = t.sum_axis(0);
        assert_eq!(s0.shape(), (1, 3));
        assert_eq!(s0.data(), &[5.0, 7.0, 9.0]);

        let s1 = t.sum_axis(1);
        assert_eq!(s1.shape(), (2, 1));
        assert_eq!(s1.data(), &[6.0, 15.0]);
    }

    #[test]
    fn tensor_transpose() {
        let t = Tensor::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        let tt = t.transpose();
        assert_eq!(tt.shape(), (3, 2));
        assert_eq!(tt.get(0, 0), 0.0);
        assert_eq!(tt.get(2, 1), 5.0);
    }

    #[test]
    fn tensor_stack_and_split() {
        let a = Tensor::from_rows(&[&[1.0, 2.0]]);
        let b = Tensor::from_rows(&[&[3.0, 4.0]]);
        let v = Tensor::vstack(&[&a, &b]);
        assert_eq!(v.shape(), (2, 2));
        let parts = v.split_rows(1);
        assert_eq!(parts, vec![a.clone(), b.clone()]);

        let h = Tensor::hstack(&[&a, &b]);
        assert_eq!(h.data(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(h.slice_cols(2, 4), b);
    }

    #[test]
    fn tensor_softmax_rows_sum_to_one() {
        let t = Tensor::from_rows(&[&[1.0, 2.0, 3.0], &[1000.0, 1000.0, 1000.0]]);
        let s = t.softmax_rows();
        for row in s.sum_axis(1).data() {
            assert!((row - 1.0).abs() < 1e-12);
        }
        assert!((s.get(1, 0) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn tensor_argmax_rows() {
        let t = Tensor::from_rows(&[&[-3.0, -1.0, -2.0], &[0.5, 0.5, 0.1]]);
        assert_eq!(t.argmax_rows(), vec![1, 0]);
    }

    #[test]
    fn tensor_ids_roundtrip() {
        let t = Tensor::from_ids(&[4, 0, 2]);
        assert_eq!(t.shape(), (3, 1));
        assert_eq!(t.to_ids(), vec![4, 0, 2]);
    }

    #[test]
    #[should_panic(expected = "token id -1 is not a non-negative number")]
    fn negative_id_is_rejected() {
        Tensor::column_vector(&[2.0, -1.0]).to_ids();
    }

    #[test]
    #[should_panic(expected = "token id NaN")]
    fn nan_id_is_rejected() {
        Tensor::column_vector(&[f64::NAN]).to_ids();
    }

    #[test]
    fn tensor_broadcast_to() {
        let col = Tensor::column_vector(&[1.0, 2.0]);
        let b = col.broadcast_to(2, 3);
        assert_eq!(b.data(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }
}

use std::fmt;

/// Dense row-major 2-D buffer of `f64`. The shape never changes after construction;
/// `reshape` produces a new matrix over a copy of the data.
#[derive(Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Box<[f64]>,
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let mut s = f.debug_struct("Matrix");
        s.field("rows", &self.rows).field("cols", &self.cols);
        if self.data.len() < 30 {
            s.field("data", &self.data);
        } else {
            s.field("data_len", &self.data.len());
        }
        s.finish()
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "[")?;
        for r in 0..self.rows {
            if r > 0 {
                write!(f, ",\n ")?;
            }
            write!(f, "[")?;
            for (c, v) in self.row(r).iter().enumerate() {
                if c > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.4}", v)?;
            }
            write!(f, "]")?;
        }
        write!(f, "]")
    }
}

#[allow(dead_code)]
impl Matrix {

    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(rows * cols, data.len(), "matrix data length mismatch");
        Matrix {
            rows,
            cols,
            data: data.into_boxed_slice(),
        }
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Matrix::new(rows, cols, vec![value; rows * cols])
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix::filled(rows, cols, 0.0)
    }

    pub fn zeros_like(other: &Matrix) -> Self {
        Matrix::zeros(other.rows, other.cols)
    }

    /// A `n × 1` column vector.
    pub fn column(data: Vec<f64>) -> Self {
        let rows = data.len();
        Matrix::new(rows, 1, data)
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Matrix::new(rows, cols, data)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col] = value;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data.into_vec()
    }

    pub fn reshape(&self, rows: usize, cols: usize) -> Matrix {
        Matrix::new(rows, cols, self.data.to_vec())
    }

    /// Copy of rows `start..end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Matrix {
        assert!(start <= end && end <= self.rows);
        Matrix::new(end - start, self.cols, self.data[start * self.cols..end * self.cols].to_vec())
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn apply(&mut self, f: impl Fn(f64) -> f64) {
        for v in self.data.iter_mut() {
            *v = f(*v);
        }
    }

    pub fn zip_map(&self, other: &Matrix, f: impl Fn(f64, f64) -> f64) -> Matrix {
        assert!(self.same_shape(other), "zip_map shape mismatch {:?} vs {:?}", self, other);
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(other.data.iter()).map(|(&a, &b)| f(a, b)).collect(),
        }
    }

    pub fn add(&mut self, other: &Matrix) {
        self.add_with_multiplier(other, 1.0);
    }

    pub fn add_with_multiplier(&mut self, other: &Matrix, multiplier: f64) {
        assert!(self.same_shape(other), "add shape mismatch {:?} vs {:?}", self, other);
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b * multiplier;
        }
    }

    pub fn subtract(&mut self, other: &Matrix) {
        self.add_with_multiplier(other, -1.0);
    }

    pub fn scale(&mut self, factor: f64) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    pub fn mul_elem(&mut self, other: &Matrix) {
        assert!(self.same_shape(other), "mul_elem shape mismatch {:?} vs {:?}", self, other);
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a *= *b;
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    /// `self · other`
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.rows, "matmul inner dimension mismatch");
        let mut out = Matrix::zeros(self.rows, other.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let a = self.at(r, k);
                for c in 0..other.cols {
                    out.data[r * other.cols + c] += a * other.at(k, c);
                }
            }
        }
        out
    }

    /// `selfᵀ · other`
    pub fn transpose_matmul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.rows, other.rows, "transpose_matmul dimension mismatch");
        let mut out = Matrix::zeros(self.cols, other.cols);
        for k in 0..self.rows {
            for r in 0..self.cols {
                let a = self.at(k, r);
                for c in 0..other.cols {
                    out.data[r * other.cols + c] += a * other.at(k, c);
                }
            }
        }
        out
    }

    /// `self · otherᵀ`
    pub fn matmul_transpose(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.cols, "matmul_transpose dimension mismatch");
        Matrix::from_fn(self.rows, other.rows, |r, c| {
            self.row(r).iter().zip(other.row(c).iter()).map(|(a, b)| a * b).sum()
        })
    }

    pub fn transpose(&self) -> Matrix {
        Matrix::from_fn(self.cols, self.rows, |r, c| self.at(c, r))
    }

}

use crate::buffer::{Matrix, Shape};
use crate::error::NetError;

/// Valid (no padding) 2-D correlation. Output shape is `data − kernel + 1` in each dimension.
pub fn convolve_valid(data: &Matrix, kernel: &Matrix) -> Matrix {
    assert!(kernel.rows() <= data.rows() && kernel.cols() <= data.cols(), "kernel larger than data");
    let (kr, kc) = (kernel.rows(), kernel.cols());
    Matrix::from_fn(data.rows() - kr + 1, data.cols() - kc + 1, |r, c| {
        let mut val = 0.0;
        for i in 0..kr {
            for j in 0..kc {
                val += data.at(r + i, c + j) * kernel.at(i, j);
            }
        }
        val
    })
}

/// Correlation over `data` surrounded by `kernel − 1` zeros on every side, so the output is
/// `data + kernel − 1` in each dimension.
pub fn convolve_padded(data: &Matrix, kernel: &Matrix) -> Matrix {
    let (kr, kc) = (kernel.rows() as isize, kernel.cols() as isize);
    let (dr, dc) = (data.rows() as isize, data.cols() as isize);
    Matrix::from_fn(data.rows() + kernel.rows() - 1, data.cols() + kernel.cols() - 1, |r, c| {
        let mut val = 0.0;
        for i in 0..kr {
            for j in 0..kc {
                let dr_i = r as isize - kr + 1 + i;
                let dc_j = c as isize - kc + 1 + j;
                if dr_i >= 0 && dc_j >= 0 && dr_i < dr && dc_j < dc {
                    val += data.at(dr_i as usize, dc_j as usize) * kernel.at(i as usize, j as usize);
                }
            }
        }
        val
    })
}

pub fn rotate_180(kernel: &Matrix) -> Matrix {
    let mut data = kernel.as_slice().to_vec();
    data.reverse();
    Matrix::new(kernel.rows(), kernel.cols(), data)
}

fn check_poolable(data: &Matrix, pool: Shape) -> Result<(), NetError> {
    if data.rows() % pool.rows != 0 {
        return Err(NetError::NotDivisible("max pool rows".to_string(), data.rows(), pool.rows));
    }
    if data.cols() % pool.cols != 0 {
        return Err(NetError::NotDivisible("max pool cols".to_string(), data.cols(), pool.cols));
    }
    Ok(())
}

/// Position of the maximum inside the block at (`r`, `c`); the first maximum in row-major
/// order wins ties.
fn block_argmax(data: &Matrix, pool: Shape, r: usize, c: usize) -> (usize, usize) {
    let mut best = (r, c);
    for i in 0..pool.rows {
        for j in 0..pool.cols {
            if data.at(r + i, c + j) > data.at(best.0, best.1) {
                best = (r + i, c + j);
            }
        }
    }
    best
}

pub fn max_pool(data: &Matrix, pool: Shape) -> Result<Matrix, NetError> {
    check_poolable(data, pool)?;
    Ok(Matrix::from_fn(data.rows() / pool.rows, data.cols() / pool.cols, |r, c| {
        let (br, bc) = block_argmax(data, pool, r * pool.rows, c * pool.cols);
        data.at(br, bc)
    }))
}

/// Same shape as `data`, 1 at each block's maximum and 0 elsewhere.
pub fn max_pool_mask(data: &Matrix, pool: Shape) -> Result<Matrix, NetError> {
    check_poolable(data, pool)?;
    let mut mask = Matrix::zeros_like(data);
    for r in (0..data.rows()).step_by(pool.rows) {
        for c in (0..data.cols()).step_by(pool.cols) {
            let (br, bc) = block_argmax(data, pool, r, c);
            mask.set(br, bc, 1.0);
        }
    }
    Ok(mask)
}

/// Nearest-neighbour upsampling: every value fills its `pool` block.
pub fn unpool(data: &Matrix, pool: Shape) -> Matrix {
    Matrix::from_fn(data.rows() * pool.rows, data.cols() * pool.cols, |r, c| {
        data.at(r / pool.rows, c / pool.cols)
    })
}

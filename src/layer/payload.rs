use std::io::{self, Cursor};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use crate::buffer::Matrix;
use crate::error::{NetError, NetResult};

pub fn put_u32(out: &mut Vec<u8>, value: usize) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value as u32);
    out.extend_from_slice(&buf);
}

pub fn put_f64(out: &mut Vec<u8>, value: f64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_f64(&mut buf, value);
    out.extend_from_slice(&buf);
}

/// Row-major values, no header.
pub fn put_matrix(out: &mut Vec<u8>, matrix: &Matrix) {
    for &v in matrix.as_slice() {
        put_f64(out, v);
    }
}

fn corrupt(err: io::Error, what: &str) -> NetError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        NetError::Corrupt(format!("truncated while reading {}", what))
    } else {
        NetError::Io(err)
    }
}

/// Little-endian reader over a layer payload.
pub struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {

    pub fn new(bytes: &'a [u8]) -> Self {
        PayloadReader { cursor: Cursor::new(bytes) }
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len();
        len.saturating_sub(self.cursor.position() as usize)
    }

    pub fn read_u32(&mut self, what: &str) -> NetResult<usize> {
        self.cursor.read_u32::<LittleEndian>()
            .map(|v| v as usize)
            .map_err(|e| corrupt(e, what))
    }

    pub fn read_f64(&mut self, what: &str) -> NetResult<f64> {
        self.cursor.read_f64::<LittleEndian>().map_err(|e| corrupt(e, what))
    }

    pub fn read_matrix(&mut self, rows: usize, cols: usize, what: &str) -> NetResult<Matrix> {
        let len = rows.checked_mul(cols)
            .filter(|len| len.checked_mul(8).map_or(false, |bytes| bytes <= self.remaining()))
            .ok_or_else(|| NetError::Corrupt(format!("{} of {}x{} does not fit the payload", what, rows, cols)))?;
        let mut data = vec![0.0; len];
        self.cursor.read_f64_into::<LittleEndian>(&mut data).map_err(|e| corrupt(e, what))?;
        Ok(Matrix::new(rows, cols, data))
    }

    /// The next `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize, what: &str) -> NetResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(NetError::Corrupt(format!("truncated while reading {}", what)));
        }
        let all: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        self.cursor.set_position((start + len) as u64);
        Ok(&all[start..start + len])
    }

    pub fn finish(self, what: &str) -> NetResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(NetError::Corrupt(format!("{} trailing bytes after {}", n, what))),
        }
    }

}

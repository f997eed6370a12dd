//! Binary encodings for feature chunks and dense model artifacts.
//!
//! All numbers are little-endian. Floats are stored as 4-byte `f32`, the
//! same layout as [`vec_to_blob`]. Each container starts with a 4-byte magic
//! so a truncated or foreign file is rejected instead of misread.
//!
//! ```text
//! sparse:  "FDXS" n_features:u64 n_rows:u64 { nnz:u32 (index:u32)* (value:f32)* }*
//! dense:   "FDXD" n_rows:u64 n_cols:u64 (value:f32)*
//! u64s:    "FDXH" n:u64 (value:u64)*
//! ```

use crate::error::{CoreError, CoreResult};
use crate::models::SparseVec;

const SPARSE_MAGIC: &[u8; 4] = b"FDXS";
const DENSE_MAGIC: &[u8; 4] = b"FDXD";
const U64_MAGIC: &[u8; 4] = b"FDXH";

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use fdx_core::codec::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing partial floats are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], magic: &[u8; 4]) -> CoreResult<Self> {
        if bytes.len() < 4 || &bytes[..4] != magic {
            return Err(CoreError::Corrupt(format!(
                "expected {} header",
                String::from_utf8_lossy(magic)
            )));
        }
        Ok(Self { bytes, pos: 4 })
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::Corrupt("unexpected end of data".to_string()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn f32(&mut self) -> CoreResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn finish(self) -> CoreResult<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(CoreError::Corrupt(format!(
                "{} trailing bytes",
                self.bytes.len() - self.pos
            )))
        }
    }
}

pub fn encode_sparse_rows(n_features: usize, rows: &[SparseVec]) -> Vec<u8> {
    let payload: usize = rows.iter().map(|r| 4 + r.nnz() * 8).sum();
    let mut out = Vec::with_capacity(20 + payload);
    out.extend_from_slice(SPARSE_MAGIC);
    out.extend_from_slice(&(n_features as u64).to_le_bytes());
    out.extend_from_slice(&(rows.len() as u64).to_le_bytes());
    for row in rows {
        out.extend_from_slice(&(row.nnz() as u32).to_le_bytes());
        for i in &row.indices {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out.extend_from_slice(&vec_to_blob(&row.values));
    }
    out
}

/// Decode a sparse container into `(n_features, rows)`.
pub fn decode_sparse_rows(bytes: &[u8]) -> CoreResult<(usize, Vec<SparseVec>)> {
    let mut r = Reader::new(bytes, SPARSE_MAGIC)?;
    let n_features = r.u64()? as usize;
    let n_rows = r.u64()? as usize;
    let mut rows = Vec::with_capacity(n_rows.min(1 << 20));
    for _ in 0..n_rows {
        let nnz = r.u32()? as usize;
        let mut indices = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            let i = r.u32()?;
            if i as usize >= n_features {
                return Err(CoreError::Corrupt(format!(
                    "column {} out of range for {} features",
                    i, n_features
                )));
            }
            indices.push(i);
        }
        let mut values = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            values.push(r.f32()?);
        }
        rows.push(SparseVec { indices, values });
    }
    r.finish()?;
    Ok((n_features, rows))
}

pub fn encode_dense_rows(rows: &[Vec<f32>]) -> Vec<u8> {
    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(20 + rows.len() * n_cols * 4);
    out.extend_from_slice(DENSE_MAGIC);
    out.extend_from_slice(&(rows.len() as u64).to_le_bytes());
    out.extend_from_slice(&(n_cols as u64).to_le_bytes());
    for row in rows {
        debug_assert_eq!(row.len(), n_cols);
        out.extend_from_slice(&vec_to_blob(row));
    }
    out
}

pub fn decode_dense_rows(bytes: &[u8]) -> CoreResult<Vec<Vec<f32>>> {
    let mut r = Reader::new(bytes, DENSE_MAGIC)?;
    let n_rows = r.u64()? as usize;
    let n_cols = r.u64()? as usize;
    let mut rows = Vec::with_capacity(n_rows.min(1 << 20));
    for _ in 0..n_rows {
        let raw = r.take(n_cols * 4)?;
        rows.push(blob_to_vec(raw));
    }
    r.finish()?;
    Ok(rows)
}

pub fn encode_u64s(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + values.len() * 8);
    out.extend_from_slice(U64_MAGIC);
    out.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_u64s(bytes: &[u8]) -> CoreResult<Vec<u64>> {
    let mut r = Reader::new(bytes, U64_MAGIC)?;
    let n = r.u64()? as usize;
    let mut out = Vec::with_capacity(n.min(1 << 20));
    for _ in 0..n {
        out.push(r.u64()?);
    }
    r.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_container_roundtrip() {
        let rows = vec![
            SparseVec::from_pairs(vec![(1, 0.5), (7, -1.25)]),
            SparseVec::default(),
            SparseVec::from_pairs(vec![(0, 2.0)]),
        ];
        let bytes = encode_sparse_rows(8, &rows);
        let (n, back) = decode_sparse_rows(&bytes).unwrap();
        assert_eq!(n, 8);
        assert_eq!(back, rows);
    }

    #[test]
    fn truncated_sparse_container_is_corrupt() {
        let rows = vec![SparseVec::from_pairs(vec![(1, 0.5)])];
        let bytes = encode_sparse_rows(4, &rows);
        let err = decode_sparse_rows(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CoreError::Corrupt(_)));
    }

    #[test]
    fn out_of_range_column_is_corrupt() {
        let rows = vec![SparseVec::from_pairs(vec![(9, 1.0)])];
        let bytes = encode_sparse_rows(4, &rows);
        assert!(decode_sparse_rows(&bytes).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = encode_dense_rows(&[vec![1.0, 2.0]]);
        assert!(decode_sparse_rows(&bytes).is_err());
        assert!(decode_u64s(&bytes).is_err());
    }

    #[test]
    fn dense_and_u64_containers() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![-1.0, 0.0, 0.5]];
        assert_eq!(decode_dense_rows(&encode_dense_rows(&rows)).unwrap(), rows);
        assert!(decode_dense_rows(&encode_dense_rows(&[])).unwrap().is_empty());

        let hashes = vec![0u64, u64::MAX, 42];
        assert_eq!(decode_u64s(&encode_u64s(&hashes)).unwrap(), hashes);
    }
}

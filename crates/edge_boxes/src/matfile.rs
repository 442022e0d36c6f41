//! Level-5 MAT-file codec (the format MATLAB's `save` writes by default).
//!
//! Only the subset needed for numeric results is understood: numeric arrays of
//! any storage type, char arrays and cell arrays of those. Struct, object and
//! sparse arrays are kept as [`MatValue::Unsupported`] placeholders so files
//! that carry them still load.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;

const MX_CELL: u8 = 1;
const MX_CHAR: u8 = 4;
const MX_DOUBLE: u8 = 6;
const MX_UINT64: u8 = 15;

const FLAG_COMPLEX: u32 = 0x0800;

#[derive(Debug, Error)]
pub enum MatError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a level-5 MAT file: {0}")]
    InvalidHeader(String),
    #[error("truncated data element at byte {offset}")]
    Truncated { offset: usize },
    #[error("unsupported {what} {code}")]
    Unsupported { what: &'static str, code: u32 },
    #[error("malformed array `{name}`: {msg}")]
    Malformed { name: String, msg: String },
    #[error("variable `{0}` not found")]
    MissingVariable(String),
    #[error("zlib stream error: {0}")]
    Zlib(#[source] std::io::Error),
}

pub type MatResult<T> = Result<T, MatError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Dense real matrix stored column-major, as MATLAB does.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(rows * cols, data.len());
        Self { rows, cols, data }
    }

    pub fn empty() -> Self {
        Self::new(0, 0, Vec::new())
    }

    /// Build from row-major rows.
    pub fn from_rows<const N: usize>(rows: &[[f64; N]]) -> Self {
        let mut data = vec![0.0; rows.len() * N];
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                data[c * rows.len() + r] = *v;
            }
        }
        Self::new(rows.len(), N, data)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[col * self.rows + row]
    }

    pub fn row(&self, row: usize) -> Vec<f64> {
        (0..self.cols).map(|c| self.get(row, c)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatValue {
    /// Numeric array; arrays with more than two dims fold trailing dims into `cols`.
    Numeric(Matrix),
    Char(String),
    /// Cell array; `items` are in column-major order.
    Cell { dims: Vec<usize>, items: Vec<MatValue> },
    Unsupported { class: u8 },
}

#[derive(Debug, Clone)]
pub struct MatFile {
    pub description: String,
    pub endian: Endian,
    variables: BTreeMap<String, MatValue>,
}

impl MatFile {
    pub fn open(path: &Path) -> MatResult<Self> {
        let bytes = fs::read(path).map_err(|source| MatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> MatResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(MatError::InvalidHeader(format!(
                "{} bytes is shorter than the 128-byte header",
                bytes.len()
            )));
        }
        let endian = match &bytes[126..128] {
            b"IM" => Endian::Little,
            b"MI" => Endian::Big,
            other => {
                return Err(MatError::InvalidHeader(format!(
                    "bad endian indicator {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        let description = String::from_utf8_lossy(&bytes[..HEADER_TEXT_LEN])
            .trim_end_matches(['\0', ' '])
            .to_string();

        let mut variables = BTreeMap::new();
        read_top_level(&bytes[HEADER_LEN..], HEADER_LEN, endian, &mut variables)?;
        Ok(Self {
            description,
            endian,
            variables,
        })
    }

    pub fn get(&self, name: &str) -> Option<&MatValue> {
        self.variables.get(name)
    }

    pub fn require(&self, name: &str) -> MatResult<&MatValue> {
        self.get(name)
            .ok_or_else(|| MatError::MissingVariable(name.to_string()))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }
}

fn read_top_level(
    buf: &[u8],
    base: usize,
    endian: Endian,
    out: &mut BTreeMap<String, MatValue>,
) -> MatResult<()> {
    let mut cursor = Cursor::new(buf, base, endian);
    while cursor.remaining() >= 8 {
        let (data_type, data) = cursor.element()?;
        match data_type {
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut inflated)
                    .map_err(MatError::Zlib)?;
                read_top_level(&inflated, 0, endian, out)?;
            }
            MI_MATRIX => {
                let (name, value) = parse_matrix(data, endian)?;
                out.insert(name, value);
            }
            other => {
                return Err(MatError::Unsupported {
                    what: "top-level element type",
                    code: other,
                })
            }
        }
    }
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], base: usize, endian: Endian) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            endian,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> MatResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(MatError::Truncated {
                offset: self.base + self.pos,
            });
        }
        let buf: &'a [u8] = self.buf;
        let out = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> MatResult<u32> {
        let raw = self.take(4)?;
        Ok(read_u32(raw, self.endian))
    }

    fn align8(&mut self) {
        self.pos = ((self.pos + 7) & !7).min(self.buf.len());
    }

    /// Reads one data element, handling the packed small-element form.
    fn element(&mut self) -> MatResult<(u32, &'a [u8])> {
        let first = self.u32()?;
        if first >> 16 != 0 {
            let data_type = first & 0xffff;
            let len = (first >> 16) as usize;
            let packed = self.take(4)?;
            if len > 4 {
                return Err(MatError::Truncated {
                    offset: self.base + self.pos - 8,
                });
            }
            return Ok((data_type, &packed[..len]));
        }
        let len = self.u32()? as usize;
        let data = self.take(len)?;
        // Compressed elements are not padded.
        if first != MI_COMPRESSED {
            self.align8();
        }
        Ok((first, data))
    }
}

fn read_u32(raw: &[u8], endian: Endian) -> u32 {
    let bytes = [raw[0], raw[1], raw[2], raw[3]];
    match endian {
        Endian::Little => u32::from_le_bytes(bytes),
        Endian::Big => u32::from_be_bytes(bytes),
    }
}

macro_rules! decode_as_f64 {
    ($bytes:expr, $endian:expr, $ty:ty) => {{
        const WIDTH: usize = std::mem::size_of::<$ty>();
        $bytes
            .chunks_exact(WIDTH)
            .map(|chunk| {
                let mut raw = [0u8; WIDTH];
                raw.copy_from_slice(chunk);
                let v = match $endian {
                    Endian::Little => <$ty>::from_le_bytes(raw),
                    Endian::Big => <$ty>::from_be_bytes(raw),
                };
                v as f64
            })
            .collect::<Vec<f64>>()
    }};
}

fn decode_numeric(data_type: u32, bytes: &[u8], endian: Endian) -> MatResult<Vec<f64>> {
    let values = match data_type {
        MI_INT8 => decode_as_f64!(bytes, endian, i8),
        MI_UINT8 => decode_as_f64!(bytes, endian, u8),
        MI_INT16 => decode_as_f64!(bytes, endian, i16),
        MI_UINT16 => decode_as_f64!(bytes, endian, u16),
        MI_INT32 => decode_as_f64!(bytes, endian, i32),
        MI_UINT32 => decode_as_f64!(bytes, endian, u32),
        MI_SINGLE => decode_as_f64!(bytes, endian, f32),
        MI_DOUBLE => decode_as_f64!(bytes, endian, f64),
        MI_INT64 => decode_as_f64!(bytes, endian, i64),
        MI_UINT64 => decode_as_f64!(bytes, endian, u64),
        other => {
            return Err(MatError::Unsupported {
                what: "numeric data type",
                code: other,
            })
        }
    };
    Ok(values)
}

fn parse_matrix(data: &[u8], endian: Endian) -> MatResult<(String, MatValue)> {
    // Empty cells are sometimes written as a bare miMATRIX tag.
    if data.is_empty() {
        return Ok((String::new(), MatValue::Numeric(Matrix::empty())));
    }
    let mut cursor = Cursor::new(data, 0, endian);

    let (flags_type, flags) = cursor.element()?;
    if flags_type != MI_UINT32 || flags.len() < 8 {
        return Err(MatError::Unsupported {
            what: "array flags element",
            code: flags_type,
        });
    }
    let flag_word = read_u32(flags, endian);
    let class = (flag_word & 0xff) as u8;
    let complex = flag_word & FLAG_COMPLEX != 0;

    let (dims_type, dims_raw) = cursor.element()?;
    let dims: Vec<usize> = decode_numeric(dims_type, dims_raw, endian)?
        .into_iter()
        .map(|d| d.max(0.0) as usize)
        .collect();

    let (_, name_raw) = cursor.element()?;
    let name = String::from_utf8_lossy(name_raw).into_owned();

    let Some(count) = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)) else {
        return Err(MatError::Malformed {
            name,
            msg: format!("dims {dims:?} overflow the element count"),
        });
    };
    let value = match class {
        MX_CELL => {
            // Every entry needs at least one 8-byte tag.
            let mut items = Vec::with_capacity(count.min(cursor.remaining() / 8));
            for _ in 0..count {
                let (item_type, item) = cursor.element()?;
                if item_type != MI_MATRIX {
                    return Err(MatError::Malformed {
                        name,
                        msg: format!("cell entry has element type {item_type}"),
                    });
                }
                let (_, value) = parse_matrix(item, endian)?;
                items.push(value);
            }
            MatValue::Cell { dims, items }
        }
        MX_CHAR => {
            let (char_type, raw) = cursor.element()?;
            let text = match char_type {
                MI_UTF8 | MI_UINT8 | MI_INT8 => String::from_utf8_lossy(raw).into_owned(),
                _ => decode_numeric(char_type, raw, endian)?
                    .into_iter()
                    .filter_map(|c| char::from_u32(c as u32))
                    .collect(),
            };
            MatValue::Char(text)
        }
        MX_DOUBLE..=MX_UINT64 => {
            let (real_type, raw) = cursor.element()?;
            let real = decode_numeric(real_type, raw, endian)?;
            if complex {
                // Imaginary part is dropped; results files never carry one.
                let _ = cursor.element()?;
            }
            if real.len() != count {
                return Err(MatError::Malformed {
                    name,
                    msg: format!("dims {dims:?} hold {count} values but {} were stored", real.len()),
                });
            }
            let rows = dims.first().copied().unwrap_or(0);
            let cols = if rows == 0 { 0 } else { count / rows };
            MatValue::Numeric(Matrix::new(rows, cols, real))
        }
        other => MatValue::Unsupported { class: other },
    };
    Ok((name, value))
}

/// Writes a single cell-array variable whose entries are double matrices.
pub fn write_cell_of_matrices(
    path: &Path,
    name: &str,
    items: &[Matrix],
    compress: bool,
) -> MatResult<()> {
    let io_err = |source| MatError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut cell_body = Vec::new();
    for item in items {
        cell_body.extend(matrix_element("", MX_DOUBLE, &[item.rows, item.cols], &double_body(item)));
    }
    let element = matrix_element(name, MX_CELL, &[1, items.len()], &cell_body);

    let mut out = header_bytes();
    if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&element).map_err(MatError::Zlib)?;
        let packed = encoder.finish().map_err(MatError::Zlib)?;
        out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
        out.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        out.extend_from_slice(&packed);
    } else {
        out.extend_from_slice(&element);
    }
    fs::write(path, out).map_err(io_err)
}

fn header_bytes() -> Vec<u8> {
    let mut header = b"MATLAB 5.0 MAT-file, written by edge_boxes".to_vec();
    header.resize(HEADER_TEXT_LEN, b' ');
    header.extend_from_slice(&[0u8; 8]);
    header.extend_from_slice(&0x0100u16.to_le_bytes());
    header.extend_from_slice(b"IM");
    header
}

fn push_element(out: &mut Vec<u8>, data_type: u32, data: &[u8]) {
    out.extend_from_slice(&data_type.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    let padded = (out.len() + 7) & !7;
    out.resize(padded, 0);
}

fn matrix_element(name: &str, class: u8, dims: &[usize], body: &[u8]) -> Vec<u8> {
    let mut sub = Vec::new();
    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&(class as u32).to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(&mut sub, MI_UINT32, &flags);
    let dims_raw: Vec<u8> = dims
        .iter()
        .flat_map(|d| (*d as i32).to_le_bytes())
        .collect();
    push_element(&mut sub, MI_INT32, &dims_raw);
    push_element(&mut sub, MI_INT8, name.as_bytes());
    sub.extend_from_slice(body);

    let mut element = Vec::with_capacity(sub.len() + 8);
    element.extend_from_slice(&MI_MATRIX.to_le_bytes());
    element.extend_from_slice(&(sub.len() as u32).to_le_bytes());
    element.extend_from_slice(&sub);
    element
}

fn double_body(matrix: &Matrix) -> Vec<u8> {
    let raw: Vec<u8> = matrix.data.iter().flat_map(|v| v.to_le_bytes()).collect();
    let mut body = Vec::new();
    push_element(&mut body, MI_DOUBLE, &raw);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_packed_elements_and_uint8_storage() {
        // 1x2 double array "v" = [3, 7]; MATLAB stores integral doubles as uint8 and
        // packs the name and the two data bytes into small-element tags.
        let mut sub = Vec::new();
        let mut flags = Vec::new();
        flags.extend_from_slice(&(MX_DOUBLE as u32).to_le_bytes());
        flags.extend_from_slice(&0u32.to_le_bytes());
        push_element(&mut sub, MI_UINT32, &flags);
        push_element(&mut sub, MI_INT32, &[1, 0, 0, 0, 2, 0, 0, 0]);
        sub.extend_from_slice(&((1u32 << 16) | MI_INT8).to_le_bytes());
        sub.extend_from_slice(&[b'v', 0, 0, 0]);
        sub.extend_from_slice(&((2u32 << 16) | MI_UINT8).to_le_bytes());
        sub.extend_from_slice(&[3, 7, 0, 0]);

        let mut bytes = header_bytes();
        bytes.extend_from_slice(&MI_MATRIX.to_le_bytes());
        bytes.extend_from_slice(&(sub.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&sub);

        let file = MatFile::from_bytes(&bytes).unwrap();
        match file.get("v").unwrap() {
            MatValue::Numeric(m) => {
                assert_eq!((m.rows, m.cols), (1, 2));
                assert_eq!(m.data, vec![3.0, 7.0]);
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn rejects_short_and_unknown_headers() {
        assert!(matches!(
            MatFile::from_bytes(&[0u8; 10]),
            Err(MatError::InvalidHeader(_))
        ));
        let mut bytes = header_bytes();
        bytes[126] = b'X';
        assert!(matches!(
            MatFile::from_bytes(&bytes),
            Err(MatError::InvalidHeader(_))
        ));
    }

    #[test]
    fn corrupt_cell_dims_are_errors() {
        let huge = i32::MAX as usize;
        let mut bytes = header_bytes();
        bytes.extend(matrix_element("boxes", MX_CELL, &[huge, huge, huge], &[]));
        assert!(matches!(
            MatFile::from_bytes(&bytes),
            Err(MatError::Malformed { ref name, .. }) if name == "boxes"
        ));

        // A count that fits in usize but not in the buffer runs out of data.
        let mut bytes = header_bytes();
        bytes.extend(matrix_element("boxes", MX_CELL, &[1, huge], &[]));
        assert!(matches!(
            MatFile::from_bytes(&bytes),
            Err(MatError::Truncated { .. })
        ));
    }

    #[test]
    fn matrix_from_rows_is_column_major() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert_eq!(m.data, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
        assert_eq!(m.row(1), vec![3.0, 4.0]);
    }
}

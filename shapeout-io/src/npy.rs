//! Minimal NumPy `.npy` (format 1.0) codec for the manual-filter arrays.
//!
//! Only one-dimensional C-order arrays of `|b1` (booleans) and little-endian
//! integers are supported.

use crate::{Error, Result};
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

fn encode(descr: &str, len: usize, data: &[u8]) -> Vec<u8> {
    let mut header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': ({len},), }}");
    // magic + version + header length + header + '\n' is a multiple of 64
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    let header_len = u16::try_from(header.len()).unwrap_or(u16::MAX);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

/// Writes a boolean vector.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_bool(path: &Path, values: &[bool]) -> Result<()> {
    let data: Vec<u8> = values.iter().map(|v| u8::from(*v)).collect();
    std::fs::write(path, encode("|b1", values.len(), &data))?;
    Ok(())
}

/// Writes indices as `<i8` (64-bit) integers.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_indices(path: &Path, values: &[usize]) -> Result<()> {
    let data: Vec<u8> = values
        .iter()
        .flat_map(|v| i64::try_from(*v).unwrap_or(i64::MAX).to_le_bytes())
        .collect();
    std::fs::write(path, encode("<i8", values.len(), &data))?;
    Ok(())
}

struct Header<'a> {
    descr: String,
    len: usize,
    data: &'a [u8],
}

fn decode(bytes: &[u8]) -> Result<Header<'_>> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(Error::InvalidFormat("not a .npy file".to_string()));
    }
    let (header_len, start): (usize, usize) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 if bytes.len() >= 12 => {
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (usize::try_from(len).unwrap_or(usize::MAX), 12)
        }
        v => return Err(Error::InvalidFormat(format!("unsupported .npy version {v}"))),
    };
    let end = start
        .checked_add(header_len)
        .ok_or_else(|| Error::InvalidFormat("truncated .npy header".to_string()))?;
    let header = bytes
        .get(start..end)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| Error::InvalidFormat("truncated .npy header".to_string()))?;

    if dict_value(header, "fortran_order").is_some_and(|v| v.starts_with("True")) {
        return Err(Error::InvalidFormat("Fortran-ordered arrays are not supported".to_string()));
    }
    let descr = dict_value(header, "descr")
        .and_then(|v| v.split('\'').nth(1))
        .ok_or_else(|| Error::InvalidFormat("missing descr".to_string()))?
        .to_string();
    let shape = dict_value(header, "shape")
        .and_then(|v| v.strip_prefix('('))
        .and_then(|v| v.split(')').next())
        .ok_or_else(|| Error::InvalidFormat("missing shape".to_string()))?;
    let dims: Vec<&str> = shape.split(',').map(str::trim).filter(|d| !d.is_empty()).collect();
    let len = match dims.as_slice() {
        [n] => n
            .parse()
            .map_err(|_| Error::InvalidFormat(format!("bad shape ({shape})")))?,
        _ => return Err(Error::InvalidFormat(format!("expected 1-D array, got ({shape})"))),
    };
    Ok(Header {
        descr,
        len,
        data: &bytes[end..],
    })
}

fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let pos = header.find(&pattern)?;
    Some(header[pos + pattern.len()..].trim_start())
}

/// Reads a boolean vector.
///
/// # Errors
/// Returns `InvalidFormat` for anything but a 1-D `|b1` array.
pub fn read_bool(path: &Path) -> Result<Vec<bool>> {
    let bytes = std::fs::read(path)?;
    let header = decode(&bytes)?;
    if header.descr != "|b1" {
        return Err(Error::InvalidFormat(format!("expected |b1, got {}", header.descr)));
    }
    let data = header
        .data
        .get(..header.len)
        .ok_or_else(|| Error::InvalidFormat("truncated .npy data".to_string()))?;
    Ok(data.iter().map(|b| *b != 0).collect())
}

/// Reads non-negative indices stored as little-endian integers.
///
/// # Errors
/// Returns `InvalidFormat` for unsupported dtypes or negative values.
pub fn read_indices(path: &Path) -> Result<Vec<usize>> {
    let bytes = std::fs::read(path)?;
    let header = decode(&bytes)?;
    let width = match header.descr.as_str() {
        "<i8" | "<u8" => 8,
        "<i4" | "<u4" => 4,
        other => return Err(Error::InvalidFormat(format!("unsupported index dtype {other}"))),
    };
    let data = header
        .len
        .checked_mul(width)
        .and_then(|n| header.data.get(..n))
        .ok_or_else(|| Error::InvalidFormat("truncated .npy data".to_string()))?;
    data.chunks_exact(width)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf[..width].copy_from_slice(chunk);
            let value = if header.descr.starts_with("<i") && width == 4 {
                i64::from(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
            } else {
                i64::from_le_bytes(buf)
            };
            usize::try_from(value)
                .map_err(|_| Error::InvalidFormat(format!("negative index {value}")))
        })
        .collect()
}

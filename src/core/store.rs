//! Named-array persistence.
//!
//! The network only talks to the `ArrayStore` trait. `MemoryStore` is the
//! stock implementation and carries its own chunked, lz4-compressed file
//! format.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;

pub const MAGIC: &[u8; 8] = b"GCALARR1";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

const TAG_I32: [u8; 4] = *b"I32A";
const TAG_F64: [u8; 4] = *b"F64A";

/// Abstract key/array store.
pub trait ArrayStore {
    fn put_i32s(&mut self, key: &str, values: &[i32]);
    fn put_f64s(&mut self, key: &str, values: &[f64]);
    fn get_i32s(&self, key: &str) -> Result<&[i32], PersistenceError>;
    fn get_f64s(&self, key: &str) -> Result<&[f64], PersistenceError>;
    fn keys(&self) -> Vec<&str>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoredArray {
    I32(Vec<i32>),
    F64(Vec<f64>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    arrays: BTreeMap<String, StoredArray>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn remove(&mut self, key: &str) -> Option<StoredArray> {
        self.arrays.remove(key)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        write_u32_le(w, VERSION_CURRENT)?;
        for (name, arr) in &self.arrays {
            let mut payload = Vec::new();
            write_string(&mut payload, name)?;
            let tag = match arr {
                StoredArray::I32(v) => {
                    write_u32_le(&mut payload, len_u32(v.len())?)?;
                    for &x in v {
                        payload.extend_from_slice(&x.to_le_bytes());
                    }
                    TAG_I32
                }
                StoredArray::F64(v) => {
                    write_u32_le(&mut payload, len_u32(v.len())?)?;
                    for &x in v {
                        payload.extend_from_slice(&x.to_le_bytes());
                    }
                    TAG_F64
                }
            };
            write_chunk_lz4(w, tag, &payload)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, PersistenceError> {
        let magic = read_exact::<8, _>(r)?;
        if &magic != MAGIC {
            return Err(PersistenceError::Corrupt("bad magic"));
        }
        let version = read_u32_le(r)?;
        if version != VERSION_V1 {
            return Err(PersistenceError::Corrupt("unsupported version"));
        }

        let mut arrays = BTreeMap::new();
        loop {
            let (tag, len) = match read_chunk_header(r) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let mut take = r.by_ref().take(len as u64);
            let payload = read_lz4_payload(&mut take, len)?;
            let mut p = payload.as_slice();
            let name = read_string(&mut p)?;
            let n = read_u32_le(&mut p)? as usize;
            let width = match tag {
                TAG_I32 => 4,
                TAG_F64 => 8,
                _ => 0,
            };
            if n.checked_mul(width).map_or(true, |bytes| bytes > p.len()) {
                return Err(PersistenceError::Corrupt("array count exceeds chunk payload"));
            }
            let arr = match tag {
                TAG_I32 => {
                    let mut v = Vec::with_capacity(n);
                    for _ in 0..n {
                        v.push(i32::from_le_bytes(read_exact::<4, _>(&mut p)?));
                    }
                    StoredArray::I32(v)
                }
                TAG_F64 => {
                    let mut v = Vec::with_capacity(n);
                    for _ in 0..n {
                        v.push(f64::from_le_bytes(read_exact::<8, _>(&mut p)?));
                    }
                    StoredArray::F64(v)
                }
                _ => {
                    // Unknown chunk: skip.
                    continue;
                }
            };
            arrays.insert(name, arr);
        }
        Ok(Self { arrays })
    }

    /// Write to `<path>.tmp`, then rename over `path`, so a failed save never
    /// leaves a truncated file in place.
    pub fn save_to_path(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = tmp_path(path);
        let result = (|| -> io::Result<()> {
            let mut w = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut w)?;
            let file = w.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(Into::into)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, PersistenceError> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}

impl ArrayStore for MemoryStore {
    fn put_i32s(&mut self, key: &str, values: &[i32]) {
        self.arrays
            .insert(key.to_string(), StoredArray::I32(values.to_vec()));
    }

    fn put_f64s(&mut self, key: &str, values: &[f64]) {
        self.arrays
            .insert(key.to_string(), StoredArray::F64(values.to_vec()));
    }

    fn get_i32s(&self, key: &str) -> Result<&[i32], PersistenceError> {
        match self.arrays.get(key) {
            Some(StoredArray::I32(v)) => Ok(v),
            Some(_) => Err(PersistenceError::KindMismatch {
                key: key.to_string(),
                expected: "i32",
            }),
            None => Err(PersistenceError::MissingKey(key.to_string())),
        }
    }

    fn get_f64s(&self, key: &str) -> Result<&[f64], PersistenceError> {
        match self.arrays.get(key) {
            Some(StoredArray::F64(v)) => Ok(v),
            Some(_) => Err(PersistenceError::KindMismatch {
                key: key.to_string(),
                expected: "f64",
            }),
            None => Err(PersistenceError::MissingKey(key.to_string())),
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.arrays.keys().map(|k| k.as_str()).collect()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

fn len_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "array too large"))
}

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Strict format: raw LZ4 block with external expected size.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_u32_le(w, len_u32(s.len())?)?;
    w.write_all(s.as_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let n = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 string"))
}

/// Write an lz4 chunk.
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let total_len = 4u32.saturating_add(len_u32(compressed.len())?);
    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, len_u32(payload.len())?)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

fn read_lz4_payload<R: Read>(r: &mut R, len: u32) -> Result<Vec<u8>, PersistenceError> {
    if len < 4 {
        return Err(PersistenceError::Corrupt("chunk shorter than its header"));
    }
    let uncompressed_len = read_u32_le(r)? as usize;
    let mut compressed = vec![0u8; (len - 4) as usize];
    r.read_exact(&mut compressed).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PersistenceError::Corrupt("truncated chunk")
        } else {
            e.into()
        }
    })?;
    // lz4 block expansion is bounded by 255:1
    if uncompressed_len > compressed.len().saturating_mul(255).saturating_add(16) {
        return Err(PersistenceError::Corrupt("implausible uncompressed length"));
    }
    Ok(decompress_lz4(&compressed, uncompressed_len)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryStore {
        let mut s = MemoryStore::new();
        s.put_i32s("time", &[42]);
        s.put_f64s("proj_0", &[0.25, 0.5, 1.0e-300, -3.5]);
        s.put_f64s("empty", &[]);
        s
    }

    #[test]
    fn typed_access() {
        let s = sample();
        assert_eq!(s.get_i32s("time").unwrap(), &[42]);
        assert!(matches!(
            s.get_f64s("time"),
            Err(PersistenceError::KindMismatch { .. })
        ));
        assert!(matches!(
            s.get_f64s("proj_9"),
            Err(PersistenceError::MissingKey(_))
        ));
        assert_eq!(s.keys(), vec!["empty", "proj_0", "time"]);
    }

    #[test]
    fn file_roundtrip_is_exact() {
        let s = sample();
        let mut bytes = Vec::new();
        s.write_to(&mut bytes).unwrap();
        let loaded = MemoryStore::read_from(&mut std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(loaded, s);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let bad = b"NOTGCAL!\x01\x00\x00\x00".to_vec();
        assert!(matches!(
            MemoryStore::read_from(&mut std::io::Cursor::new(bad)),
            Err(PersistenceError::Corrupt(_))
        ));

        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(MemoryStore::read_from(&mut std::io::Cursor::new(bytes)).is_err());
    }

    fn raw_chunk(tag: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        write_u32_le(&mut bytes, VERSION_CURRENT).unwrap();
        write_chunk_lz4(&mut bytes, tag, payload).unwrap();
        bytes
    }

    #[test]
    fn rejects_count_larger_than_payload() {
        let mut payload = Vec::new();
        write_string(&mut payload, "proj_0").unwrap();
        write_u32_le(&mut payload, u32::MAX).unwrap();
        payload.extend_from_slice(&1.0f64.to_le_bytes());
        let bytes = raw_chunk(TAG_F64, &payload);
        assert!(matches!(
            MemoryStore::read_from(&mut std::io::Cursor::new(bytes)),
            Err(PersistenceError::Corrupt(_))
        ));

        let mut payload = Vec::new();
        write_string(&mut payload, "time").unwrap();
        write_u32_le(&mut payload, 3).unwrap();
        payload.extend_from_slice(&7i32.to_le_bytes());
        let bytes = raw_chunk(TAG_I32, &payload);
        assert!(matches!(
            MemoryStore::read_from(&mut std::io::Cursor::new(bytes)),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn rejects_implausible_uncompressed_length() {
        let mut bytes = MAGIC.to_vec();
        write_u32_le(&mut bytes, VERSION_CURRENT).unwrap();
        bytes.extend_from_slice(&TAG_F64);
        write_u32_le(&mut bytes, 4 + 2).unwrap();
        write_u32_le(&mut bytes, u32::MAX).unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            MemoryStore::read_from(&mut std::io::Cursor::new(bytes)),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn path_save_is_atomic_rename() {
        let dir = std::env::temp_dir().join(format!("gcal_store_{}", std::process::id()));
        let path = dir.join("weights_1.gcal");
        let s = sample();
        s.save_to_path(&path).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
        assert_eq!(MemoryStore::load_from_path(&path).unwrap(), s);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("gcal_store_does_not_exist.gcal");
        assert!(matches!(
            MemoryStore::load_from_path(&path),
            Err(PersistenceError::Io(_))
        ));
    }
}

//! Persistent per-path served-count (C2). Durable across restarts via an
//! embedded log-structured store -- `sled` is the Rust analogue of the Go
//! source's `bitcask` store (`original_source/path/state.go`); both are
//! embedded, append-only KV engines. Values are unsigned varints, matching
//! spec §4.2's wire protocol (`put(uri, varint)`).

use std::path::Path;

use crate::error::EvalError;

/// Abstraction over the durable counter store so the evaluator and tests
/// don't depend on `sled` directly.
pub trait HitStore: Send + Sync {
    fn get(&self, uri: &str) -> Result<u64, EvalError>;
    fn increment(&self, uri: &str) -> Result<u64, EvalError>;
    fn reset(&self, uri: &str) -> Result<(), EvalError>;
}

pub struct HitCounter {
    store: Box<dyn HitStore>,
}

impl HitCounter {
    pub fn new(store: Box<dyn HitStore>) -> Self {
        HitCounter { store }
    }

    pub fn open_sled(db_path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        Ok(HitCounter::new(Box::new(SledHitStore::open(db_path)?)))
    }

    /// Absent ⇒ 0. On a store read error, callers treat this as a deflect
    /// signal -- the error type itself makes that fail-closed conversion
    /// unavoidable (see `condition::ConditionSet::evaluate`).
    pub fn get(&self, uri: &str) -> Result<u64, EvalError> {
        self.store.get(uri)
    }

    pub fn increment(&self, uri: &str) -> Result<u64, EvalError> {
        self.store.increment(uri)
    }

    pub fn reset(&self, uri: &str) -> Result<(), EvalError> {
        self.store.reset(uri)
    }
}

pub struct SledHitStore {
    db: sled::Db,
}

impl SledHitStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        Ok(SledHitStore {
            db: sled::open(db_path)?,
        })
    }

    fn encode(value: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10);
        let mut v = value;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            buf.push(byte);
            if v == 0 {
                break;
            }
        }
        buf
    }

    fn decode(bytes: &[u8]) -> Option<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        for &byte in bytes {
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Some(result);
            }
            shift += 7;
        }
        None
    }
}

impl HitStore for SledHitStore {
    fn get(&self, uri: &str) -> Result<u64, EvalError> {
        match self.db.get(uri.as_bytes()) {
            Ok(Some(bytes)) => {
                Self::decode(&bytes).ok_or_else(|| EvalError::Store("corrupt varint".into()))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(EvalError::Store(e.to_string())),
        }
    }

    fn increment(&self, uri: &str) -> Result<u64, EvalError> {
        let current = self.get(uri)?;
        let next = current + 1;
        self.db
            .insert(uri.as_bytes(), Self::encode(next))
            .map_err(|e| EvalError::Store(e.to_string()))?;
        Ok(next)
    }

    fn reset(&self, uri: &str) -> Result<(), EvalError> {
        self.db
            .remove(uri.as_bytes())
            .map_err(|e| EvalError::Store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (HitCounter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let counter = HitCounter::open_sled(dir.path().join("hits")).unwrap();
        (counter, dir)
    }

    #[test]
    fn absent_path_reads_zero() {
        let (counter, _dir) = counter();
        assert_eq!(counter.get("/a").unwrap(), 0);
    }

    #[test]
    fn two_increments_raise_count_by_exactly_two() {
        let (counter, _dir) = counter();
        counter.increment("/a").unwrap();
        counter.increment("/a").unwrap();
        assert_eq!(counter.get("/a").unwrap(), 2);
    }

    #[test]
    fn reset_then_get_is_zero() {
        let (counter, _dir) = counter();
        counter.increment("/a").unwrap();
        counter.reset("/a").unwrap();
        assert_eq!(counter.get("/a").unwrap(), 0);
    }

    #[test]
    fn varint_roundtrip() {
        for v in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64] {
            let encoded = SledHitStore::encode(v);
            assert_eq!(SledHitStore::decode(&encoded), Some(v));
        }
    }
}

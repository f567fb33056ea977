//! Persisted meta reader/writer.
//!
//! The lifecycle subsystem persists two values per index in a dedicated
//! column family: the highest applied WAL index and the log id of the last
//! durable snapshot. Key templates live in `shardvec_core::codec`.

use std::sync::Arc;

use shardvec_core::Result;

use crate::kv::{RawEngine, CF_STORE_META};

/// Read side of the persisted meta store.
#[derive(Clone)]
pub struct MetaReader {
    engine: Arc<dyn RawEngine>,
}

impl MetaReader {
    /// Wrap an engine.
    pub fn new(engine: Arc<dyn RawEngine>) -> Self {
        MetaReader { engine }
    }

    /// Fetch a meta value, `None` when the key was never written.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.engine.get(CF_STORE_META, key.as_bytes())
    }
}

/// Write side of the persisted meta store.
#[derive(Clone)]
pub struct MetaWriter {
    engine: Arc<dyn RawEngine>,
}

impl MetaWriter {
    /// Wrap an engine.
    pub fn new(engine: Arc<dyn RawEngine>) -> Self {
        MetaWriter { engine }
    }

    /// Insert or replace a meta value.
    pub fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.engine.put(CF_STORE_META, key.as_bytes().to_vec(), value)
    }

    /// Remove a meta key.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.engine.delete(CF_STORE_META, key.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemEngine;
    use shardvec_core::codec::{apply_log_id_meta_key, decode_apply_log_id, encode_apply_log_id};

    #[test]
    fn test_meta_roundtrip() {
        let engine: Arc<dyn RawEngine> = Arc::new(MemEngine::new());
        let writer = MetaWriter::new(Arc::clone(&engine));
        let reader = MetaReader::new(engine);

        let key = apply_log_id_meta_key(42);
        assert_eq!(reader.get(&key).unwrap(), None);

        writer.put(&key, encode_apply_log_id(1234)).unwrap();
        let value = reader.get(&key).unwrap().unwrap();
        assert_eq!(decode_apply_log_id(&value).unwrap(), 1234);

        writer.delete(&key).unwrap();
        assert_eq!(reader.get(&key).unwrap(), None);
    }
}

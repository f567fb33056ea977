//! Key and value codecs.
//!
//! ## Key layout
//!
//! Region range keys are raw 16-byte `(partition_id, vector_id)` keys, both
//! big-endian so lexicographic order equals numeric order:
//!
//! ```text
//! [partition_id: u64 BE][vector_id: u64 BE]
//! ```
//!
//! The storage engine keeps three parallel keyspaces per partition. A stored
//! key is a raw key with a one-byte keyspace prefix:
//!
//! ```text
//! [prefix: u8][partition_id: u64 BE][vector_id: u64 BE]
//!   prefix = b'd' (vector data) | b's' (scalar data) | b't' (table data)
//! ```
//!
//! `decode_vector_id` extracts the trailing 8 bytes of any such key, so it
//! works on raw range keys and on prefixed stored keys alike.
//!
//! Persisted meta values (`vector_index_apply_log_id_<id>` and
//! `vector_index_snapshot_log_id_<id>`) are little-endian `u64`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::types::VectorId;

/// Keyspace prefix for vector values.
pub const VECTOR_DATA_PREFIX: u8 = b'd';
/// Keyspace prefix for scalar side-data.
pub const VECTOR_SCALAR_PREFIX: u8 = b's';
/// Keyspace prefix for table bytes.
pub const VECTOR_TABLE_PREFIX: u8 = b't';

/// Meta key prefix for the highest applied WAL index.
pub const APPLY_LOG_ID_META_PREFIX: &str = "vector_index_apply_log_id";
/// Meta key prefix for the log id of the last durable snapshot.
pub const SNAPSHOT_LOG_ID_META_PREFIX: &str = "vector_index_snapshot_log_id";

/// Encode a raw `(partition_id, vector_id)` range key.
pub fn encode_raw_key(partition_id: u64, vector_id: VectorId) -> Vec<u8> {
    let mut key = vec![0u8; 16];
    BigEndian::write_u64(&mut key[0..8], partition_id);
    BigEndian::write_u64(&mut key[8..16], vector_id);
    key
}

fn encode_prefixed_key(prefix: u8, partition_id: u64, vector_id: VectorId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(prefix);
    key.extend_from_slice(&encode_raw_key(partition_id, vector_id));
    key
}

/// Stored key for the vector-data keyspace.
pub fn encode_vector_data_key(partition_id: u64, vector_id: VectorId) -> Vec<u8> {
    encode_prefixed_key(VECTOR_DATA_PREFIX, partition_id, vector_id)
}

/// Stored key for the scalar keyspace.
pub fn encode_vector_scalar_key(partition_id: u64, vector_id: VectorId) -> Vec<u8> {
    encode_prefixed_key(VECTOR_SCALAR_PREFIX, partition_id, vector_id)
}

/// Stored key for the table keyspace.
pub fn encode_vector_table_key(partition_id: u64, vector_id: VectorId) -> Vec<u8> {
    encode_prefixed_key(VECTOR_TABLE_PREFIX, partition_id, vector_id)
}

fn fill_prefix(prefix: u8, raw_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(raw_key.len() + 1);
    key.push(prefix);
    key.extend_from_slice(raw_key);
    key
}

/// Map a raw range key into the vector-data keyspace.
pub fn fill_vector_data_prefix(raw_key: &[u8]) -> Vec<u8> {
    fill_prefix(VECTOR_DATA_PREFIX, raw_key)
}

/// Map a raw range key into the scalar keyspace.
pub fn fill_vector_scalar_prefix(raw_key: &[u8]) -> Vec<u8> {
    fill_prefix(VECTOR_SCALAR_PREFIX, raw_key)
}

/// Map a raw range key into the table keyspace.
pub fn fill_vector_table_prefix(raw_key: &[u8]) -> Vec<u8> {
    fill_prefix(VECTOR_TABLE_PREFIX, raw_key)
}

/// Extract the vector id from the trailing 8 bytes of a key.
///
/// Returns 0 for keys shorter than 8 bytes; callers treat id 0 as the
/// reserved sentinel.
pub fn decode_vector_id(key: &[u8]) -> VectorId {
    if key.len() < 8 {
        return 0;
    }
    BigEndian::read_u64(&key[key.len() - 8..])
}

/// Meta key for an index's highest applied WAL index.
pub fn apply_log_id_meta_key(vector_index_id: u64) -> String {
    format!("{}_{}", APPLY_LOG_ID_META_PREFIX, vector_index_id)
}

/// Meta key for an index's last snapshot log id.
pub fn snapshot_log_id_meta_key(vector_index_id: u64) -> String {
    format!("{}_{}", SNAPSHOT_LOG_ID_META_PREFIX, vector_index_id)
}

/// Encode a log id for the persisted meta store.
pub fn encode_apply_log_id(log_id: u64) -> Vec<u8> {
    let mut value = vec![0u8; 8];
    LittleEndian::write_u64(&mut value, log_id);
    value
}

/// Decode a log id from the persisted meta store. An empty value decodes to
/// 0 (the key was written before the first apply); any other malformed
/// length is a hard error.
pub fn decode_apply_log_id(value: &[u8]) -> Result<u64> {
    if value.is_empty() {
        return Ok(0);
    }
    if value.len() != 8 {
        return Err(Error::internal(format!(
            "bad apply log id encoding, len {}",
            value.len()
        )));
    }
    Ok(LittleEndian::read_u64(value))
}

/// Snapshot directory name for a log id: `snapshot_<020-digit log id>`.
pub fn snapshot_dir_name(snapshot_log_id: u64) -> String {
    format!("snapshot_{:020}", snapshot_log_id)
}

/// Parse a snapshot directory name back into its log id.
pub fn parse_snapshot_dir_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("snapshot_")?;
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// In-flight snapshot directory name, keyed by a creation timestamp.
pub fn tmp_snapshot_dir_name(unix_nanos: u128) -> String {
    format!("tmp_{}", unix_nanos)
}

/// True for directory names that denote in-flight snapshot writes.
pub fn is_tmp_snapshot_dir_name(name: &str) -> bool {
    name.starts_with("tmp_")
}

/// Kernel snapshot file name inside a snapshot directory.
pub fn index_data_file_name(vector_index_id: u64, snapshot_log_id: u64) -> String {
    format!("index_{}_{}.idx", vector_index_id, snapshot_log_id)
}

/// Name of the meta file inside a snapshot directory.
pub const SNAPSHOT_META_FILE_NAME: &str = "meta";

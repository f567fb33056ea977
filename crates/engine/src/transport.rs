//! Snapshot transport: wire messages, file-reader service and the RPC seam.
//!
//! Snapshots move between peers as plain files. The sender registers a
//! reader against a snapshot directory and advertises
//! `remote://<host>:<port>/<reader_id>`; the receiver pulls each listed file
//! in fixed-size chunks until `eof`. The RPC channel itself is an external
//! collaborator behind [`NodeClient`]; [`InProcessNodeClient`] wires nodes
//! of one process together for tests and tooling.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use shardvec_core::{Error, Result};

use crate::snapshot::SnapshotMeta;
use crate::snapshot_manager::VectorIndexSnapshotManager;

/// Identity of a snapshot offered over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndexSnapshotMeta {
    /// Index the snapshot belongs to
    pub vector_index_id: u64,
    /// WAL index the snapshot covers
    pub snapshot_log_index: u64,
    /// Files to transfer, relative to the snapshot directory
    pub filenames: Vec<String>,
}

/// Push a snapshot into a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallVectorIndexSnapshotRequest {
    /// Where to fetch the files: `remote://host:port/reader_id`
    pub uri: String,
    /// What is being offered
    pub meta: VectorIndexSnapshotMeta,
}

/// Ask a peer for its latest snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVectorIndexSnapshotRequest {
    /// Index of interest
    pub vector_index_id: u64,
}

/// A peer's latest snapshot offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVectorIndexSnapshotResponse {
    /// Where to fetch the files
    pub uri: String,
    /// What is offered
    pub meta: VectorIndexSnapshotMeta,
}

/// Fetch one chunk of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileRequest {
    /// Reader registered by the sender
    pub reader_id: u64,
    /// File inside the snapshot directory
    pub filename: String,
    /// Byte offset to read from
    pub offset: u64,
    /// Max bytes to return
    pub size: u64,
}

/// One chunk of file data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileResponse {
    /// The bytes read
    pub data: Vec<u8>,
    /// How many bytes were read
    pub read_size: u64,
    /// True when the file is exhausted
    pub eof: bool,
}

/// Release a reader after transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanFileReaderRequest {
    /// Reader to release
    pub reader_id: u64,
}

/// Build a `remote://host:port/reader_id` uri.
pub fn build_remote_uri(server_addr: &str, reader_id: u64) -> String {
    format!("remote://{}/{}", server_addr, reader_id)
}

/// Split a `remote://host:port/reader_id` uri into address and reader id.
pub fn parse_remote_uri(uri: &str) -> Result<(String, u64)> {
    let rest = uri
        .strip_prefix("remote://")
        .ok_or_else(|| Error::internal(format!("bad snapshot uri {}", uri)))?;
    let (addr, reader) = rest
        .split_once('/')
        .ok_or_else(|| Error::internal(format!("bad snapshot uri {}", uri)))?;
    let reader_id: u64 = reader
        .parse()
        .map_err(|_| Error::internal(format!("bad reader id in uri {}", uri)))?;
    if addr.is_empty() || reader_id == 0 {
        return Err(Error::internal(format!("bad snapshot uri {}", uri)));
    }
    Ok((addr.to_string(), reader_id))
}

/// Chunked reader over one snapshot directory.
///
/// Holds an `Arc` to the snapshot, so the directory outlives retention while
/// a transfer is in flight.
pub struct SnapshotFileReader {
    snapshot: Arc<SnapshotMeta>,
}

impl SnapshotFileReader {
    /// Reader over `snapshot`'s directory.
    pub fn new(snapshot: Arc<SnapshotMeta>) -> Self {
        SnapshotFileReader { snapshot }
    }

    /// The snapshot being served.
    pub fn snapshot(&self) -> &Arc<SnapshotMeta> {
        &self.snapshot
    }

    /// Read up to `size` bytes of `filename` at `offset`.
    pub fn read_chunk(&self, filename: &str, offset: u64, size: u64) -> Result<GetFileResponse> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(Error::illegal_parameters(format!(
                "bad snapshot file name {}",
                filename
            )));
        }
        let path = self.snapshot.path().join(filename);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(offset))?;

        let to_read = size.min(file_len.saturating_sub(offset));
        let mut data = vec![0u8; to_read as usize];
        file.read_exact(&mut data)?;

        let read_size = data.len() as u64;
        Ok(GetFileResponse {
            data,
            read_size,
            eof: offset + read_size >= file_len,
        })
    }
}

/// Registry of live file readers, keyed by reader id.
#[derive(Default)]
pub struct FileReaderManager {
    readers: DashMap<u64, Arc<SnapshotFileReader>>,
    next_reader_id: AtomicU64,
}

impl FileReaderManager {
    /// Empty registry.
    pub fn new() -> Self {
        FileReaderManager {
            readers: DashMap::new(),
            next_reader_id: AtomicU64::new(1),
        }
    }

    /// Register a reader, returning its id.
    pub fn add_reader(&self, reader: SnapshotFileReader) -> u64 {
        let reader_id = self.next_reader_id.fetch_add(1, Ordering::AcqRel);
        self.readers.insert(reader_id, Arc::new(reader));
        reader_id
    }

    /// Look up a reader.
    pub fn reader(&self, reader_id: u64) -> Option<Arc<SnapshotFileReader>> {
        self.readers.get(&reader_id).map(|r| Arc::clone(&r))
    }

    /// Drop a reader registration.
    pub fn delete_reader(&self, reader_id: u64) {
        self.readers.remove(&reader_id);
    }

    /// Number of live readers.
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// True when no readers are registered.
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

/// The RPC seam between nodes.
pub trait NodeClient: Send + Sync {
    /// Offer a snapshot to `peer`.
    fn install_vector_index_snapshot(
        &self,
        peer: &str,
        request: InstallVectorIndexSnapshotRequest,
    ) -> Result<()>;

    /// Ask `peer` for its latest snapshot.
    fn get_vector_index_snapshot(
        &self,
        peer: &str,
        request: GetVectorIndexSnapshotRequest,
    ) -> Result<GetVectorIndexSnapshotResponse>;

    /// Fetch a file chunk from `peer`.
    fn get_file(&self, peer: &str, request: GetFileRequest) -> Result<GetFileResponse>;

    /// Release a reader on `peer`.
    fn clean_file_reader(&self, peer: &str, request: CleanFileReaderRequest) -> Result<()>;
}

/// Routes node calls to snapshot managers living in the same process.
#[derive(Default)]
pub struct InProcessNodeClient {
    nodes: DashMap<String, Arc<VectorIndexSnapshotManager>>,
}

impl InProcessNodeClient {
    /// Empty routing table.
    pub fn new() -> Arc<Self> {
        Arc::new(InProcessNodeClient {
            nodes: DashMap::new(),
        })
    }

    /// Register a node's snapshot manager under its advertised address.
    pub fn register_node(&self, addr: impl Into<String>, manager: Arc<VectorIndexSnapshotManager>) {
        self.nodes.insert(addr.into(), manager);
    }

    fn node(&self, peer: &str) -> Result<Arc<VectorIndexSnapshotManager>> {
        self.nodes
            .get(peer)
            .map(|m| Arc::clone(&m))
            .ok_or_else(|| Error::internal(format!("no node at {}", peer)))
    }
}

impl NodeClient for InProcessNodeClient {
    fn install_vector_index_snapshot(
        &self,
        peer: &str,
        request: InstallVectorIndexSnapshotRequest,
    ) -> Result<()> {
        self.node(peer)?
            .handle_install_snapshot(&request.uri, &request.meta)
    }

    fn get_vector_index_snapshot(
        &self,
        peer: &str,
        request: GetVectorIndexSnapshotRequest,
    ) -> Result<GetVectorIndexSnapshotResponse> {
        self.node(peer)?.handle_pull_snapshot(request.vector_index_id)
    }

    fn get_file(&self, peer: &str, request: GetFileRequest) -> Result<GetFileResponse> {
        self.node(peer)?.handle_get_file(&request)
    }

    fn clean_file_reader(&self, peer: &str, request: CleanFileReaderRequest) -> Result<()> {
        self.node(peer)?.handle_clean_file_reader(&request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardvec_core::codec::snapshot_dir_name;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_uri_roundtrip() {
        let uri = build_remote_uri("10.0.0.1:20001", 42);
        assert_eq!(uri, "remote://10.0.0.1:20001/42");
        let (addr, reader_id) = parse_remote_uri(&uri).unwrap();
        assert_eq!(addr, "10.0.0.1:20001");
        assert_eq!(reader_id, 42);
    }

    #[test]
    fn test_uri_parse_rejects_garbage() {
        assert!(parse_remote_uri("local://x/1").is_err());
        assert!(parse_remote_uri("remote://hostonly").is_err());
        assert!(parse_remote_uri("remote://h:1/abc").is_err());
        assert!(parse_remote_uri("remote://h:1/0").is_err());
    }

    fn snapshot_with_file(root: &TempDir, content: &[u8]) -> Arc<SnapshotMeta> {
        let dir = root.path().join("1").join(snapshot_dir_name(5));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("meta"), content).unwrap();
        SnapshotMeta::new(1, dir).unwrap()
    }

    #[test]
    fn test_chunked_read_until_eof() {
        let root = TempDir::new().unwrap();
        let snapshot = snapshot_with_file(&root, b"0123456789");
        let reader = SnapshotFileReader::new(snapshot);

        let mut assembled = Vec::new();
        let mut offset = 0u64;
        loop {
            let chunk = reader.read_chunk("meta", offset, 4).unwrap();
            assembled.extend_from_slice(&chunk.data);
            if chunk.eof {
                break;
            }
            offset += chunk.read_size;
        }
        assert_eq!(assembled, b"0123456789");
    }

    #[test]
    fn test_read_chunk_rejects_path_escape() {
        let root = TempDir::new().unwrap();
        let snapshot = snapshot_with_file(&root, b"x");
        let reader = SnapshotFileReader::new(snapshot);
        assert!(reader.read_chunk("../meta", 0, 4).is_err());
        assert!(reader.read_chunk("a/b", 0, 4).is_err());
    }

    #[test]
    fn test_reader_manager_lifecycle() {
        let root = TempDir::new().unwrap();
        let snapshot = snapshot_with_file(&root, b"x");
        let manager = FileReaderManager::new();
        assert!(manager.is_empty());

        let id = manager.add_reader(SnapshotFileReader::new(snapshot));
        assert!(id > 0);
        assert!(manager.reader(id).is_some());
        assert_eq!(manager.len(), 1);

        manager.delete_reader(id);
        assert!(manager.reader(id).is_none());
    }

    #[test]
    fn test_reader_keeps_directory_alive() {
        let root = TempDir::new().unwrap();
        let snapshot = snapshot_with_file(&root, b"x");
        let dir = snapshot.path().to_path_buf();
        let manager = FileReaderManager::new();
        let id = manager.add_reader(SnapshotFileReader::new(Arc::clone(&snapshot)));

        drop(snapshot);
        assert!(dir.exists());
        manager.delete_reader(id);
        assert!(!dir.exists());
    }
}

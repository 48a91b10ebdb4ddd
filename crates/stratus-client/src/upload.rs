//! Chunked, encrypted content upload
//!
//! An upload session moves `Created -> Streaming -> AwaitingCompletion` and is
//! consumed by [`UploadPipeline::finalize`], which either returns the
//! completed [`File`] or a terminal error. Chunks may be transmitted
//! concurrently, but the content hash always follows the read order.

use crate::{
    fanout::cancellable,
    object::{File, IncompleteFile},
    transport::Transport,
    types::*,
    ClientError, Result,
};
use bytes::Bytes;
use futures::{stream, TryStreamExt};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use stratus_crypto::{
    hash_name,
    symmetric::{encrypt_data, encrypt_with_key},
    IncrementalHasher, KeyHierarchy,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Plaintext bytes per chunk
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Length of upload keys and removal tokens
const TOKEN_LEN: usize = 32;

/// Where an upload session is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    /// No chunk sent yet
    Created,
    /// At least one chunk was read or sent
    Streaming,
    /// Content fully streamed; waiting for a storage assignment or the
    /// completion response
    AwaitingCompletion,
}

/// Running hash over chunks in read order
struct ContentHash {
    hasher: IncrementalHasher,
    chunks: u64,
}

impl ContentHash {
    fn new() -> Self {
        Self {
            hasher: IncrementalHasher::new(),
            chunks: 0,
        }
    }

    fn absorb(&mut self, index: u64, plaintext: &[u8]) -> Result<()> {
        if index < self.chunks {
            // Retry of a chunk that is already part of the hash
            return Ok(());
        }
        if index > self.chunks {
            return Err(ClientError::OutOfOrderChunk {
                index,
                expected: self.chunks,
            });
        }
        self.hasher.update(plaintext);
        self.chunks += 1;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct ChunkProgress {
    /// First location any chunk response supplied
    location: Option<StorageLocation>,
    in_flight: usize,
    succeeded: u64,
}

/// Tracks chunk responses so finalize can wait for a storage location
struct ChunkTracker {
    progress: watch::Sender<ChunkProgress>,
}

impl ChunkTracker {
    fn new() -> Self {
        let (progress, _) = watch::channel(ChunkProgress::default());
        Self { progress }
    }

    fn begin(&self) -> InFlight<'_> {
        self.progress.send_modify(|p| p.in_flight += 1);
        InFlight(self)
    }

    fn record(&self, location: &StorageLocation) {
        self.progress.send_modify(|p| {
            p.succeeded += 1;
            if p.location.is_none() {
                p.location = Some(location.clone());
            }
        });
    }

    fn succeeded(&self) -> u64 {
        self.progress.borrow().succeeded
    }

    async fn wait_for_location(&self, cancel: &CancellationToken) -> Result<StorageLocation> {
        let mut rx = self.progress.subscribe();
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::UploadAborted);
            }
            {
                let progress = rx.borrow_and_update();
                if let Some(location) = &progress.location {
                    return Ok(location.clone());
                }
                if progress.in_flight == 0 {
                    return Err(ClientError::NoChunksUploaded);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::UploadAborted),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::NoChunksUploaded);
                    }
                }
            }
        }
    }
}

/// Decrements the in-flight count even if the request future is dropped
struct InFlight<'a>(&'a ChunkTracker);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.progress.send_modify(|p| p.in_flight -= 1);
    }
}

/// An upload in progress.
///
/// Not persisted; dropping it abandons the upload.
pub struct FileUpload {
    file: IncompleteFile,
    upload_key: String,
    content: ContentHash,
    tracker: ChunkTracker,
    state: UploadState,
}

impl FileUpload {
    /// The file being uploaded
    pub fn file(&self) -> &IncompleteFile {
        &self.file
    }

    /// Token authorizing chunk writes for this session
    pub fn upload_key(&self) -> &str {
        &self.upload_key
    }

    /// Current lifecycle state
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Plaintext bytes hashed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.content.hasher.bytes_processed()
    }

    /// Chunks the server acknowledged
    pub fn chunks_uploaded(&self) -> u64 {
        self.tracker.succeeded()
    }
}

/// Encrypts and uploads file content
#[derive(Clone)]
pub struct UploadPipeline {
    transport: Arc<dyn Transport>,
    hierarchy: Arc<KeyHierarchy>,
    chunk_concurrency: usize,
}

impl UploadPipeline {
    /// Create a pipeline sending at most `chunk_concurrency` chunks at once
    pub fn new(
        transport: Arc<dyn Transport>,
        hierarchy: Arc<KeyHierarchy>,
        chunk_concurrency: usize,
    ) -> Self {
        Self {
            transport,
            hierarchy,
            chunk_concurrency: chunk_concurrency.max(1),
        }
    }

    /// Start a session with a fresh upload key
    pub fn new_upload(&self, file: IncompleteFile) -> FileUpload {
        FileUpload {
            file,
            upload_key: random_token(),
            content: ContentHash::new(),
            tracker: ChunkTracker::new(),
            state: UploadState::Created,
        }
    }

    /// Encrypt and send one chunk.
    ///
    /// First attempts must come in index order so the hash follows the
    /// content; a failed index may be re-sent.
    #[instrument(skip(self, session, plaintext), fields(uuid = %session.file.uuid))]
    pub async fn upload_chunk(
        &self,
        session: &mut FileUpload,
        index: u64,
        plaintext: Bytes,
    ) -> Result<StorageLocation> {
        session.content.absorb(index, &plaintext)?;
        session.state = UploadState::Streaming;
        send_chunk(
            self.transport.as_ref(),
            &session.file,
            &session.upload_key,
            &session.tracker,
            index,
            plaintext,
        )
        .await
    }

    /// Stream `reader` in [`CHUNK_SIZE`] chunks until EOF, returning the bytes read.
    ///
    /// On success the session is [`UploadState::AwaitingCompletion`].
    #[instrument(skip(self, session, reader, cancel), fields(uuid = %session.file.uuid))]
    pub async fn upload<R>(
        &self,
        session: &mut FileUpload,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        session.state = UploadState::Streaming;
        let transport = self.transport.as_ref();
        let FileUpload {
            file,
            upload_key,
            content,
            tracker,
            ..
        } = &mut *session;
        let (file, upload_key, tracker) = (&*file, upload_key.as_str(), &*tracker);

        let start = content.chunks;
        let sends = stream::try_unfold((reader, content, start, false), read_next)
            .map_ok(move |(index, chunk)| send_chunk(transport, file, upload_key, tracker, index, chunk))
            .try_buffer_unordered(self.chunk_concurrency)
            .try_collect::<Vec<StorageLocation>>();

        let locations = cancellable(cancel, sends).await?;
        debug!(chunks = locations.len(), "content streamed");
        session.state = UploadState::AwaitingCompletion;
        Ok(session.content.hasher.bytes_processed())
    }

    /// Complete the upload.
    ///
    /// For non-empty files this waits until a chunk response supplied a storage
    /// location. Cancellation while waiting is [`ClientError::UploadAborted`];
    /// a rejected completion is [`ClientError::UploadFinalizeFailed`]. Both
    /// end the session.
    #[instrument(skip(self, session, cancel), fields(uuid = %session.file.uuid))]
    pub async fn finalize(
        &self,
        session: FileUpload,
        total_size: u64,
        cancel: &CancellationToken,
    ) -> Result<File> {
        debug!(state = ?session.state, total_size, "finalizing");
        let FileUpload {
            file,
            upload_key,
            content,
            tracker,
            ..
        } = session;

        if total_size != content.hasher.bytes_processed() {
            warn!(
                hashed = content.hasher.bytes_processed(),
                total_size, "declared size differs from hashed content"
            );
        }

        let hash = content.hasher.finalize().to_hex();
        let name = encrypt_with_key(&file.key, &file.name)?;
        let mime = encrypt_with_key(&file.key, &file.mime)?;
        let size = encrypt_with_key(&file.key, &total_size.to_string())?;
        let name_hashed = hash_name(&file.name, self.hierarchy.hmac_key());
        let version = self.hierarchy.auth_version().as_u8();

        if total_size == 0 {
            let completed = file.complete(0, 0, hash, None);
            let done = EmptyUploadDone {
                uuid: completed.uuid,
                name,
                name_hashed,
                size,
                parent: completed.parent,
                mime,
                metadata: self.owner_metadata(&completed)?,
                version,
            };
            cancellable(cancel, self.transport.complete_empty_upload(done))
                .await
                .map_err(finalize_error)?;
            debug!("empty file completed");
            return Ok(completed);
        }

        let location = tracker.wait_for_location(cancel).await?;
        let chunks = total_size.div_ceil(CHUNK_SIZE as u64);
        let completed = file.complete(total_size, chunks, hash, Some(location));

        let done = UploadDone {
            uuid: completed.uuid,
            name,
            name_hashed,
            size,
            chunks,
            mime,
            rm: random_token(),
            metadata: self.owner_metadata(&completed)?,
            version,
            upload_key,
            parent: completed.parent,
        };
        cancellable(cancel, self.transport.complete_upload(done))
            .await
            .map_err(finalize_error)?;

        debug!(chunks, "upload completed");
        Ok(completed)
    }

    /// Run a whole session over `reader`
    pub async fn upload_file<R>(
        &self,
        file: IncompleteFile,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<File>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut session = self.new_upload(file);
        let size = self.upload(&mut session, reader, cancel).await?;
        self.finalize(session, size, cancel).await
    }

    fn owner_metadata(&self, file: &File) -> Result<String> {
        let json = serde_json::to_string(&file.metadata())?;
        Ok(self.hierarchy.encrypt_meta(&json)?)
    }
}

type ReadState<'a, R> = (R, &'a mut ContentHash, u64, bool);

/// Read and hash the next chunk; a short chunk marks EOF
async fn read_next<'a, R>(
    (mut reader, content, index, eof): ReadState<'a, R>,
) -> Result<Option<((u64, Bytes), ReadState<'a, R>)>>
where
    R: AsyncRead + Unpin,
{
    if eof {
        return Ok(None);
    }
    let chunk = read_chunk(&mut reader).await?;
    if chunk.is_empty() {
        return Ok(None);
    }
    content.absorb(index, &chunk)?;
    let eof = chunk.len() < CHUNK_SIZE;
    Ok(Some(((index, chunk), (reader, content, index + 1, eof))))
}

/// Fill up to [`CHUNK_SIZE`] bytes, stopping early only at EOF
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Bytes> {
    let mut buf = Vec::with_capacity(CHUNK_SIZE);
    reader.take(CHUNK_SIZE as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

async fn send_chunk(
    transport: &dyn Transport,
    file: &IncompleteFile,
    upload_key: &str,
    tracker: &ChunkTracker,
    index: u64,
    plaintext: Bytes,
) -> Result<StorageLocation> {
    let data = encrypt_data(&file.key, &plaintext)?;
    let _in_flight = tracker.begin();

    debug!(index, size = plaintext.len(), "uploading chunk");
    let request = ChunkUpload {
        uuid: file.uuid,
        index,
        parent: file.parent,
        upload_key: upload_key.to_string(),
        data: Bytes::from(data),
    };
    match transport.upload_chunk(request).await {
        Ok(location) => {
            tracker.record(&location);
            Ok(location)
        }
        Err(err) => Err(ClientError::ChunkUploadFailed {
            index,
            reason: err.to_string(),
        }),
    }
}

fn finalize_error(err: ClientError) -> ClientError {
    match err {
        ClientError::Cancelled => ClientError::UploadAborted,
        other => ClientError::UploadFinalizeFailed(other.to_string()),
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

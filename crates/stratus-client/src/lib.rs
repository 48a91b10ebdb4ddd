//! # Stratus Client
//!
//! Client engine for the Stratus end-to-end-encrypted drive.
//!
//! ## Features
//!
//! - **Chunked uploads**: content is encrypted per chunk under the file key
//!   and hashed in read order
//! - **Share propagation**: every recipient and public link keeps its own
//!   encrypted copy of an item's metadata
//! - **Search indexing**: keyed substring hashes so the server can match names
//!   it cannot read
//! - **Pluggable transport**: HTTP for production, in-memory for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratus_client::{Config, IncompleteFile, StratusClient};
//! use stratus_crypto::{DataKey, KeyHierarchy, KeyPair};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> stratus_client::Result<()> {
//!     let hierarchy = KeyHierarchy::current(3, DataKey::generate(), KeyPair::generate())?;
//!     let client = StratusClient::new(Config::from_env()?, hierarchy)?;
//!
//!     let parent = uuid::Uuid::new_v4();
//!     let file = IncompleteFile::new(parent, "hello.txt");
//!     let reader = tokio::fs::File::open("hello.txt").await?;
//!     let uploaded = client.upload_file(file, reader, &CancellationToken::new()).await?;
//!     println!("uploaded {} in {} chunks", uploaded.name, uploaded.chunks);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod fanout;
mod http;
pub mod memory;
pub mod object;
pub mod search;
pub mod share;
pub mod transport;
pub mod types;
pub mod upload;

pub use client::StratusClient;
pub use config::Config;
pub use error::{ClientError, Result};
pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use object::{Directory, File, FileSystemObject, IncompleteFile, Root};
pub use search::SearchIndexer;
pub use share::{LinkRecord, SharePropagator};
pub use transport::Transport;
pub use types::*;
pub use upload::{FileUpload, UploadPipeline, UploadState, CHUNK_SIZE};

// Re-export the key types callers need to build a client
pub use stratus_crypto::{EncryptionKey, KeyHierarchy, KeyPair, PublicKey};

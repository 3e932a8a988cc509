//! dlbridge Core - Download Engine
//!
//! This crate provides the transfer side of dlbridge: the engine contract,
//! the chunked HTTP engine, settings providers and the torrent registry the
//! compatibility API is served from.

pub mod engine;
mod error;
pub mod registry;
mod settings;

pub use engine::{
    create_downloader, create_downloader_of_kind, Downloader, HttpDownloader, SimpleDownloader,
    TransferSubscription,
};
pub use error::*;
pub use registry::{MemoryRegistry, TorrentRegistry};
pub use settings::*;

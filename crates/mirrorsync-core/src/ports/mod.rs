//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the engine depends on,
//! but whose implementations live in adapter modules of `mirrorsync-sync`.
//!
//! ## Ports Overview
//!
//! - [`IFileSystem`] - Streamed file operations on both sides of a pair
//! - [`IMetadataStore`] - Persistence of the hash index and sync history
//! - [`IClock`] - Source of timestamps
//! - [`SyncEvent`] - Events published on the engine's broadcast channel

pub mod clock;
pub mod events;
pub mod filesystem;
pub mod metadata_store;

pub use clock::{IClock, SystemClock};
pub use events::SyncEvent;
pub use filesystem::{DirEntry, EntryKind, FileSystemState, IFileSystem, ReadStream, WriteStream};
pub use metadata_store::IMetadataStore;

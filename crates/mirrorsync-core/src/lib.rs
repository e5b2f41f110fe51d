//! MirrorSync Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal core of the incremental sync engine:
//! - **Domain entities** - `FileRecord`, `ChangeSet`, `SyncSession`, `ConflictResolution`, `SyncMetadata`
//! - **Port definitions** - Traits for adapters: `IFileSystem`, `IMetadataStore`, `IClock`
//! - **Events** - The typed `SyncEvent` published by the engine
//! - **Configuration** - YAML-backed `Config` with validation
//!
//! # Architecture
//!
//! The domain module holds pure data and state transitions with no I/O.
//! Ports define the trait interfaces the engine depends on; their
//! implementations live in `mirrorsync-sync`.

pub mod config;
pub mod domain;
pub mod ports;

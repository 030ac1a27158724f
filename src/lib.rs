//! # classpath-loader
//!
//! Resolves classes and resources from an ordered list of directory and
//! archive roots, built for class paths with thousands of entries.
//!
//! ## Architecture
//!
//! - **facade**: `UrlLoader`, class/resource resolution with parent delegation
//! - **classpath**: ordered, lazily realized roots and resource enumeration
//! - **cache**: root index mapping package hashes to candidate loaders
//! - **loader**: per-root strategy trait
//! - **directory**: directory roots, eager scan with persisted index or lazy trie
//! - **archive**: zip archive roots, manifest `Class-Path` expansion
//! - **pool**: bounded pool of open archive handles
//! - **index**: package-hash sets, name filter and the on-disk index format
//! - **bloom**: bloom filter over name fingerprints
//! - **names**: package hashes and class-name/path conversions
//! - **manifest**: `META-INF/MANIFEST.MF` attributes
//! - **resource**: a located resource and its URL
//! - **locks**: per-name lock table
//! - **host**: the host runtime collaborator
//! - **config**: loader options and builder
//! - **error**: error types

pub mod archive;
pub mod bloom;
pub mod cache;
pub mod classpath;
pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod facade;
pub mod host;
pub mod index;
pub mod loader;
pub mod locks;
pub mod manifest;
pub mod names;
pub mod pool;
pub mod resource;

pub use config::{LoaderOptions, UrlLoaderBuilder};
pub use error::{LoaderError, Result};
pub use facade::{LoadedClass, Package, UrlLoader};
pub use host::HostRuntime;
pub use resource::{Resource, ResourceUrl};

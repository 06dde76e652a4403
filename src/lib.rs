//! Lazy, read-only access to remote HDF5-like hierarchies and LINDI reference file systems.
//!
//! Nothing is read until a group, dataset or value is asked for, and every object is
//! fetched at most once no matter how many callers ask for it concurrently.

pub mod backend;
pub mod byte_range;
pub mod config;
pub mod data;
pub mod decoder;
mod error;
pub mod executor;
pub mod fetch;
pub mod hierarchy;
pub mod manifest;
pub mod merged;
pub mod metadata;
pub mod model;
pub mod reference_fs;
pub mod registry;
pub mod remote_file;
pub mod single_flight;
pub mod storage;
pub mod tar;

pub use config::ReaderConfig;
pub use data::{ArrayData, DataType, DatasetValue, Scalar};
pub use error::{Error, Result};
pub use executor::{Canceler, IoExecutor};
pub use hierarchy::HierarchicalFile;
pub use model::{DataRequest, DatasetDescriptor, GroupNode};
pub use registry::{FileRegistry, StorageKind};

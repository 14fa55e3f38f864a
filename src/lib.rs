//! # Vector Table
//!
//! Fixed-dimension `f64` vectors stored in a transactional backing store,
//! partitioned by a small set of centroids.
//!
//! This library provides:
//! - A little-endian binary codec for vectors
//! - Dot product and cosine similarity, by stored id or by literal vector
//! - Centroid assignment on every write and k-means rebalancing on demand
//! - Centroid-pruned top-k similarity search
//! - An in-memory store and a WAL + snapshot file store
//!
//! ## Example
//!
//! ```rust
//! use vector_table::store::MemoryStore;
//! use vector_table::{Vector, VectorTable};
//!
//! let store = MemoryStore::new();
//! let table = VectorTable::new("docs", 3, 2).unwrap();
//! table.initialize(&store).unwrap();
//!
//! let id = table.upsert(&store, &Vector::new(vec![1.0, 2.0, 3.0]), None).unwrap();
//! let dot = table.dot(&store, id, Vector::new(vec![1.0, 1.0, 1.0])).unwrap();
//! assert_eq!(dot, 6.0);
//!
//! let results = table.search(&store, &Vector::new(vec![1.0, 2.0, 3.1]), 5).unwrap();
//! assert_eq!(results[0].id, id);
//! ```

pub mod centroid;
pub mod codec;
pub mod config;
pub mod error;
pub mod persistence;
pub mod schema;
pub mod search;
pub mod server;
pub mod similarity;
pub mod store;
pub mod table;
pub mod upsert;
pub mod vector;

pub use centroid::{Centroid, RebalanceReport};
pub use config::{DeleteMiss, TableConfig};
pub use error::{Result, VectorTableError};
pub use persistence::engine::{EngineConfig, FileStore};
pub use search::SearchResult;
pub use similarity::Operand;
pub use store::{BackingStore, MemoryStore, RowId};
pub use table::{Record, VectorTable};
pub use vector::Vector;

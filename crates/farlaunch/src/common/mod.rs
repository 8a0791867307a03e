pub mod cli;
pub mod config;
pub mod error;
pub mod rpc;
pub mod setup;
pub mod wrapped;

use fxhash::FxBuildHasher;

pub use wrapped::WrappedRcRefCell;

pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;

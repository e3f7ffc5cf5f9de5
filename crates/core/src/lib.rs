//! Chain ids, chainweb graphs, SPV proof codec, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod error;
pub mod graph;
pub mod spv;
pub mod types;

pub use error::{ChainwebError, ChainwebResult};
pub use graph::{distance, Graph};
pub use types::{ChainId, CrossChainMessage, EventLog, Origin};

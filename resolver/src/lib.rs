//! Feature-flag resolution against a remotely fetched dataset.
//!
//! Raw records are normalized into a canonical-key map, held by a small state
//! machine, and resolved on demand into [`FlagDescriptor`]s. Resolution never
//! fails; missing or broken data degrades to relay descriptors carrying the
//! configured default value.

pub mod cache;
pub mod config;
pub mod data;
pub mod descriptor;
pub mod fetch;
pub mod key;
pub mod metrics_defs;
pub mod resolver;
pub mod service;
pub mod state;

pub use config::{ConfigError, FlagConfig};
pub use descriptor::FlagDescriptor;
pub use fetch::{FetchError, FlagSource, source_for_url};
pub use resolver::{Resolved, Resolver};
pub use service::{FlagService, LoadError};
pub use state::{ResolutionError, ResolutionState};

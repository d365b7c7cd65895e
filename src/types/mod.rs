//! Plain data types shared by the resolver, the stream tree and the pipeline.
//!
//! Bound values travel as [Value] (`Arc<dyn Any + Send + Sync>`); the concrete type
//! behind a value always equals the [TypeKey] it is bound under.

use std::any::Any;
use std::sync::Arc;

mod capability;
mod pipeline_state;
mod port;
mod record;
#[cfg(test)]
mod record_test;
mod type_key;
#[cfg(test)]
mod type_key_test;

pub use capability::Capability;
pub use pipeline_state::PipelineState;
pub use port::{Port, PortView};
pub use record::{Field, Record};
pub use type_key::TypeKey;

/// Type-erased bound value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Error type returned by stage and component code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

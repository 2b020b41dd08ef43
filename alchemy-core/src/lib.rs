//! Alchemy Core
//!
//! Value model shared by the Alchemy infrastructure tool: resource attribute
//! values (including secrets and shared, possibly cyclic, output nodes) and
//! the scope chain every deployment lives under.

pub mod resource;
pub mod scope;

pub use resource::{Secret, SharedMap, Value};
pub use scope::{Scope, ScopeError};

//! State structures for persisting resource outputs

use std::collections::BTreeMap;
use std::fmt;

use alchemy_core::{Scope, Value};
use serde::{Deserialize, Serialize};

/// Where a resource is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStatus {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateStatus::Creating => "creating",
            StateStatus::Created => "created",
            StateStatus::Updating => "updating",
            StateStatus::Updated => "updated",
            StateStatus::Deleting => "deleting",
            StateStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Last known good output of one resource plus bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub status: StateStatus,
    /// Resource type (e.g., "azure::StorageAccount")
    pub kind: String,
    /// Logical id of the resource within its scope
    pub id: String,
    /// Fully qualified name (scope path + id)
    pub fqn: String,
    /// Creation order within the scope
    pub seq: u64,
    /// Free-form bookkeeping owned by the resource handler
    pub data: BTreeMap<String, Value>,
    /// Props the resource was last applied with
    pub props: Value,
    /// Props before the last update, kept while a replacement is in flight
    pub old_props: Option<Value>,
    /// Resource output; may contain secrets and shared (cyclic) nodes
    pub output: Value,
    /// Scope the state was read from. Set by stores on read, never persisted.
    pub scope: Option<Scope>,
}

impl State {
    /// Create a new state in `creating` status
    pub fn new(kind: impl Into<String>, id: impl Into<String>, fqn: impl Into<String>) -> Self {
        Self {
            status: StateStatus::Creating,
            kind: kind.into(),
            id: id.into(),
            fqn: fqn.into(),
            seq: 0,
            data: BTreeMap::new(),
            props: Value::Null,
            old_props: None,
            output: Value::Null,
            scope: None,
        }
    }

    pub fn with_status(mut self, status: StateStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_props(mut self, props: impl Into<Value>) -> Self {
        self.props = props.into();
        self
    }

    pub fn with_old_props(mut self, old_props: impl Into<Value>) -> Self {
        self.old_props = Some(old_props.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<Value>) -> Self {
        self.output = output.into();
        self
    }

    /// Set a bookkeeping entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Compare everything except the scope injected on read
    pub fn same_content(&self, other: &State) -> bool {
        self.status == other.status
            && self.kind == other.kind
            && self.id == other.id
            && self.fqn == other.fqn
            && self.seq == other.seq
            && self.data == other.data
            && self.props == other.props
            && self.old_props == other.old_props
            && self.output == other.output
    }
}

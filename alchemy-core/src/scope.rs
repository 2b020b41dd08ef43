//! Scope - The chain of names a deployment lives under

use std::fmt;

use thiserror::Error;

/// Errors raised when building a scope
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Scope chain must contain at least the application name")]
    EmptyChain,

    #[error("Scope name must not be empty")]
    EmptyName,

    #[error("Invalid scope name '{name}': must not contain '{reserved}'")]
    ReservedCharacter { name: String, reserved: char },
}

/// Ordered chain of logical names (app, stage, nested scopes...)
///
/// Scope names never contain `/` (the path separator) or `:` (its encoded
/// form in remote object names), so a scope path always splits back into the
/// same chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    chain: Vec<String>,
}

impl Scope {
    /// Characters a scope name may not contain
    pub const RESERVED: [char; 2] = ['/', ':'];

    /// Create a root scope for an application
    pub fn new(app: impl Into<String>) -> Result<Self, ScopeError> {
        let app = validate_name(app.into())?;
        Ok(Self { chain: vec![app] })
    }

    /// Create a scope from a full chain, e.g. `["app", "prod"]`
    pub fn from_chain<I, S>(chain: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chain = chain
            .into_iter()
            .map(|name| validate_name(name.into()))
            .collect::<Result<Vec<_>, _>>()?;

        if chain.is_empty() {
            return Err(ScopeError::EmptyChain);
        }

        Ok(Self { chain })
    }

    /// Create a nested scope
    pub fn child(&self, name: impl Into<String>) -> Result<Self, ScopeError> {
        let name = validate_name(name.into())?;
        let mut chain = self.chain.clone();
        chain.push(name);
        Ok(Self { chain })
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Application name (first link of the chain)
    pub fn app(&self) -> &str {
        &self.chain[0]
    }

    /// Stage name (second link of the chain), if any
    pub fn stage(&self) -> Option<&str> {
        self.chain.get(1).map(String::as_str)
    }

    /// Name of the innermost scope
    pub fn name(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or_default()
    }

    /// Chain joined by `/`
    pub fn path(&self) -> String {
        self.chain.join("/")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn validate_name(name: String) -> Result<String, ScopeError> {
    if name.is_empty() {
        return Err(ScopeError::EmptyName);
    }
    if let Some(reserved) = name.chars().find(|c| Scope::RESERVED.contains(c)) {
        return Err(ScopeError::ReservedCharacter { name, reserved });
    }
    Ok(name)
}

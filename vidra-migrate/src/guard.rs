//! Gate for destructive administrative operations.

use crate::error::{MigrateError, Result};

/// Environment-scoped switch gating irreversible operations (schema clean).
///
/// Fails closed: unless configuration explicitly allows it, destructive
/// operations are refused regardless of caller privilege. Forward migration
/// never consults this gate - it is a separate authorization axis from the
/// apply path.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    environment: String,
    allow_destructive: bool,
}

impl GuardPolicy {
    pub fn new(environment: impl Into<String>, allow_destructive: bool) -> Self {
        Self {
            environment: environment.into(),
            allow_destructive,
        }
    }

    /// Policy for `environment` with destructive operations disallowed.
    pub fn deny(environment: impl Into<String>) -> Self {
        Self::new(environment, false)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn is_destructive_allowed(&self) -> bool {
        self.allow_destructive
    }

    /// Errors with [`MigrateError::GuardedOperation`] unless configuration
    /// explicitly enabled destructive operations for this environment.
    pub fn ensure_destructive_allowed(&self, operation: &str) -> Result<()> {
        if self.allow_destructive {
            Ok(())
        } else {
            Err(MigrateError::GuardedOperation {
                operation: operation.to_string(),
                environment: self.environment.clone(),
            })
        }
    }
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self::deny("unspecified")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_by_default() {
        let guard = GuardPolicy::default();
        assert!(!guard.is_destructive_allowed());
        assert!(matches!(
            guard.ensure_destructive_allowed("clean"),
            Err(MigrateError::GuardedOperation { operation, .. }) if operation == "clean"
        ));
    }

    #[test]
    fn explicit_opt_in_allows() {
        let guard = GuardPolicy::new("dev", true);
        assert!(guard.ensure_destructive_allowed("clean").is_ok());
    }
}

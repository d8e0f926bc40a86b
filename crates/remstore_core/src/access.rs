//! Access scopes claimed by the application.
//!
//! A scope is a module name such as `contacts`, or `*` for the whole
//! storage. Paths map to modules as follows:
//!
//! | Path | Module |
//! |---|---|
//! | `/a` | `*` |
//! | `/a/...` | `a` |
//! | `/public/a` | `*` |
//! | `/public/a/...` | `a` |

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use remstore_node::ProtocolVersion;

use crate::error::{CoreError, CoreResult};

/// Name of the root scope.
pub const ROOT_SCOPE: &str = "*";

/// Access mode for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read only (`r`).
    Read,
    /// Read and write (`rw`).
    ReadWrite,
}

impl AccessMode {
    /// Returns the mode's wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::ReadWrite => "rw",
        }
    }

    /// Returns true if holding `self` permits an operation needing `wanted`.
    #[must_use]
    pub fn permits(self, wanted: AccessMode) -> bool {
        wanted == AccessMode::Read || self == AccessMode::ReadWrite
    }
}

impl FromStr for AccessMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(AccessMode::Read),
            "rw" => Ok(AccessMode::ReadWrite),
            other => Err(CoreError::InvalidMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct AccessState {
    /// Claimed scopes in claim order.
    scopes: Vec<(String, AccessMode)>,
    root_paths: Vec<String>,
}

impl AccessState {
    fn set(&mut self, scope: &str, mode: AccessMode) {
        let known = self.scopes.iter().any(|(s, _)| s == scope);
        let root_claimed = self.scopes.iter().any(|(s, _)| s == ROOT_SCOPE);
        if root_claimed || scope == ROOT_SCOPE {
            self.root_paths = vec!["/".to_string()];
        } else if !known {
            self.root_paths.push(format!("/{scope}/"));
            self.root_paths.push(format!("/public/{scope}/"));
        }
        match self.scopes.iter_mut().find(|(s, _)| s == scope) {
            Some(entry) => entry.1 = mode,
            None => self.scopes.push((scope.to_string(), mode)),
        }
    }

    fn get(&self, scope: &str) -> Option<AccessMode> {
        self.scopes
            .iter()
            .find(|(s, _)| s == scope)
            .map(|(_, m)| *m)
    }
}

/// Claimed access scopes.
///
/// Internally synchronized so one instance can be shared between the
/// application and the sync engine.
#[derive(Debug, Default)]
pub struct Access {
    state: RwLock<AccessState>,
}

impl Access {
    /// Creates an empty access table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `mode` on `scope`. Same as [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` if the scope is empty or contains `/`.
    pub fn claim(&self, scope: &str, mode: AccessMode) -> CoreResult<()> {
        self.set(scope, mode)
    }

    /// Sets the access mode of a scope and recomputes the root paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` if the scope is empty or contains `/`.
    pub fn set(&self, scope: &str, mode: AccessMode) -> CoreResult<()> {
        if scope.is_empty() || scope.contains('/') {
            return Err(CoreError::InvalidScope {
                scope: scope.to_string(),
            });
        }
        self.state.write().set(scope, mode);
        Ok(())
    }

    /// Returns the mode claimed for `scope`.
    #[must_use]
    pub fn get(&self, scope: &str) -> Option<AccessMode> {
        self.state.read().get(scope)
    }

    /// Drops a scope and rebuilds the root paths from the remaining ones.
    pub fn remove(&self, scope: &str) {
        let mut state = self.state.write();
        let remaining: Vec<_> = state
            .scopes
            .drain(..)
            .filter(|(s, _)| s != scope)
            .collect();
        *state = AccessState::default();
        for (s, m) in remaining {
            state.set(&s, m);
        }
    }

    /// Drops every claimed scope.
    pub fn reset(&self) {
        *self.state.write() = AccessState::default();
    }

    /// Returns true if `scope` was claimed with a mode that permits `mode`.
    #[must_use]
    pub fn check(&self, scope: &str, mode: AccessMode) -> bool {
        self.get(scope).is_some_and(|held| held.permits(mode))
    }

    /// Returns true if the root scope or the path's module permits `mode`.
    ///
    /// Relative paths are never permitted.
    #[must_use]
    pub fn check_path(&self, path: &str, mode: AccessMode) -> bool {
        if self.check(ROOT_SCOPE, mode) {
            return true;
        }
        match Self::module_name(path) {
            Ok(module) => self.check(&module, mode),
            Err(_) => false,
        }
    }

    /// Resolves the module owning `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path does not start with `/`.
    pub fn module_name(path: &str) -> CoreResult<String> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.first() != Some(&"") {
            return Err(CoreError::invalid_argument("path should start with a slash"));
        }
        let pos = if parts.get(1) == Some(&"public") { 2 } else { 1 };
        if parts.len() <= pos + 1 {
            return Ok(ROOT_SCOPE.to_string());
        }
        Ok(parts[pos].to_string())
    }

    /// Returns the claimed scopes in claim order.
    #[must_use]
    pub fn scopes(&self) -> Vec<(String, AccessMode)> {
        self.state.read().scopes.clone()
    }

    /// Returns the root paths implied by the claimed scopes.
    #[must_use]
    pub fn root_paths(&self) -> Vec<String> {
        self.state.read().root_paths.clone()
    }

    /// Builds the space-separated `name:mode` scope parameter for an
    /// authorization request.
    #[must_use]
    pub fn scope_parameter(&self, protocol: ProtocolVersion) -> String {
        self.scopes()
            .iter()
            .map(|(scope, mode)| {
                let name = if scope == ROOT_SCOPE {
                    protocol.root_scope_name()
                } else {
                    scope.as_str()
                };
                format!("{name}:{mode}")
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!("r".parse::<AccessMode>().unwrap(), AccessMode::Read);
        assert_eq!("rw".parse::<AccessMode>().unwrap(), AccessMode::ReadWrite);
        assert!(matches!(
            "w".parse::<AccessMode>(),
            Err(CoreError::InvalidMode { .. })
        ));
    }

    #[test]
    fn rejects_bad_scopes() {
        let access = Access::new();
        assert!(access.set("", AccessMode::Read).is_err());
        assert!(access.set("a/b", AccessMode::Read).is_err());
        assert!(access.scopes().is_empty());
    }

    #[test]
    fn module_names() {
        assert_eq!(Access::module_name("/a").unwrap(), "*");
        assert_eq!(Access::module_name("/a/").unwrap(), "a");
        assert_eq!(Access::module_name("/a/b/c").unwrap(), "a");
        assert_eq!(Access::module_name("/public/a").unwrap(), "*");
        assert_eq!(Access::module_name("/public/a/").unwrap(), "a");
        assert!(Access::module_name("a/").is_err());
    }

    #[test]
    fn check_path_by_module() {
        let access = Access::new();
        access.claim("contacts", AccessMode::Read).unwrap();
        access.claim("notes", AccessMode::ReadWrite).unwrap();

        assert!(access.check_path("/contacts/1", AccessMode::Read));
        assert!(!access.check_path("/contacts/1", AccessMode::ReadWrite));
        assert!(access.check_path("/public/notes/x", AccessMode::ReadWrite));
        assert!(!access.check_path("/other/x", AccessMode::Read));
        assert!(!access.check_path("/toplevel", AccessMode::Read));
    }

    #[test]
    fn root_scope_grants_everything() {
        let access = Access::new();
        access.claim("*", AccessMode::ReadWrite).unwrap();
        assert!(access.check_path("/anything/at/all", AccessMode::ReadWrite));
        assert_eq!(access.root_paths(), vec!["/"]);
    }

    #[test]
    fn root_paths_follow_claims() {
        let access = Access::new();
        access.claim("a", AccessMode::Read).unwrap();
        access.claim("b", AccessMode::Read).unwrap();
        access.claim("a", AccessMode::ReadWrite).unwrap();
        assert_eq!(
            access.root_paths(),
            vec!["/a/", "/public/a/", "/b/", "/public/b/"]
        );

        access.remove("a");
        assert_eq!(access.root_paths(), vec!["/b/", "/public/b/"]);
        assert_eq!(access.get("a"), None);

        access.claim("*", AccessMode::Read).unwrap();
        access.claim("c", AccessMode::Read).unwrap();
        assert_eq!(access.root_paths(), vec!["/"]);

        access.reset();
        assert!(access.root_paths().is_empty());
    }

    #[test]
    fn scope_parameter_per_protocol() {
        let access = Access::new();
        access.claim("*", AccessMode::ReadWrite).unwrap();
        access.claim("notes", AccessMode::Read).unwrap();
        assert_eq!(
            access.scope_parameter(ProtocolVersion::Draft01),
            "root:rw notes:r"
        );
        assert_eq!(access.scope_parameter(ProtocolVersion::Api201204), ":rw notes:r");
        assert_eq!(access.scope_parameter(ProtocolVersion::Draft02), "*:rw notes:r");
    }
}

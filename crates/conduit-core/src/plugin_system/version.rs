use std::fmt;
use std::str::FromStr;

use log::warn;
use semver::{Version, VersionReq};

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;

/// Error type for version parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    ParseError(String),
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::ParseError(msg) => write!(f, "Version parse error: {}", msg),
        }
    }
}

impl std::error::Error for VersionError {}

/// Represents a version requirement range using semver constraints.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0")
    constraint: String,
    req: VersionReq,
}

impl VersionRange {
    /// Creates a new version range from a constraint string.
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let req = VersionReq::parse(constraint).map_err(|e| {
            VersionError::ParseError(format!("Invalid version constraint '{}': {}", constraint, e))
        })?;
        Ok(Self {
            constraint: constraint.to_string(),
            req,
        })
    }

    /// Checks if a specific version satisfies this range.
    pub fn includes(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}

/// Versions the host reports to plugins for compatibility checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVersions {
    pub host_engine: Version,
    pub framework: Version,
}

impl HostVersions {
    pub fn parse(host_engine: &str, framework: &str) -> Result<Self, VersionError> {
        let parse = |v: &str| {
            Version::parse(v).map_err(|e| VersionError::ParseError(format!("'{}': {}", v, e)))
        };
        Ok(Self {
            host_engine: parse(host_engine)?,
            framework: parse(framework)?,
        })
    }

    /// Fails with `Incompatible` when a declared engine range excludes this host.
    ///
    /// Ranges that do not parse are logged and skipped.
    pub fn check(&self, manifest: &PluginManifest) -> Result<(), PluginSystemError> {
        let checks = [
            ("host", &manifest.engines.host, &self.host_engine),
            ("framework", &manifest.engines.framework, &self.framework),
        ];
        for (engine, constraint, version) in checks {
            match VersionRange::from_constraint(constraint) {
                Ok(range) if range.includes(version) => {}
                Ok(range) => {
                    return Err(PluginSystemError::Incompatible {
                        plugin_id: manifest.id.clone(),
                        message: format!("requires {} {}, found {}", engine, range, version),
                    });
                }
                Err(e) => warn!(
                    "Plugin '{}' declares an unparseable {} range, skipping check: {}",
                    manifest.id, engine, e
                ),
            }
        }
        Ok(())
    }
}

//! Registry metadata gateway.
//!
//! Writers consult the gateway only for fields the target format requires
//! and the tree lacks (typically `resolved` and `integrity` for registry
//! packages). Lookups are lazy and idempotent; a failed lookup aborts the
//! whole conversion with no partial output, and the upstream status text is
//! carried verbatim so callers see it unchanged.

use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during metadata lookups.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry reports the package or version does not exist. The
    /// rendered message begins with the upstream status text.
    #[error("{status}: no metadata for '{name}@{version}' in the registry")]
    NotFound {
        status: String,
        name: String,
        version: String,
    },

    /// Network failure while contacting the registry.
    #[error("network error: {0}")]
    Network(String),

    /// The registry responded with something other than the expected
    /// document shape.
    #[error("malformed registry response for '{package}': {reason}")]
    InvalidResponse { package: String, reason: String },
}

/// Registry metadata for one name+version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    /// Tarball URL.
    pub resolved: Option<String>,
    /// Subresource-integrity string.
    pub integrity: Option<String>,
}

/// Resolve (name, version) to registry metadata.
pub trait MetadataSource {
    /// # Errors
    ///
    /// Fails with [`RegistryError::NotFound`] if the package or version is
    /// unknown upstream.
    fn lookup(&self, name: &str, version: &str) -> Result<PackageMetadata, RegistryError>;
}

/// Blocking HTTP gateway against an npm-style registry
/// (`GET {base}/{name}`, metadata under `versions.<version>.dist`).
pub struct HttpRegistry {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpRegistry {
    pub const DEFAULT_BASE: &'static str = "https://registry.npmjs.org";

    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}

fn status_text(status: reqwest::StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

impl MetadataSource for HttpRegistry {
    fn lookup(&self, name: &str, version: &str) -> Result<PackageMetadata, RegistryError> {
        let url = format!("{}/{name}", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::NotFound {
                status: status_text(status),
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        let document: serde_json::Value = response
            .json()
            .map_err(|e| RegistryError::InvalidResponse {
                package: name.to_string(),
                reason: e.to_string(),
            })?;

        let Some(dist) = document
            .get("versions")
            .and_then(|v| v.get(version))
            .and_then(|v| v.get("dist"))
        else {
            // The package exists but the requested version does not.
            return Err(RegistryError::NotFound {
                status: "404 Not Found".to_string(),
                name: name.to_string(),
                version: version.to_string(),
            });
        };

        Ok(PackageMetadata {
            resolved: dist
                .get("tarball")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            integrity: dist
                .get("integrity")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

/// In-memory metadata table. The gateway stub for tests and offline use.
#[derive(Debug, Default)]
pub struct StaticMetadata {
    entries: HashMap<(String, String), PackageMetadata>,
}

impl StaticMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        metadata: PackageMetadata,
    ) {
        self.entries.insert((name.into(), version.into()), metadata);
    }
}

impl MetadataSource for StaticMetadata {
    fn lookup(&self, name: &str, version: &str) -> Result<PackageMetadata, RegistryError> {
        self.entries
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                status: "404 Not Found".to_string(),
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

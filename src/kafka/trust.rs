// ============================================================================
// Trust Material Resolution
// ============================================================================
//
// Turns the configured trust-store reference into an on-disk store the broker
// client can read, plus the secret that unlocks it.
//
// Resolution:
// 1. No location -> synthesize a store from the bundled `kafka-ca.crt`
//    (only when no password was configured either)
// 2. `resource:<name>` -> copy the bundled PEM resource verbatim to a temp
//    file; stores without a PEM certificate are skipped
// 3. anything else -> a filesystem path, used unchanged
//
// Every failure degrades to "no trust material": the client then falls back
// to the system trust chain instead of aborting startup.
//
// Synthesized files live in an arena owned by the resolver and are removed
// when it is dropped.
//
// ============================================================================

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use rustls::RootCertStore;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// Bundled certificate used when no trust store is configured
pub const FALLBACK_CERTIFICATE: &str = "kafka-ca.crt";

/// Secret assigned to stores synthesized from [`FALLBACK_CERTIFICATE`]
pub const FALLBACK_TRUST_STORE_SECRET: &str = "changeit";

/// Prefixes marking a bundled-resource reference. `classpath:` is accepted
/// so existing deployment configs keep working.
const RESOURCE_PREFIXES: [&str; 2] = ["resource:", "classpath:"];

const TEMP_PREFIX: &str = "kafka-truststore";

/// A materialized trust store and the secret that unlocks it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustMaterial {
    pub keystore_path: PathBuf,
    pub unlock_secret: String,
}

/// Parsed form of a configured trust-store location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrustStoreRef {
    Unset,
    Bundled(String),
    Path(PathBuf),
}

impl TrustStoreRef {
    pub fn parse(location: Option<&str>) -> Self {
        let location = match location.map(str::trim) {
            None | Some("") => return Self::Unset,
            Some(l) => l,
        };

        RESOURCE_PREFIXES
            .iter()
            .find_map(|prefix| location.strip_prefix(prefix))
            .map(|name| Self::Bundled(name.trim_start_matches('/').to_string()))
            .unwrap_or_else(|| Self::Path(PathBuf::from(location)))
    }
}

/// Source of resources bundled with the deployment
pub trait ResourceBundle: Send + Sync {
    /// Raw bytes of `name`, or `None` when the bundle has no such resource
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Resources stored as plain files under a directory
#[derive(Debug, Clone)]
pub struct DirResourceBundle {
    root: PathBuf,
}

impl DirResourceBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceBundle for DirResourceBundle {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        // Resource names never leave the bundle directory
        if Path::new(name)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Ok(None);
        }

        match std::fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

type CacheKey = (TrustStoreRef, Option<String>);

/// Resolves trust-store references into [`TrustMaterial`]
///
/// Results are cached per reference, so a reference is materialized at most
/// once for the lifetime of the resolver.
pub struct TrustMaterialResolver {
    resources: Arc<dyn ResourceBundle>,
    cache: Mutex<HashMap<CacheKey, Option<TrustMaterial>>>,
    arena: Mutex<Vec<TempPath>>,
}

impl TrustMaterialResolver {
    pub fn new(resources: Arc<dyn ResourceBundle>) -> Self {
        Self {
            resources,
            cache: Mutex::new(HashMap::new()),
            arena: Mutex::new(Vec::new()),
        }
    }

    /// Resolve `(location, password)` into trust material, or `None` to use
    /// the system trust chain
    pub fn resolve(
        &self,
        location: Option<&str>,
        password: Option<&str>,
    ) -> Option<TrustMaterial> {
        let reference = TrustStoreRef::parse(location);
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);
        let key = (reference, password);

        let mut cache = lock(&self.cache);
        if let Some(cached) = cache.get(&key) {
            return cached.clone();
        }

        let resolved = self.resolve_uncached(&key.0, key.1.as_deref());
        cache.insert(key, resolved.clone());
        resolved
    }

    fn resolve_uncached(
        &self,
        reference: &TrustStoreRef,
        password: Option<&str>,
    ) -> Option<TrustMaterial> {
        match reference {
            TrustStoreRef::Unset if password.is_some() => {
                // A password without a location: do not guess a store for it
                info!("Truststore password set without a location - using system trust store");
                None
            }
            TrustStoreRef::Unset => match self.synthesize_from_certificate() {
                Ok(material) => material,
                Err(e) => {
                    warn!(
                        error = %e,
                        certificate = FALLBACK_CERTIFICATE,
                        "Bundled certificate unusable, using system trust store"
                    );
                    None
                }
            },
            TrustStoreRef::Bundled(name) => match self.extract_resource(name, password) {
                Ok(material) => material,
                Err(e) => {
                    warn!(
                        error = %e,
                        resource = %name,
                        "Could not load truststore from bundled resources"
                    );
                    None
                }
            },
            TrustStoreRef::Path(path) => Some(TrustMaterial {
                keystore_path: path.clone(),
                unlock_secret: password.unwrap_or_default().to_string(),
            }),
        }
    }

    /// Build a single-certificate store from the bundled PEM certificate
    fn synthesize_from_certificate(&self) -> Result<Option<TrustMaterial>> {
        let Some(pem) = self
            .resources
            .read(FALLBACK_CERTIFICATE)
            .context("Failed to read bundled certificate")?
        else {
            debug!(
                certificate = FALLBACK_CERTIFICATE,
                "No bundled certificate, using system trust store"
            );
            return Ok(None);
        };

        let mut reader = pem.as_slice();
        let certificate = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| anyhow!("no PEM certificate found"))?
            .context("Malformed PEM certificate")?;

        // Rejects DER that is not a usable X.509 trust anchor
        RootCertStore::empty()
            .add(certificate.clone())
            .map_err(|e| anyhow!("invalid X.509 certificate: {}", e))?;

        let path = self.materialize(".pem", encode_pem(certificate.as_ref()).as_bytes())?;

        info!(
            path = %path.display(),
            "Created truststore from bundled certificate"
        );

        Ok(Some(TrustMaterial {
            keystore_path: path,
            unlock_secret: FALLBACK_TRUST_STORE_SECRET.to_string(),
        }))
    }

    /// Copy a bundled PEM store verbatim; it keeps the caller's password
    ///
    /// The broker client only loads PEM trust stores, so anything without a
    /// certificate in it (a Java keystore, for one) is skipped.
    fn extract_resource(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<Option<TrustMaterial>> {
        let Some(bytes) = self
            .resources
            .read(name)
            .context("Failed to read bundled truststore")?
        else {
            warn!(resource = %name, "Truststore resource not found");
            return Ok(None);
        };

        if !contains_certificate(&bytes) {
            warn!(
                resource = %name,
                "Bundled truststore holds no PEM certificate, using system trust store"
            );
            return Ok(None);
        }

        let suffix = Path::new(name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_else(|| ".pem".to_string());
        let path = self.materialize(&suffix, &bytes)?;

        debug!(resource = %name, path = %path.display(), "Extracted bundled truststore");

        Ok(Some(TrustMaterial {
            keystore_path: path,
            unlock_secret: password.unwrap_or_default().to_string(),
        }))
    }

    /// Write `bytes` to a fresh, owner-only temp file kept alive by the arena
    fn materialize(&self, suffix: &str, bytes: &[u8]) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(suffix)
            .tempfile()
            .context("Failed to create truststore file")?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .context("Failed to write truststore file")?;

        let temp_path = file.into_temp_path();
        let path = std::path::absolute(&temp_path).context("Failed to resolve truststore path")?;
        lock(&self.arena).push(temp_path);
        Ok(path)
    }
}

impl Drop for TrustMaterialResolver {
    fn drop(&mut self) {
        for path in lock(&self.arena).drain(..) {
            if let Err(e) = path.close() {
                warn!(error = %e, "Failed to remove truststore file");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn contains_certificate(bytes: &[u8]) -> bool {
    let mut reader = bytes;
    rustls_pemfile::certs(&mut reader).any(|certificate| certificate.is_ok())
}

fn encode_pem(der: &[u8]) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

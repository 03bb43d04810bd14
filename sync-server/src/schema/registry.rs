//! Schema registry client
//!
//! The registry is an external service in production; the trait is the
//! seam. [`InMemoryRegistry`] backs tests and single-process deployments,
//! [`CachedRegistry`] wraps any implementation with an indefinite cache
//! (versions are immutable once registered).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use shared::envelope::SchemaVersion;
use shared::error::{SyncError, SyncResult};

use super::SchemaDef;

/// Resolve-by-subject-and-version (read), register-new-version (write,
/// append-only, backward-compatible additions only)
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Resolve an exact (subject, version) pair
    async fn resolve(&self, subject: &str, version: SchemaVersion) -> SyncResult<Arc<SchemaDef>>;

    /// Latest registered version for a subject
    async fn latest(&self, subject: &str) -> SyncResult<Arc<SchemaDef>>;

    /// Append a new version; enforces the evolution rules
    async fn register(&self, def: SchemaDef) -> SyncResult<SchemaVersion>;
}

/// 注册表的演进校验：同一 major 内只允许追加可选字段
///
/// Returns an error naming the offending field when `candidate` is not a
/// valid successor of `latest`.
fn check_evolution(latest: &SchemaDef, candidate: &SchemaDef) -> SyncResult<()> {
    if candidate.version.major == latest.version.major {
        if candidate.version.minor != latest.version.minor + 1 {
            return Err(SyncError::schema(format!(
                "{}: next minor for major {} is {}, got {}",
                candidate.subject,
                latest.version.major,
                latest.version.minor + 1,
                candidate.version
            )));
        }
        for field in &latest.fields {
            match candidate.field(&field.name) {
                Some(kept) if kept.kind == field.kind && kept.required == field.required => {}
                Some(_) => {
                    return Err(SyncError::schema(format!(
                        "{}: field `{}` changed kind or requiredness within major {}",
                        candidate.subject, field.name, latest.version.major
                    )));
                }
                None => {
                    return Err(SyncError::schema(format!(
                        "{}: field `{}` removed within major {}",
                        candidate.subject, field.name, latest.version.major
                    )));
                }
            }
        }
        for field in &candidate.fields {
            if latest.field(&field.name).is_none() && field.required {
                return Err(SyncError::schema(format!(
                    "{}: new required field `{}` forces a major version bump",
                    candidate.subject, field.name
                )));
            }
        }
        Ok(())
    } else if candidate.version.major == latest.version.major + 1 {
        if candidate.version.minor != 0 {
            return Err(SyncError::schema(format!(
                "{}: new major must start at minor 0, got {}",
                candidate.subject, candidate.version
            )));
        }
        Ok(())
    } else {
        Err(SyncError::schema(format!(
            "{}: version {} does not follow {}",
            candidate.subject, candidate.version, latest.version
        )))
    }
}

/// In-process registry (append-only version lists per subject)
#[derive(Default)]
pub struct InMemoryRegistry {
    subjects: RwLock<HashMap<String, Vec<Arc<SchemaDef>>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in fleet schemas
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        let mut subjects = registry.subjects.write();
        for def in super::builtin_schemas() {
            subjects
                .entry(def.subject.clone())
                .or_default()
                .push(Arc::new(def));
        }
        drop(subjects);
        registry
    }
}

#[async_trait]
impl SchemaRegistry for InMemoryRegistry {
    async fn resolve(&self, subject: &str, version: SchemaVersion) -> SyncResult<Arc<SchemaDef>> {
        self.subjects
            .read()
            .get(subject)
            .and_then(|versions| versions.iter().find(|def| def.version == version))
            .cloned()
            .ok_or_else(|| SyncError::SchemaNotFound {
                subject: subject.to_string(),
                version: version.to_string(),
            })
    }

    async fn latest(&self, subject: &str) -> SyncResult<Arc<SchemaDef>> {
        self.subjects
            .read()
            .get(subject)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| SyncError::SchemaNotFound {
                subject: subject.to_string(),
                version: "latest".to_string(),
            })
    }

    async fn register(&self, def: SchemaDef) -> SyncResult<SchemaVersion> {
        let mut subjects = self.subjects.write();
        let versions = subjects.entry(def.subject.clone()).or_default();

        if let Some(latest) = versions.last() {
            check_evolution(latest, &def)?;
        } else if def.version != SchemaVersion::new(1, 0) {
            return Err(SyncError::schema(format!(
                "{}: first version must be 1.0, got {}",
                def.subject, def.version
            )));
        }

        let version = def.version;
        tracing::info!(
            subject = %def.subject,
            version = %version,
            fingerprint = %def.fingerprint(),
            "Schema version registered"
        );
        versions.push(Arc::new(def));
        Ok(version)
    }
}

/// Caching wrapper around a registry
///
/// Resolved versions are cached indefinitely (immutable once registered).
/// On a resolution miss the stale cache entry is dropped before the
/// failure is propagated, so a later successful registration is observed.
pub struct CachedRegistry<R> {
    inner: R,
    cache: DashMap<(String, SchemaVersion), Arc<SchemaDef>>,
}

impl<R: SchemaRegistry> CachedRegistry<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of cached (subject, version) entries
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<R: SchemaRegistry> SchemaRegistry for CachedRegistry<R> {
    async fn resolve(&self, subject: &str, version: SchemaVersion) -> SyncResult<Arc<SchemaDef>> {
        let key = (subject.to_string(), version);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }

        match self.inner.resolve(subject, version).await {
            Ok(def) => {
                self.cache.insert(key, def.clone());
                Ok(def)
            }
            Err(err @ SyncError::SchemaNotFound { .. }) => {
                // Invalidate before failing: a stale entry must not mask
                // the registry's answer on the next lookup.
                self.cache.remove(&key);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn latest(&self, subject: &str) -> SyncResult<Arc<SchemaDef>> {
        // Latest is never cached: a new version may be registered at any time.
        self.inner.latest(subject).await
    }

    async fn register(&self, def: SchemaDef) -> SyncResult<SchemaVersion> {
        let version = self.inner.register(def.clone()).await?;
        self.cache
            .insert((def.subject.clone(), version), Arc::new(def));
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldKind};

    fn base_schema() -> SchemaDef {
        SchemaDef::new(
            "fleet.test",
            SchemaVersion::new(1, 0),
            vec![FieldDef::required("vehicle_id", FieldKind::String)],
        )
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = InMemoryRegistry::new();
        registry.register(base_schema()).await.unwrap();

        let def = registry
            .resolve("fleet.test", SchemaVersion::new(1, 0))
            .await
            .unwrap();
        assert_eq!(def.fields.len(), 1);

        let err = registry
            .resolve("fleet.test", SchemaVersion::new(2, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaNotFound { .. }));
    }

    #[tokio::test]
    async fn test_minor_bump_may_only_add_optional_fields() {
        let registry = InMemoryRegistry::new();
        registry.register(base_schema()).await.unwrap();

        let mut next = base_schema();
        next.version = SchemaVersion::new(1, 1);
        next.fields.push(FieldDef::optional("note", FieldKind::String));
        registry.register(next).await.unwrap();

        let mut bad = base_schema();
        bad.version = SchemaVersion::new(1, 2);
        bad.fields.push(FieldDef::optional("note", FieldKind::String));
        bad.fields.push(FieldDef::required("rider_id", FieldKind::String));
        let err = registry.register(bad).await.unwrap_err();
        assert!(err.to_string().contains("major version bump"));
    }

    #[tokio::test]
    async fn test_required_addition_allowed_with_major_bump() {
        let registry = InMemoryRegistry::new();
        registry.register(base_schema()).await.unwrap();

        let mut next = base_schema();
        next.version = SchemaVersion::new(2, 0);
        next.fields.push(FieldDef::required("rider_id", FieldKind::String));
        registry.register(next).await.unwrap();

        let def = registry
            .resolve("fleet.test", SchemaVersion::new(2, 0))
            .await
            .unwrap();
        assert_eq!(def.fields.len(), 2);
    }

    #[tokio::test]
    async fn test_field_removal_rejected_within_major() {
        let registry = InMemoryRegistry::new();
        registry.register(base_schema()).await.unwrap();

        let next = SchemaDef::new("fleet.test", SchemaVersion::new(1, 1), vec![]);
        let err = registry.register(next).await.unwrap_err();
        assert!(err.to_string().contains("removed"));
    }

    #[tokio::test]
    async fn test_cache_hit_and_invalidate_on_miss() {
        let registry = CachedRegistry::new(InMemoryRegistry::new());
        registry.register(base_schema()).await.unwrap();

        registry
            .resolve("fleet.test", SchemaVersion::new(1, 0))
            .await
            .unwrap();
        assert_eq!(registry.cached_len(), 1);

        // Unknown version: miss must not leave a cache entry behind
        let err = registry
            .resolve("fleet.test", SchemaVersion::new(1, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaNotFound { .. }));
        assert_eq!(registry.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_builtin_registry_resolves_all_subjects() {
        let registry = InMemoryRegistry::with_builtin();
        for def in crate::schema::builtin_schemas() {
            let resolved = registry
                .resolve(&def.subject, SchemaVersion::new(1, 0))
                .await
                .unwrap();
            assert_eq!(resolved.fingerprint(), def.fingerprint());
        }
    }
}

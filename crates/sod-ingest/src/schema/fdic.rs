//! Registry backed by the FDIC SOD properties document
//!
//! The document is YAML shaped like
//! `properties.data.properties.<FIELD>.{title, description, type}`. The
//! parsed result is cached as JSON so later runs work offline.

use super::{SchemaRegistry, StaticRegistry};
use crate::config::SchemaConfig;
use crate::error::SchemaError;
use crate::http::{FetchRequest, RetryingClient};
use sod_common::types::{FieldDescriptor, FieldType, REPORTING_PERIOD_COLUMN};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const REPORTING_PERIOD_DESCRIPTION: &str = "Reporting date (June 30 of data year)";

/// Where the loaded descriptors came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySource {
    Cache,
    Network,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct FdicSchemaRegistry {
    inner: StaticRegistry,
    source: RegistrySource,
}

impl FdicSchemaRegistry {
    /// Resolve the registry from cache or network
    ///
    /// The cache is read first unless `refresh` is set. A successful fetch
    /// rewrites the cache. When the fetch fails a readable cache is still
    /// used; only when both fail is an error returned.
    pub async fn load(
        client: &RetryingClient,
        config: &SchemaConfig,
    ) -> Result<Self, SchemaError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        if !config.refresh {
            match read_cache(&config.cache_path) {
                Ok(Some(inner)) => {
                    info!(
                        path = %config.cache_path.display(),
                        fields = inner.len(),
                        "Loaded field descriptions from cache"
                    );
                    return Ok(Self {
                        inner,
                        source: RegistrySource::Cache,
                    });
                },
                Ok(None) => {},
                Err(e) => warn!(error = %e, "Ignoring unreadable schema cache"),
            }
        }

        match fetch(client, &config.url).await {
            Ok(inner) => {
                if let Err(e) = write_cache(&config.cache_path, &inner) {
                    warn!(error = %e, "Could not write schema cache");
                }
                info!(fields = inner.len(), "Fetched field descriptions");
                Ok(Self {
                    inner,
                    source: RegistrySource::Network,
                })
            },
            Err(fetch_err) => match read_cache(&config.cache_path) {
                Ok(Some(inner)) if config.refresh => {
                    warn!(error = %fetch_err, "Schema refresh failed, using cached descriptions");
                    Ok(Self {
                        inner,
                        source: RegistrySource::Cache,
                    })
                },
                _ => Err(fetch_err),
            },
        }
    }

    /// An empty registry; every column gets an empty description
    pub fn disabled() -> Self {
        Self {
            inner: StaticRegistry::new(),
            source: RegistrySource::Disabled,
        }
    }

    pub fn source(&self) -> RegistrySource {
        self.source
    }
}

impl SchemaRegistry for FdicSchemaRegistry {
    fn describe(&self, name: &str) -> Option<String> {
        self.inner.describe(name)
    }

    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.inner.field_type(name)
    }

    fn field_names(&self) -> Vec<String> {
        self.inner.field_names()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

async fn fetch(client: &RetryingClient, url: &str) -> Result<StaticRegistry, SchemaError> {
    info!(url, "Fetching field descriptions");
    let response = client.fetch(&FetchRequest::get(url)).await?;
    parse_properties(&response.text())
}

/// Parse the properties document into a registry
pub fn parse_properties(document: &str) -> Result<StaticRegistry, SchemaError> {
    let root: serde_yaml::Value = serde_yaml::from_str(document)?;
    let properties = root
        .get("properties")
        .and_then(|p| p.get("data"))
        .and_then(|d| d.get("properties"))
        .and_then(|p| p.as_mapping())
        .ok_or(SchemaError::MissingProperties)?;

    let text = |def: &serde_yaml::Value, key: &str| {
        def.get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut registry = StaticRegistry::new();
    for (key, def) in properties {
        let Some(name) = key.as_str() else {
            continue;
        };
        let description = text(def, "title")
            .or_else(|| text(def, "description"))
            .unwrap_or_default();
        let field_type = text(def, "type").and_then(|t| t.parse::<FieldType>().ok());

        registry.insert(FieldDescriptor {
            name: name.to_string(),
            description,
            field_type,
        });
    }

    registry.insert(
        FieldDescriptor::new(REPORTING_PERIOD_COLUMN, REPORTING_PERIOD_DESCRIPTION)
            .with_type(FieldType::Date),
    );

    Ok(registry)
}

fn read_cache(path: &Path) -> Result<Option<StaticRegistry>, SchemaError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let fields: BTreeMap<String, FieldDescriptor> = serde_json::from_slice(&bytes)?;
    Ok(Some(StaticRegistry::from_descriptors(fields.into_values())))
}

fn write_cache(path: &Path, registry: &StaticRegistry) -> Result<(), SchemaError> {
    let fields = registry.clone().into_map();
    let json = serde_json::to_vec_pretty(&fields)?;
    crate::artifact::write_bytes_atomic(path, &json)?;
    Ok(())
}

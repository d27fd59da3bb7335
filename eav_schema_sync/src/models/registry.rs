//! Entity type registry
//!
//! The analyzer and engine read desired EAV configuration through the
//! [`EntityTypeRegistry`] trait. [`StaticRegistry`] is the built-in
//! implementation, filled in code or from TOML/YAML definition files.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::schema::types::{AttributeConfig, EntityTypeConfig};

/// Source of desired entity type configuration
pub trait EntityTypeRegistry: Send + Sync {
    /// Configuration of one entity type; unknown codes are a configuration error
    fn get_entity_type(&self, code: &str) -> Result<EntityTypeConfig>;

    /// Attributes of one entity type keyed by attribute code
    fn get_attributes(&self, code: &str) -> Result<IndexMap<String, AttributeConfig>> {
        Ok(self.get_entity_type(code)?.attributes)
    }

    /// Every registered entity type, in registration order
    fn get_all_entity_types(&self) -> Vec<EntityTypeConfig>;
}

/// Layout of a definition file
#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default, rename = "entity_type")]
    entity_types: Vec<EntityTypeConfig>,
}

/// In-memory registry
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    entity_types: IndexMap<String, EntityTypeConfig>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already constructed configurations
    pub fn from_entity_types<I>(entity_types: I) -> Result<Self>
    where
        I: IntoIterator<Item = EntityTypeConfig>,
    {
        let mut registry = Self::new();
        for entity_type in entity_types {
            registry.register(entity_type)?;
        }
        Ok(registry)
    }

    /// Load every definition file named by the registry configuration
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let mut registry = Self::new();
        for path in &config.paths {
            for file in resolve_definition_files(path, config.recursive_scan)? {
                registry.load_file(&file)?;
            }
        }

        tracing::info!(
            entity_types = registry.len(),
            "Loaded entity type definitions"
        );
        Ok(registry)
    }

    /// Register one entity type after validating it
    pub fn register(&mut self, entity_type: EntityTypeConfig) -> Result<()> {
        entity_type.validate()?;

        if self.entity_types.contains_key(&entity_type.entity_type_code) {
            return Err(Error::Configuration(format!(
                "Entity type '{}' is defined more than once",
                entity_type.entity_type_code
            )));
        }

        tracing::debug!(
            entity_type = %entity_type.entity_type_code,
            attributes = entity_type.attributes.len(),
            "Registered entity type"
        );
        self.entity_types
            .insert(entity_type.entity_type_code.clone(), entity_type);
        Ok(())
    }

    /// Parse a TOML or YAML definition file and register its entity types
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let definitions: DefinitionFile = match extension(path).as_deref() {
            Some("toml") => toml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            _ => {
                return Err(Error::Configuration(format!(
                    "Unsupported definition file: {}",
                    path.display()
                )))
            }
        };

        for entity_type in definitions.entity_types {
            self.register(entity_type)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entity_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }
}

impl EntityTypeRegistry for StaticRegistry {
    fn get_entity_type(&self, code: &str) -> Result<EntityTypeConfig> {
        self.entity_types
            .get(code)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("Unknown entity type: {}", code)))
    }

    fn get_all_entity_types(&self) -> Vec<EntityTypeConfig> {
        self.entity_types.values().cloned().collect()
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_definition_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("toml" | "yaml" | "yml"))
}

/// Expand a configured path (file, directory or glob) into definition files
fn resolve_definition_files(path: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.contains(|c| matches!(c, '*' | '?' | '[')) {
        let entries = glob::glob(path)
            .map_err(|e| Error::Configuration(format!("Invalid pattern '{}': {}", path, e)))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file() && is_definition_file(p))
            .collect();
        files.sort();
        return Ok(files);
    }

    let base_path = Path::new(path);
    if !base_path.exists() {
        return Err(Error::Configuration(format!(
            "Path does not exist: {}",
            path
        )));
    }

    if base_path.is_file() {
        return Ok(vec![base_path.to_path_buf()]);
    }

    let walker = WalkDir::new(base_path).follow_links(true).sort_by_file_name();
    let walker = if recursive { walker } else { walker.max_depth(1) };

    Ok(walker
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_definition_file(p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::BackendType;
    use pretty_assertions::assert_eq;
    use std::fs;

    const PRODUCT_TOML: &str = r#"
[[entity_type]]
entity_type_code = "product"
entity_table = "catalog_product"

[entity_type.attributes.sku]
backend_type = "varchar"
searchable = true
frontend_input = "text"

[entity_type.attributes.price]
backend_type = "decimal"
required = true
"#;

    const CUSTOMER_YAML: &str = r#"
entity_type:
  - entity_type_code: customer
    entity_table: customer
    attributes:
      dob:
        backend_type: datetime
        filterable: true
"#;

    #[test]
    fn loads_toml_and_yaml_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("product.toml"), PRODUCT_TOML).unwrap();
        fs::write(dir.path().join("customer.yaml"), CUSTOMER_YAML).unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let registry = StaticRegistry::from_config(&RegistryConfig {
            paths: vec![dir.path().display().to_string()],
            recursive_scan: false,
        })
        .unwrap();

        let codes: Vec<String> = registry
            .get_all_entity_types()
            .into_iter()
            .map(|e| e.entity_type_code)
            .collect();
        assert_eq!(codes, vec!["customer", "product"]);

        let attributes = registry.get_attributes("product").unwrap();
        assert_eq!(attributes.keys().collect::<Vec<_>>(), vec!["sku", "price"]);
        assert_eq!(attributes["price"].backend_type, BackendType::Decimal);
        assert!(attributes["price"].required);
    }

    #[test]
    fn expands_glob_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("product.toml"), PRODUCT_TOML).unwrap();
        fs::write(dir.path().join("customer.yaml"), CUSTOMER_YAML).unwrap();

        let registry = StaticRegistry::from_config(&RegistryConfig {
            paths: vec![format!("{}/*.toml", dir.path().display())],
            recursive_scan: false,
        })
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get_entity_type("customer").is_err());
    }

    #[test]
    fn rejects_invalid_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");

        fs::write(&path, PRODUCT_TOML.replace("decimal", "money")).unwrap();
        assert!(matches!(
            StaticRegistry::new().load_file(&path),
            Err(Error::Configuration(_))
        ));

        fs::write(&path, PRODUCT_TOML.replace("\"text\"", "\"slider\"")).unwrap();
        assert!(matches!(
            StaticRegistry::new().load_file(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[rstest::rstest]
    #[case("../escaped")]
    #[case("catalog/product")]
    #[case("2fast")]
    #[case("")]
    fn rejects_codes_that_are_not_identifiers(#[case] code: &str) {
        let mut registry = StaticRegistry::new();

        assert!(matches!(
            registry.register(EntityTypeConfig::new(code, "product")),
            Err(Error::Configuration(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_code_and_duplicates_are_errors() {
        let product = EntityTypeConfig::new("product", "product");
        let mut registry = StaticRegistry::from_entity_types([product.clone()]).unwrap();

        assert!(matches!(
            registry.get_entity_type("order"),
            Err(Error::Configuration(_))
        ));
        assert!(registry.register(product).is_err());
    }
}

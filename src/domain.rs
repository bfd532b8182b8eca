//! Domain objects: files, aliases and import maps.
//!
//! Persisted document formats:
//!   alias table:  `{ "<name>": { "<alias>": { "version", "subtype", "file" } } }`
//!   import map:   `{ "imports": { "<specifier>": "<address>" } }`

use std::collections::BTreeMap;

use garde::Validate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::AssetError;
use crate::path::{self, AssetType, PackageRef, StorageKey};

/// Content type of every JSON document the server persists.
pub const JSON_CONTENT_TYPE: &str = "application/json";

// -- File ---------------------------------------------------------------------

/// Argument contract for [`crate::sink::Sink::write`]: where the bytes go
/// and what they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    key: StorageKey,
    content_type: String,
}

impl File {
    pub fn new(key: StorageKey, content_type: impl Into<String>) -> Self {
        Self {
            key,
            content_type: content_type.into(),
        }
    }

    /// A JSON document.
    pub fn json(key: StorageKey) -> Self {
        Self::new(key, JSON_CONTENT_TYPE)
    }

    /// A package artifact, typed by its asset type (source maps are JSON).
    pub fn artifact(package: &PackageRef) -> Self {
        let content_type = if package.file.ends_with(".map") {
            JSON_CONTENT_TYPE
        } else {
            package.asset_type.content_type()
        };
        Self::new(package.key(), content_type)
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

// -- Aliases ------------------------------------------------------------------

/// Value stored for one alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub version: String,
    pub subtype: String,
    pub file: String,
}

/// An alias, identified by (org, type, name, alias).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub org: String,
    pub asset_type: AssetType,
    pub name: String,
    pub alias: String,
    pub record: AliasRecord,
}

impl Alias {
    /// Validate identifiers and version, defaulting subtype/file from the
    /// asset type when omitted.
    pub fn new(
        org: &str,
        asset_type: AssetType,
        name: &str,
        alias: &str,
        version: &str,
        subtype: Option<&str>,
        file: Option<&str>,
    ) -> Result<Self, AssetError> {
        path::identifier("alias", alias)?;
        let target = PackageRef::new(org, asset_type, name, version, subtype, file)?;
        Ok(Self {
            org: target.org,
            asset_type,
            name: target.name,
            alias: alias.to_string(),
            record: AliasRecord {
                version: target.version,
                subtype: target.subtype,
                file: target.file,
            },
        })
    }

    /// The artifact this alias points at.
    pub fn target(&self) -> Result<PackageRef, AssetError> {
        resolve_record(&self.org, self.asset_type, &self.name, &self.record)
    }
}

/// Resolve a stored record back into the artifact it points at.  Records
/// are re-validated since the document may have been edited out of band.
pub fn resolve_record(
    org: &str,
    asset_type: AssetType,
    name: &str,
    record: &AliasRecord,
) -> Result<PackageRef, AssetError> {
    PackageRef::new(
        org,
        asset_type,
        name,
        &record.version,
        Some(&record.subtype),
        Some(&record.file),
    )
}

/// All aliases of one (org, type): name -> alias -> record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    names: BTreeMap<String, BTreeMap<String, AliasRecord>>,
}

impl AliasTable {
    pub fn get(&self, name: &str, alias: &str) -> Option<&AliasRecord> {
        self.names.get(name)?.get(alias)
    }

    /// Insert or overwrite.  Returns whether the table changed.
    pub fn set(&mut self, name: &str, alias: &str, record: AliasRecord) -> bool {
        let aliases = self.names.entry(name.to_string()).or_default();
        match aliases.get(alias) {
            Some(existing) if *existing == record => false,
            _ => {
                aliases.insert(alias.to_string(), record);
                true
            }
        }
    }

    /// Remove one alias; the name entry goes too once it is empty.
    /// Returns whether the table changed.
    pub fn remove(&mut self, name: &str, alias: &str) -> bool {
        let Some(aliases) = self.names.get_mut(name) else {
            return false;
        };
        let removed = aliases.remove(alias).is_some();
        if aliases.is_empty() {
            self.names.remove(name);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.names.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// -- Import maps --------------------------------------------------------------

/// One specifier/address pair submitted for an import map.  Values are
/// stored exactly as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct ImportMapEntry {
    #[garde(length(min = 1), custom(not_blank))]
    pub specifier: String,
    #[garde(length(min = 1), custom(not_blank))]
    pub address: String,
}

#[allow(clippy::ptr_arg)]
fn not_blank(value: &String, _: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

impl ImportMapEntry {
    /// Build from optional form values, rejecting missing, empty or
    /// whitespace-only fields.
    pub fn new(specifier: Option<String>, address: Option<String>) -> Result<Self, AssetError> {
        let entry = Self {
            specifier: specifier.unwrap_or_default(),
            address: address.unwrap_or_default(),
        };
        entry.validate().map_err(|report| {
            AssetError::InvalidEntry(format!("import map entry is not valid: {report}"))
        })?;
        Ok(entry)
    }
}

/// Insertion-ordered mapping from specifier to address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    imports: IndexMap<String, String>,
}

impl ImportMap {
    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    /// Set an entry, overwriting an existing specifier in place.
    /// Returns whether the map changed.
    pub fn set_import(&mut self, entry: ImportMapEntry) -> bool {
        match self.imports.get(&entry.specifier) {
            Some(existing) if *existing == entry.address => false,
            _ => {
                self.imports.insert(entry.specifier, entry.address);
                true
            }
        }
    }

    /// Remove a specifier, keeping the order of the rest.  Returns whether
    /// the map changed.
    pub fn remove_import(&mut self, specifier: &str) -> bool {
        self.imports.shift_remove(specifier).is_some()
    }

    pub fn imports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(specifier: &str, address: &str) -> ImportMapEntry {
        ImportMapEntry::new(Some(specifier.into()), Some(address.into())).unwrap()
    }

    #[test]
    fn test_import_map_overwrites_without_duplicating() {
        let mut map: ImportMap = serde_json::from_str(r#"{"imports":{"a":"x"}}"#).unwrap();

        assert!(map.set_import(entry("a", "y")));

        assert_eq!(map.len(), 1);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!({"imports": {"a": "y"}})
        );
    }

    #[test]
    fn test_import_map_preserves_insertion_order() {
        let mut map = ImportMap::default();
        map.set_import(entry("zeta", "1"));
        map.set_import(entry("alpha", "2"));
        map.set_import(entry("mid", "3"));
        map.remove_import("alpha");
        map.set_import(entry("zeta", "4"));

        let order: Vec<_> = map.imports().map(|(k, _)| k).collect();
        assert_eq!(order, ["zeta", "mid"]);
        assert_eq!(map.get("zeta"), Some("4"));
    }

    #[test]
    fn test_import_map_reparses_to_equal_mapping() {
        let mut map = ImportMap::default();
        map.set_import(entry("lit-html", "https://cdn/lit-html.js"));
        map.set_import(entry("lit-element", "https://cdn/lit-element.js"));

        let text = serde_json::to_string_pretty(&map).unwrap();
        let back: ImportMap = serde_json::from_str(&text).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_missing_imports_key_is_empty_map() {
        let map: ImportMap = serde_json::from_str("{}").unwrap();
        assert!(map.is_empty());
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!({"imports": {}})
        );
    }

    #[test]
    fn test_remove_missing_specifier_is_noop() {
        let mut map = ImportMap::default();
        map.set_import(entry("a", "1"));
        let before = map.clone();

        assert!(!map.remove_import("b"));
        assert_eq!(map, before);
    }

    #[test]
    fn test_import_map_entry_rejects_empty_fields() {
        for (specifier, address) in [
            (Some("a"), Some("")),
            (Some(""), Some("x")),
            (None, Some("x")),
            (Some("a"), None),
            (Some("  "), Some("x")),
        ] {
            let result = ImportMapEntry::new(
                specifier.map(str::to_string),
                address.map(str::to_string),
            );
            assert!(
                matches!(result, Err(AssetError::InvalidEntry(_))),
                "{specifier:?}/{address:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_import_map_entry_keeps_submitted_values() {
        let entry = entry(" lit ", "https://cdn/lit.js\n");
        assert_eq!(entry.specifier, " lit ");
        assert_eq!(entry.address, "https://cdn/lit.js\n");
    }

    #[test]
    fn test_alias_defaults_subtype_and_file() {
        let js = Alias::new("acme", AssetType::Js, "widget", "stable", "2.3.1", None, None).unwrap();
        assert_eq!(js.record.subtype, "esm");
        assert_eq!(js.record.file, "index.js");

        let css = Alias::new("acme", AssetType::Css, "theme", "next", "1.0.0", None, None).unwrap();
        assert_eq!(css.record.subtype, "default");
        assert_eq!(css.record.file, "index.css");
    }

    #[test]
    fn test_alias_rejects_invalid_version() {
        let err = Alias::new(
            "acme",
            AssetType::Js,
            "widget",
            "stable",
            "not-a-version",
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AssetError::InvalidVersion(v) if v == "not-a-version"));
    }

    #[test]
    fn test_alias_target_key() {
        let alias = Alias::new("acme", AssetType::Js, "widget", "stable", "2.3.1", None, None).unwrap();
        assert_eq!(
            alias.target().unwrap().key().as_str(),
            "acme/js/widget/2.3.1/esm/index.js"
        );
    }

    #[test]
    fn test_alias_table_document_format() {
        let mut table = AliasTable::default();
        let record = AliasRecord {
            version: "1.2.3".into(),
            subtype: "esm".into(),
            file: "index.js".into(),
        };
        assert!(table.set("widget", "stable", record.clone()));
        assert!(!table.set("widget", "stable", record.clone()));

        assert_eq!(
            serde_json::to_value(&table).unwrap(),
            serde_json::json!({
                "widget": {"stable": {"version": "1.2.3", "subtype": "esm", "file": "index.js"}}
            })
        );
        assert_eq!(table.get("widget", "stable"), Some(&record));
    }

    #[test]
    fn test_alias_table_remove_prunes_empty_names() {
        let mut table = AliasTable::default();
        let record = AliasRecord {
            version: "1.0.0".into(),
            subtype: "esm".into(),
            file: "index.js".into(),
        };
        table.set("widget", "stable", record);

        assert!(!table.remove("widget", "beta"));
        assert!(!table.remove("gadget", "stable"));
        assert!(table.remove("widget", "stable"));
        assert!(table.is_empty());
        assert_eq!(serde_json::to_string(&table).unwrap(), "{}");
    }

    #[test]
    fn test_artifact_file_content_types() {
        let js = PackageRef::new("acme", AssetType::Js, "w", "1.0.0", None, None).unwrap();
        assert_eq!(File::artifact(&js).content_type(), "application/javascript");

        let map = PackageRef::new("acme", AssetType::Js, "w", "1.0.0", None, Some("index.js.map"))
            .unwrap();
        assert_eq!(File::artifact(&map).content_type(), "application/json");

        let css = PackageRef::new("acme", AssetType::Css, "t", "1.0.0", None, None).unwrap();
        assert_eq!(File::artifact(&css).content_type(), "text/css");
    }
}

//! Storage key scheme.
//!
//! Every key the server reads or writes is built here, from validated
//! identifier segments.  This is the only place segments are checked, so
//! no caller can smuggle `..`, a leading `/`, or an embedded `/` into a
//! backend path.
//!
//! Layout:
//!   Packages:     `{org}/{type}/{name}/{version}/{subtype}/{file}`
//!   Alias table:  `{org}/{type}/alias.json`
//!   Import map:   `{org}/{type}/import-map.json`

use std::fmt;
use std::str::FromStr;

use garde::Validate;

use crate::errors::AssetError;

/// File name of the per-(org, type) alias table document.
pub const ALIAS_TABLE_FILE: &str = "alias.json";

/// File name of the per-(org, type) import map document.
pub const IMPORT_MAP_FILE: &str = "import-map.json";

/// A backend-agnostic, forward-slash-delimited storage key.
///
/// Only the builders in this module can produce one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Key of a sibling resource in the same "directory".
    pub fn with_file_name(&self, file: &str) -> Result<StorageKey, AssetError> {
        let file = file_segment("file", file)?;
        let parent = self.0.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        if parent.is_empty() {
            Ok(StorageKey(file.to_string()))
        } else {
            Ok(StorageKey(format!("{parent}/{file}")))
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// -- Identifier validation ----------------------------------------------------

/// One strict identifier segment: alphanumerics, `-` and `_`.
#[derive(Debug, Validate)]
struct Identifier {
    #[garde(length(min = 1, max = 214), pattern(r"^[A-Za-z0-9_-]+$"))]
    value: String,
}

/// A file-name segment: like [`Identifier`] but dots are allowed between
/// other characters (`index.js`, `index.js.map`).
#[derive(Debug, Validate)]
struct FileName {
    #[garde(length(min = 1, max = 255), pattern(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$"))]
    value: String,
}

/// Validate a strict identifier segment (org, name, alias, subtype).
pub fn identifier<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AssetError> {
    let candidate = Identifier {
        value: value.to_string(),
    };
    candidate
        .validate()
        .map_err(|_| AssetError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })?;
    Ok(value)
}

/// Validate a file-name segment.  Rejects `..`, hidden names and slashes.
pub fn file_segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AssetError> {
    let candidate = FileName {
        value: value.to_string(),
    };
    candidate
        .validate()
        .map_err(|_| AssetError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })?;
    Ok(value)
}

/// Validate a version segment: it must parse as a semantic version.
pub fn version(value: &str) -> Result<semver::Version, AssetError> {
    semver::Version::parse(value).map_err(|_| AssetError::InvalidVersion(value.to_string()))
}

// -- Asset type ---------------------------------------------------------------

/// Artifact family.  Selects default subtype, file name and content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetType {
    Js,
    Css,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Js => "js",
            AssetType::Css => "css",
        }
    }

    pub fn default_subtype(&self) -> &'static str {
        match self {
            AssetType::Js => "esm",
            AssetType::Css => "default",
        }
    }

    pub fn default_file(&self) -> &'static str {
        match self {
            AssetType::Js => "index.js",
            AssetType::Css => "index.css",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AssetType::Js => "application/javascript",
            AssetType::Css => "text/css",
        }
    }
}

impl FromStr for AssetType {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "js" => Ok(AssetType::Js),
            "css" => Ok(AssetType::Css),
            other => Err(AssetError::InvalidIdentifier {
                field: "type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Package references ---------------------------------------------------------

/// Fully-resolved identity of one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub org: String,
    pub asset_type: AssetType,
    pub name: String,
    pub version: String,
    pub subtype: String,
    pub file: String,
}

impl PackageRef {
    /// Validate every segment and fill subtype/file from the asset type
    /// when they are omitted.
    pub fn new(
        org: &str,
        asset_type: AssetType,
        name: &str,
        version_str: &str,
        subtype: Option<&str>,
        file: Option<&str>,
    ) -> Result<Self, AssetError> {
        identifier("org", org)?;
        identifier("name", name)?;
        version(version_str)?;
        let subtype = subtype
            .filter(|s| !s.is_empty())
            .unwrap_or(asset_type.default_subtype());
        let file = file.filter(|f| !f.is_empty()).unwrap_or(asset_type.default_file());
        identifier("subtype", subtype)?;
        file_segment("file", file)?;

        Ok(Self {
            org: org.to_string(),
            asset_type,
            name: name.to_string(),
            version: version_str.to_string(),
            subtype: subtype.to_string(),
            file: file.to_string(),
        })
    }

    /// Storage key of the artifact.
    pub fn key(&self) -> StorageKey {
        StorageKey(format!(
            "{}/{}/{}/{}/{}/{}",
            self.org, self.asset_type, self.name, self.version, self.subtype, self.file
        ))
    }
}

/// Build the storage key of a package artifact.
pub fn package_key(
    org: &str,
    asset_type: AssetType,
    name: &str,
    version: &str,
    subtype: Option<&str>,
    file: Option<&str>,
) -> Result<StorageKey, AssetError> {
    Ok(PackageRef::new(org, asset_type, name, version, subtype, file)?.key())
}

/// Split a package key back into its identifiers.
pub fn parse_package_key(key: &str) -> Result<PackageRef, AssetError> {
    let parts: Vec<&str> = key.split('/').collect();
    let [org, asset_type, name, version, subtype, file] = parts.as_slice() else {
        return Err(AssetError::InvalidIdentifier {
            field: "key",
            value: key.to_string(),
        });
    };
    PackageRef::new(
        org,
        asset_type.parse()?,
        name,
        version,
        Some(*subtype),
        Some(*file),
    )
}

/// Key of the alias table for one (org, type).
pub fn alias_table_key(org: &str, asset_type: AssetType) -> Result<StorageKey, AssetError> {
    identifier("org", org)?;
    Ok(StorageKey(format!("{org}/{asset_type}/{ALIAS_TABLE_FILE}")))
}

/// Key of the import map document for one (org, type).
pub fn import_map_key(org: &str, asset_type: AssetType) -> Result<StorageKey, AssetError> {
    identifier("org", org)?;
    Ok(StorageKey(format!("{org}/{asset_type}/{IMPORT_MAP_FILE}")))
}

/// Public route path of an alias: `a/{org}/{type}/{name}/{alias}`.
pub fn alias_route(
    org: &str,
    asset_type: AssetType,
    name: &str,
    alias: &str,
) -> Result<String, AssetError> {
    identifier("org", org)?;
    identifier("name", name)?;
    identifier("alias", alias)?;
    Ok(format!("a/{org}/{asset_type}/{name}/{alias}"))
}

/// Public route path of an import map: `import-map/{org}/{type}`.
pub fn import_map_route(org: &str, asset_type: AssetType) -> Result<String, AssetError> {
    identifier("org", org)?;
    Ok(format!("import-map/{org}/{asset_type}"))
}

/// Public route path of a package artifact: `pkg/{key}`.
pub fn package_route(key: &StorageKey) -> String {
    format!("pkg/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_accepts_allow_listed() {
        assert!(identifier("org", "acme").is_ok());
        assert!(identifier("name", "my-widget_2").is_ok());
        assert!(identifier("alias", "STABLE").is_ok());
    }

    #[test]
    fn test_identifier_rejects_traversal_and_slashes() {
        for bad in ["", "..", "../etc", "/root", "a/b", "a.b", "a b", "é"] {
            let err = identifier("org", bad).unwrap_err();
            assert!(
                matches!(err, AssetError::InvalidIdentifier { field: "org", .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_file_segment_rules() {
        assert!(file_segment("file", "index.js").is_ok());
        assert!(file_segment("file", "index.js.map").is_ok());
        assert!(file_segment("file", "..").is_err());
        assert!(file_segment("file", ".hidden").is_err());
        assert!(file_segment("file", "a..b").is_err());
        assert!(file_segment("file", "dir/index.js").is_err());
        assert!(file_segment("file", "index.").is_err());
    }

    #[test]
    fn test_asset_type_parse() {
        assert_eq!("js".parse::<AssetType>().unwrap(), AssetType::Js);
        assert_eq!("css".parse::<AssetType>().unwrap(), AssetType::Css);
        assert!(matches!(
            "png".parse::<AssetType>(),
            Err(AssetError::InvalidIdentifier { field: "type", .. })
        ));
    }

    #[test]
    fn test_package_key_defaults() {
        let js = package_key("acme", AssetType::Js, "widget", "2.3.1", None, None).unwrap();
        assert_eq!(js.as_str(), "acme/js/widget/2.3.1/esm/index.js");

        let css = package_key("acme", AssetType::Css, "theme", "1.0.0", None, None).unwrap();
        assert_eq!(css.as_str(), "acme/css/theme/1.0.0/default/index.css");
    }

    #[test]
    fn test_package_key_rejects_bad_version() {
        let err = package_key("acme", AssetType::Js, "widget", "latest", None, None).unwrap_err();
        assert!(matches!(err, AssetError::InvalidVersion(_)));
    }

    #[test]
    fn test_package_key_round_trips() {
        let cases = [
            ("acme", AssetType::Js, "widget", "2.3.1", None, None),
            ("acme", AssetType::Css, "theme", "0.0.1-beta.2", Some("print"), Some("main.css")),
            ("o_1", AssetType::Js, "n-2", "10.20.30+build.5", Some("cjs"), Some("bundle.min.js")),
        ];
        for (org, ty, name, ver, subtype, file) in cases {
            let key = package_key(org, ty, name, ver, subtype, file).unwrap();
            let parsed = parse_package_key(key.as_str()).unwrap();
            assert_eq!(parsed.org, org);
            assert_eq!(parsed.asset_type, ty);
            assert_eq!(parsed.name, name);
            assert_eq!(parsed.version, ver);
            assert_eq!(parsed.subtype, subtype.unwrap_or(ty.default_subtype()));
            assert_eq!(parsed.file, file.unwrap_or(ty.default_file()));
            assert_eq!(parsed.key(), key);
        }
    }

    #[test]
    fn test_parse_package_key_rejects_wrong_shape() {
        assert!(parse_package_key("acme/js/widget").is_err());
        assert!(parse_package_key("acme/js/widget/1.0.0/esm/index.js/extra").is_err());
        assert!(parse_package_key("acme/js/../1.0.0/esm/index.js").is_err());
    }

    #[test]
    fn test_document_keys() {
        assert_eq!(
            alias_table_key("acme", AssetType::Js).unwrap().as_str(),
            "acme/js/alias.json"
        );
        assert_eq!(
            import_map_key("acme", AssetType::Css).unwrap().as_str(),
            "acme/css/import-map.json"
        );
        assert!(import_map_key("../acme", AssetType::Js).is_err());
    }

    #[test]
    fn test_with_file_name() {
        let key = package_key("acme", AssetType::Js, "widget", "1.0.0", None, None).unwrap();
        let map = key.with_file_name("index.js.map").unwrap();
        assert_eq!(map.as_str(), "acme/js/widget/1.0.0/esm/index.js.map");
        assert!(key.with_file_name("../x").is_err());
    }

    #[test]
    fn test_routes() {
        assert_eq!(
            alias_route("acme", AssetType::Js, "widget", "stable").unwrap(),
            "a/acme/js/widget/stable"
        );
        assert_eq!(
            import_map_route("acme", AssetType::Js).unwrap(),
            "import-map/acme/js"
        );
    }
}

//! Import-map handlers.

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::info;

use crate::bearer::{Incoming, Outgoing};
use crate::config::ServerConfig;
use crate::domain::{ImportMap, ImportMapEntry};
use crate::errors::AssetError;
use crate::ingest::{FormLimits, Pipeline, Stage};
use crate::path::{self, alias_route, import_map_key, import_map_route, package_key, package_route};
use crate::path::AssetType;
use crate::AppState;

/// Expand the `name@version` / `name@alias` shorthand into a public URL.
///
/// Anything else (a URL, a path, a scoped name) is returned unchanged.
pub fn expand_address(
    server: &ServerConfig,
    org: &str,
    asset_type: AssetType,
    address: &str,
) -> String {
    if address.contains("://") || address.contains('/') {
        return address.to_string();
    }
    let Some((name, target)) = address.split_once('@') else {
        return address.to_string();
    };
    if path::identifier("name", name).is_err() {
        return address.to_string();
    }

    if path::version(target).is_ok() {
        if let Ok(key) = package_key(org, asset_type, name, target, None, None) {
            return server.public_url_for(&package_route(&key));
        }
    } else if let Ok(route) = alias_route(org, asset_type, name, target) {
        return server.public_url_for(&route);
    }
    address.to_string()
}

/// Fetch the import map for an organization and type.
#[utoipa::path(
    get,
    path = "/import-map/{org}/{type}",
    tag = "ImportMap",
    operation_id = "GetImportMap",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
    ),
    responses(
        (status = 200, description = "Import map document (empty when none is stored)"),
        (status = 400, description = "Invalid or missing parameter"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn get_import_map(
    state: Arc<AppState>,
    incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    let org = incoming.require("org")?;
    let asset_type = incoming.asset_type()?;
    let key = import_map_key(org, asset_type)?;

    let map = state
        .documents
        .read_cached(&state.import_maps, &key)
        .await?
        .unwrap_or_default();
    let body = serde_json::to_value(&map)
        .map_err(|e| AssetError::BackendUnavailable(anyhow::anyhow!("serializing {key}: {e}")))?;
    Ok(Outgoing::json(body))
}

/// Set one specifier in an import map.
#[utoipa::path(
    put,
    path = "/import-map/{org}/{type}",
    tag = "ImportMap",
    operation_id = "PutImportMapEntry",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
    ),
    request_body(
        content_type = "multipart/form-data",
        description = "Fields `specifier` and `address`"
    ),
    responses(
        (status = 200, description = "Entry stored"),
        (status = 400, description = "Invalid parameter or entry"),
        (status = 409, description = "Document busy"),
        (status = 413, description = "Form too large"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn put_import_map_entry(
    state: Arc<AppState>,
    mut incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    let org = incoming.require("org")?.to_string();
    let asset_type = incoming.asset_type()?;
    let key = import_map_key(&org, asset_type)?;
    let mut pipeline = Pipeline::start("import_map.put", key.to_string());

    let limits = FormLimits::fields(&state.config.limits);
    let received = super::read_text_form(&mut incoming, &limits).await;
    let mut fields = pipeline.finish_on_error(received)?;

    pipeline.advance(Stage::Validating);
    let entry = ImportMapEntry::new(fields.remove("specifier"), fields.remove("address"))
        .map(|mut entry| {
            entry.address = expand_address(&state.config.server, &org, asset_type, &entry.address);
            entry
        });
    let entry = pipeline.finish_on_error(entry)?;
    let specifier = entry.specifier.clone();

    let result = state
        .documents
        .update(&key, &state.import_maps, &mut pipeline, |map: &mut ImportMap| {
            map.set_import(entry)
        })
        .await;
    pipeline.finish(result)?;

    info!("import map {}: set {}", key, specifier);
    let url = state
        .config
        .server
        .public_url_for(&import_map_route(&org, asset_type)?);
    Ok(Outgoing::success(StatusCode::OK, url))
}

/// Remove one specifier from an import map.  Removing an absent specifier
/// succeeds.
#[utoipa::path(
    delete,
    path = "/import-map/{org}/{type}/{specifier}",
    tag = "ImportMap",
    operation_id = "DeleteImportMapEntry",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("specifier" = String, Path, description = "Specifier to remove; may contain `/`"),
    ),
    responses(
        (status = 200, description = "Entry removed (or was absent)"),
        (status = 400, description = "Invalid or missing parameter"),
        (status = 409, description = "Document busy"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn delete_import_map_entry(
    state: Arc<AppState>,
    incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    let org = incoming.require("org")?;
    let asset_type = incoming.asset_type()?;
    let specifier = incoming.require("specifier")?.trim_start_matches('/');
    if specifier.is_empty() {
        return Err(AssetError::MissingParameter("specifier"));
    }
    let key = import_map_key(org, asset_type)?;
    let mut pipeline = Pipeline::start("import_map.delete", key.to_string());

    let result = state
        .documents
        .update(&key, &state.import_maps, &mut pipeline, |map: &mut ImportMap| {
            map.remove_import(specifier)
        })
        .await;
    let (_, changed) = pipeline.finish(result)?;

    if changed {
        info!("import map {}: removed {}", key, specifier);
    }
    let url = state
        .config
        .server
        .public_url_for(&import_map_route(org, asset_type)?);
    Ok(Outgoing::success(StatusCode::OK, url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::File;
    use crate::handlers::testing::{
        aborted_form_request, form_request, json_body, request, state_with,
    };
    use crate::sink::backend::write_all;
    use crate::sink::memory::MemorySink;
    use crate::sink::testing::SlowSink;
    use bytes::Bytes;
    use std::time::Duration;

    const ROUTE: [(&str, &str); 2] = [("org", "acme"), ("type", "js")];

    async fn stored(sink: &MemorySink) -> serde_json::Value {
        let object = sink.get("acme/js/import-map.json").await.unwrap();
        serde_json::from_slice(&object.data).unwrap()
    }

    #[tokio::test]
    async fn test_put_creates_document() {
        let sink = MemorySink::new();
        let state = state_with(Arc::new(sink.clone()));

        let outcome = put_import_map_entry(
            state,
            form_request(&ROUTE, &[("specifier", "lit"), ("address", "https://cdn/lit.js")]),
        )
        .await
        .unwrap();

        assert_eq!(
            json_body(outcome).await,
            serde_json::json!({"success": true, "url": "http://localhost:4001/import-map/acme/js"})
        );
        assert_eq!(
            stored(&sink).await,
            serde_json::json!({"imports": {"lit": "https://cdn/lit.js"}})
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_specifier() {
        let sink = MemorySink::new();
        write_all(
            &sink,
            &File::json(import_map_key("acme", AssetType::Js).unwrap()),
            Bytes::from(r#"{"imports":{"a":"x"}}"#),
        )
        .await
        .unwrap();
        let state = state_with(Arc::new(sink.clone()));

        put_import_map_entry(state, form_request(&ROUTE, &[("specifier", "a"), ("address", "y")]))
            .await
            .unwrap();

        assert_eq!(stored(&sink).await, serde_json::json!({"imports": {"a": "y"}}));
    }

    #[tokio::test]
    async fn test_empty_address_is_rejected_without_write() {
        let sink = MemorySink::new();
        write_all(
            &sink,
            &File::json(import_map_key("acme", AssetType::Js).unwrap()),
            Bytes::from(r#"{"imports":{"a":"x"}}"#),
        )
        .await
        .unwrap();
        let state = state_with(Arc::new(sink.clone()));

        let result = put_import_map_entry(
            state,
            form_request(&ROUTE, &[("specifier", "b"), ("address", "")]),
        )
        .await;

        assert!(matches!(result, Err(AssetError::InvalidEntry(_))));
        assert_eq!(stored(&sink).await, serde_json::json!({"imports": {"a": "x"}}));
    }

    #[tokio::test]
    async fn test_oversized_form_is_rejected_without_write() {
        let sink = MemorySink::new();
        let state = state_with(Arc::new(sink.clone()));
        let huge = "x".repeat(10_000);

        let result = put_import_map_entry(
            state,
            form_request(&ROUTE, &[("specifier", "a"), ("address", huge.as_str())]),
        )
        .await;

        assert!(matches!(result, Err(AssetError::PayloadTooLarge(_))));
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_aborted_upload_leaves_document_untouched() {
        let sink = MemorySink::new();
        write_all(
            &sink,
            &File::json(import_map_key("acme", AssetType::Js).unwrap()),
            Bytes::from(r#"{"imports":{"a":"x"}}"#),
        )
        .await
        .unwrap();
        let before = sink.get("acme/js/import-map.json").await.unwrap().data;
        let state = state_with(Arc::new(sink.clone()));

        let result = put_import_map_entry(
            state,
            aborted_form_request(&ROUTE, &[("specifier", "b"), ("address", "https://cdn/b.js")]),
        )
        .await;

        assert!(matches!(result, Err(AssetError::Aborted(_))));
        assert_eq!(sink.get("acme/js/import-map.json").await.unwrap().data, before);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_both_entries() {
        let sink = Arc::new(SlowSink::new(Duration::from_millis(50)));
        let state = state_with(sink.clone());

        let a = put_import_map_entry(
            state.clone(),
            form_request(&ROUTE, &[("specifier", "a"), ("address", "1")]),
        );
        let b = put_import_map_entry(
            state.clone(),
            form_request(&ROUTE, &[("specifier", "b"), ("address", "2")]),
        );
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert_eq!(
            stored(&sink.inner).await,
            serde_json::json!({"imports": {"a": "1", "b": "2"}})
        );
    }

    #[tokio::test]
    async fn test_delete_missing_specifier_is_noop() {
        let sink = MemorySink::new();
        write_all(
            &sink,
            &File::json(import_map_key("acme", AssetType::Js).unwrap()),
            Bytes::from(r#"{"imports":{"a":"x"}}"#),
        )
        .await
        .unwrap();
        let state = state_with(Arc::new(sink.clone()));

        let outcome = delete_import_map_entry(
            state,
            request(&[("org", "acme"), ("type", "js"), ("specifier", "zzz")]),
        )
        .await
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(stored(&sink).await, serde_json::json!({"imports": {"a": "x"}}));
    }

    #[tokio::test]
    async fn test_delete_scoped_specifier() {
        let sink = MemorySink::new();
        let state = state_with(Arc::new(sink.clone()));
        put_import_map_entry(
            state.clone(),
            form_request(&ROUTE, &[("specifier", "@lit/reactive"), ("address", "https://cdn/r.js")]),
        )
        .await
        .unwrap();
        put_import_map_entry(
            state.clone(),
            form_request(&ROUTE, &[("specifier", "keep"), ("address", "https://cdn/k.js")]),
        )
        .await
        .unwrap();

        delete_import_map_entry(
            state,
            request(&[("org", "acme"), ("type", "js"), ("specifier", "@lit/reactive")]),
        )
        .await
        .unwrap();

        assert_eq!(
            stored(&sink).await,
            serde_json::json!({"imports": {"keep": "https://cdn/k.js"}})
        );
    }

    #[tokio::test]
    async fn test_get_missing_document_is_empty_map() {
        let state = state_with(Arc::new(MemorySink::new()));
        let outcome = get_import_map(state, request(&ROUTE)).await.unwrap();
        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(json_body(outcome).await, serde_json::json!({"imports": {}}));
    }

    #[tokio::test]
    async fn test_get_reflects_latest_write() {
        let state = state_with(Arc::new(MemorySink::new()));
        put_import_map_entry(
            state.clone(),
            form_request(&ROUTE, &[("specifier", "a"), ("address", "1")]),
        )
        .await
        .unwrap();
        let first = json_body(get_import_map(state.clone(), request(&ROUTE)).await.unwrap()).await;
        assert_eq!(first, serde_json::json!({"imports": {"a": "1"}}));

        put_import_map_entry(
            state.clone(),
            form_request(&ROUTE, &[("specifier", "a"), ("address", "2")]),
        )
        .await
        .unwrap();
        let second = json_body(get_import_map(state, request(&ROUTE)).await.unwrap()).await;
        assert_eq!(second, serde_json::json!({"imports": {"a": "2"}}));
    }

    #[test]
    fn test_expand_address_shorthand() {
        let server = ServerConfig::default();
        assert_eq!(
            expand_address(&server, "acme", AssetType::Js, "widget@2.3.1"),
            "http://localhost:4001/pkg/acme/js/widget/2.3.1/esm/index.js"
        );
        assert_eq!(
            expand_address(&server, "acme", AssetType::Css, "theme@stable"),
            "http://localhost:4001/a/acme/css/theme/stable"
        );
        for unchanged in [
            "https://cdn/lit.js",
            "@lit/reactive-element",
            "./local.js",
            "plain",
            "bad name@1.0.0",
        ] {
            assert_eq!(
                expand_address(&server, "acme", AssetType::Js, unchanged),
                unchanged
            );
        }
    }
}

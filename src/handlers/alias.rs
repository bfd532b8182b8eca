//! Alias handlers: resolve, upsert and delete named version pointers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::Deserialize;
use tracing::info;

use crate::bearer::{Incoming, Outgoing};
use crate::domain::{resolve_record, Alias, AliasTable};
use crate::errors::AssetError;
use crate::ingest::{FormLimits, Pipeline, Stage};
use crate::path::{self, alias_route, alias_table_key, package_route, AssetType};
use crate::AppState;

/// The four identifiers every alias operation requires, validated.
struct AliasParams<'a> {
    org: &'a str,
    asset_type: AssetType,
    name: &'a str,
    alias: &'a str,
}

impl<'a> AliasParams<'a> {
    fn from_request(incoming: &'a Incoming) -> Result<Self, AssetError> {
        let org = incoming.require("org")?;
        let asset_type = incoming.asset_type()?;
        let name = incoming.require("name")?;
        let alias = incoming.require("alias")?;
        path::identifier("org", org)?;
        path::identifier("name", name)?;
        path::identifier("alias", alias)?;
        Ok(Self {
            org,
            asset_type,
            name,
            alias,
        })
    }

    fn public_url(&self, state: &AppState) -> Result<String, AssetError> {
        let route = alias_route(self.org, self.asset_type, self.name, self.alias)?;
        Ok(state.config.server.public_url_for(&route))
    }
}

/// Alias target fields as submitted.  Either individual form fields or a
/// JSON object in a `data` field.
#[derive(Debug, Default, Deserialize)]
struct AliasForm {
    version: Option<String>,
    subtype: Option<String>,
    file: Option<String>,
}

impl AliasForm {
    fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, AssetError> {
        if let Some(data) = fields.remove("data") {
            return serde_json::from_str(&data).map_err(|e| {
                AssetError::InvalidEntry(format!("data field is not a JSON alias object: {e}"))
            });
        }
        Ok(Self {
            version: fields.remove("version"),
            subtype: fields.remove("subtype"),
            file: fields.remove("file"),
        })
    }
}

/// Resolve an alias to a redirect at the artifact it points at.
#[utoipa::path(
    get,
    path = "/a/{org}/{type}/{name}/{alias}",
    tag = "Alias",
    operation_id = "GetAlias",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("name" = String, Path, description = "Package name"),
        ("alias" = String, Path, description = "Alias name"),
    ),
    responses(
        (status = 302, description = "Redirect to the aliased artifact"),
        (status = 400, description = "Invalid or missing parameter"),
        (status = 404, description = "Alias not found")
    )
)]
pub async fn get_alias(state: Arc<AppState>, incoming: Incoming) -> Result<Outgoing, AssetError> {
    let params = AliasParams::from_request(&incoming)?;
    let key = alias_table_key(params.org, params.asset_type)?;

    let table = state.documents.read_cached(&state.aliases, &key).await?;
    let Some(record) = table
        .as_ref()
        .and_then(|t| t.get(params.name, params.alias))
    else {
        return Ok(Outgoing::not_found(format!(
            "alias {}/{}/{}/{} does not exist",
            params.org, params.asset_type, params.name, params.alias
        )));
    };

    // The table may have been edited out of band; a bad record is a
    // storage fault, not a caller error.
    let target =
        resolve_record(params.org, params.asset_type, params.name, record).map_err(|e| {
            AssetError::BackendUnavailable(anyhow::anyhow!(
                "stored alias {}/{}/{}/{} is invalid: {e}",
                params.org,
                params.asset_type,
                params.name,
                params.alias
            ))
        })?;
    let location = state
        .config
        .server
        .public_url_for(&package_route(&target.key()));
    Ok(Outgoing::redirect(location))
}

/// Create or overwrite an alias.
#[utoipa::path(
    put,
    path = "/a/{org}/{type}/{name}/{alias}",
    tag = "Alias",
    operation_id = "PutAlias",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("name" = String, Path, description = "Package name"),
        ("alias" = String, Path, description = "Alias name"),
    ),
    request_body(
        content_type = "multipart/form-data",
        description = "Fields `version`, optional `subtype` and `file`, or a JSON `data` field"
    ),
    responses(
        (status = 200, description = "Alias stored"),
        (status = 400, description = "Invalid parameter, version or form"),
        (status = 409, description = "Document busy"),
        (status = 413, description = "Form too large"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn put_alias(
    state: Arc<AppState>,
    mut incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    // Validate the route before touching the body.
    let asset_type = AliasParams::from_request(&incoming)?.asset_type;
    let key = alias_table_key(incoming.require("org")?, asset_type)?;
    let mut pipeline = Pipeline::start("alias.put", key.to_string());

    let limits = FormLimits::fields(&state.config.limits);
    let received = super::read_text_form(&mut incoming, &limits).await;
    let fields = pipeline.finish_on_error(received)?;

    pipeline.advance(Stage::Validating);
    let params = AliasParams::from_request(&incoming)?;
    let validated = AliasForm::from_fields(fields).and_then(|form| {
        let version = form
            .version
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(AssetError::MissingParameter("version"))?;
        Alias::new(
            params.org,
            params.asset_type,
            params.name,
            params.alias,
            version,
            form.subtype.as_deref(),
            form.file.as_deref(),
        )
    });
    let alias = pipeline.finish_on_error(validated)?;

    let result = state
        .documents
        .update(&key, &state.aliases, &mut pipeline, |table: &mut AliasTable| {
            table.set(&alias.name, &alias.alias, alias.record.clone())
        })
        .await;
    pipeline.finish(result)?;

    info!(
        "alias {}/{}/{}/{} -> {}",
        alias.org, alias.asset_type, alias.name, alias.alias, alias.record.version
    );
    Ok(Outgoing::success(StatusCode::OK, params.public_url(&state)?))
}

/// Remove an alias.  Removing an absent alias succeeds.
#[utoipa::path(
    delete,
    path = "/a/{org}/{type}/{name}/{alias}",
    tag = "Alias",
    operation_id = "DeleteAlias",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("name" = String, Path, description = "Package name"),
        ("alias" = String, Path, description = "Alias name"),
    ),
    responses(
        (status = 200, description = "Alias removed (or was absent)"),
        (status = 400, description = "Invalid or missing parameter"),
        (status = 409, description = "Document busy"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn delete_alias(
    state: Arc<AppState>,
    incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    let params = AliasParams::from_request(&incoming)?;
    let key = alias_table_key(params.org, params.asset_type)?;
    let mut pipeline = Pipeline::start("alias.delete", key.to_string());

    let result = state
        .documents
        .update(&key, &state.aliases, &mut pipeline, |table: &mut AliasTable| {
            table.remove(params.name, params.alias)
        })
        .await;
    let (_, changed) = pipeline.finish(result)?;

    if changed {
        info!(
            "alias {}/{}/{}/{} removed",
            params.org, params.asset_type, params.name, params.alias
        );
    }
    Ok(Outgoing::success(StatusCode::OK, params.public_url(&state)?))
}

//! Package artifact handlers: publish, fetch and unpublish.

use std::sync::Arc;

use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use tracing::{info, warn};

use crate::bearer::{Incoming, Outgoing};
use crate::domain::File;
use crate::errors::AssetError;
use crate::ingest::{FormLimits, FormPart, FormReader, Pipeline, Stage};
use crate::path::{package_route, PackageRef, StorageKey};
use crate::sink::backend::{exists, write_all};
use crate::sink::{Sink, SinkWriter};
use crate::AppState;

/// Artifacts are immutable per version.
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

fn package_from_request(incoming: &Incoming) -> Result<PackageRef, AssetError> {
    let org = incoming.require("org")?;
    let asset_type = incoming.asset_type()?;
    let name = incoming.require("name")?;
    let version = incoming.require("version")?;
    PackageRef::new(
        org,
        asset_type,
        name,
        version,
        incoming.param("subtype"),
        incoming.param("file"),
    )
}

/// Stream one form part into a new writer at `file`.  The writer comes
/// back unclosed: nothing is visible at the key until the caller closes
/// it, and dropping it discards the bytes.  An empty part is rejected.
async fn stream_part(
    sink: &dyn Sink,
    file: &File,
    part: &mut FormPart,
) -> Result<(Box<dyn SinkWriter>, u64), AssetError> {
    let mut writer = sink.write(file).await?;
    let mut received = 0u64;
    while let Some(chunk) = part.chunk().await? {
        received += chunk.len() as u64;
        writer.write(chunk).await?;
    }
    if received == 0 {
        return Err(AssetError::InvalidEntry(format!(
            "part {} is empty",
            part.name()
        )));
    }
    Ok((writer, received))
}

/// Read a whole form part into memory.  Bounded by the part's ceiling.
async fn buffer_part(part: &mut FormPart) -> Result<Bytes, AssetError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = part.chunk().await? {
        buf.extend_from_slice(&chunk);
    }
    if buf.is_empty() {
        return Err(AssetError::InvalidEntry(format!(
            "part {} is empty",
            part.name()
        )));
    }
    Ok(buf.freeze())
}

/// An upload form received in full, with nothing committed yet.
struct ReceivedArtifacts {
    artifact: Box<dyn SinkWriter>,
    artifact_bytes: u64,
    source_map: Option<Bytes>,
}

/// Read the whole upload form.  The `file` part streams into an open
/// writer and the optional `map` part is buffered; any failure here
/// leaves the sink untouched.
async fn receive_artifacts(
    state: &AppState,
    artifact: &File,
    reader: &mut FormReader,
) -> Result<ReceivedArtifacts, AssetError> {
    let mut file_part: Option<(Box<dyn SinkWriter>, u64)> = None;
    let mut source_map: Option<Bytes> = None;

    while let Some(mut part) = reader.next_part().await? {
        let name = part.name().to_string();
        match name.as_str() {
            "file" if file_part.is_some() => {
                return Err(AssetError::InvalidEntry(
                    "form has more than one file part".to_string(),
                ));
            }
            "file" => {
                file_part = Some(stream_part(state.sink.as_ref(), artifact, &mut part).await?);
            }
            "map" if source_map.is_some() => {
                return Err(AssetError::InvalidEntry(
                    "form has more than one map part".to_string(),
                ));
            }
            "map" => source_map = Some(buffer_part(&mut part).await?),
            _ => {
                warn!("ignoring unexpected form part {:?}", name);
                part.text().await?;
            }
        }
    }

    let Some((writer, artifact_bytes)) = file_part else {
        return Err(AssetError::InvalidEntry(
            "form has no file part".to_string(),
        ));
    };
    Ok(ReceivedArtifacts {
        artifact: writer,
        artifact_bytes,
        source_map,
    })
}

/// Commit a received upload: the artifact first, then its source map.
/// Keys that held nothing before this call are pushed onto `created`.
async fn commit_artifacts(
    sink: &dyn Sink,
    artifact: &File,
    map: &File,
    received: ReceivedArtifacts,
    created: &mut Vec<StorageKey>,
) -> Result<(), AssetError> {
    let replaced = exists(sink, artifact.key()).await?;
    received.artifact.close().await?;
    info!("stored {} ({} bytes)", artifact.key(), received.artifact_bytes);
    if !replaced {
        created.push(artifact.key().clone());
    }

    if let Some(data) = received.source_map {
        let bytes = data.len();
        write_all(sink, map, data).await?;
        info!("stored {} ({} bytes)", map.key(), bytes);
    }
    Ok(())
}

/// Best-effort removal of keys a failed publish created.
async fn roll_back(sink: &dyn Sink, created: &[StorageKey]) {
    for key in created {
        if let Err(err) = sink.delete(key).await {
            warn!("rollback of {} failed: {}", key, err);
        } else {
            warn!("rolled back {}", key);
        }
    }
}

/// Publish an artifact (and optional source map).
#[utoipa::path(
    post,
    path = "/pkg/{org}/{type}/{name}/{version}",
    tag = "Package",
    operation_id = "PublishPackage",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("name" = String, Path, description = "Package name"),
        ("version" = String, Path, description = "Semantic version"),
    ),
    request_body(
        content_type = "multipart/form-data",
        description = "Part `file` with the artifact, optional part `map` with its source map"
    ),
    responses(
        (status = 201, description = "Artifact stored"),
        (status = 400, description = "Invalid parameter, version or form"),
        (status = 413, description = "Artifact too large"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn publish_package(
    state: Arc<AppState>,
    mut incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    let package = package_from_request(&incoming)?;
    let key = package.key();
    let artifact = File::artifact(&package);
    let map = File::json(key.with_file_name(&format!("{}.map", package.file))?);
    let mut pipeline = Pipeline::start("package.publish", key.to_string());

    let limits = FormLimits::artifacts(&state.config.limits);
    let content_type = incoming.content_type().map(str::to_string);
    let reader = incoming
        .take_body()
        .and_then(|body| FormReader::new(content_type.as_deref(), body, &limits));
    let mut reader = pipeline.finish_on_error(reader)?;

    let received = receive_artifacts(&state, &artifact, &mut reader).await;
    let received = pipeline.finish_on_error(received)?;

    pipeline.advance(Stage::Persisting);
    let mut created = Vec::new();
    let committed =
        commit_artifacts(state.sink.as_ref(), &artifact, &map, received, &mut created).await;
    if committed.is_err() {
        roll_back(state.sink.as_ref(), &created).await;
    }
    pipeline.finish(committed)?;

    metrics::counter!(
        crate::metrics::ARTIFACTS_PUBLISHED_TOTAL,
        "type" => package.asset_type.as_str()
    )
    .increment(1);

    let url = state.config.server.public_url_for(&package_route(&key));
    Ok(Outgoing::success(StatusCode::CREATED, url))
}

/// Stream a stored artifact.
#[utoipa::path(
    get,
    path = "/pkg/{org}/{type}/{name}/{version}/{subtype}/{file}",
    tag = "Package",
    operation_id = "GetPackage",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("name" = String, Path, description = "Package name"),
        ("version" = String, Path, description = "Semantic version"),
        ("subtype" = String, Path, description = "Build subtype (defaults per type)"),
        ("file" = String, Path, description = "File name (defaults per type)"),
    ),
    responses(
        (status = 200, description = "Artifact bytes"),
        (status = 400, description = "Invalid parameter or version"),
        (status = 404, description = "Artifact not found"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn get_package(state: Arc<AppState>, incoming: Incoming) -> Result<Outgoing, AssetError> {
    let package = package_from_request(&incoming)?;
    let file = File::artifact(&package);
    let stream = state.sink.read(file.key()).await?;
    Ok(Outgoing::stream(file.content_type(), stream).with_cache_control(IMMUTABLE))
}

/// Remove a stored artifact.  Removing an absent artifact succeeds.
#[utoipa::path(
    delete,
    path = "/pkg/{org}/{type}/{name}/{version}/{subtype}/{file}",
    tag = "Package",
    operation_id = "DeletePackage",
    params(
        ("org" = String, Path, description = "Organization"),
        ("type" = String, Path, description = "Asset type: js or css"),
        ("name" = String, Path, description = "Package name"),
        ("version" = String, Path, description = "Semantic version"),
        ("subtype" = String, Path, description = "Build subtype"),
        ("file" = String, Path, description = "File name"),
    ),
    responses(
        (status = 200, description = "Artifact removed (or was absent)"),
        (status = 400, description = "Invalid parameter or version"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn delete_package(
    state: Arc<AppState>,
    incoming: Incoming,
) -> Result<Outgoing, AssetError> {
    incoming.require("subtype")?;
    incoming.require("file")?;
    let package = package_from_request(&incoming)?;
    let key = package.key();

    state.sink.delete(&key).await?;
    info!("deleted {}", key);

    let url = state.config.server.public_url_for(&package_route(&key));
    Ok(Outgoing::success(StatusCode::OK, url))
}

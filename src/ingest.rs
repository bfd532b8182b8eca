//! Streaming multipart ingestion.
//!
//! [`FormReader`] consumes a request body as it arrives and yields form
//! parts, enforcing byte and part-count ceilings while parsing.  Nothing is
//! buffered ahead of the parser; a field's bytes are only held once the
//! caller asks for its text.
//!
//! [`Pipeline`] tracks one fetch-merge-persist run through its stages:
//!
//! ```text
//! Receiving -> Validating -> Merging -> Persisting -> Done
//!     \___________\____________\___________\_______-> Failed
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use futures::TryStreamExt;
use multer::{Constraints, Multipart, SizeLimit};
use tracing::{debug, warn};

use crate::bearer::BodyStream;
use crate::config::LimitsConfig;
use crate::errors::AssetError;

// -- Limits -------------------------------------------------------------------

/// Ceilings applied to one multipart body.
#[derive(Debug, Clone)]
pub struct FormLimits {
    /// Whole-body byte ceiling.
    pub max_bytes: u64,
    /// Maximum number of parts.
    pub max_parts: usize,
    /// Byte ceiling of any one field.
    pub max_field_bytes: u64,
    /// Named fields with their own byte ceiling.
    pub field_overrides: Vec<(&'static str, u64)>,
}

impl FormLimits {
    /// Limits for small text-only forms (import map and alias updates).
    pub fn fields(limits: &LimitsConfig) -> Self {
        Self {
            max_bytes: limits.max_form_bytes,
            max_parts: limits.max_form_parts,
            max_field_bytes: limits.max_field_bytes,
            field_overrides: Vec::new(),
        }
    }

    /// Limits for package uploads: `file` and `map` parts may be as large
    /// as `max_artifact_bytes` each.
    pub fn artifacts(limits: &LimitsConfig) -> Self {
        Self {
            max_bytes: limits
                .max_artifact_bytes
                .saturating_mul(2)
                .saturating_add(limits.max_form_bytes),
            max_parts: limits.max_form_parts,
            max_field_bytes: limits.max_field_bytes,
            field_overrides: vec![
                ("file", limits.max_artifact_bytes),
                ("map", limits.max_artifact_bytes),
            ],
        }
    }

    fn constraints(&self) -> Constraints {
        let mut size = SizeLimit::new()
            .whole_stream(self.max_bytes)
            .per_field(self.max_field_bytes);
        for (name, limit) in &self.field_overrides {
            size = size.for_field(*name, *limit);
        }
        Constraints::new().size_limit(size)
    }
}

/// Translate a parser failure into the request error taxonomy.
fn map_multer_error(err: multer::Error) -> AssetError {
    match err {
        multer::Error::StreamSizeExceeded { limit } => {
            AssetError::PayloadTooLarge(format!("body exceeds {limit} bytes"))
        }
        multer::Error::FieldSizeExceeded { limit, field_name } => AssetError::PayloadTooLarge(
            format!(
                "field {} exceeds {limit} bytes",
                field_name.as_deref().unwrap_or("<unnamed>")
            ),
        ),
        multer::Error::StreamReadFailed(source) => AssetError::Aborted(source.to_string()),
        other => AssetError::MalformedBody(other.to_string()),
    }
}

// -- Reader -------------------------------------------------------------------

/// Incremental multipart parser over a request body.
pub struct FormReader {
    multipart: Multipart<'static>,
    parts: usize,
    max_parts: usize,
}

impl FormReader {
    /// Start parsing `body`.  Fails with `MalformedBody` when the content
    /// type is not `multipart/form-data` with a boundary.
    pub fn new(
        content_type: Option<&str>,
        body: BodyStream,
        limits: &FormLimits,
    ) -> Result<Self, AssetError> {
        let content_type = content_type
            .ok_or_else(|| AssetError::MalformedBody("missing content-type".to_string()))?;
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| AssetError::MalformedBody(e.to_string()))?;

        let counted = body.inspect_ok(|chunk| {
            metrics::counter!(crate::metrics::BYTES_RECEIVED_TOTAL).increment(chunk.len() as u64);
        });

        Ok(Self {
            multipart: Multipart::with_constraints(counted, boundary, limits.constraints()),
            parts: 0,
            max_parts: limits.max_parts,
        })
    }

    /// Next part of the form, or `None` at the closing boundary.
    pub async fn next_part(&mut self) -> Result<Option<FormPart>, AssetError> {
        let Some(field) = self.multipart.next_field().await.map_err(map_multer_error)? else {
            return Ok(None);
        };
        self.parts += 1;
        if self.parts > self.max_parts {
            return Err(AssetError::PayloadTooLarge(format!(
                "form has more than {} parts",
                self.max_parts
            )));
        }
        let name = field.name().unwrap_or_default().to_string();
        debug!("form part {}: name={}", self.parts, name);
        Ok(Some(FormPart { name, field }))
    }

    /// Read the whole form as text fields.  A repeated name keeps the last
    /// value.
    pub async fn collect_fields(mut self) -> Result<HashMap<String, String>, AssetError> {
        let mut fields = HashMap::new();
        while let Some(part) = self.next_part().await? {
            let name = part.name().to_string();
            let value = part.text().await?;
            fields.insert(name, value);
        }
        Ok(fields)
    }
}

/// One part of a multipart form.
pub struct FormPart {
    name: String,
    field: multer::Field<'static>,
}

impl FormPart {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next chunk of the part's data.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, AssetError> {
        self.field.chunk().await.map_err(map_multer_error)
    }

    /// The part's data as text.
    pub async fn text(self) -> Result<String, AssetError> {
        self.field.text().await.map_err(map_multer_error)
    }
}

// -- Pipeline stages ------------------------------------------------------------

/// Stage of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Receiving,
    Validating,
    Merging,
    Persisting,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// Tracks and logs the stages of one fetch-merge-persist run.
///
/// A pipeline dropped before reaching a terminal stage was cancelled,
/// typically by the client going away; that is logged too.
#[derive(Debug)]
pub struct Pipeline {
    operation: &'static str,
    target: String,
    stage: Stage,
}

impl Pipeline {
    pub fn start(operation: &'static str, target: impl Into<String>) -> Self {
        let target = target.into();
        debug!(operation, target = %target, stage = ?Stage::Receiving, "pipeline started");
        Self {
            operation,
            target,
            stage: Stage::Receiving,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, stage: Stage) {
        debug!(
            operation = self.operation,
            target = %self.target,
            from = ?self.stage,
            to = ?stage,
            "pipeline stage"
        );
        self.stage = stage;
    }

    /// Record the outcome of the run and pass it through.
    pub fn finish<T>(&mut self, result: Result<T, AssetError>) -> Result<T, AssetError> {
        match &result {
            Ok(_) => self.advance(Stage::Done),
            Err(err) => {
                warn!(
                    operation = self.operation,
                    target = %self.target,
                    stage = ?self.stage,
                    code = err.code(),
                    "pipeline failed: {err}"
                );
                self.stage = Stage::Failed;
            }
        }
        result
    }

    /// Mark the run failed on error; pass success through unchanged.
    pub fn finish_on_error<T>(&mut self, result: Result<T, AssetError>) -> Result<T, AssetError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => self.finish(Err(err)),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.stage.is_terminal() {
            warn!(
                operation = self.operation,
                target = %self.target,
                stage = ?self.stage,
                "pipeline cancelled before completion"
            );
        }
    }
}

// -- Test helpers -------------------------------------------------------------

/// Encode `fields` as a `multipart/form-data` body.
#[cfg(test)]
pub(crate) fn encode_form(boundary: &str, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// `multipart/form-data` content type for `boundary`.
#[cfg(test)]
pub(crate) fn form_content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

/// A body stream delivering `data` in chunks of `chunk_size` bytes.
#[cfg(test)]
pub(crate) fn chunked_body(data: Vec<u8>, chunk_size: usize) -> BodyStream {
    let chunks: Vec<Result<Bytes, crate::bearer::BoxError>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

//! Resolution handlers.
//!
//! Each handler takes the shared state and an [`Incoming`] bearer and
//! returns an [`Outgoing`] bearer; routing lives in `server.rs`.

pub mod alias;
pub mod import_map;
pub mod package;

use std::collections::HashMap;

use crate::bearer::Incoming;
use crate::errors::AssetError;
use crate::ingest::{FormLimits, FormReader};

/// Parse the request body as a small text-only form.
pub(crate) async fn read_text_form(
    incoming: &mut Incoming,
    limits: &FormLimits,
) -> Result<HashMap<String, String>, AssetError> {
    let content_type = incoming.content_type().map(str::to_string);
    let body = incoming.take_body()?;
    FormReader::new(content_type.as_deref(), body, limits)?
        .collect_fields()
        .await
}

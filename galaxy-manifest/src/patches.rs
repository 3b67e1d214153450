//! Differential-update resolution
//!
//! Queries the patches endpoint for an xdelta3 update between two builds
//! and resolves the per-depot patch manifests into file-level deltas.
//! Three endpoint states mean "no patch": an error body, a missing record,
//! and an empty root manifest between compatible builds.

use galaxy_client::ApiClient;
use serde_json::Value;
use tracing::{debug, trace};

use crate::resolver::chunks_with_offsets;
use crate::types::{FilePatchDiff, Manifest, Patch};
use crate::{Error, Result, v2};

/// The only supported binary diff algorithm
pub const PATCH_ALGORITHM: &str = "xdelta3";

/// Resolve the patch between two builds, if one exists
///
/// Returns `None` when the builds are incompatible, either build is
/// generation 1, or the patch root is the empty-object sentinel. An
/// unexpected algorithm is an [`Error::Unsupported`].
pub async fn get_patch(
    api: &ApiClient,
    new_manifest: &Manifest,
    old_manifest: &Manifest,
    language: &str,
    dlc_product_ids: &[String],
) -> Result<Option<Patch>> {
    if new_manifest.generation != 2 || old_manifest.generation != 2 {
        trace!("patches are generation-2 only");
        return Ok(None);
    }

    let product_id = &new_manifest.base_product_id;
    let info = match api
        .patch_info(product_id, &old_manifest.build_id, &new_manifest.build_id)
        .await
    {
        Ok(info) => info,
        Err(galaxy_client::Error::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if info.get("error").is_some() {
        debug!(
            "no patch between {} and {}: incompatible builds",
            old_manifest.build_id, new_manifest.build_id
        );
        return Ok(None);
    }

    let link = info
        .get("link")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_manifest("patch_info", "missing link"))?;

    let root_value = api.manifest_at(link).await?;
    if root_value
        .as_object()
        .is_some_and(serde_json::Map::is_empty)
    {
        debug!(
            "empty patch root between {} and {}",
            old_manifest.build_id, new_manifest.build_id
        );
        return Ok(None);
    }

    let root: v2::PatchRoot = serde_json::from_value(root_value)
        .map_err(|e| Error::invalid_manifest(link, e.to_string()))?;
    if root.algorithm != PATCH_ALGORITHM {
        return Err(Error::unsupported(format!(
            "patch algorithm {}",
            root.algorithm
        )));
    }

    let mut files = Vec::new();
    for depot in &root.depots {
        if depot.product_id != *product_id && !dlc_product_ids.iter().any(|p| *p == depot.product_id)
        {
            continue;
        }
        if !depot.languages.is_empty()
            && !depot
                .languages
                .iter()
                .any(|l| l == "*" || l.eq_ignore_ascii_case(language))
        {
            continue;
        }

        let details_value = api.v2_patch_manifest(&depot.manifest).await?;
        let details: v2::PatchDepotDetails = serde_json::from_value(details_value)
            .map_err(|e| Error::invalid_manifest(&depot.manifest, e.to_string()))?;

        for item in &details.depot.items {
            let v2::PatchItemRecord::Diff {
                path_source,
                path_target,
                md5_source,
                md5_target,
                chunks,
            } = item;
            files.push(FilePatchDiff {
                source_path: path_source.clone(),
                target_path: path_target.clone(),
                md5_source: md5_source.clone(),
                md5_target: md5_target.clone(),
                chunks: chunks_with_offsets(chunks),
                product_id: depot.product_id.clone(),
            });
        }
    }

    debug!(
        "patch {} -> {}: {} file diffs",
        old_manifest.build_id,
        new_manifest.build_id,
        files.len()
    );

    Ok(Some(Patch {
        algorithm: root.algorithm,
        files,
        client_id: root.client_id,
        client_secret: root.client_secret,
    }))
}

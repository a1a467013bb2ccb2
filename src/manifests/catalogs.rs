use flate2::read::GzDecoder;
use hex;
use sha2::{Digest, Sha256};
use std::fs;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::Archive;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

// read the oci index.json of an image layout
pub fn get_image_index(dir: &str) -> Result<OCISchema, MirrorError> {
    let index = format!("{}/index.json", dir);
    let data = fs::read_to_string(&index)
        .map_err(|e| MirrorError::new(&format!("corrupt layout : reading {} {}", index, e)))?;
    let oci: OCISchema = serde_json::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("corrupt layout : parsing {} {}", index, e)))?;
    Ok(oci)
}

// read a manifest from the blobs/sha256 directory of an image layout
pub fn get_image_manifest(file: &str) -> Result<OCISchema, MirrorError> {
    let data = fs::read_to_string(file)
        .map_err(|e| MirrorError::new(&format!("reading manifest {} {}", file, e)))?;
    let oci: OCISchema = serde_json::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("parsing manifest {} {}", file, e)))?;
    Ok(oci)
}

// read the image config blob (labels, cmd)
pub fn get_operator_config(file: &str) -> Result<OperatorConfigSchema, MirrorError> {
    let data = fs::read_to_string(file)
        .map_err(|e| MirrorError::new(&format!("reading operator config {} {}", file, e)))?;
    let ocs: OperatorConfigSchema = serde_json::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("parsing operator config {} {}", file, e)))?;
    Ok(ocs)
}

pub fn is_multi_manifest_index(oci: &OCISchema) -> bool {
    oci.manifests.as_ref().map_or(0, |m| m.len()) > 1
}

// digests arrive as algorithm:hex - only the hex half names a blob file
pub fn encoded_digest(digest: &str) -> Result<String, MirrorError> {
    let hex_part = match digest.split_once(':') {
        Some((algorithm, hex_part)) if algorithm == "sha256" => hex_part,
        Some(_) => {
            return Err(MirrorError::new(&format!(
                "the digest format is not correct {}",
                digest
            )))
        }
        None => digest,
    };
    if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MirrorError::new(&format!(
            "the digest format is not correct {}",
            digest
        )));
    }
    Ok(hex_part.to_string())
}

// untar the layers of an image, keeping only entries whose path contains
// the label (the catalog configs directory). idempotent : returns
// immediately when to_path/label already exists
pub fn extract_layers_oci(
    log: &Logging,
    from_path: &str,
    to_path: &str,
    label: &str,
    oci: &OCISchema,
) -> Result<(), MirrorError> {
    let label = label.trim_matches('/');
    if Path::new(&format!("{}/{}", to_path, label)).exists() {
        log.debug(&format!("extracted layers already exist under {}", to_path));
        return Ok(());
    }
    let layers = oci
        .layers
        .as_ref()
        .ok_or_else(|| MirrorError::new("manifest has no layers"))?;
    for blob in layers.iter() {
        let digest = encoded_digest(&blob.digest)?;
        let file = format!("{}/{}", from_path, digest);
        let handle = File::open(&file)
            .map_err(|e| MirrorError::new(&format!("layer missing {} {}", file, e)))?;
        untar(log, handle, to_path, label)?;
    }
    Ok(())
}

// untar a single gzipped layer, extracting entries that contain the
// config directory name
fn untar(log: &Logging, gzip_stream: File, path: &str, cfg_dir_name: &str) -> Result<(), MirrorError> {
    let tar = GzDecoder::new(gzip_stream);
    let mut archive = Archive::new(tar);
    let entries = archive
        .entries()
        .map_err(|e| MirrorError::new(&format!("untar: reading entries {}", e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| MirrorError::new(&format!("untar: entry {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| MirrorError::new(&format!("untar: entry path {}", e)))?
            .display()
            .to_string();
        if !name.contains(cfg_dir_name) {
            continue;
        }
        let target = Path::new(path).join(&name);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| MirrorError::new(&format!("untar: mkdir failed {}", e)))?;
        } else if entry.header().entry_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| MirrorError::new(&format!("untar: mkdir failed {}", e)))?;
            }
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| MirrorError::new(&format!("untar: read failed {}", e)))?;
            fs::write(&target, contents)
                .map_err(|e| MirrorError::new(&format!("untar: write failed {}", e)))?;
        } else {
            // only files and directories matter for config layers
            log.trace(&format!("untar: skipping entry {}", name));
        }
    }
    Ok(())
}

// rewrite a multi manifest index.json as a single manifest index whose
// only entry points at the original index (stored as a blob). the copy
// primitive does not accept multi manifest indexes at the top level
pub fn convert_index_to_single_manifest(dir: &str, oci: &OCISchema) -> Result<(), MirrorError> {
    let index_file = format!("{}/index.json", dir);
    let data = fs::read(&index_file)
        .map_err(|e| MirrorError::new(&format!("corrupt layout : reading {} {}", index_file, e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    let digest = hex::encode(hasher.finalize());
    let size = data.len() as i64;

    let blob = format!("{}/blobs/sha256/{}", dir, digest);
    fs::create_dir_all(format!("{}/blobs/sha256", dir))
        .map_err(|e| MirrorError::new(&format!("creating blobs directory {}", e)))?;
    fs::copy(&index_file, &blob)
        .map_err(|e| MirrorError::new(&format!("copying index to blob {}", e)))?;

    let media_type = oci
        .media_type
        .clone()
        .unwrap_or_else(|| crate::mirror::copy::OCI_INDEX_V1.to_string());
    let idx = OCISchema {
        schema_version: oci.schema_version,
        media_type: Some(crate::mirror::copy::OCI_INDEX_V1.to_string()),
        manifests: Some(vec![OCIManifest {
            media_type,
            digest: format!("sha256:{}", digest),
            size,
            annotations: None,
            platform: None,
        }]),
        config: None,
        layers: None,
    };
    let idx_data = serde_json::to_vec(&idx)
        .map_err(|e| MirrorError::new(&format!("serializing index {}", e)))?;
    fs::write(&index_file, idx_data)
        .map_err(|e| MirrorError::new(&format!("writing index.json {}", e)))?;
    Ok(())
}

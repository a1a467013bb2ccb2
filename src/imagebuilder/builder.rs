// module imagebuilder
//
// builds new image layers and appends them to an on-disk oci layout
// without shelling out to a container runtime. the updated layout is
// pushed through the regular copy primitive

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use walkdir::WalkDir;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;
use crate::manifests::catalogs::*;
use crate::mirror::copy::{RegistryInterface, OCI_MANIFEST_V1};

const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

// a gzipped layer blob plus the digests the manifest and config need
#[derive(Debug, Clone)]
pub struct LayerBlob {
    pub data: Vec<u8>,
    pub digest: String,
    pub diff_id: String,
    pub size: i64,
    pub media_type: String,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn finish_layer(uncompressed: Vec<u8>) -> Result<LayerBlob, MirrorError> {
    let diff_id = format!("sha256:{}", sha256_hex(&uncompressed));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| MirrorError::new(&format!("compressing layer {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| MirrorError::new(&format!("compressing layer {}", e)))?;
    Ok(LayerBlob {
        digest: format!("sha256:{}", sha256_hex(&compressed)),
        size: compressed.len() as i64,
        data: compressed,
        diff_id,
        media_type: LAYER_MEDIA_TYPE.to_string(),
    })
}

// build a layer holding the contents of source_path rooted at target_path
// inside the image, uid/gid forced and mtime set to now
pub fn layer_from_path(
    target_path: &str,
    source_path: &str,
    uid: u64,
    gid: u64,
) -> Result<LayerBlob, MirrorError> {
    let mut builder = tar::Builder::new(Vec::new());
    let now = Utc::now().timestamp() as u64;
    let target = target_path.trim_matches('/');

    for entry in WalkDir::new(source_path).into_iter().filter_map(|e| e.ok()) {
        let rel = entry
            .path()
            .strip_prefix(source_path)
            .map_err(|e| MirrorError::new(&format!("relative path {}", e)))?
            .display()
            .to_string();
        if rel.is_empty() {
            continue;
        }
        let name = format!("{}/{}", target, rel);
        let mut header = tar::Header::new_gnu();
        header.set_uid(uid);
        header.set_gid(gid);
        header.set_mtime(now);
        if entry.file_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(|e| MirrorError::new(&format!("adding directory {} {}", name, e)))?;
        } else if entry.file_type().is_file() {
            let contents = fs::read(entry.path())
                .map_err(|e| MirrorError::new(&format!("reading {} {}", rel, e)))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(contents.len() as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, &name, contents.as_slice())
                .map_err(|e| MirrorError::new(&format!("adding file {} {}", name, e)))?;
        }
    }
    let uncompressed = builder
        .into_inner()
        .map_err(|e| MirrorError::new(&format!("finishing layer tar {}", e)))?;
    finish_layer(uncompressed)
}

// a whiteout layer - a single zero length .wh file deleting old content
pub fn delete_layer(old: &str) -> Result<LayerBlob, MirrorError> {
    let mut builder = tar::Builder::new(Vec::new());
    let name = old.trim_start_matches('/');
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(0);
    header.set_cksum();
    builder
        .append_data(&mut header, name, std::io::empty())
        .map_err(|e| MirrorError::new(&format!("adding whiteout {} {}", name, e)))?;
    let uncompressed = builder
        .into_inner()
        .map_err(|e| MirrorError::new(&format!("finishing whiteout tar {}", e)))?;
    finish_layer(uncompressed)
}

// re-root a downloaded tar.gz under target_dir with the given mode/uid/gid
pub fn layer_from_gzip_bytes(
    data: &[u8],
    target_dir: &str,
    mode: u32,
    uid: u64,
    gid: u64,
) -> Result<LayerBlob, MirrorError> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut builder = tar::Builder::new(Vec::new());
    let now = Utc::now().timestamp() as u64;
    let target = target_dir.trim_matches('/');

    let entries = archive
        .entries()
        .map_err(|e| MirrorError::new(&format!("reading graph archive {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| MirrorError::new(&format!("reading graph archive entry {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| MirrorError::new(&format!("reading entry path {}", e)))?
            .display()
            .to_string();
        let rerooted = format!("{}/{}", target, name.trim_start_matches("./"));
        let mut header = tar::Header::new_gnu();
        header.set_uid(uid);
        header.set_gid(gid);
        header.set_mtime(now);
        if entry.header().entry_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            header.set_cksum();
            builder
                .append_data(&mut header, &rerooted, std::io::empty())
                .map_err(|e| MirrorError::new(&format!("adding directory {} {}", rerooted, e)))?;
        } else if entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| MirrorError::new(&format!("reading entry {} {}", rerooted, e)))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(mode);
            header.set_size(contents.len() as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, &rerooted, contents.as_slice())
                .map_err(|e| MirrorError::new(&format!("adding file {} {}", rerooted, e)))?;
        }
    }
    let uncompressed = builder
        .into_inner()
        .map_err(|e| MirrorError::new(&format!("finishing layer tar {}", e)))?;
    finish_layer(uncompressed)
}

fn write_blob(layout_dir: &str, digest: &str, data: &[u8]) -> Result<(), MirrorError> {
    let blobs_dir = format!("{}/blobs/sha256", layout_dir);
    fs::create_dir_all(&blobs_dir)
        .map_err(|e| MirrorError::new(&format!("creating {} {}", blobs_dir, e)))?;
    let file = format!("{}/{}", blobs_dir, encoded_digest(digest)?);
    fs::write(&file, data).map_err(|e| MirrorError::new(&format!("writing blob {} {}", file, e)))?;
    Ok(())
}

// append layers to the layout's image manifest, set the container cmd and
// rewire config/manifest/index. returns the new manifest digest (hex)
pub fn update_layout(
    layout_dir: &str,
    cmd: &[String],
    layers: &[LayerBlob],
) -> Result<String, MirrorError> {
    let index = get_image_index(layout_dir)?;
    let entries = index.manifests.clone().unwrap_or_default();
    let entry = entries
        .first()
        .ok_or_else(|| MirrorError::new("layout index has no manifests"))?;
    let blobs_dir = format!("{}/blobs/sha256", layout_dir);

    // resolve down to an image manifest (the entry may be a nested index)
    let mut manifest_digest = entry.digest.clone();
    let mut manifest = get_image_manifest(&format!(
        "{}/{}",
        blobs_dir,
        encoded_digest(&manifest_digest)?
    ))?;
    for _ in 0..2 {
        if manifest.config.is_some() {
            break;
        }
        let children = manifest.manifests.clone().unwrap_or_default();
        let child = children
            .first()
            .ok_or_else(|| MirrorError::new("layout manifest has no children"))?;
        manifest_digest = child.digest.clone();
        manifest = get_image_manifest(&format!(
            "{}/{}",
            blobs_dir,
            encoded_digest(&manifest_digest)?
        ))?;
    }
    let config_descriptor = manifest
        .config
        .clone()
        .ok_or_else(|| MirrorError::new("layout manifest has no config"))?;

    // image config is read as a raw document so unknown fields survive
    let config_file = format!("{}/{}", blobs_dir, encoded_digest(&config_descriptor.digest)?);
    let config_data = fs::read_to_string(&config_file)
        .map_err(|e| MirrorError::new(&format!("reading image config {} {}", config_file, e)))?;
    let mut config: serde_json::Value = serde_json::from_str(&config_data)
        .map_err(|e| MirrorError::new(&format!("parsing image config {}", e)))?;

    let mut manifest_layers = manifest.layers.clone().unwrap_or_default();
    for layer in layers.iter() {
        write_blob(layout_dir, &layer.digest, &layer.data)?;
        manifest_layers.push(OCIManifest {
            media_type: layer.media_type.clone(),
            digest: layer.digest.clone(),
            size: layer.size,
            annotations: None,
            platform: None,
        });
        let diff_ids = config
            .get_mut("rootfs")
            .and_then(|r| r.get_mut("diff_ids"))
            .and_then(|d| d.as_array_mut())
            .ok_or_else(|| MirrorError::new("image config has no rootfs.diff_ids"))?;
        diff_ids.push(serde_json::Value::String(layer.diff_id.clone()));
    }

    let cmd_value = serde_json::to_value(cmd)
        .map_err(|e| MirrorError::new(&format!("serializing cmd {}", e)))?;
    match config.get_mut("config") {
        Some(container_config) => {
            container_config["Cmd"] = cmd_value;
        }
        None => {
            config["config"] = serde_json::json!({ "Cmd": cmd_value });
        }
    }

    let new_config_data = serde_json::to_vec(&config)
        .map_err(|e| MirrorError::new(&format!("serializing image config {}", e)))?;
    let new_config_digest = format!("sha256:{}", sha256_hex(&new_config_data));
    write_blob(layout_dir, &new_config_digest, &new_config_data)?;

    let new_manifest = OCISchema {
        schema_version: 2,
        media_type: Some(OCI_MANIFEST_V1.to_string()),
        manifests: None,
        config: Some(OCIManifest {
            media_type: config_descriptor.media_type.clone(),
            digest: new_config_digest,
            size: new_config_data.len() as i64,
            annotations: None,
            platform: None,
        }),
        layers: Some(manifest_layers),
    };
    let new_manifest_data = serde_json::to_vec(&new_manifest)
        .map_err(|e| MirrorError::new(&format!("serializing manifest {}", e)))?;
    let new_manifest_digest = sha256_hex(&new_manifest_data);
    write_blob(
        layout_dir,
        &format!("sha256:{}", new_manifest_digest),
        &new_manifest_data,
    )?;

    let new_index = OCISchema {
        schema_version: 2,
        media_type: index.media_type.clone(),
        manifests: Some(vec![OCIManifest {
            media_type: OCI_MANIFEST_V1.to_string(),
            digest: format!("sha256:{}", new_manifest_digest),
            size: new_manifest_data.len() as i64,
            annotations: None,
            platform: None,
        }]),
        config: None,
        layers: None,
    };
    let new_index_data = serde_json::to_vec(&new_index)
        .map_err(|e| MirrorError::new(&format!("serializing index {}", e)))?;
    fs::write(format!("{}/index.json", layout_dir), new_index_data)
        .map_err(|e| MirrorError::new(&format!("writing index.json {}", e)))?;
    Ok(new_manifest_digest)
}

// update the layout then push it through the copy primitive. returns the
// digest of the pushed manifest
pub async fn build_and_push<T: RegistryInterface>(
    log: &Logging,
    reg_con: &T,
    layout_dir: &str,
    destination: &str,
    cmd: &[String],
    layers: &[LayerBlob],
    opts: &MirrorOptions,
) -> Result<String, MirrorError> {
    let digest = update_layout(layout_dir, cmd, layers)?;
    let src = format!("{}{}", OCI_PROTOCOL, layout_dir);
    reg_con
        .copy(log, src, destination.to_string(), opts)
        .await?;
    log.debug(&format!("pushed {} digest {}", destination, digest));
    Ok(digest)
}

// convenience used by tests and the graph builder - a minimal single
// manifest layout with one layer
pub fn scaffold_layout(layout_dir: &str, layer: &LayerBlob) -> Result<(), MirrorError> {
    let config = serde_json::json!({
        "architecture": "amd64",
        "os": "linux",
        "config": { "Env": ["PATH=/usr/bin"] },
        "rootfs": { "type": "layers", "diff_ids": [layer.diff_id] },
    });
    let config_data = serde_json::to_vec(&config)
        .map_err(|e| MirrorError::new(&format!("serializing config {}", e)))?;
    let config_digest = format!("sha256:{}", sha256_hex(&config_data));
    write_blob(layout_dir, &config_digest, &config_data)?;
    write_blob(layout_dir, &layer.digest, &layer.data)?;

    let manifest = OCISchema {
        schema_version: 2,
        media_type: Some(OCI_MANIFEST_V1.to_string()),
        manifests: None,
        config: Some(OCIManifest {
            media_type: "application/vnd.oci.image.config.v1+json".to_string(),
            digest: config_digest,
            size: config_data.len() as i64,
            annotations: None,
            platform: None,
        }),
        layers: Some(vec![OCIManifest {
            media_type: layer.media_type.clone(),
            digest: layer.digest.clone(),
            size: layer.size,
            annotations: None,
            platform: None,
        }]),
    };
    let manifest_data = serde_json::to_vec(&manifest)
        .map_err(|e| MirrorError::new(&format!("serializing manifest {}", e)))?;
    let manifest_digest = format!("sha256:{}", sha256_hex(&manifest_data));
    write_blob(layout_dir, &manifest_digest, &manifest_data)?;

    let index = OCISchema {
        schema_version: 2,
        media_type: Some("application/vnd.oci.image.index.v1+json".to_string()),
        manifests: Some(vec![OCIManifest {
            media_type: OCI_MANIFEST_V1.to_string(),
            digest: manifest_digest,
            size: manifest_data.len() as i64,
            annotations: None,
            platform: None,
        }]),
        config: None,
        layers: None,
    };
    let index_data = serde_json::to_vec(&index)
        .map_err(|e| MirrorError::new(&format!("serializing index {}", e)))?;
    fs::write(format!("{}/index.json", layout_dir), index_data)
        .map_err(|e| MirrorError::new(&format!("writing index.json {}", e)))?;
    fs::write(
        format!("{}/oci-layout", layout_dir),
        "{\"imageLayoutVersion\":\"1.0.0\"}",
    )
    .map_err(|e| MirrorError::new(&format!("writing oci-layout {}", e)))?;
    Ok(())
}

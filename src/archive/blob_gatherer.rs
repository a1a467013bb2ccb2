// module blob gatherer
//
// enumerates every blob digest an image in the cache registry refers to :
// the manifest itself, child manifests for indexes, configs and layers

use hex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::image::reference::parse_ref;
use crate::log::logging::*;
use crate::mirror::copy::RegistryInterface;

fn digest_of(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn blobs_of_manifest(data: &[u8], blobs: &mut HashSet<String>) -> Result<Vec<String>, MirrorError> {
    blobs.insert(digest_of(data));
    let manifest: Manifest = serde_json::from_slice(data)
        .map_err(|e| MirrorError::new(&format!("parsing manifest {}", e)))?;
    let mut children = vec![];
    if let Some(config) = &manifest.config {
        blobs.insert(config.digest.clone());
    }
    if let Some(layers) = &manifest.layers {
        for layer in layers.iter() {
            blobs.insert(layer.digest.clone());
        }
    }
    if manifest.config.is_none() && manifest.layers.is_none() {
        let list: ManifestList = serde_json::from_slice(data)
            .map_err(|e| MirrorError::new(&format!("parsing manifest list {}", e)))?;
        for child in list.manifests.iter() {
            if let Some(digest) = &child.digest {
                children.push(digest.clone());
            }
        }
    }
    Ok(children)
}

pub struct ImageBlobGatherer<'a, T: RegistryInterface> {
    pub reg_con: &'a T,
    pub opts: &'a MirrorOptions,
}

impl<'a, T: RegistryInterface + Send + Sync> ImageBlobGatherer<'a, T> {
    pub async fn gather_blobs(
        &self,
        log: &Logging,
        img_ref: &str,
    ) -> Result<HashSet<String>, MirrorError> {
        let mut blobs = HashSet::new();
        let (data, _) = self
            .reg_con
            .get_manifest(log, img_ref.to_string(), self.opts)
            .await?;
        let children = blobs_of_manifest(&data, &mut blobs)?;

        // child manifests of an index are fetched by digest
        let spec = parse_ref(img_ref)?;
        for child in children.iter() {
            let child_ref = format!(
                "{}{}/{}@{}",
                spec.transport, spec.domain, spec.path_component, child
            );
            let (child_data, _) = self
                .reg_con
                .get_manifest(log, child_ref, self.opts)
                .await?;
            blobs_of_manifest(&child_data, &mut blobs)?;
        }
        Ok(blobs)
    }
}

// module copy - the image copy primitive
//
// everything above this layer plans references; this layer moves manifests
// and blobs between docker registries and on-disk oci layouts

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::Client;
use sha2::{Digest as ShaDigest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::api::schema::*;
use crate::auth::credentials::get_token;
use crate::error::handler::*;
use crate::log::logging::*;

pub const MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.docker.distribution.manifest.list.v2+json";

// the capability interface every phase depends on - keeps registries
// substitutable in tests
#[async_trait]
pub trait RegistryInterface {
    async fn copy(
        &self,
        log: &Logging,
        src: String,
        dest: String,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError>;

    async fn check(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<bool, MirrorError>;

    async fn delete_image(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError>;

    // remote manifest digest (hex, no algorithm prefix)
    async fn get_digest(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<String, MirrorError>;

    // raw manifest bytes plus media type
    async fn get_manifest(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<(Vec<u8>, String), MirrorError>;
}

#[derive(Clone, Debug, Default)]
pub struct ImplRegistryInterface {}

// loopback cache registries always speak plain http
fn base_url(domain: &str) -> String {
    if domain.starts_with("localhost") || domain.starts_with("127.0.0.1") {
        format!("http://{}", domain)
    } else {
        format!("https://{}", domain)
    }
}

fn http_client(tls_verify: bool) -> Result<Client, MirrorError> {
    Client::builder()
        .danger_accept_invalid_certs(!tls_verify)
        .build()
        .map_err(|e| MirrorError::new(&format!("building http client {}", e)))
}

fn encoded(digest: &str) -> String {
    digest.split(':').last().unwrap_or(digest).to_string()
}

// destinations are sometimes written with the trimmed "oci:" form
fn normalize_transport(reference: &str) -> String {
    if reference.starts_with(OCI_PROTOCOL) {
        reference.to_string()
    } else if let Some(path) = reference.strip_prefix(OCI_PROTOCOL_TRIMMED) {
        format!("{}{}", OCI_PROTOCOL, path)
    } else {
        reference.to_string()
    }
}

fn is_index(media_type: &str, manifest: &Manifest) -> bool {
    media_type == MANIFEST_LIST_V2
        || media_type == OCI_INDEX_V1
        || (manifest.config.is_none() && manifest.layers.is_none())
}

// one end of a copy - a docker registry repository plus auth
struct Endpoint {
    client: Client,
    base: String,
    path: String,
    token: String,
}

impl Endpoint {
    async fn new(
        log: &Logging,
        spec: &crate::image::reference::ImageSpec,
        tls_verify: bool,
    ) -> Result<Endpoint, MirrorError> {
        let base = base_url(&spec.domain);
        let token = get_token(
            log,
            spec.domain.clone(),
            spec.path_component.clone(),
            base.clone(),
        )
        .await?;
        Ok(Endpoint {
            client: http_client(tls_verify)?,
            base,
            path: spec.path_component.clone(),
            token,
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn fetch_manifest(&self, reference: &str) -> Result<(Vec<u8>, String), MirrorError> {
        let url = format!("{}/v2/{}/manifests/{}", self.base, self.path, reference);
        let mut req = self.client.get(&url).header("Accept", MANIFEST_ACCEPT);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("fetching manifest {} {}", url, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "fetching manifest {} status {}",
                url,
                res.status()
            )));
        }
        let media_type = res
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(MANIFEST_V2)
            .to_string();
        let body = res
            .bytes()
            .await
            .map_err(|e| MirrorError::new(&format!("reading manifest {} {}", url, e)))?;
        Ok((body.to_vec(), media_type))
    }

    async fn manifest_exists(&self, reference: &str) -> Result<(bool, String), MirrorError> {
        let url = format!("{}/v2/{}/manifests/{}", self.base, self.path, reference);
        let mut req = self.client.head(&url).header("Accept", MANIFEST_ACCEPT);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("checking manifest {} {}", url, e)))?;
        if res.status().is_success() {
            let digest = res
                .headers()
                .get("docker-content-digest")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Ok((true, digest));
        }
        if res.status().as_u16() == 404 || res.status().as_u16() == 401 {
            return Ok((false, String::from("")));
        }
        Err(MirrorError::new(&format!(
            "checking manifest {} status {}",
            url,
            res.status()
        )))
    }

    async fn fetch_blob(&self, digest: &str) -> Result<Vec<u8>, MirrorError> {
        let url = format!("{}/v2/{}/blobs/{}", self.base, self.path, digest);
        let mut req = self.client.get(&url);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("downloading blob {} {}", digest, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "downloading blob {} status {}",
                digest,
                res.status()
            )));
        }
        let body = res
            .bytes()
            .await
            .map_err(|e| MirrorError::new(&format!("reading blob {} {}", digest, e)))?;
        Ok(body.to_vec())
    }

    async fn blob_exists(&self, digest: &str) -> Result<bool, MirrorError> {
        let url = format!("{}/v2/{}/blobs/{}", self.base, self.path, digest);
        let mut req = self.client.head(&url);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("checking blob {} {}", digest, e)))?;
        Ok(res.status().is_success())
    }

    async fn upload_blob(&self, digest: &str, data: Vec<u8>) -> Result<(), MirrorError> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.base, self.path);
        let mut req = self.client.post(&url);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("starting blob upload {} {}", digest, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "starting blob upload {} status {}",
                digest,
                res.status()
            )));
        }
        let location = res
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| MirrorError::new("blob upload did not return a location"))?
            .to_string();
        let absolute = if location.starts_with("http") {
            location
        } else {
            format!("{}{}", self.base, location)
        };
        let separator = if absolute.contains('?') { "&" } else { "?" };
        let put_url = format!("{}{}digest={}", absolute, separator, digest);
        let mut req = self
            .client
            .put(&put_url)
            .header("Content-Type", "application/octet-stream")
            .body(data);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("uploading blob {} {}", digest, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "uploading blob {} status {}",
                digest,
                res.status()
            )));
        }
        Ok(())
    }

    async fn put_manifest(
        &self,
        reference: &str,
        media_type: &str,
        data: Vec<u8>,
    ) -> Result<(), MirrorError> {
        let url = format!("{}/v2/{}/manifests/{}", self.base, self.path, reference);
        let mut req = self
            .client
            .put(&url)
            .header("Content-Type", media_type)
            .body(data);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("pushing manifest {} {}", url, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "pushing manifest {} status {}",
                url,
                res.status()
            )));
        }
        Ok(())
    }

    async fn delete_manifest(&self, digest: &str) -> Result<(), MirrorError> {
        let url = format!("{}/v2/{}/manifests/{}", self.base, self.path, digest);
        let mut req = self.client.delete(&url);
        if !self.token.is_empty() {
            req = req.header("Authorization", self.bearer());
        }
        let res = req
            .send()
            .await
            .map_err(|e| MirrorError::new(&format!("deleting manifest {} {}", url, e)))?;
        if !res.status().is_success() && res.status().as_u16() != 404 {
            return Err(MirrorError::new(&format!(
                "deleting manifest {} status {}",
                url,
                res.status()
            )));
        }
        Ok(())
    }
}

// blob digests referenced by a single image manifest
fn manifest_blobs(data: &[u8]) -> Result<Vec<String>, MirrorError> {
    let manifest: Manifest = serde_json::from_slice(data)
        .map_err(|e| MirrorError::new(&format!("parsing manifest {}", e)))?;
    let mut blobs = vec![];
    if let Some(config) = manifest.config {
        blobs.push(config.digest);
    }
    if let Some(layers) = manifest.layers {
        for layer in layers.iter() {
            blobs.push(layer.digest.clone());
        }
    }
    Ok(blobs)
}

fn index_children(data: &[u8]) -> Result<Vec<Manifest>, MirrorError> {
    let list: ManifestList = serde_json::from_slice(data)
        .map_err(|e| MirrorError::new(&format!("parsing manifest list {}", e)))?;
    Ok(list.manifests)
}

// pick the child manifest for the system platform (linux/amd64)
fn system_child(children: &[Manifest]) -> Result<String, MirrorError> {
    for child in children.iter() {
        if let Some(platform) = &child.platform {
            if platform.architecture == "amd64" && platform.os == "linux" {
                return child
                    .digest
                    .clone()
                    .ok_or_else(|| MirrorError::new("manifest list entry without digest"));
            }
        }
    }
    children
        .first()
        .and_then(|c| c.digest.clone())
        .ok_or_else(|| MirrorError::new("empty manifest list"))
}

impl ImplRegistryInterface {
    // transfer the blobs of one manifest then push the manifest itself
    async fn transfer_manifest(
        &self,
        log: &Logging,
        src: &Endpoint,
        dest: &Endpoint,
        reference: &str,
        media_type: &str,
        data: Vec<u8>,
        parallel_layers: usize,
    ) -> Result<(), MirrorError> {
        let blobs = manifest_blobs(&data)?;
        let mut to_transfer = vec![];
        let mut seen = HashSet::new();
        for blob in blobs.iter() {
            if seen.contains(blob) {
                continue;
            }
            seen.insert(blob.clone());
            if !dest.blob_exists(blob).await? {
                to_transfer.push(blob.clone());
            }
        }
        let width = if parallel_layers == 0 { 1 } else { parallel_layers };
        let results = stream::iter(to_transfer.into_iter().map(|blob| async move {
            let data = src.fetch_blob(&blob).await?;
            log.debug(&format!("transferring blob {}", blob));
            dest.upload_blob(&blob, data).await
        }))
        .buffer_unordered(width)
        .collect::<Vec<Result<(), MirrorError>>>()
        .await;
        for res in results.into_iter() {
            res?;
        }
        dest.put_manifest(reference, media_type, data).await
    }

    async fn copy_docker_to_docker(
        &self,
        log: &Logging,
        src_spec: &crate::image::reference::ImageSpec,
        dest_spec: &crate::image::reference::ImageSpec,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError> {
        let src = Endpoint::new(log, src_spec, opts.src_tls_verify).await?;
        let dest = Endpoint::new(log, dest_spec, opts.dest_tls_verify).await?;

        let src_reference = if !src_spec.digest.is_empty() {
            format!("{}:{}", src_spec.algorithm, src_spec.digest)
        } else {
            src_spec.tag.clone()
        };
        let dest_reference = if !dest_spec.tag.is_empty() {
            dest_spec.tag.clone()
        } else {
            format!("{}:{}", dest_spec.algorithm, dest_spec.digest)
        };

        let (data, media_type) = src.fetch_manifest(&src_reference).await?;
        let parsed: Manifest = serde_json::from_slice(&data)
            .map_err(|e| MirrorError::new(&format!("parsing manifest {}", e)))?;

        if is_index(&media_type, &parsed) {
            let children = index_children(&data)?;
            match opts.multi_arch.as_str() {
                "all" | "index-only" => {
                    for child in children.iter() {
                        let digest = child.digest.clone().ok_or_else(|| {
                            MirrorError::new("manifest list entry without digest")
                        })?;
                        let (child_data, child_type) = src.fetch_manifest(&digest).await?;
                        self.transfer_manifest(
                            log,
                            &src,
                            &dest,
                            &digest,
                            &child_type,
                            child_data,
                            opts.parallel_layers,
                        )
                        .await?;
                    }
                    dest.put_manifest(&dest_reference, &media_type, data).await
                }
                _ => {
                    // system - single platform resolve
                    let digest = system_child(&children)?;
                    let (child_data, child_type) = src.fetch_manifest(&digest).await?;
                    self.transfer_manifest(
                        log,
                        &src,
                        &dest,
                        &dest_reference,
                        &child_type,
                        child_data,
                        opts.parallel_layers,
                    )
                    .await
                }
            }
        } else {
            self.transfer_manifest(
                log,
                &src,
                &dest,
                &dest_reference,
                &media_type,
                data,
                opts.parallel_layers,
            )
            .await
        }
    }

    // pull a docker image into an on-disk oci layout
    async fn copy_docker_to_oci(
        &self,
        log: &Logging,
        src_spec: &crate::image::reference::ImageSpec,
        layout_dir: &str,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError> {
        let src = Endpoint::new(log, src_spec, opts.src_tls_verify).await?;
        let src_reference = if !src_spec.digest.is_empty() {
            format!("{}:{}", src_spec.algorithm, src_spec.digest)
        } else {
            src_spec.tag.clone()
        };
        let (mut data, mut media_type) = src.fetch_manifest(&src_reference).await?;
        let mut parsed: Manifest = serde_json::from_slice(&data)
            .map_err(|e| MirrorError::new(&format!("parsing manifest {}", e)))?;

        if is_index(&media_type, &parsed) && opts.multi_arch != "all" {
            let digest = system_child(&index_children(&data)?)?;
            let resolved = src.fetch_manifest(&digest).await?;
            data = resolved.0;
            media_type = resolved.1;
            parsed = serde_json::from_slice(&data)
                .map_err(|e| MirrorError::new(&format!("parsing manifest {}", e)))?;
        }

        let blobs_dir = format!("{}/blobs/sha256", layout_dir);
        fs::create_dir_all(&blobs_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", blobs_dir, e)))?;

        let mut blobs = manifest_blobs(&data)?;
        if is_index(&media_type, &parsed) {
            // multi arch kept whole - fetch every child and its blobs
            for child in index_children(&data)?.iter() {
                let digest = child
                    .digest
                    .clone()
                    .ok_or_else(|| MirrorError::new("manifest list entry without digest"))?;
                let (child_data, _) = src.fetch_manifest(&digest).await?;
                blobs.append(&mut manifest_blobs(&child_data)?);
                fs::write(format!("{}/{}", blobs_dir, encoded(&digest)), &child_data)
                    .map_err(|e| MirrorError::new(&format!("writing child manifest {}", e)))?;
            }
        }

        let width = if opts.parallel_layers == 0 {
            1
        } else {
            opts.parallel_layers
        };
        let src_ref = &src;
        let blobs_dir_ref = &blobs_dir;
        let results = stream::iter(blobs.into_iter().map(|blob| async move {
            let file = format!("{}/{}", blobs_dir_ref, encoded(&blob));
            if Path::new(&file).exists() {
                return Ok(());
            }
            let data = src_ref.fetch_blob(&blob).await?;
            log.debug(&format!("writing blob {}", blob));
            fs::write(&file, data)
                .map_err(|e| MirrorError::new(&format!("writing blob {} {}", blob, e)))
        }))
        .buffer_unordered(width)
        .collect::<Vec<Result<(), MirrorError>>>()
        .await;
        for res in results.into_iter() {
            res?;
        }

        // the manifest itself is a blob referenced from index.json
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let manifest_digest = hex::encode(hasher.finalize());
        fs::write(format!("{}/{}", blobs_dir, manifest_digest), &data)
            .map_err(|e| MirrorError::new(&format!("writing manifest blob {}", e)))?;

        let index = OCISchema {
            schema_version: 2,
            media_type: Some(OCI_INDEX_V1.to_string()),
            manifests: Some(vec![OCIManifest {
                media_type: media_type.clone(),
                digest: format!("sha256:{}", manifest_digest),
                size: data.len() as i64,
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

    // push an on-disk oci layout to a docker registry
    async fn copy_oci_to_docker(
        &self,
        log: &Logging,
        layout_dir: &str,
        dest_spec: &crate::image::reference::ImageSpec,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError> {
        let dest = Endpoint::new(log, dest_spec, opts.dest_tls_verify).await?;
        let dest_reference = if !dest_spec.tag.is_empty() {
            dest_spec.tag.clone()
        } else {
            "latest".to_string()
        };

        let index_data = fs::read(format!("{}/index.json", layout_dir))
            .map_err(|e| MirrorError::new(&format!("reading index.json {}", e)))?;
        let index: OCISchema = serde_json::from_slice(&index_data)
            .map_err(|e| MirrorError::new(&format!("parsing index.json {}", e)))?;
        let entry = index
            .manifests
            .as_ref()
            .and_then(|m| m.first())
            .ok_or_else(|| MirrorError::new("oci layout index has no manifests"))?;

        let blobs_dir = format!("{}/blobs/sha256", layout_dir);
        self.push_layout_manifest(
            log,
            &dest,
            &blobs_dir,
            &entry.digest,
            &entry.media_type,
            &dest_reference,
        )
        .await
    }

    // pushes a manifest blob from a layout - handles a single level of
    // index nesting (a converted top level index points at an inner index)
    async fn push_layout_manifest(
        &self,
        log: &Logging,
        dest: &Endpoint,
        blobs_dir: &str,
        digest: &str,
        media_type: &str,
        reference: &str,
    ) -> Result<(), MirrorError> {
        let file = format!("{}/{}", blobs_dir, encoded(digest));
        let data = fs::read(&file)
            .map_err(|e| MirrorError::new(&format!("layer missing {} {}", file, e)))?;
        let parsed: Manifest = serde_json::from_slice(&data)
            .map_err(|e| MirrorError::new(&format!("parsing manifest {}", e)))?;

        if is_index(media_type, &parsed) {
            for child in index_children(&data)?.iter() {
                let child_digest = child
                    .digest
                    .clone()
                    .ok_or_else(|| MirrorError::new("manifest list entry without digest"))?;
                let child_type = child
                    .media_type
                    .clone()
                    .unwrap_or_else(|| OCI_MANIFEST_V1.to_string());
                // children are addressed by digest inside the registry
                self.push_single_manifest(log, dest, blobs_dir, &child_digest, &child_type)
                    .await?;
            }
            return dest.put_manifest(reference, media_type, data).await;
        }

        self.push_manifest_blobs(log, dest, blobs_dir, &data).await?;
        dest.put_manifest(reference, media_type, data).await
    }

    async fn push_single_manifest(
        &self,
        log: &Logging,
        dest: &Endpoint,
        blobs_dir: &str,
        digest: &str,
        media_type: &str,
    ) -> Result<(), MirrorError> {
        let file = format!("{}/{}", blobs_dir, encoded(digest));
        let data = fs::read(&file)
            .map_err(|e| MirrorError::new(&format!("layer missing {} {}", file, e)))?;
        self.push_manifest_blobs(log, dest, blobs_dir, &data).await?;
        dest.put_manifest(digest, media_type, data).await
    }

    async fn push_manifest_blobs(
        &self,
        log: &Logging,
        dest: &Endpoint,
        blobs_dir: &str,
        manifest_data: &[u8],
    ) -> Result<(), MirrorError> {
        let blobs = manifest_blobs(manifest_data)?;
        for blob in blobs.iter() {
            if dest.blob_exists(blob).await? {
                continue;
            }
            let blob_file = format!("{}/{}", blobs_dir, encoded(blob));
            let blob_data = fs::read(&blob_file)
                .map_err(|e| MirrorError::new(&format!("layer missing {} {}", blob_file, e)))?;
            log.debug(&format!("pushing blob {}", blob));
            dest.upload_blob(blob, blob_data).await?;
        }
        Ok(())
    }

    async fn try_copy(
        &self,
        log: &Logging,
        src: &str,
        dest: &str,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError> {
        let src_spec = crate::image::reference::parse_ref(&normalize_transport(src))?;
        let dest_spec = crate::image::reference::parse_ref(&normalize_transport(dest))?;

        match (src_spec.transport.as_str(), dest_spec.transport.as_str()) {
            (DOCKER_PROTOCOL, DOCKER_PROTOCOL) => {
                self.copy_docker_to_docker(log, &src_spec, &dest_spec, opts)
                    .await
            }
            (DOCKER_PROTOCOL, _) => {
                self.copy_docker_to_oci(log, &src_spec, &dest_spec.reference, opts)
                    .await
            }
            (_, DOCKER_PROTOCOL) => {
                self.copy_oci_to_docker(log, &src_spec.reference, &dest_spec, opts)
                    .await
            }
            _ => Err(MirrorError::new(&format!(
                "unsupported transport combination {} -> {}",
                src_spec.transport, dest_spec.transport
            ))),
        }
    }
}

#[async_trait]
impl RegistryInterface for ImplRegistryInterface {
    // retries on transient errors with a fixed backoff delay
    async fn copy(
        &self,
        log: &Logging,
        src: String,
        dest: String,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError> {
        let attempts = if opts.retry == 0 { 1 } else { opts.retry };
        let mut last_error = MirrorError::new("copy was never attempted");
        for attempt in 1..=attempts {
            match self.try_copy(log, &src, &dest, opts).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_error = e;
                    if attempt < attempts {
                        log.warn(&format!(
                            "copy {} attempt {}/{} failed : {} - retrying",
                            src, attempt, attempts, last_error
                        ));
                        tokio::time::sleep(Duration::from_secs(opts.retry_delay_secs.max(1)))
                            .await;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn check(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<bool, MirrorError> {
        let spec = crate::image::reference::parse_ref(&image)?;
        if spec.transport != DOCKER_PROTOCOL {
            return Ok(Path::new(&format!("{}/index.json", spec.reference)).exists());
        }
        let endpoint = Endpoint::new(log, &spec, opts.src_tls_verify).await?;
        let reference = if !spec.digest.is_empty() {
            format!("{}:{}", spec.algorithm, spec.digest)
        } else {
            spec.tag.clone()
        };
        let (exists, _) = endpoint.manifest_exists(&reference).await?;
        Ok(exists)
    }

    async fn delete_image(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<(), MirrorError> {
        let spec = crate::image::reference::parse_ref(&image)?;
        let endpoint = Endpoint::new(log, &spec, opts.dest_tls_verify).await?;
        let reference = if !spec.digest.is_empty() {
            format!("{}:{}", spec.algorithm, spec.digest)
        } else {
            spec.tag.clone()
        };
        let (exists, digest) = endpoint.manifest_exists(&reference).await?;
        if !exists {
            log.debug(&format!("image {} not found - nothing to delete", image));
            return Ok(());
        }
        let target = if digest.is_empty() { reference } else { digest };
        endpoint.delete_manifest(&target).await
    }

    async fn get_digest(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<String, MirrorError> {
        let spec = crate::image::reference::parse_ref(&image)?;
        // on disk layouts resolve from index.json
        if spec.transport != DOCKER_PROTOCOL {
            let index = crate::manifests::catalogs::get_image_index(&spec.reference)?;
            let entry = index
                .manifests
                .as_ref()
                .and_then(|m| m.first())
                .ok_or_else(|| MirrorError::new("oci layout index has no manifests"))?;
            return Ok(encoded(&entry.digest));
        }
        let endpoint = Endpoint::new(log, &spec, opts.src_tls_verify).await?;
        let reference = if !spec.digest.is_empty() {
            format!("{}:{}", spec.algorithm, spec.digest)
        } else {
            spec.tag.clone()
        };
        let (exists, digest) = endpoint.manifest_exists(&reference).await?;
        if exists && !digest.is_empty() {
            return Ok(encoded(&digest));
        }
        // fall back to hashing the manifest body
        let (data, _) = endpoint.fetch_manifest(&reference).await?;
        let mut hasher = Sha256::new();
        hasher.update(&data);
        Ok(hex::encode(hasher.finalize()))
    }

    async fn get_manifest(
        &self,
        log: &Logging,
        image: String,
        opts: &MirrorOptions,
    ) -> Result<(Vec<u8>, String), MirrorError> {
        let spec = crate::image::reference::parse_ref(&image)?;
        if spec.transport != DOCKER_PROTOCOL {
            let index = crate::manifests::catalogs::get_image_index(&spec.reference)?;
            let entry = index
                .manifests
                .as_ref()
                .and_then(|m| m.first())
                .ok_or_else(|| MirrorError::new("oci layout index has no manifests"))?;
            let file = format!("{}/blobs/sha256/{}", spec.reference, encoded(&entry.digest));
            let data = fs::read(&file)
                .map_err(|e| MirrorError::new(&format!("layer missing {} {}", file, e)))?;
            return Ok((data, entry.media_type.clone()));
        }
        let endpoint = Endpoint::new(log, &spec, opts.src_tls_verify).await?;
        let reference = if !spec.digest.is_empty() {
            format!("{}:{}", spec.algorithm, spec.digest)
        } else {
            spec.tag.clone()
        };
        endpoint.fetch_manifest(&reference).await
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;
    use serial_test::serial;

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    fn test_opts() -> MirrorOptions {
        MirrorOptions {
            retry: 1,
            retry_delay_secs: 1,
            parallel_layers: 2,
            multi_arch: String::from("system"),
            src_tls_verify: false,
            dest_tls_verify: false,
            ..Default::default()
        }
    }

    fn manifest_body() -> String {
        "{
            \"schemaVersion\": 2,
            \"mediaType\": \"application/vnd.docker.distribution.manifest.v2+json\",
            \"config\": {
                \"mediaType\": \"application/vnd.docker.container.image.v1+json\",
                \"size\": 2,
                \"digest\": \"sha256:1111111111111111111111111111111111111111111111111111111111111111\"
            },
            \"layers\": [
                {
                    \"mediaType\": \"application/vnd.docker.image.rootfs.diff.tar.gzip\",
                    \"size\": 4,
                    \"digest\": \"sha256:2222222222222222222222222222222222222222222222222222222222222222\"
                }
            ]
        }"
        .to_string()
    }

    #[test]
    #[serial]
    fn copy_docker_to_docker_pass() {
        let log = &Logging {
            log_level: Level::DEBUG,
        };
        let mut src_server = mockito::Server::new();
        let mut dst_server = mockito::Server::new();
        let src_host = src_server.host_with_port();
        let dst_host = dst_server.host_with_port();

        src_server
            .mock("GET", "/v2/test/image/manifests/v1")
            .with_status(200)
            .with_header(
                "content-type",
                "application/vnd.docker.distribution.manifest.v2+json",
            )
            .with_body(manifest_body())
            .create();
        src_server
            .mock(
                "GET",
                mockito::Matcher::Regex("/v2/test/image/blobs/sha256:1+".to_string()),
            )
            .with_status(200)
            .with_body("{}")
            .create();
        src_server
            .mock(
                "GET",
                mockito::Matcher::Regex("/v2/test/image/blobs/sha256:2+".to_string()),
            )
            .with_status(200)
            .with_body("data")
            .create();

        dst_server
            .mock(
                "HEAD",
                mockito::Matcher::Regex("/v2/test/image/blobs/sha256.*".to_string()),
            )
            .with_status(404)
            .expect_at_least(2)
            .create();
        dst_server
            .mock("POST", "/v2/test/image/blobs/uploads/")
            .with_status(202)
            .with_header("location", "/v2/test/image/blobs/uploads/abc123")
            .expect_at_least(2)
            .create();
        dst_server
            .mock(
                "PUT",
                mockito::Matcher::Regex("/v2/test/image/blobs/uploads/abc123.*".to_string()),
            )
            .with_status(201)
            .expect_at_least(2)
            .create();
        let manifest_put = dst_server
            .mock("PUT", "/v2/test/image/manifests/v1")
            .with_status(201)
            .create();

        let reg = ImplRegistryInterface {};
        let res = aw!(reg.copy(
            log,
            format!("docker://{}/test/image:v1", src_host),
            format!("docker://{}/test/image:v1", dst_host),
            &test_opts(),
        ));
        assert!(res.is_ok());
        manifest_put.assert();
    }

    #[test]
    #[serial]
    fn copy_docker_to_oci_and_back_pass() {
        let log = &Logging {
            log_level: Level::DEBUG,
        };
        let tmp = tempfile::tempdir().unwrap();
        let layout = tmp.path().join("layout").display().to_string();
        let mut src_server = mockito::Server::new();
        let src_host = src_server.host_with_port();

        src_server
            .mock("GET", "/v2/test/image/manifests/v1")
            .with_status(200)
            .with_header(
                "content-type",
                "application/vnd.docker.distribution.manifest.v2+json",
            )
            .with_body(manifest_body())
            .create();
        src_server
            .mock(
                "GET",
                mockito::Matcher::Regex("/v2/test/image/blobs/sha256.*".to_string()),
            )
            .with_status(200)
            .with_body("data")
            .expect_at_least(2)
            .create();

        let reg = ImplRegistryInterface {};
        let res = aw!(reg.copy(
            log,
            format!("docker://{}/test/image:v1", src_host),
            format!("oci://{}", layout),
            &test_opts(),
        ));
        assert!(res.is_ok());
        assert!(Path::new(&format!("{}/index.json", layout)).exists());
        assert!(Path::new(&format!("{}/oci-layout", layout)).exists());

        // and push the layout back out to a registry
        let mut dst_server = mockito::Server::new();
        let dst_host = dst_server.host_with_port();
        dst_server
            .mock(
                "HEAD",
                mockito::Matcher::Regex("/v2/test/image/blobs/sha256.*".to_string()),
            )
            .with_status(404)
            .expect_at_least(2)
            .create();
        dst_server
            .mock("POST", "/v2/test/image/blobs/uploads/")
            .with_status(202)
            .with_header("location", "/v2/test/image/blobs/uploads/abc123")
            .expect_at_least(2)
            .create();
        dst_server
            .mock(
                "PUT",
                mockito::Matcher::Regex("/v2/test/image/blobs/uploads/abc123.*".to_string()),
            )
            .with_status(201)
            .expect_at_least(2)
            .create();
        let manifest_put = dst_server
            .mock("PUT", "/v2/test/image/manifests/v2")
            .with_status(201)
            .create();

        let res = aw!(reg.copy(
            log,
            format!("oci://{}", layout),
            format!("docker://{}/test/image:v2", dst_host),
            &test_opts(),
        ));
        assert!(res.is_ok());
        manifest_put.assert();
    }

    #[test]
    #[serial]
    fn check_pass() {
        let log = &Logging {
            log_level: Level::DEBUG,
        };
        let mut server = mockito::Server::new();
        let host = server.host_with_port();
        server
            .mock("HEAD", "/v2/test/image/manifests/v1")
            .with_status(200)
            .with_header(
                "docker-content-digest",
                "sha256:3333333333333333333333333333333333333333333333333333333333333333",
            )
            .create();
        server
            .mock("HEAD", "/v2/test/image/manifests/missing")
            .with_status(404)
            .create();

        let reg = ImplRegistryInterface {};
        let found = aw!(reg.check(
            log,
            format!("docker://{}/test/image:v1", host),
            &test_opts()
        ));
        assert!(found.unwrap());
        let missing = aw!(reg.check(
            log,
            format!("docker://{}/test/image:missing", host),
            &test_opts()
        ));
        assert!(!missing.unwrap());
    }

    #[test]
    #[serial]
    fn get_digest_pass() {
        let log = &Logging {
            log_level: Level::DEBUG,
        };
        let mut server = mockito::Server::new();
        let host = server.host_with_port();
        server
            .mock("HEAD", "/v2/test/image/manifests/v1")
            .with_status(200)
            .with_header(
                "docker-content-digest",
                "sha256:3333333333333333333333333333333333333333333333333333333333333333",
            )
            .create();

        let reg = ImplRegistryInterface {};
        let digest = aw!(reg.get_digest(
            log,
            format!("docker://{}/test/image:v1", host),
            &test_opts()
        ));
        assert_eq!(
            digest.unwrap(),
            "3333333333333333333333333333333333333333333333333333333333333333"
        );
    }

    #[test]
    #[serial]
    fn delete_image_pass() {
        let log = &Logging {
            log_level: Level::DEBUG,
        };
        let mut server = mockito::Server::new();
        let host = server.host_with_port();
        server
            .mock("HEAD", "/v2/test/image/manifests/v1")
            .with_status(200)
            .with_header(
                "docker-content-digest",
                "sha256:3333333333333333333333333333333333333333333333333333333333333333",
            )
            .create();
        let delete = server
            .mock(
                "DELETE",
                "/v2/test/image/manifests/sha256:3333333333333333333333333333333333333333333333333333333333333333",
            )
            .with_status(202)
            .create();

        let reg = ImplRegistryInterface {};
        let res = aw!(reg.delete_image(
            log,
            format!("docker://{}/test/image:v1", host),
            &test_opts()
        ));
        assert!(res.is_ok());
        delete.assert();
    }
}

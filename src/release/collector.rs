// module release collector
//
// extracts the image-references payload from each platform release and
// plans the release, release content, kubevirt and graph image copies

use async_trait::async_trait;
use std::fs;
use std::path::Path;

use crate::api::schema::*;
use crate::collector::manager::ImageCollector;
use crate::error::handler::*;
use crate::image::reference::*;
use crate::log::logging::*;
use crate::manifests::catalogs::*;
use crate::mirror::copy::RegistryInterface;
use crate::operator::collector::digest_tag;

pub const RELEASE_IMAGE_DIR: &str = "release-images";
pub const RELEASE_IMAGE_EXTRACT_DIR: &str = "hold-release";
pub const RELEASE_MANIFESTS: &str = "release-manifests";
pub const IMAGE_REFERENCES: &str = "image-references";
const RELEASE_BOOTABLE_IMAGES: &str = "0000_50_installer_coreos-bootimages.yaml";
const BLOBS_DIR: &str = "blobs/sha256";
const COLLECTOR_PREFIX: &str = "[ReleaseImageCollector] ";

pub const RELEASE_IMAGE_PATH_COMPONENTS: &str = "openshift/release-images";
pub const RELEASE_COMPONENT_PATH_COMPONENTS: &str = "openshift/release";
pub const GRAPH_IMAGE_NAME: &str = "openshift/graph-image";

pub struct CollectRelease<T: RegistryInterface> {
    pub reg_con: T,
    pub config: ImageSetConfig,
    pub opts: MirrorOptions,
}

// parse the imagestream shaped image-references file
pub fn parse_json_release_imagereference(file: &str) -> Result<Vec<RelatedImage>, MirrorError> {
    let data = fs::read_to_string(file)
        .map_err(|e| MirrorError::new(&format!("reading image-references {} {}", file, e)))?;
    let release: ReleaseSchema = serde_json::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("parsing image-references {} {}", file, e)))?;
    let mut images = vec![];
    for tag in release.spec.tags.iter() {
        images.push(RelatedImage {
            name: tag.name.clone(),
            image: tag.from.name.clone(),
            image_type: ImageType::OcpReleaseContent,
            ..Default::default()
        });
    }
    Ok(images)
}

// include the coreos bootable container image when kubeVirtContainer is set
// the yaml wraps a json stream document
pub fn get_kube_virt_image(release_artifacts_dir: &str) -> Result<RelatedImage, MirrorError> {
    let file = format!(
        "{}/{}/{}",
        release_artifacts_dir, RELEASE_MANIFESTS, RELEASE_BOOTABLE_IMAGES
    );
    let data = fs::read_to_string(&file)
        .map_err(|e| MirrorError::new(&format!("reading kubevirt yaml file {} {}", file, e)))?;
    let configmap: InstallerConfigMap = serde_yaml::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("parsing kubevirt yaml file {}", e)))?;
    let bootable: InstallerBootableImages = serde_json::from_str(&configmap.data.stream)
        .map_err(|e| MirrorError::new(&format!("parsing kubevirt configmap data {}", e)))?;
    let image = bootable
        .architectures
        .x86_64
        .images
        .kubevirt
        .map(|k| k.digest_ref)
        .unwrap_or_default();
    if image.is_empty() {
        return Err(MirrorError::new("could not find kubevirt image in this release"));
    }
    Ok(RelatedImage {
        name: String::from("kube-virt-container"),
        image,
        image_type: ImageType::KubeVirtContainer,
        ..Default::default()
    })
}

fn prepare_path_components(spec: &ImageSpec, image_type: ImageType, name: &str) -> String {
    match image_type {
        ImageType::OcpRelease => RELEASE_IMAGE_PATH_COMPONENTS.to_string(),
        ImageType::CincinnatiGraph => spec.path_component.clone(),
        ImageType::OcpReleaseContent | ImageType::KubeVirtContainer if !name.is_empty() => {
            RELEASE_COMPONENT_PATH_COMPONENTS.to_string()
        }
        _ => spec.path_component.clone(),
    }
}

fn prepare_tag(spec: &ImageSpec, image_type: ImageType, release_tag: &str, name: &str) -> String {
    match image_type {
        ImageType::OcpRelease | ImageType::CincinnatiGraph => {
            // releases mirrored by digest carry no tag of their own
            if spec.tag.is_empty() {
                release_tag.to_string()
            } else {
                spec.tag.clone()
            }
        }
        ImageType::OcpReleaseContent | ImageType::KubeVirtContainer if !name.is_empty() => {
            format!("{}-{}", release_tag, name)
        }
        _ => {
            if spec.is_image_by_digest_only() {
                digest_tag(spec)
            } else {
                spec.tag.clone()
            }
        }
    }
}

pub fn prepare_m2d_copy_batch(
    images: &[RelatedImage],
    opts: &MirrorOptions,
    release_tag: &str,
) -> Result<Vec<CopyImageSchema>, MirrorError> {
    let mut result = vec![];
    for img in images.iter() {
        let spec = parse_ref(&img.image)?;
        let path_components = prepare_path_components(&spec, img.image_type, &img.name);
        let tag = prepare_tag(&spec, img.image_type, release_tag, &img.name);
        let dest = format!(
            "{}{}/{}:{}",
            DOCKER_PROTOCOL, opts.local_storage_fqdn, path_components, tag
        );
        result.push(CopyImageSchema {
            source: spec.reference_with_transport.clone(),
            destination: dest,
            origin: img.image.clone(),
            image_type: img.image_type,
            rebuilt_tag: String::from(""),
        });
    }
    Ok(result)
}

pub fn prepare_d2m_copy_batch(
    images: &[RelatedImage],
    opts: &MirrorOptions,
    release_tag: &str,
) -> Result<Vec<CopyImageSchema>, MirrorError> {
    let mut result = vec![];
    for img in images.iter() {
        let spec = parse_ref(&img.image)?;
        let path_components = prepare_path_components(&spec, img.image_type, &img.name);
        let tag = prepare_tag(&spec, img.image_type, release_tag, &img.name);
        let src = format!(
            "{}{}/{}:{}",
            DOCKER_PROTOCOL, opts.local_storage_fqdn, path_components, tag
        );
        let dest = format!("{}/{}:{}", opts.destination, path_components, tag);
        result.push(CopyImageSchema {
            source: src,
            destination: dest,
            origin: img.image.clone(),
            image_type: img.image_type,
            rebuilt_tag: String::from(""),
        });
    }
    Ok(result)
}

// cincinnati is unreachable when UPDATE_URL_OVERRIDE is set - the cached
// graph image is treated as authoritative
fn handle_graph_image(opts: &MirrorOptions) -> Option<CopyImageSchema> {
    if std::env::var("UPDATE_URL_OVERRIDE").unwrap_or_default().is_empty() {
        return None;
    }
    let cached = format!(
        "{}{}/{}:latest",
        DOCKER_PROTOCOL, opts.local_storage_fqdn, GRAPH_IMAGE_NAME
    );
    let dest = format!(
        "{}{}/{}:latest",
        DOCKER_PROTOCOL,
        opts.destination_registry(),
        GRAPH_IMAGE_NAME
    );
    Some(CopyImageSchema {
        source: cached.clone(),
        destination: dest,
        origin: cached,
        image_type: ImageType::CincinnatiGraph,
        rebuilt_tag: String::from(""),
    })
}

impl<T: RegistryInterface + Send + Sync> CollectRelease<T> {
    fn platform(&self) -> Platform {
        self.config.mirror.platform.clone().unwrap_or_default()
    }

    async fn collect_m2d(&self, log: &Logging) -> Result<Vec<CopyImageSchema>, MirrorError> {
        let mut all_images = vec![];
        let platform = self.platform();
        for release in platform.releases.iter() {
            let spec = parse_ref(&release.name)?;
            let release_tag = if !spec.tag.is_empty() {
                spec.tag.clone()
            } else {
                spec.digest.clone()
            };
            let image_index_dir = format!("{}/{}", spec.component_name(), release_tag);
            let cache_dir = format!(
                "{}/{}/{}",
                self.opts.working_dir, RELEASE_IMAGE_EXTRACT_DIR, image_index_dir
            );
            let dir = format!(
                "{}/{}/{}",
                self.opts.working_dir, RELEASE_IMAGE_DIR, image_index_dir
            );

            if !Path::new(&format!("{}/index.json", dir)).exists() {
                log.debug(&format!(
                    "{}copying release image {}",
                    COLLECTOR_PREFIX, release.name
                ));
                fs::create_dir_all(&dir)
                    .map_err(|e| MirrorError::new(&format!("creating {} {}", dir, e)))?;
                let src = spec.reference_with_transport.clone();
                let dest = format!("{}{}", OCI_PROTOCOL_TRIMMED, dir);
                self.reg_con.copy(log, src, dest, &self.opts).await?;
            } else {
                log.debug(&format!(
                    "{}release-images index directory already exists {}",
                    COLLECTOR_PREFIX, dir
                ));
            }

            let oci = get_image_index(&dir)?;
            let manifests = oci.manifests.clone().unwrap_or_default();
            if manifests.is_empty() {
                return Err(MirrorError::new(&format!(
                    "{}image index not found for {}",
                    COLLECTOR_PREFIX, release.name
                )));
            }
            let manifest_digest = encoded_digest(&manifests[0].digest)?;
            let manifest_file = format!("{}/{}/{}", dir, BLOBS_DIR, manifest_digest);
            let manifest = get_image_manifest(&manifest_file)?;

            let blobs_dir = format!("{}/{}", dir, BLOBS_DIR);
            extract_layers_oci(log, &blobs_dir, &cache_dir, RELEASE_MANIFESTS, &manifest)?;
            log.debug(&format!("{}extracted layer {}", COLLECTOR_PREFIX, cache_dir));

            let references_file = format!(
                "{}/{}/{}",
                cache_dir, RELEASE_MANIFESTS, IMAGE_REFERENCES
            );
            let mut related_images = parse_json_release_imagereference(&references_file)?;

            if platform.kube_virt_container {
                match get_kube_virt_image(&cache_dir) {
                    Ok(image) => related_images.push(image),
                    Err(e) => log.warn(&format!("{}", e)),
                }
            }

            related_images.push(RelatedImage {
                name: release.name.clone(),
                image: release.name.clone(),
                image_type: ImageType::OcpRelease,
                ..Default::default()
            });
            let mut batch = prepare_m2d_copy_batch(&related_images, &self.opts, &release_tag)?;
            all_images.append(&mut batch);
        }

        if platform.graph {
            if let Some(graph_copy) = handle_graph_image(&self.opts) {
                all_images.push(graph_copy);
            }
        }
        Ok(all_images)
    }

    async fn collect_d2m(&self, log: &Logging) -> Result<Vec<CopyImageSchema>, MirrorError> {
        let mut all_images = vec![];
        let platform = self.platform();
        let mut release_folders = vec![];
        for release in platform.releases.iter() {
            let spec = parse_ref(&release.name)?;
            if spec.tag.is_empty() && spec.digest.is_empty() {
                return Err(MirrorError::new(&format!(
                    "{}release image {} doesn't have a tag or digest",
                    COLLECTOR_PREFIX, release.name
                )));
            }
            let tag = if !spec.tag.is_empty() {
                spec.tag.clone()
            } else {
                spec.digest.clone()
            };
            let related = RelatedImage {
                name: release.name.clone(),
                image: release.name.clone(),
                image_type: ImageType::OcpRelease,
                ..Default::default()
            };
            let mut batch = prepare_d2m_copy_batch(&[related], &self.opts, &tag)?;
            all_images.append(&mut batch);
            release_folders.push(format!(
                "{}/{}/{}/{}",
                self.opts.working_dir,
                RELEASE_IMAGE_EXTRACT_DIR,
                spec.component_name(),
                tag
            ));
        }

        for release_dir in release_folders.iter() {
            let release_tag = release_dir.rsplit('/').next().unwrap_or("").to_string();
            let references_file = format!(
                "{}/{}/{}",
                release_dir, RELEASE_MANIFESTS, IMAGE_REFERENCES
            );
            let mut related_images = parse_json_release_imagereference(&references_file)?;

            if platform.kube_virt_container {
                match get_kube_virt_image(release_dir) {
                    Ok(image) => related_images.push(image),
                    Err(e) => log.warn(&format!("{}", e)),
                }
            }
            let mut batch = prepare_d2m_copy_batch(&related_images, &self.opts, &release_tag)?;
            all_images.append(&mut batch);
        }

        if platform.graph {
            log.debug("adding graph data image");
            let graph_related = RelatedImage {
                name: GRAPH_IMAGE_NAME.to_string(),
                // mirror to disk saves the graph image under the latest tag
                image: format!(
                    "{}{}/{}:latest",
                    DOCKER_PROTOCOL, self.opts.local_storage_fqdn, GRAPH_IMAGE_NAME
                ),
                image_type: ImageType::CincinnatiGraph,
                ..Default::default()
            };
            let graph_copy = prepare_d2m_copy_batch(&[graph_related], &self.opts, "")?;
            if graph_copy.len() != 1 {
                return Err(MirrorError::new(&format!(
                    "{}error while calculating the destination reference for the graph image",
                    COLLECTOR_PREFIX
                )));
            }
            all_images.extend(graph_copy);
        }
        Ok(all_images)
    }
}

#[async_trait]
impl<T: RegistryInterface + Send + Sync> ImageCollector for CollectRelease<T> {
    async fn collect(&self, log: &Logging) -> Result<CollectorSchema, MirrorError> {
        log.hi("release collector");
        let mut all_images = if self.opts.is_mirror_to_disk() || self.opts.is_mirror_to_mirror() {
            self.collect_m2d(log).await?
        } else {
            self.collect_d2m(log).await?
        };

        // the same digest can appear several times in image-references
        all_images.sort_by(|a, b| {
            (a.origin.clone(), a.source.clone(), a.destination.clone()).cmp(&(
                b.origin.clone(),
                b.source.clone(),
                b.destination.clone(),
            ))
        });
        all_images.dedup();

        Ok(CollectorSchema {
            all_images,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;

    fn opts(mode: &str) -> MirrorOptions {
        MirrorOptions {
            mode: mode.to_string(),
            function: COPY_FUNCTION.to_string(),
            local_storage_fqdn: String::from("localhost:55000"),
            destination: String::from("docker://dest.example.com"),
            ..Default::default()
        }
    }

    const IMAGE_REFERENCES_JSON: &str = "{
        \"kind\": \"ImageStream\",
        \"apiVersion\": \"image.openshift.io/v1\",
        \"metadata\": { \"name\": \"4.15.0-x86_64\", \"creationTimestamp\": null },
        \"spec\": {
            \"lookupPolicy\": { \"local\": false },
            \"tags\": [
                {
                    \"name\": \"agent-installer-api-server\",
                    \"from\": { \"kind\": \"DockerImage\", \"name\": \"quay.io/openshift-release-dev/ocp-v4.0-art-dev@sha256:5f46f35a1b1d4a03cb3c72fa6896db99ed5d0c6af44a8155c8a01e00e579b60b\" }
                },
                {
                    \"name\": \"agent-installer-csr-approver\",
                    \"from\": { \"kind\": \"DockerImage\", \"name\": \"quay.io/openshift-release-dev/ocp-v4.0-art-dev@sha256:46cf4a83dba7e28090e689781f90dee2aaf69b018002fb95e2c7c41c244ee4ca\" }
                }
            ]
        }
    }";

    #[test]
    fn parse_json_release_imagereference_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("image-references");
        fs::write(&file, IMAGE_REFERENCES_JSON).unwrap();
        let images = parse_json_release_imagereference(&file.display().to_string()).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "agent-installer-api-server");
        assert_eq!(images[0].image_type, ImageType::OcpReleaseContent);
    }

    #[test]
    fn prepare_m2d_release_content_pass() {
        let images = vec![
            RelatedImage {
                name: String::from("agent-installer-api-server"),
                image: String::from("quay.io/openshift-release-dev/ocp-v4.0-art-dev@sha256:5f46f35a1b1d4a03cb3c72fa6896db99ed5d0c6af44a8155c8a01e00e579b60b"),
                image_type: ImageType::OcpReleaseContent,
                ..Default::default()
            },
            RelatedImage {
                name: String::from("quay.io/openshift-release-dev/ocp-release:4.15.0-x86_64"),
                image: String::from("quay.io/openshift-release-dev/ocp-release:4.15.0-x86_64"),
                image_type: ImageType::OcpRelease,
                ..Default::default()
            },
        ];
        let result = prepare_m2d_copy_batch(&images, &opts(MIRROR_TO_DISK), "4.15.0-x86_64").unwrap();
        assert_eq!(result.len(), 2);
        // content images land under openshift/release with the composed tag
        assert_eq!(
            result[0].destination,
            "docker://localhost:55000/openshift/release:4.15.0-x86_64-agent-installer-api-server"
        );
        // the release image itself lands under openshift/release-images
        assert_eq!(
            result[1].destination,
            "docker://localhost:55000/openshift/release-images:4.15.0-x86_64"
        );
    }

    #[test]
    fn prepare_d2m_release_content_pass() {
        let images = vec![RelatedImage {
            name: String::from("agent-installer-api-server"),
            image: String::from("quay.io/openshift-release-dev/ocp-v4.0-art-dev@sha256:5f46f35a1b1d4a03cb3c72fa6896db99ed5d0c6af44a8155c8a01e00e579b60b"),
            image_type: ImageType::OcpReleaseContent,
            ..Default::default()
        }];
        let result = prepare_d2m_copy_batch(&images, &opts(DISK_TO_MIRROR), "4.15.0-x86_64").unwrap();
        assert_eq!(
            result[0].source,
            "docker://localhost:55000/openshift/release:4.15.0-x86_64-agent-installer-api-server"
        );
        assert_eq!(
            result[0].destination,
            "docker://dest.example.com/openshift/release:4.15.0-x86_64-agent-installer-api-server"
        );
    }

    #[test]
    fn get_kube_virt_image_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let manifests_dir = tmp.path().join(RELEASE_MANIFESTS);
        fs::create_dir_all(&manifests_dir).unwrap();
        let stream = "{\\\"architectures\\\": {\\\"x86_64\\\": {\\\"images\\\": {\\\"kubevirt\\\": {\\\"digestRef\\\": \\\"quay.io/openshift-release-dev/rhcos@sha256:a8d15e3b30aaefbfcd9a5e5e5fdc72627d233e1cb2c7a5e197f0c0c99a6cf30a\\\"}}}}}";
        let yaml = format!(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: coreos-bootimages\ndata:\n  stream: \"{}\"\n",
            stream
        );
        fs::write(manifests_dir.join(RELEASE_BOOTABLE_IMAGES), yaml).unwrap();
        let image = get_kube_virt_image(&tmp.path().display().to_string()).unwrap();
        assert_eq!(image.name, "kube-virt-container");
        assert_eq!(image.image_type, ImageType::KubeVirtContainer);
        assert!(image.image.starts_with("quay.io/openshift-release-dev/rhcos@sha256:"));
    }

    #[test]
    fn get_kube_virt_image_missing_fail() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(get_kube_virt_image(&tmp.path().display().to_string()).is_err());
    }

    #[test]
    fn graph_image_override_pass() {
        std::env::set_var("UPDATE_URL_OVERRIDE", "http://localhost:8080/graph");
        let graph = handle_graph_image(&opts(MIRROR_TO_DISK)).unwrap();
        assert_eq!(
            graph.source,
            "docker://localhost:55000/openshift/graph-image:latest"
        );
        assert_eq!(graph.image_type, ImageType::CincinnatiGraph);
        std::env::remove_var("UPDATE_URL_OVERRIDE");
        assert!(handle_graph_image(&opts(MIRROR_TO_DISK)).is_none());
    }
}

// module operator collector
//
// looks into each operator catalog image, extracts and filters the
// declarative config and plans the catalog / bundle / related image copies

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::api::schema::*;
use crate::catalog::handler::*;
use crate::collector::manager::ImageCollector;
use crate::error::handler::*;
use crate::image::reference::*;
use crate::log::logging::*;
use crate::manifests::catalogs::*;
use crate::mirror::copy::RegistryInterface;

pub const OPERATOR_CATALOGS_DIR: &str = "operator-catalogs";
pub const CATALOG_CONFIG_DIR: &str = "catalog-config";
pub const CATALOG_IMAGE_DIR: &str = "catalog-image";
pub const FILTERED_CATALOGS_DIR: &str = "filtered-catalogs";
const BLOBS_DIR: &str = "blobs/sha256";
const COLLECTOR_PREFIX: &str = "[OperatorImageCollector] ";

pub struct CollectOperator<T: RegistryInterface> {
    pub reg_con: T,
    pub config: ImageSetConfig,
    pub opts: MirrorOptions,
}

// synthetic tag for images referenced by digest only
pub fn digest_tag(spec: &ImageSpec) -> String {
    let mut tag = format!("{}-{}", spec.algorithm, spec.digest);
    if tag.len() > 128 {
        tag.truncate(128);
    }
    tag
}

// target catalogs are destination path components - keep them sane
pub fn is_valid_path_component(component: &str) -> bool {
    !component.is_empty()
        && !component.starts_with('/')
        && !component.ends_with('/')
        && component.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/' || c == '-' || c == '_' || c == '.'
        })
}

// stable 128 bit fingerprint over the operator selector - target fields are
// blanked and packages/channels sorted so config reordering cannot change it
pub fn digest_of_filter(operator: &Operator) -> Result<String, MirrorError> {
    let mut canonical = operator.clone();
    canonical.target_catalog = String::from("");
    canonical.target_tag = String::from("");
    canonical.target_catalog_source_template = String::from("");
    if let Some(packages) = &mut canonical.packages {
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        for package in packages.iter_mut() {
            if let Some(channels) = &mut package.channels {
                channels.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
    }
    let serialized = serde_json::to_vec(&canonical)
        .map_err(|e| MirrorError::new(&format!("serializing operator filter {}", e)))?;
    Ok(format!("{:x}", md5::compute(serialized)))
}

fn is_full_catalog(operator: &Operator) -> bool {
    operator.full
        && operator
            .packages
            .as_ref()
            .map_or(true, |packages| packages.is_empty())
}

// recursive copy used for oci:// catalogs provided on disk
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<(), MirrorError> {
    fs::create_dir_all(dest)
        .map_err(|e| MirrorError::new(&format!("creating {} {}", dest.display(), e)))?;
    let entries = fs::read_dir(src)
        .map_err(|e| MirrorError::new(&format!("reading {} {}", src.display(), e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| MirrorError::new(&format!("reading dir entry {}", e)))?;
        let target = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| MirrorError::new(&format!("reading file type {}", e)))?;
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|e| MirrorError::new(&format!("copying {} {}", entry.path().display(), e)))?;
        }
    }
    Ok(())
}

impl<T: RegistryInterface + Send + Sync> CollectOperator<T> {
    // the cache side reference of a (possibly filtered) catalog
    fn cached_catalog(&self, operator: &Operator, tag: &str) -> Result<String, MirrorError> {
        let spec = parse_ref(&operator.catalog)?;
        let mut src = if !operator.target_catalog.is_empty() {
            format!(
                "{}{}/{}",
                DOCKER_PROTOCOL, self.opts.local_storage_fqdn, operator.target_catalog
            )
        } else if spec.transport == OCI_PROTOCOL {
            format!(
                "{}{}/{}",
                DOCKER_PROTOCOL,
                self.opts.local_storage_fqdn,
                spec.component_name()
            )
        } else {
            format!(
                "{}{}/{}",
                DOCKER_PROTOCOL, self.opts.local_storage_fqdn, spec.path_component
            )
        };
        src.push(':');
        src.push_str(tag);
        Ok(src)
    }

    // in diskToMirror and delete the source registry is not guaranteed to be
    // reachable - the catalog digest is discovered from the cache registry
    async fn catalog_digest(&self, log: &Logging, operator: &Operator) -> Result<String, MirrorError> {
        let spec = parse_ref(&operator.catalog)?;
        let tag = if !operator.target_tag.is_empty() {
            operator.target_tag.clone()
        } else if spec.tag.is_empty() && !spec.digest.is_empty() {
            digest_tag(&spec)
        } else if spec.tag.is_empty() && spec.transport == OCI_PROTOCOL {
            String::from("latest")
        } else {
            spec.tag.clone()
        };
        let src = self.cached_catalog(operator, &tag)?;
        self.reg_con.get_digest(log, src, &self.opts).await
    }

    async fn is_already_filtered(
        &self,
        log: &Logging,
        src_filtered_catalog: &str,
        filtered_image_digest: &str,
    ) -> bool {
        match self
            .reg_con
            .get_digest(log, src_filtered_catalog.to_string(), &self.opts)
            .await
        {
            Ok(digest) => digest == filtered_image_digest,
            Err(e) => {
                log.debug(&format!("{}{}", COLLECTOR_PREFIX, e));
                false
            }
        }
    }

    fn is_delete_of_v1_catalog_from_disk(&self) -> bool {
        self.opts.is_delete() && self.opts.generate_v1_dest_tags
    }

    async fn collect_catalogs(
        &self,
        log: &Logging,
    ) -> Result<(HashMap<String, Vec<RelatedImage>>, CollectorSchema), MirrorError> {
        let mut related_images: HashMap<String, Vec<RelatedImage>> = HashMap::new();
        let mut collector_schema = CollectorSchema::default();
        let operators = self.config.mirror.operators.clone().unwrap_or_default();

        for operator in operators.iter() {
            log.debug(&format!(
                "{}collecting catalog {}",
                COLLECTOR_PREFIX, operator.catalog
            ));

            if !operator.target_catalog.is_empty()
                && !is_valid_path_component(&operator.target_catalog)
            {
                return Err(MirrorError::new(&format!(
                    "{}invalid targetCatalog {}",
                    COLLECTOR_PREFIX, operator.target_catalog
                )));
            }

            let spec = parse_ref(&operator.catalog)?;

            // resolve the catalog digest - used to key the working dir layout
            let mut catalog_digest;
            if self.opts.is_disk_to_mirror() || self.opts.is_delete() {
                catalog_digest = self.catalog_digest(log, operator).await?;
            } else {
                match self
                    .reg_con
                    .get_digest(log, spec.reference_with_transport.clone(), &self.opts)
                    .await
                {
                    Ok(digest) => catalog_digest = digest,
                    Err(e) => {
                        log.warn(&format!(
                            "{}catalog {} : {} : SKIPPING",
                            COLLECTOR_PREFIX, operator.catalog, e
                        ));
                        continue;
                    }
                }
            }

            let image_index_dir = format!(
                "{}/{}/{}/{}",
                self.opts.working_dir,
                OPERATOR_CATALOGS_DIR,
                spec.component_name(),
                catalog_digest
            );
            let configs_dir = format!("{}/{}", image_index_dir, CATALOG_CONFIG_DIR);
            let catalog_image_dir = format!("{}/{}", image_index_dir, CATALOG_IMAGE_DIR);
            let filtered_catalogs_dir = format!("{}/{}", image_index_dir, FILTERED_CATALOGS_DIR);
            for dir in [&configs_dir, &catalog_image_dir, &filtered_catalogs_dir].iter() {
                fs::create_dir_all(dir)
                    .map_err(|e| MirrorError::new(&format!("creating {} {}", dir, e)))?;
            }

            let filter_digest = digest_of_filter(operator)?;
            let mut rebuilt_tag = filter_digest.clone();
            let mut catalog_image = operator.catalog.clone();
            let mut catalog_name = spec.component_name();
            let effective_catalog;

            // already filtered fast path - a prior run rebuilt this filter and
            // the cache still holds exactly that image
            let filter_path = format!("{}/{}/digest", filtered_catalogs_dir, filter_digest);
            let mut is_already_filtered = false;
            if let Ok(filtered_image_digest) = fs::read_to_string(&filter_path) {
                let src_filtered = self.cached_catalog(operator, &filter_digest)?;
                is_already_filtered = self
                    .is_already_filtered(log, &src_filtered, filtered_image_digest.trim())
                    .await;
                if is_already_filtered {
                    catalog_digest = filtered_image_digest.trim().to_string();
                }
            }

            if is_already_filtered {
                let filter_config_dir =
                    format!("{}/{}/{}", filtered_catalogs_dir, filter_digest, CATALOG_CONFIG_DIR);
                effective_catalog = get_declarative_config(log, &filter_config_dir)?;
                if !operator.target_catalog.is_empty() {
                    catalog_name = operator.target_catalog.clone();
                }
                if spec.transport == OCI_PROTOCOL {
                    catalog_image = spec.reference_with_transport.clone();
                }
                collector_schema.catalog_to_fbc_map.insert(
                    spec.reference_with_transport.clone(),
                    CatalogFilterResult {
                        operator_filter: operator.clone(),
                        filtered_config_path: filter_config_dir,
                        to_rebuild: false,
                    },
                );
            } else {
                let mut to_rebuild = true;
                if spec.transport == OCI_PROTOCOL {
                    // catalog was pre-downloaded as an image layout on disk
                    if !Path::new(&format!("{}/index.json", catalog_image_dir)).exists() {
                        rm_rf::ensure_removed(&catalog_image_dir).map_err(|e| {
                            MirrorError::new(&format!("clearing {} {:?}", catalog_image_dir, e))
                        })?;
                        rm_rf::ensure_removed(&configs_dir).map_err(|e| {
                            MirrorError::new(&format!("clearing {} {:?}", configs_dir, e))
                        })?;
                        fs::create_dir_all(&configs_dir)
                            .map_err(|e| MirrorError::new(&format!("creating {} {}", configs_dir, e)))?;
                        copy_dir_all(Path::new(&spec.reference), Path::new(&catalog_image_dir))?;
                    }
                    if !operator.target_catalog.is_empty() {
                        catalog_name = operator.target_catalog.clone();
                    }
                    catalog_image = spec.reference_with_transport.clone();
                } else if !Path::new(&format!("{}/index.json", catalog_image_dir)).exists() {
                    let src = spec.reference_with_transport.clone();
                    let dest = format!("{}{}", OCI_PROTOCOL_TRIMMED, catalog_image_dir);
                    self.reg_con.copy(log, src, dest, &self.opts).await?;
                }

                let mut oci = get_image_index(&catalog_image_dir)?;
                if is_multi_manifest_index(&oci) && spec.transport == OCI_PROTOCOL {
                    convert_index_to_single_manifest(&catalog_image_dir, &oci)?;
                    oci = get_image_index(&catalog_image_dir)?;
                }

                let manifests = oci.manifests.clone().unwrap_or_default();
                if manifests.is_empty() {
                    return Err(MirrorError::new(&format!(
                        "{}no manifests found for {}",
                        COLLECTOR_PREFIX, operator.catalog
                    )));
                }
                let manifest_digest = encoded_digest(&manifests[0].digest)?;
                let manifest_file = format!("{}/{}/{}", catalog_image_dir, BLOBS_DIR, manifest_digest);
                let mut manifest = get_image_manifest(&manifest_file)?;

                // a nested multi manifest index - all architectures carry the
                // same configs layer, the first one will do
                let children = manifest.manifests.clone().unwrap_or_default();
                if children.len() > 1 && manifest.config.is_none() {
                    let child_digest = encoded_digest(&children[0].digest)?;
                    let child_file = format!("{}/{}/{}", catalog_image_dir, BLOBS_DIR, child_digest);
                    manifest = get_image_manifest(&child_file)?;
                }

                let config = manifest
                    .config
                    .clone()
                    .ok_or_else(|| MirrorError::new("catalog manifest has no config"))?;
                let config_file = format!(
                    "{}/{}/{}",
                    catalog_image_dir,
                    BLOBS_DIR,
                    encoded_digest(&config.digest)?
                );
                let operator_config = get_operator_config(&config_file)?;
                let label = operator_config
                    .config
                    .labels
                    .operators_operatorframework_io_index_configs_v1
                    .clone()
                    .ok_or_else(|| {
                        MirrorError::new(&format!(
                            "{}catalog {} has no configs label",
                            COLLECTOR_PREFIX, operator.catalog
                        ))
                    })?;
                log.debug(&format!("{}configs label {}", COLLECTOR_PREFIX, label));

                let blobs_dir = format!("{}/{}", catalog_image_dir, BLOBS_DIR);
                extract_layers_oci(log, &blobs_dir, &configs_dir, &label, &manifest)?;

                let original = get_declarative_config(
                    log,
                    &format!("{}/{}", configs_dir, label.trim_matches('/')),
                )?;

                if !is_full_catalog(operator) {
                    let filtered = filter_catalog(log, &original, operator)?;
                    let filtered_config_dir = format!(
                        "{}/{}/{}",
                        filtered_catalogs_dir, filter_digest, CATALOG_CONFIG_DIR
                    );
                    fs::create_dir_all(&filtered_config_dir).map_err(|e| {
                        MirrorError::new(&format!("creating {} {}", filtered_config_dir, e))
                    })?;
                    save_declarative_config(&filtered, &filtered_config_dir)?;
                    collector_schema.catalog_to_fbc_map.insert(
                        spec.reference_with_transport.clone(),
                        CatalogFilterResult {
                            operator_filter: operator.clone(),
                            filtered_config_path: filtered_config_dir,
                            to_rebuild,
                        },
                    );
                    effective_catalog = filtered;
                } else {
                    rebuilt_tag = String::from("");
                    to_rebuild = false;
                    collector_schema.catalog_to_fbc_map.insert(
                        spec.reference_with_transport.clone(),
                        CatalogFilterResult {
                            operator_filter: operator.clone(),
                            filtered_config_path: String::from(""),
                            to_rebuild,
                        },
                    );
                    effective_catalog = original;
                }

                if !operator.target_catalog.is_empty() {
                    catalog_name = operator.target_catalog.clone();
                }
            }

            let mut catalog_related = get_related_images_from_catalog(
                log,
                &effective_catalog,
                &mut collector_schema.copy_image_schema_map,
            );
            if spec.transport == OCI_PROTOCOL && self.is_delete_of_v1_catalog_from_disk() {
                for images in catalog_related.values_mut() {
                    for image in images.iter_mut() {
                        image.origin_from_operator_catalog_on_disk = true;
                    }
                }
            }
            for (key, value) in catalog_related.into_iter() {
                related_images.entry(key).or_default().extend(value);
            }

            let target_tag = if !operator.target_tag.is_empty() {
                operator.target_tag.clone()
            } else if spec.transport == OCI_PROTOCOL {
                // on disk layouts carry neither tag nor digest
                String::from("latest")
            } else {
                String::from("")
            };

            let component_key = format!("{}.{}", spec.component_name(), catalog_digest);
            related_images.insert(
                component_key,
                vec![RelatedImage {
                    name: catalog_name,
                    image: catalog_image,
                    image_type: ImageType::OperatorCatalog,
                    target_tag,
                    target_catalog: operator.target_catalog.clone(),
                    rebuilt_tag,
                    origin_from_operator_catalog_on_disk: false,
                }],
            );
            log.info(&format!("collected catalog {}", operator.catalog));
        }

        Ok((related_images, collector_schema))
    }

    fn prepare_m2d_copy_batch(
        &self,
        log: &Logging,
        images: &HashMap<String, Vec<RelatedImage>>,
    ) -> Vec<CopyImageSchema> {
        let mut result = vec![];
        let mut already_included: HashSet<String> = HashSet::new();
        // deterministic plan order - planning twice gives an identical list
        let mut keys: Vec<&String> = images.keys().collect();
        keys.sort();
        for key in keys.into_iter() {
            let related_images = &images[key];
            for img in related_images.iter() {
                if img.image.is_empty() {
                    continue;
                }
                let spec = match parse_ref(&img.image) {
                    Ok(spec) => spec,
                    Err(e) => {
                        log.warn(&format!("{} : SKIPPING", e));
                        continue;
                    }
                };

                let mut src = spec.reference_with_transport.clone();
                let mut dest = if img.image_type == ImageType::OperatorCatalog
                    && !img.target_catalog.is_empty()
                {
                    format!(
                        "{}{}/{}",
                        DOCKER_PROTOCOL,
                        self.opts.destination_registry(),
                        img.target_catalog
                    )
                } else if img.image_type == ImageType::OperatorCatalog
                    && spec.transport == OCI_PROTOCOL
                {
                    format!(
                        "{}{}/{}",
                        DOCKER_PROTOCOL,
                        self.opts.destination_registry(),
                        img.name
                    )
                } else {
                    format!(
                        "{}{}/{}",
                        DOCKER_PROTOCOL,
                        self.opts.destination_registry(),
                        spec.path_component
                    )
                };

                if img.image_type == ImageType::OperatorCatalog && !img.target_tag.is_empty() {
                    dest = format!("{}:{}", dest, img.target_tag);
                } else if spec.tag.is_empty() && spec.transport == OCI_PROTOCOL {
                    dest = format!("{}:latest", dest);
                } else if spec.is_image_by_digest_only() {
                    dest = format!("{}:{}", dest, digest_tag(&spec));
                } else if spec.is_image_by_tag_and_digest() {
                    // pull by digest, push by tag
                    log.warn(&format!(
                        "{}{} has both tag and digest : using digest to pull, but tag only for mirroring",
                        COLLECTOR_PREFIX, spec.reference
                    ));
                    src = format!(
                        "{}{}/{}@{}:{}",
                        spec.transport, spec.domain, spec.path_component, spec.algorithm, spec.digest
                    );
                    dest = format!("{}:{}", dest, spec.tag);
                } else {
                    dest = format!("{}:{}", dest, spec.tag);
                }

                if already_included.insert(img.image.clone()) {
                    result.push(CopyImageSchema {
                        source: src,
                        destination: dest,
                        origin: spec.reference_with_transport.clone(),
                        image_type: img.image_type,
                        rebuilt_tag: img.rebuilt_tag.clone(),
                    });
                }
            }
        }
        result
    }

    fn prepare_d2m_copy_batch(
        &self,
        log: &Logging,
        images: &HashMap<String, Vec<RelatedImage>>,
    ) -> Vec<CopyImageSchema> {
        let mut result = vec![];
        let mut already_included: HashSet<String> = HashSet::new();
        // deterministic plan order - planning twice gives an identical list
        let mut keys: Vec<&String> = images.keys().collect();
        keys.sort();
        for key in keys.into_iter() {
            let related_images = &images[key];
            for img in related_images.iter() {
                if img.image.is_empty() {
                    continue;
                }
                let spec = match parse_ref(&img.image) {
                    Ok(spec) => spec,
                    Err(e) => {
                        log.warn(&format!("mirroring skipped : {}", e));
                        continue;
                    }
                };

                let (mut src, mut dest) = if img.image_type == ImageType::OperatorCatalog
                    && !img.target_catalog.is_empty()
                {
                    (
                        format!(
                            "{}{}/{}",
                            DOCKER_PROTOCOL, self.opts.local_storage_fqdn, img.target_catalog
                        ),
                        format!("{}/{}", self.opts.destination, img.target_catalog),
                    )
                } else if spec.transport == OCI_PROTOCOL {
                    (
                        format!(
                            "{}{}/{}",
                            DOCKER_PROTOCOL, self.opts.local_storage_fqdn, img.name
                        ),
                        format!("{}/{}", self.opts.destination, img.name),
                    )
                } else {
                    (
                        format!(
                            "{}{}/{}",
                            DOCKER_PROTOCOL, self.opts.local_storage_fqdn, spec.path_component
                        ),
                        format!("{}/{}", self.opts.destination, spec.path_component),
                    )
                };

                if img.image_type == ImageType::OperatorCatalog && !img.target_tag.is_empty() {
                    if !img.rebuilt_tag.is_empty() {
                        src = format!("{}:{}", src, img.rebuilt_tag);
                    } else {
                        src = format!("{}:{}", src, img.target_tag);
                    }
                    dest = format!("{}:{}", dest, img.target_tag);
                } else if spec.tag.is_empty() {
                    if !img.rebuilt_tag.is_empty() {
                        src = format!("{}:{}", src, img.rebuilt_tag);
                    } else {
                        src = format!("{}:{}", src, digest_tag(&spec));
                    }
                    if self.opts.generate_v1_dest_tags {
                        if img.origin_from_operator_catalog_on_disk {
                            dest = format!("{}:{}", dest, &spec.digest[..6]);
                        } else {
                            dest = format!("{}:{:x}", dest, fnv32a(&spec.reference));
                        }
                    } else {
                        dest = format!("{}:{}", dest, digest_tag(&spec));
                    }
                } else {
                    if !img.rebuilt_tag.is_empty() {
                        src = format!("{}:{}", src, img.rebuilt_tag);
                    } else {
                        src = format!("{}:{}", src, spec.tag);
                    }
                    dest = format!("{}:{}", dest, spec.tag);
                }

                log.debug(&format!("source {}", src));
                log.debug(&format!("destination {}", dest));

                if img.image_type == ImageType::OperatorCatalog && self.opts.is_delete() {
                    log.debug(&format!(
                        "delete mode, catalog index {} : SKIPPED",
                        img.image
                    ));
                } else if already_included.insert(img.image.clone()) {
                    result.push(CopyImageSchema {
                        source: src,
                        destination: dest,
                        origin: spec.reference_with_transport.clone(),
                        image_type: img.image_type,
                        rebuilt_tag: img.rebuilt_tag.clone(),
                    });
                }
            }
        }
        result
    }

    // mirror to mirror : catalogs produce two copies, one to the destination
    // and one kept in the cache for later delete workflows
    fn dispatch_images_for_m2m(
        &self,
        log: &Logging,
        images: &HashMap<String, Vec<RelatedImage>>,
    ) -> Vec<CopyImageSchema> {
        let mut result = vec![];
        let mut already_included: HashSet<String> = HashSet::new();
        // deterministic plan order - planning twice gives an identical list
        let mut keys: Vec<&String> = images.keys().collect();
        keys.sort();
        for key in keys.into_iter() {
            let related_images = &images[key];
            for img in related_images.iter() {
                if img.image.is_empty() {
                    continue;
                }
                let spec = match parse_ref(&img.image) {
                    Ok(spec) => spec,
                    Err(e) => {
                        log.warn(&format!("{} : SKIPPING", e));
                        continue;
                    }
                };
                if !already_included.insert(img.image.clone()) {
                    continue;
                }
                if img.image_type == ImageType::OperatorCatalog {
                    let cache_registry =
                        format!("{}{}", DOCKER_PROTOCOL, self.opts.local_storage_fqdn);
                    let to_cache = catalog_ref(&spec, img, &cache_registry, CatalogRefKind::SaveToCache);
                    let from_rebuilt =
                        catalog_ref(&spec, img, &cache_registry, CatalogRefKind::Rebuilt);
                    let to_dest =
                        catalog_ref(&spec, img, &self.opts.destination, CatalogRefKind::Destination);
                    result.push(CopyImageSchema {
                        source: spec.reference_with_transport.clone(),
                        destination: to_cache,
                        origin: spec.reference_with_transport.clone(),
                        image_type: img.image_type,
                        rebuilt_tag: img.rebuilt_tag.clone(),
                    });
                    result.push(CopyImageSchema {
                        source: from_rebuilt,
                        destination: to_dest,
                        origin: spec.reference_with_transport.clone(),
                        image_type: img.image_type,
                        rebuilt_tag: img.rebuilt_tag.clone(),
                    });
                } else {
                    let mut src = spec.reference_with_transport.clone();
                    let mut dest =
                        format!("{}/{}", self.opts.destination, spec.path_component);
                    if spec.tag.is_empty() && spec.transport == OCI_PROTOCOL {
                        dest = format!("{}:latest", dest);
                    } else if spec.is_image_by_digest_only() {
                        dest = format!("{}:{}", dest, digest_tag(&spec));
                    } else if spec.is_image_by_tag_and_digest() {
                        log.warn(&format!(
                            "{}{} has both tag and digest : using digest to pull, but tag only for mirroring",
                            COLLECTOR_PREFIX, spec.reference
                        ));
                        src = format!(
                            "{}{}/{}@{}:{}",
                            spec.transport,
                            spec.domain,
                            spec.path_component,
                            spec.algorithm,
                            spec.digest
                        );
                        dest = format!("{}:{}", dest, spec.tag);
                    } else {
                        dest = format!("{}:{}", dest, spec.tag);
                    }
                    result.push(CopyImageSchema {
                        source: src,
                        destination: dest,
                        origin: spec.reference_with_transport.clone(),
                        image_type: img.image_type,
                        rebuilt_tag: img.rebuilt_tag.clone(),
                    });
                }
            }
        }
        result
    }
}

enum CatalogRefKind {
    SaveToCache,
    Rebuilt,
    Destination,
}

// reference derivation for the three legs of a catalog in mirror to mirror
fn catalog_ref(
    spec: &ImageSpec,
    img: &RelatedImage,
    registry: &str,
    kind: CatalogRefKind,
) -> String {
    let mut reference = if !img.target_catalog.is_empty() {
        format!("{}/{}", registry, img.target_catalog)
    } else if spec.transport == OCI_PROTOCOL {
        format!("{}/{}", registry, img.name)
    } else {
        format!("{}/{}", registry, spec.path_component)
    };

    let tag = match kind {
        CatalogRefKind::Rebuilt if !img.rebuilt_tag.is_empty() => img.rebuilt_tag.clone(),
        _ => {
            if !img.target_tag.is_empty() {
                img.target_tag.clone()
            } else if spec.tag.is_empty() && spec.transport == OCI_PROTOCOL {
                String::from("latest")
            } else if spec.is_image_by_digest_only() {
                digest_tag(spec)
            } else {
                spec.tag.clone()
            }
        }
    };
    reference.push(':');
    reference.push_str(&tag);
    reference
}

#[async_trait]
impl<T: RegistryInterface + Send + Sync> ImageCollector for CollectOperator<T> {
    async fn collect(&self, log: &Logging) -> Result<CollectorSchema, MirrorError> {
        log.hi("operator collector");
        let (related_images, mut collector_schema) = self.collect_catalogs(log).await?;

        let count: usize = related_images.values().map(|v| v.len()).sum();
        log.debug(&format!(
            "{}images to copy (before duplicates) {}",
            COLLECTOR_PREFIX, count
        ));

        let all_images = if self.opts.is_mirror_to_disk() {
            self.prepare_m2d_copy_batch(log, &related_images)
        } else if self.opts.is_mirror_to_mirror() {
            self.dispatch_images_for_m2m(log, &related_images)
        } else {
            self.prepare_d2m_copy_batch(log, &related_images)
        };

        collector_schema.all_images = all_images;
        Ok(collector_schema)
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;

    fn related(image: &str, image_type: ImageType) -> RelatedImage {
        RelatedImage {
            name: String::from("test"),
            image: image.to_string(),
            image_type,
            ..Default::default()
        }
    }

    #[derive(Clone)]
    struct Fake {}

    #[async_trait]
    impl RegistryInterface for Fake {
        async fn copy(
            &self,
            _log: &Logging,
            _src: String,
            _dest: String,
            _opts: &MirrorOptions,
        ) -> Result<(), MirrorError> {
            Ok(())
        }
        async fn check(
            &self,
            _log: &Logging,
            _image: String,
            _opts: &MirrorOptions,
        ) -> Result<bool, MirrorError> {
            Ok(true)
        }
        async fn delete_image(
            &self,
            _log: &Logging,
            _image: String,
            _opts: &MirrorOptions,
        ) -> Result<(), MirrorError> {
            Ok(())
        }
        async fn get_digest(
            &self,
            _log: &Logging,
            _image: String,
            _opts: &MirrorOptions,
        ) -> Result<String, MirrorError> {
            Ok(String::from(
                "0101010101010101010101010101010101010101010101010101010101010101",
            ))
        }
        async fn get_manifest(
            &self,
            _log: &Logging,
            _image: String,
            _opts: &MirrorOptions,
        ) -> Result<(Vec<u8>, String), MirrorError> {
            Ok((Vec::new(), String::from("")))
        }
    }

    fn collector(mode: &str) -> CollectOperator<Fake> {
        CollectOperator {
            reg_con: Fake {},
            config: ImageSetConfig::default(),
            opts: MirrorOptions {
                mode: mode.to_string(),
                function: COPY_FUNCTION.to_string(),
                local_storage_fqdn: String::from("localhost:55000"),
                destination: if mode == MIRROR_TO_DISK {
                    String::from("file:///tmp/test")
                } else {
                    String::from("docker://dest.example.com")
                },
                ..Default::default()
            },
        }
    }

    #[test]
    fn digest_of_filter_stable_under_reordering_pass() {
        let a = Operator {
            catalog: "registry.example.com/ns/ctlg:v1".to_string(),
            target_tag: "v1-filtered".to_string(),
            packages: Some(vec![
                IncludePackage {
                    name: "zz".to_string(),
                    channels: Some(vec![
                        IncludeChannel {
                            name: "beta".to_string(),
                            ..Default::default()
                        },
                        IncludeChannel {
                            name: "alpha".to_string(),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                },
                IncludePackage {
                    name: "aa".to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        let mut b = a.clone();
        // reorder packages and channels, change target fields
        b.packages.as_mut().unwrap().reverse();
        b.packages.as_mut().unwrap()[1]
            .channels
            .as_mut()
            .unwrap()
            .reverse();
        b.target_tag = String::from("other");
        b.target_catalog = String::from("renamed/ctlg");

        let fp_a = digest_of_filter(&a).unwrap();
        let fp_b = digest_of_filter(&b).unwrap();
        assert_eq!(fp_a, fp_b);
        assert_eq!(fp_a.len(), 32);

        // a different selection fingerprint differs
        let mut c = a.clone();
        c.packages.as_mut().unwrap()[0].name = String::from("other-op");
        assert_ne!(fp_a, digest_of_filter(&c).unwrap());
    }

    #[test]
    fn prepare_m2d_digest_only_pass() {
        let op = collector(MIRROR_TO_DISK);
        let digest = "e97097a14ca466ac70bcf6bac6600f1a3a3bae67ecb75ee0d184d85f14e5995e";
        let mut images = HashMap::new();
        images.insert(
            String::from("op1"),
            vec![related(
                &format!("quay.io/x/y@sha256:{}", digest),
                ImageType::OperatorRelatedImage,
            )],
        );
        let log = Logging {
            log_level: Level::INFO,
        };
        let result = op.prepare_m2d_copy_batch(&log, &images);
        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].source,
            format!("docker://quay.io/x/y@sha256:{}", digest)
        );
        assert_eq!(
            result[0].destination,
            format!("docker://localhost:55000/x/y:sha256-{}", digest)
        );
    }

    #[test]
    fn prepare_d2m_digest_only_pass() {
        let op = collector(DISK_TO_MIRROR);
        let digest = "e97097a14ca466ac70bcf6bac6600f1a3a3bae67ecb75ee0d184d85f14e5995e";
        let mut images = HashMap::new();
        images.insert(
            String::from("op1"),
            vec![related(
                &format!("quay.io/x/y@sha256:{}", digest),
                ImageType::OperatorRelatedImage,
            )],
        );
        let log = Logging {
            log_level: Level::INFO,
        };
        let result = op.prepare_d2m_copy_batch(&log, &images);
        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].source,
            format!("docker://localhost:55000/x/y:sha256-{}", digest)
        );
        assert_eq!(
            result[0].destination,
            format!("docker://dest.example.com/x/y:sha256-{}", digest)
        );
    }

    #[test]
    fn dispatch_m2m_renamed_catalog_two_copies_pass() {
        let op = collector(MIRROR_TO_MIRROR);
        let mut catalog = related("quay.io/ns/src:v1", ImageType::OperatorCatalog);
        catalog.target_catalog = String::from("my/ctlg");
        catalog.target_tag = String::from("v1-filtered");
        let mut images = HashMap::new();
        images.insert(String::from("ns/src.abc"), vec![catalog]);
        let log = Logging {
            log_level: Level::INFO,
        };
        let result = op.dispatch_images_for_m2m(&log, &images);
        assert_eq!(result.len(), 2);
        let destinations: Vec<String> =
            result.iter().map(|c| c.destination.clone()).collect();
        assert!(destinations.contains(&String::from("docker://localhost:55000/my/ctlg:v1-filtered")));
        assert!(destinations.contains(&String::from("docker://dest.example.com/my/ctlg:v1-filtered")));
        for copy in result.iter() {
            assert_eq!(copy.image_type, ImageType::OperatorCatalog);
            assert_eq!(copy.origin, "docker://quay.io/ns/src:v1");
        }
    }

    #[test]
    fn prepare_m2d_tag_and_digest_pass() {
        let op = collector(MIRROR_TO_DISK);
        let digest = "e97097a14ca466ac70bcf6bac6600f1a3a3bae67ecb75ee0d184d85f14e5995e";
        let mut images = HashMap::new();
        images.insert(
            String::from("op1"),
            vec![related(
                &format!("quay.io/x/y:v1.2@sha256:{}", digest),
                ImageType::OperatorRelatedImage,
            )],
        );
        let log = Logging {
            log_level: Level::INFO,
        };
        let result = op.prepare_m2d_copy_batch(&log, &images);
        assert_eq!(result.len(), 1);
        // pull by digest, push by tag
        assert_eq!(
            result[0].source,
            format!("docker://quay.io/x/y@sha256:{}", digest)
        );
        assert_eq!(result[0].destination, "docker://localhost:55000/x/y:v1.2");
    }

    #[test]
    fn prepare_m2d_skips_bad_references_pass() {
        let op = collector(MIRROR_TO_DISK);
        let mut images = HashMap::new();
        images.insert(
            String::from("op1"),
            vec![
                related("", ImageType::OperatorRelatedImage),
                related("not a valid ref@@", ImageType::OperatorRelatedImage),
                related("quay.io/x/y:v1", ImageType::OperatorRelatedImage),
            ],
        );
        let log = Logging {
            log_level: Level::INFO,
        };
        let result = op.prepare_m2d_copy_batch(&log, &images);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].destination, "docker://localhost:55000/x/y:v1");
    }

    #[test]
    fn prepare_d2m_delete_skips_catalog_pass() {
        let mut op = collector(DISK_TO_MIRROR);
        op.opts.function = DELETE_FUNCTION.to_string();
        let mut catalog = related("quay.io/ns/src:v1", ImageType::OperatorCatalog);
        catalog.target_tag = String::from("v1");
        let mut images = HashMap::new();
        images.insert(String::from("k"), vec![catalog]);
        images.insert(
            String::from("op1"),
            vec![related("quay.io/x/y:v1", ImageType::OperatorRelatedImage)],
        );
        let log = Logging {
            log_level: Level::INFO,
        };
        let result = op.prepare_d2m_copy_batch(&log, &images);
        // the catalog index itself is not deleted
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].image_type, ImageType::OperatorRelatedImage);
    }

    #[test]
    fn digest_tag_truncation_pass() {
        let digest = "e9".repeat(100);
        let spec = ImageSpec {
            algorithm: String::from("sha256"),
            digest,
            ..Default::default()
        };
        let tag = digest_tag(&spec);
        assert_eq!(tag.len(), 128);
        assert!(tag.starts_with("sha256-e9e9"));
    }

    #[test]
    fn is_valid_path_component_pass() {
        assert!(is_valid_path_component("my/ctlg"));
        assert!(is_valid_path_component("team-a/catalog_v2"));
        assert!(!is_valid_path_component(""));
        assert!(!is_valid_path_component("/leading"));
        assert!(!is_valid_path_component("trailing/"));
        assert!(!is_valid_path_component("UPPER/case"));
    }
}

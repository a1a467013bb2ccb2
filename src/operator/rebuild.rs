// module rebuild catalogs
//
// rebuilds each filtered catalog image : the original layout plus a
// whiteout of /configs and a fresh /configs layer, pushed to the cache
// under the filter fingerprint tag

use std::fs;
use std::path::Path;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::image::reference::parse_ref;
use crate::imagebuilder::builder::*;
use crate::log::logging::*;
use crate::mirror::copy::RegistryInterface;
use crate::operator::collector::{copy_dir_all, CATALOG_CONFIG_DIR, CATALOG_IMAGE_DIR};

pub const FILTERED_CATALOG_IMAGE_DIR: &str = "filtered-catalog-image";

pub struct RebuildCatalog<T: RegistryInterface> {
    pub reg_con: T,
    pub config: ImageSetConfig,
    pub opts: MirrorOptions,
}

// working-dir/operator-catalogs/<component>/<digest>/filtered-catalogs/<fp>/catalog-config
// the original layout lives three levels up under catalog-image
fn catalog_image_on_disk(config_path: &str) -> Result<String, MirrorError> {
    let filtered_dir = Path::new(config_path)
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .ok_or_else(|| {
            MirrorError::new(&format!(
                "unexpected filtered config path {}",
                config_path
            ))
        })?;
    let layout = filtered_dir.join(CATALOG_IMAGE_DIR);
    if !layout.join("index.json").exists() {
        return Err(MirrorError::new(&format!(
            "no catalog image layout found at {}",
            layout.display()
        )));
    }
    Ok(layout.display().to_string())
}

impl<T: RegistryInterface + Send + Sync> RebuildCatalog<T> {
    // the cache side reference the rebuilt image is pushed to - tagged with
    // the filter fingerprint so the fast path can find it again
    fn rebuilt_cache_ref(
        &self,
        copy_image: &CopyImageSchema,
        fingerprint: &str,
    ) -> Result<String, MirrorError> {
        let destination = if self.opts.is_mirror_to_mirror() {
            copy_image.destination.replacen(
                &self.opts.destination_registry(),
                &self.opts.local_storage_fqdn,
                1,
            )
        } else {
            copy_image.destination.clone()
        };
        let spec = parse_ref(&destination)?;
        Ok(spec.set_tag(fingerprint).reference_with_transport)
    }

    pub async fn rebuild(
        &self,
        log: &Logging,
        collector_schema: &CollectorSchema,
    ) -> Result<(), MirrorError> {
        if !self.opts.is_mirror_to_disk() && !self.opts.is_mirror_to_mirror() {
            return Ok(());
        }
        log.hi("rebuilding catalogs");

        for copy_image in collector_schema.all_images.iter() {
            if copy_image.image_type != ImageType::OperatorCatalog {
                continue;
            }
            // mirror to mirror emits a second entry whose source is the
            // already rebuilt cache image - nothing to rebuild there
            if self.opts.is_mirror_to_mirror()
                && copy_image.source.contains(&self.opts.local_storage_fqdn)
            {
                continue;
            }
            let filter_result = collector_schema
                .catalog_to_fbc_map
                .get(&copy_image.origin)
                .ok_or_else(|| {
                    MirrorError::new(&format!(
                        "unable to rebuild catalog {}: filtered declarative config not found",
                        copy_image.origin
                    ))
                })?;
            if !filter_result.to_rebuild {
                continue;
            }
            let config_path = filter_result.filtered_config_path.clone();
            if !Path::new(&config_path).exists() {
                return Err(MirrorError::new(&format!(
                    "error reading filtered config for catalog {} from {}",
                    copy_image.origin, config_path
                )));
            }

            let origin_layout = catalog_image_on_disk(&config_path)?;
            let layout_dir = config_path.replace(CATALOG_CONFIG_DIR, FILTERED_CATALOG_IMAGE_DIR);
            copy_dir_all(Path::new(&origin_layout), Path::new(&layout_dir))?;

            // the whiteout must precede the replacement layer
            let layers = vec![
                delete_layer("/.wh.configs")?,
                layer_from_path("/configs", &config_path, 0, 0)?,
            ];
            let cmd = vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "serve /configs".to_string(),
            ];
            let fingerprint = Path::new(&config_path)
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();
            let cache_ref = self.rebuilt_cache_ref(copy_image, &fingerprint)?;

            // cache pushes are plain http
            let mut push_opts = self.opts.clone();
            push_opts.src_tls_verify = false;
            let digest = build_and_push(
                log,
                &self.reg_con,
                &layout_dir,
                &cache_ref,
                &cmd,
                &layers,
                &push_opts,
            )
            .await
            .map_err(|e| {
                MirrorError::new(&format!(
                    "error building catalog {} : {}",
                    copy_image.origin, e
                ))
            })?;

            // recorded digest drives the already-filtered fast path
            let digest_file = Path::new(&config_path)
                .parent()
                .map(|p| p.join("digest"))
                .ok_or_else(|| MirrorError::new("unexpected filtered config path"))?;
            fs::write(&digest_file, &digest).map_err(|e| {
                MirrorError::new(&format!("writing {} {}", digest_file.display(), e))
            })?;
            log.info(&format!(
                "rebuilt catalog {} as {}",
                copy_image.origin, cache_ref
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    struct Recorder {
        copies: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RegistryInterface for Recorder {
        async fn copy(
            &self,
            _log: &Logging,
            src: String,
            dest: String,
            _opts: &MirrorOptions,
        ) -> Result<(), MirrorError> {
            self.copies.lock().unwrap().push((src, dest));
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
            Ok(String::from("aa"))
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

    #[test]
    fn rebuild_catalog_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let fingerprint = "0a1b2c3d4e5f67890a1b2c3d4e5f6789";
        let base = tmp
            .path()
            .join("working-dir/operator-catalogs/ctlg/0101");
        let config_path = base.join(format!("filtered-catalogs/{}/catalog-config", fingerprint));
        fs::create_dir_all(config_path.join("op1")).unwrap();
        fs::write(config_path.join("op1/catalog.json"), "{\"schema\": \"olm.package\", \"name\": \"op1\"}").unwrap();

        // scaffold the original catalog image layout
        let contents = tempfile::tempdir().unwrap();
        fs::write(contents.path().join("old.json"), "{}").unwrap();
        let base_layer =
            layer_from_path("/configs", &contents.path().display().to_string(), 0, 0).unwrap();
        let layout = base.join(CATALOG_IMAGE_DIR);
        scaffold_layout(&layout.display().to_string(), &base_layer).unwrap();

        let rebuild = RebuildCatalog {
            reg_con: Recorder {
                copies: Mutex::new(vec![]),
            },
            config: ImageSetConfig::default(),
            opts: MirrorOptions {
                mode: MIRROR_TO_DISK.to_string(),
                function: COPY_FUNCTION.to_string(),
                local_storage_fqdn: String::from("localhost:55000"),
                ..Default::default()
            },
        };

        let mut schema = CollectorSchema::default();
        schema.all_images.push(CopyImageSchema {
            source: String::from("docker://quay.io/ns/ctlg:v1"),
            destination: String::from("docker://localhost:55000/ns/ctlg:v1"),
            origin: String::from("docker://quay.io/ns/ctlg:v1"),
            image_type: ImageType::OperatorCatalog,
            rebuilt_tag: fingerprint.to_string(),
        });
        schema.catalog_to_fbc_map.insert(
            String::from("docker://quay.io/ns/ctlg:v1"),
            CatalogFilterResult {
                operator_filter: Operator::default(),
                filtered_config_path: config_path.display().to_string(),
                to_rebuild: true,
            },
        );

        aw!(rebuild.rebuild(&log, &schema)).unwrap();

        // pushed to the cache under the fingerprint tag
        let copies = rebuild.reg_con.copies.lock().unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(
            copies[0].1,
            format!("docker://localhost:55000/ns/ctlg:{}", fingerprint)
        );

        // the digest file was recorded beside the filtered config
        let digest_file = config_path.parent().unwrap().join("digest");
        let digest = fs::read_to_string(digest_file).unwrap();
        assert_eq!(digest.len(), 64);

        // the rebuilt layout exists with the two extra layers
        let rebuilt_layout = config_path
            .display()
            .to_string()
            .replace(CATALOG_CONFIG_DIR, FILTERED_CATALOG_IMAGE_DIR);
        let index = crate::manifests::catalogs::get_image_index(&rebuilt_layout).unwrap();
        let entry = index.manifests.unwrap()[0].clone();
        let manifest = crate::manifests::catalogs::get_image_manifest(&format!(
            "{}/blobs/sha256/{}",
            rebuilt_layout,
            crate::manifests::catalogs::encoded_digest(&entry.digest).unwrap()
        ))
        .unwrap();
        assert_eq!(manifest.layers.unwrap().len(), 3);
    }

    #[test]
    fn rebuild_skips_unfiltered_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let rebuild = RebuildCatalog {
            reg_con: Recorder {
                copies: Mutex::new(vec![]),
            },
            config: ImageSetConfig::default(),
            opts: MirrorOptions {
                mode: MIRROR_TO_DISK.to_string(),
                function: COPY_FUNCTION.to_string(),
                local_storage_fqdn: String::from("localhost:55000"),
                ..Default::default()
            },
        };
        let mut schema = CollectorSchema::default();
        schema.all_images.push(CopyImageSchema {
            source: String::from("docker://quay.io/ns/ctlg:v1"),
            destination: String::from("docker://localhost:55000/ns/ctlg:v1"),
            origin: String::from("docker://quay.io/ns/ctlg:v1"),
            image_type: ImageType::OperatorCatalog,
            rebuilt_tag: String::from(""),
        });
        schema.catalog_to_fbc_map.insert(
            String::from("docker://quay.io/ns/ctlg:v1"),
            CatalogFilterResult {
                operator_filter: Operator::default(),
                filtered_config_path: String::from(""),
                to_rebuild: false,
            },
        );
        aw!(rebuild.rebuild(&log, &schema)).unwrap();
        assert!(rebuild.reg_con.copies.lock().unwrap().is_empty());
    }
}

// module delete images
//
// generates and consumes the delete-images yaml, then drives the batch
// worker in delete mode against the destination (and optionally the cache)

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::api::schema::*;
use crate::batch::worker::BatchWorker;
use crate::error::handler::*;
use crate::image::reference::parse_ref;
use crate::log::logging::*;
use crate::mirror::copy::RegistryInterface;
use crate::release::collector::{
    RELEASE_COMPONENT_PATH_COMPONENTS, RELEASE_IMAGE_PATH_COMPONENTS,
};

pub const DELETE_DIR: &str = "delete";
const DELETE_IMAGES_YAML: &str = "delete/delete-images.yaml";
const DELETE_CONFIG_YAML: &str = "delete/delete-imageset-config.yaml";
const DELETE_PREFIX: &str = "[delete-images] ";

pub struct DeleteImages {
    pub opts: MirrorOptions,
}

impl DeleteImages {
    fn versioned(&self, path: &str) -> String {
        if self.opts.delete_id.is_empty() {
            return path.to_string();
        }
        path.replacen(".", &format!("-{}.", self.opts.delete_id), 1)
    }

    // writes the images (and a copy of the delete config) in yaml format
    // for later processing
    pub fn write_delete_metadata(
        &self,
        log: &Logging,
        images: &[CopyImageSchema],
    ) -> Result<(), MirrorError> {
        log.info("generating delete file");
        let delete_dir = format!("{}/{}", self.opts.working_dir, DELETE_DIR);
        fs::create_dir_all(&delete_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", delete_dir, e)))?;

        let mut duplicates: HashSet<String> = HashSet::new();
        let mut items = vec![];
        for img in images.iter() {
            if !duplicates.insert(img.origin.clone()) {
                log.debug(&format!("{}duplicate image found {}", DELETE_PREFIX, img.origin));
                continue;
            }
            items.push(DeleteItem {
                image_name: img.origin.clone(),
                image_reference: img.destination.clone(),
                image_type: img.image_type,
            });
        }
        items.sort_by(|a, b| a.image_reference.cmp(&b.image_reference));

        let list = DeleteImageList {
            kind: String::from("DeleteImageList"),
            api_version: String::from("mirror.openshift.io/v2alpha1"),
            items,
        };
        let data = serde_yaml::to_string(&list)
            .map_err(|e| MirrorError::new(&format!("{}{}", DELETE_PREFIX, e)))?;

        let filename = format!(
            "{}/{}",
            self.opts.working_dir,
            self.versioned(DELETE_IMAGES_YAML)
        );
        fs::write(&filename, data)
            .map_err(|e| MirrorError::new(&format!("{}writing {} {}", DELETE_PREFIX, filename, e)))?;
        log.info(&format!("{} file created", filename));

        let config_copy = format!(
            "{}/{}",
            self.opts.working_dir,
            self.versioned(DELETE_CONFIG_YAML)
        );
        fs::copy(&self.opts.config_path, &config_copy)
            .map_err(|e| MirrorError::new(&format!("{}copying config {}", DELETE_PREFIX, e)))?;
        Ok(())
    }

    // reads (and sanity checks) the list of images to delete
    pub fn read_delete_metadata(&self, log: &Logging) -> Result<DeleteImageList, MirrorError> {
        log.info("reading delete file");
        let filename = if self.opts.delete_yaml.is_empty() {
            let default = format!(
                "{}/{}",
                self.opts.working_dir,
                self.versioned(DELETE_IMAGES_YAML)
            );
            if !Path::new(&default).exists() {
                return Err(MirrorError::new(&format!(
                    "delete yaml file {} does not exist (please perform a delete with --generate)",
                    default
                )));
            }
            default
        } else {
            self.opts.delete_yaml.clone()
        };
        let data = fs::read_to_string(&filename)
            .map_err(|e| MirrorError::new(&format!("reading {} {}", filename, e)))?;
        let list: DeleteImageList = serde_yaml::from_str(&data)
            .map_err(|e| MirrorError::new(&format!("parsing {} {}", filename, e)))?;
        Ok(list)
    }

    // every entry must point into the delete destination - a mismatch means
    // the yaml was generated against another registry
    fn check_destination(&self, item: &DeleteItem) -> Result<(), MirrorError> {
        let name_spec = parse_ref(&item.image_name)?;
        let reference_spec = parse_ref(&item.image_reference)?;
        let registry = self
            .opts
            .delete_destination
            .trim_start_matches(DOCKER_PROTOCOL);
        let assembled = match item.image_type {
            ImageType::OcpReleaseContent => {
                format!("{}/{}", registry, RELEASE_COMPONENT_PATH_COMPONENTS)
            }
            ImageType::OcpRelease => {
                format!("{}/{}", registry, RELEASE_IMAGE_PATH_COMPONENTS)
            }
            _ => format!("{}/{}", registry, name_spec.path_component),
        };
        let actual = format!("{}/{}", reference_spec.domain, reference_spec.path_component);
        if assembled != actual {
            return Err(MirrorError::new(&format!(
                "delete destination {} does not match values found in the delete-images yaml file (please verify full name)",
                self.opts.delete_destination
            )));
        }
        Ok(())
    }

    pub async fn delete_registry_images<T: RegistryInterface + Send + Sync>(
        &self,
        log: &Logging,
        reg_con: &T,
        delete_image_list: &DeleteImageList,
    ) -> Result<(), MirrorError> {
        log.debug("deleting images from remote registry");
        let mut collector_schema = CollectorSchema::default();

        for item in delete_image_list.items.iter() {
            self.check_destination(item)?;
            collector_schema.all_images.push(CopyImageSchema {
                source: String::from(""),
                destination: item.image_reference.clone(),
                origin: item.image_name.clone(),
                image_type: item.image_type,
                rebuilt_tag: String::from(""),
            });
            if self.opts.force_cache_delete {
                let cache_reference = item.image_reference.replacen(
                    self.opts.delete_destination.as_str(),
                    &format!("{}{}", DOCKER_PROTOCOL, self.opts.local_storage_fqdn),
                    1,
                );
                log.debug(&format!("deleting image from local cache {}", cache_reference));
                collector_schema.all_images.push(CopyImageSchema {
                    source: String::from(""),
                    destination: cache_reference,
                    origin: item.image_name.clone(),
                    image_type: item.image_type,
                    rebuilt_tag: String::from(""),
                });
            }
        }

        if !self.opts.delete_generate && !self.opts.delete_destination.is_empty() {
            let worker = BatchWorker {
                logs_dir: self.opts.logs_dir.clone(),
            };
            worker
                .worker(log, reg_con, &collector_schema, &self.opts)
                .await?;
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
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RegistryInterface for Recorder {
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
            image: String,
            _opts: &MirrorOptions,
        ) -> Result<(), MirrorError> {
            self.deleted.lock().unwrap().push(image);
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

    fn delete_opts(working_dir: &str) -> MirrorOptions {
        MirrorOptions {
            mode: DISK_TO_MIRROR.to_string(),
            function: DELETE_FUNCTION.to_string(),
            local_storage_fqdn: String::from("localhost:55000"),
            destination: String::from("docker://dest.example.com"),
            delete_destination: String::from("docker://dest.example.com"),
            working_dir: working_dir.to_string(),
            logs_dir: format!("{}/logs", working_dir),
            parallel_images: 2,
            image_timeout_secs: 60,
            ..Default::default()
        }
    }

    fn sample_images() -> Vec<CopyImageSchema> {
        vec![
            CopyImageSchema {
                source: String::from("docker://localhost:55000/x/y:v1"),
                destination: String::from("docker://dest.example.com/x/y:v1"),
                origin: String::from("docker://quay.io/x/y:v1"),
                image_type: ImageType::OperatorRelatedImage,
                rebuilt_tag: String::from(""),
            },
            // duplicate origin is collapsed
            CopyImageSchema {
                source: String::from("docker://localhost:55000/x/y:v1"),
                destination: String::from("docker://dest.example.com/x/y:v1"),
                origin: String::from("docker://quay.io/x/y:v1"),
                image_type: ImageType::OperatorRelatedImage,
                rebuilt_tag: String::from(""),
            },
        ]
    }

    #[test]
    fn write_and_read_metadata_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("delete-isc.yaml");
        fs::write(&config, "kind: DeleteImageSetConfiguration").unwrap();
        let mut opts = delete_opts(&tmp.path().display().to_string());
        opts.config_path = config.display().to_string();

        let delete = DeleteImages { opts };
        delete.write_delete_metadata(&log, &sample_images()).unwrap();

        let list = delete.read_delete_metadata(&log).unwrap();
        assert_eq!(list.kind, "DeleteImageList");
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].image_name, "docker://quay.io/x/y:v1");
        assert!(tmp
            .path()
            .join("delete/delete-imageset-config.yaml")
            .exists());
    }

    #[test]
    fn read_metadata_missing_fail() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let delete = DeleteImages {
            opts: delete_opts(&tmp.path().display().to_string()),
        };
        assert!(delete.read_delete_metadata(&log).is_err());
    }

    #[test]
    fn delete_registry_images_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut opts = delete_opts(&tmp.path().display().to_string());
        opts.force_cache_delete = true;
        let delete = DeleteImages { opts };

        let list = DeleteImageList {
            kind: String::from("DeleteImageList"),
            api_version: String::from("mirror.openshift.io/v2alpha1"),
            items: vec![DeleteItem {
                image_name: String::from("docker://quay.io/x/y:v1"),
                image_reference: String::from("docker://dest.example.com/x/y:v1"),
                image_type: ImageType::OperatorRelatedImage,
            }],
        };
        let recorder = Recorder {
            deleted: Mutex::new(vec![]),
        };
        aw!(delete.delete_registry_images(&log, &recorder, &list)).unwrap();
        let deleted = recorder.deleted.lock().unwrap();
        // destination plus the cache copy
        assert_eq!(deleted.len(), 2);
        assert!(deleted.contains(&String::from("docker://dest.example.com/x/y:v1")));
        assert!(deleted.contains(&String::from("docker://localhost:55000/x/y:v1")));
    }

    #[test]
    fn delete_destination_mismatch_fail() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let delete = DeleteImages {
            opts: delete_opts(&tmp.path().display().to_string()),
        };
        let list = DeleteImageList {
            kind: String::from("DeleteImageList"),
            api_version: String::from("mirror.openshift.io/v2alpha1"),
            items: vec![DeleteItem {
                image_name: String::from("docker://quay.io/x/y:v1"),
                image_reference: String::from("docker://other.example.com/x/y:v1"),
                image_type: ImageType::OperatorRelatedImage,
            }],
        };
        let recorder = Recorder {
            deleted: Mutex::new(vec![]),
        };
        assert!(aw!(delete.delete_registry_images(&log, &recorder, &list)).is_err());
    }
}

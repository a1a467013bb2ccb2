// module graph update
//
// wraps the cincinnati graph data in a minimal image and pushes it to the
// cache (or destination) registry
// follows the documented update-service graph-data image procedure

use std::fs;
use std::path::Path;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::imagebuilder::builder::*;
use crate::log::logging::*;
use crate::mirror::copy::RegistryInterface;
use crate::release::collector::GRAPH_IMAGE_NAME;

pub const GRAPH_BASE_IMAGE: &str = "registry.access.redhat.com/ubi9/ubi:latest";
pub const GRAPH_URL: &str = "https://api.openshift.com/api/upgrades_info/graph-data";
pub const GRAPH_PREPARATION_DIR: &str = "graph-preparation";
const BUILD_GRAPH_DATA_DIR: &str = "/var/lib/cincinnati-graph-data";
const GRAPH_DATA_MOUNT_PATH: &str = "/var/lib/cincinnati/graph-data";

pub struct GraphUpdate<T: RegistryInterface> {
    pub reg_con: T,
    pub config: ImageSetConfig,
    pub opts: MirrorOptions,
}

impl<T: RegistryInterface + Send + Sync> GraphUpdate<T> {
    fn graph_enabled(&self) -> bool {
        self.config
            .mirror
            .platform
            .as_ref()
            .map_or(false, |p| p.graph)
    }

    // a layout left behind by a prior run is authoritative
    fn graph_image_in_working_dir(&self) -> Option<String> {
        let layout_dir = format!("{}/{}", self.opts.working_dir, GRAPH_PREPARATION_DIR);
        if Path::new(&format!("{}/index.json", layout_dir)).exists() {
            return Some(format!("{}{}", OCI_PROTOCOL, layout_dir));
        }
        None
    }

    // downloads the graph data and builds + pushes the graph image,
    // returning the pushed reference. a no-op outside mirrorToDisk or when
    // platform.graph is unset
    pub async fn create(&self, log: &Logging, url: &str) -> Result<String, MirrorError> {
        if !self.graph_enabled() {
            return Ok(String::from(""));
        }
        if let Some(image) = self.graph_image_in_working_dir() {
            log.info("graph data exists in cache");
            return Ok(image);
        }
        if !self.opts.is_mirror_to_disk() {
            return Ok(String::from(""));
        }
        if !std::env::var("UPDATE_URL_OVERRIDE").unwrap_or_default().is_empty() {
            // cincinnati is not reachable - nothing to build
            return Ok(String::from(""));
        }

        log.info("building graph image");
        let res = reqwest::get(url)
            .await
            .map_err(|e| MirrorError::new(&format!("fetching graph data {} {}", url, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "fetching graph data {} status {}",
                url,
                res.status()
            )));
        }
        let body = res
            .bytes()
            .await
            .map_err(|e| MirrorError::new(&format!("reading graph data {}", e)))?;

        // graph data lands in a layer with root ownership and 0644 files
        let graph_layer = layer_from_gzip_bytes(&body, BUILD_GRAPH_DATA_DIR, 0o644, 0, 0)?;

        let layout_dir = format!("{}/{}", self.opts.working_dir, GRAPH_PREPARATION_DIR);
        fs::create_dir_all(&layout_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", layout_dir, e)))?;

        // pull the base image into the layout
        let src = format!("{}{}", DOCKER_PROTOCOL, GRAPH_BASE_IMAGE);
        let dest = format!("{}{}", OCI_PROTOCOL_TRIMMED, layout_dir);
        self.reg_con.copy(log, src, dest, &self.opts).await?;

        let cmd = vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!("exec cp -rp {}/* {}", BUILD_GRAPH_DATA_DIR, GRAPH_DATA_MOUNT_PATH),
        ];
        let graph_image_ref = format!(
            "{}{}/{}:latest",
            DOCKER_PROTOCOL,
            self.opts.destination_registry(),
            GRAPH_IMAGE_NAME
        );
        build_and_push(
            log,
            &self.reg_con,
            &layout_dir,
            &graph_image_ref,
            &cmd,
            &[graph_layer],
            &self.opts,
        )
        .await?;
        Ok(graph_image_ref)
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serial_test::serial;
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
            // emulate the base image pull by scaffolding a layout
            if let Some(dir) = dest.strip_prefix(OCI_PROTOCOL_TRIMMED) {
                let contents = tempfile::tempdir().unwrap();
                fs::write(contents.path().join("os-release"), "ubi9").unwrap();
                let base =
                    layer_from_path("/etc", &contents.path().display().to_string(), 0, 0)
                        .unwrap();
                scaffold_layout(dir, &base).unwrap();
            }
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

    fn graph_config(graph: bool) -> ImageSetConfig {
        ImageSetConfig {
            kind: String::from("ImageSetConfiguration"),
            api_version: String::from("mirror.openshift.io/v2alpha1"),
            mirror: Mirror {
                platform: Some(Platform {
                    graph,
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    #[serial]
    fn create_graph_image_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new();

        // a graph-data tar.gz served by the mock cincinnati endpoint
        let mut builder =
            tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data = "{}";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "channels/stable.json", data.as_bytes())
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();
        server
            .mock("GET", "/api/upgrades_info/graph-data")
            .with_status(200)
            .with_body(archive)
            .create();

        let graph = GraphUpdate {
            reg_con: Recorder {
                copies: Mutex::new(vec![]),
            },
            config: graph_config(true),
            opts: MirrorOptions {
                mode: MIRROR_TO_DISK.to_string(),
                function: COPY_FUNCTION.to_string(),
                local_storage_fqdn: String::from("localhost:55000"),
                working_dir: tmp.path().display().to_string(),
                ..Default::default()
            },
        };
        let url = format!("{}/api/upgrades_info/graph-data", server.url());
        let image = aw!(graph.create(&log, &url)).unwrap();
        assert_eq!(
            image,
            "docker://localhost:55000/openshift/graph-image:latest"
        );
        let copies = graph.reg_con.copies.lock().unwrap();
        // base image pull plus the final push
        assert_eq!(copies.len(), 2);
        assert!(copies[0].0.contains("ubi9"));
        assert!(copies[1].1.contains("openshift/graph-image"));

        // a second run reuses the prepared layout and emits no new image
        drop(copies);
        let image = aw!(graph.create(&log, &url)).unwrap();
        assert!(image.starts_with(OCI_PROTOCOL));
        assert_eq!(graph.reg_con.copies.lock().unwrap().len(), 2);
    }

    #[test]
    #[serial]
    fn create_graph_disabled_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let graph = GraphUpdate {
            reg_con: Recorder {
                copies: Mutex::new(vec![]),
            },
            config: graph_config(false),
            opts: MirrorOptions::default(),
        };
        let image = aw!(graph.create(&log, GRAPH_URL)).unwrap();
        assert_eq!(image, "");
    }
}

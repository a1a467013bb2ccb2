// module setup
//
// working directory scaffolding and cache directory resolution

use std::env;
use std::fs;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

pub const CACHE_ENV_VAR: &str = "OC_MIRROR_CACHE";
pub const CACHE_RELATIVE_PATH: &str = ".oc-mirror/.cache";

pub const SIGNATURES_DIR: &str = "signatures";
pub const RELEASE_IMAGE_DIR: &str = "release-images";
pub const RELEASE_IMAGE_EXTRACT_DIR: &str = "hold-release";
pub const CINCINNATI_GRAPH_DATA_DIR: &str = "cincinnati-graph-data";
pub const OPERATOR_IMAGE_EXTRACT_DIR: &str = "hold-operator";
pub const OPERATOR_CATALOGS_DIR: &str = "operator-catalogs";
pub const CLUSTER_RESOURCES_DIR: &str = "cluster-resources";
pub const HELM_DIR: &str = "helm";
pub const HELM_CHART_DIR: &str = "charts";
pub const HELM_INDEXES_DIR: &str = "indexes";
pub const LOGS_DIR: &str = "logs";

pub fn create_directories(log: &Logging, opts: &mut MirrorOptions) -> Result<(), MirrorError> {
    let working_dir = opts.working_dir.clone();
    fs::create_dir_all(&working_dir)
        .map_err(|e| MirrorError::new(&format!("setup working-dir ({}) {}", working_dir, e)))?;

    let subdirs = [
        SIGNATURES_DIR.to_string(),
        RELEASE_IMAGE_DIR.to_string(),
        RELEASE_IMAGE_EXTRACT_DIR.to_string(),
        format!("{}/{}", RELEASE_IMAGE_EXTRACT_DIR, CINCINNATI_GRAPH_DATA_DIR),
        OPERATOR_IMAGE_EXTRACT_DIR.to_string(),
        OPERATOR_CATALOGS_DIR.to_string(),
        format!("{}/{}", HELM_DIR, HELM_CHART_DIR),
        format!("{}/{}", HELM_DIR, HELM_INDEXES_DIR),
        LOGS_DIR.to_string(),
    ];
    for dir in subdirs.iter() {
        let path = format!("{}/{}", working_dir, dir);
        log.trace(&format!("creating directory {}", path));
        fs::create_dir_all(&path)
            .map_err(|e| MirrorError::new(&format!("setup working-dir for {} {}", dir, e)))?;
    }

    // cluster-resources is regenerated on every mirror run
    let cluster_resources = format!("{}/{}", working_dir, CLUSTER_RESOURCES_DIR);
    if !opts.is_delete() {
        rm_rf::ensure_removed(&cluster_resources).map_err(|e| {
            MirrorError::new(&format!(
                "setup working-dir for cluster resources: failed to clear folder {} {:?}",
                cluster_resources, e
            ))
        })?;
    }
    fs::create_dir_all(&cluster_resources)
        .map_err(|e| MirrorError::new(&format!("setup working-dir for cluster resources {}", e)))?;

    // cache directory : flag wins, then OC_MIRROR_CACHE, then $HOME
    if opts.cache_dir.is_empty() {
        match env::var(CACHE_ENV_VAR) {
            Ok(dir) if !dir.is_empty() => opts.cache_dir = dir,
            _ => {
                let home = env::var("HOME").unwrap_or_else(|_| String::from("."));
                opts.cache_dir = format!("{}/{}", home, CACHE_RELATIVE_PATH);
            }
        }
    }
    fs::create_dir_all(&opts.cache_dir).map_err(|e| {
        MirrorError::new(&format!("unable to setup folder for cache directory: {}", e))
    })?;

    opts.logs_dir = format!("{}/{}", working_dir, LOGS_DIR);
    Ok(())
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn create_directories_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let mut opts = MirrorOptions {
            mode: MIRROR_TO_DISK.to_string(),
            function: COPY_FUNCTION.to_string(),
            working_dir: tmp.path().join("working-dir").display().to_string(),
            cache_dir: cache.path().display().to_string(),
            ..Default::default()
        };
        create_directories(&log, &mut opts).unwrap();
        for dir in [
            "signatures",
            "release-images",
            "hold-release/cincinnati-graph-data",
            "operator-catalogs",
            "cluster-resources",
            "helm/charts",
            "helm/indexes",
            "logs",
        ] {
            assert!(tmp.path().join("working-dir").join(dir).exists());
        }
        assert_eq!(
            opts.logs_dir,
            tmp.path().join("working-dir/logs").display().to_string()
        );
    }

    #[test]
    #[serial]
    fn cache_dir_env_override_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        env::set_var(CACHE_ENV_VAR, cache.path().join("custom").display().to_string());
        let mut opts = MirrorOptions {
            mode: MIRROR_TO_DISK.to_string(),
            function: COPY_FUNCTION.to_string(),
            working_dir: tmp.path().join("working-dir").display().to_string(),
            ..Default::default()
        };
        create_directories(&log, &mut opts).unwrap();
        assert_eq!(
            opts.cache_dir,
            cache.path().join("custom").display().to_string()
        );
        env::remove_var(CACHE_ENV_VAR);
    }
}

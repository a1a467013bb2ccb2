// module local storage
//
// the cache registry itself runs as an external distribution style process
// pointed at the cache directory. this module owns the storage layout and
// the up front port diagnostics the pipeline depends on

use std::fs;
use std::net::TcpListener;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

pub struct LocalStorage {
    pub opts: MirrorOptions,
}

pub fn is_port_bound(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}

impl LocalStorage {
    // prepare the distribution v2 storage layout under the cache dir
    pub fn setup(&self, log: &Logging) -> Result<(), MirrorError> {
        let layout = format!("{}/docker/registry/v2", self.opts.cache_dir);
        fs::create_dir_all(format!("{}/repositories", layout))
            .map_err(|e| MirrorError::new(&format!("creating {}/repositories {}", layout, e)))?;
        fs::create_dir_all(format!("{}/blobs/sha256", layout))
            .map_err(|e| MirrorError::new(&format!("creating {}/blobs {}", layout, e)))?;
        log.debug(&format!(
            "local storage layout ready under {} (serving on localhost:{})",
            self.opts.cache_dir, self.opts.port
        ));
        Ok(())
    }

    // the registry port must be free before the serving process is launched
    pub fn check_port(&self) -> Result<(), MirrorError> {
        if is_port_bound(self.opts.port) {
            return Err(MirrorError::new(&format!(
                "could not start local registry : port {} is already in use",
                self.opts.port
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;

    #[test]
    fn setup_creates_layout_pass() {
        let log = Logging {
            log_level: Level::INFO,
        };
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage {
            opts: MirrorOptions {
                cache_dir: tmp.path().display().to_string(),
                port: 55000,
                ..Default::default()
            },
        };
        storage.setup(&log).unwrap();
        assert!(tmp.path().join("docker/registry/v2/repositories").exists());
        assert!(tmp.path().join("docker/registry/v2/blobs/sha256").exists());
    }

    #[test]
    fn check_port_bound_fail() {
        // bind a random free port ourselves, then expect the check to fail
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let storage = LocalStorage {
            opts: MirrorOptions {
                port,
                ..Default::default()
            },
        };
        assert!(storage.check_port().is_err());
        drop(listener);
        assert!(storage.check_port().is_ok());
    }
}

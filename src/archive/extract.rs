// module archive extract
//
// reads the mirror_NNNNNN.tar segments back : working-dir entries land
// beside the current working dir, cache entries inside the cache dir,
// everything else (notably the imageset config copy) is ignored

use regex::Regex;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tar::Archive;

use crate::archive::build::{ARCHIVE_FILE_PREFIX, CACHE_FILE_PREFIX, WORKING_DIRECTORY};
use crate::error::handler::*;

pub struct MirrorUnArchiver {
    working_dir: String,
    cache_dir: String,
    archive_files: Vec<String>,
}

impl MirrorUnArchiver {
    pub fn new(
        archive_path: &str,
        working_dir: &str,
        cache_dir: &str,
    ) -> Result<MirrorUnArchiver, MirrorError> {
        let entries = fs::read_dir(archive_path)
            .map_err(|e| MirrorError::new(&format!("reading {} {}", archive_path, e)))?;
        let pattern = Regex::new(&format!(r"^{}_[0-9]{{6}}\.tar$", ARCHIVE_FILE_PREFIX))
            .map_err(|e| MirrorError::new(&format!("compiling archive pattern {}", e)))?;
        let mut archive_files = vec![];
        for entry in entries {
            let entry =
                entry.map_err(|e| MirrorError::new(&format!("reading archive entry {}", e)))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if pattern.is_match(&name) {
                archive_files.push(format!("{}/{}", archive_path, name));
            }
        }
        // lexicographic order matches segment numbering
        archive_files.sort();
        Ok(MirrorUnArchiver {
            working_dir: working_dir.to_string(),
            cache_dir: cache_dir.to_string(),
            archive_files,
        })
    }

    pub fn unarchive(&self) -> Result<(), MirrorError> {
        for chunk_path in self.archive_files.iter() {
            let file = fs::File::open(chunk_path)
                .map_err(|e| MirrorError::new(&format!("opening {} {}", chunk_path, e)))?;
            let mut archive = Archive::new(file);

            fs::create_dir_all(&self.working_dir)
                .map_err(|e| MirrorError::new(&format!("creating {} {}", self.working_dir, e)))?;
            fs::create_dir_all(&self.cache_dir)
                .map_err(|e| MirrorError::new(&format!("creating {} {}", self.cache_dir, e)))?;

            let entries = archive
                .entries()
                .map_err(|e| MirrorError::new(&format!("reading archive {} {}", chunk_path, e)))?;
            for entry in entries {
                let mut entry = entry
                    .map_err(|e| MirrorError::new(&format!("reading archive {} {}", chunk_path, e)))?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let name = entry
                    .path()
                    .map_err(|e| MirrorError::new(&format!("reading entry path {}", e)))?
                    .display()
                    .to_string();

                let descriptor = if name.starts_with(WORKING_DIRECTORY) {
                    let working_dir_parent = Path::new(&self.working_dir)
                        .parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| String::from("/"));
                    format!("{}/{}", working_dir_parent, name)
                } else if name.starts_with(CACHE_FILE_PREFIX) {
                    format!("{}/{}", self.cache_dir, name)
                } else {
                    // imageset config copies and anything unexpected
                    continue;
                };

                if let Some(parent) = Path::new(&descriptor).parent() {
                    fs::create_dir_all(parent).map_err(|e| {
                        MirrorError::new(&format!("creating {} {}", parent.display(), e))
                    })?;
                }
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .map_err(|e| MirrorError::new(&format!("reading entry {} {}", name, e)))?;
                fs::write(&descriptor, contents).map_err(|e| {
                    MirrorError::new(&format!("unable to create file {} {}", descriptor, e))
                })?;
                // subsequent runs must be able to rewrite the file
                let mode = entry.header().mode().unwrap_or(0o644) | 0o700;
                fs::set_permissions(&descriptor, fs::Permissions::from_mode(mode)).map_err(
                    |e| MirrorError::new(&format!("setting mode on {} {}", descriptor, e)),
                )?;
            }
        }
        Ok(())
    }
}

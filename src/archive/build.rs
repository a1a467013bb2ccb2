// module archive build
//
// writes the mirror content as a sequence of size capped tar segments :
// cache repositories, the working dir, the imageset config and the blob
// delta against history

use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;
use std::fs;
use std::fs::File;
use std::path::Path;
use walkdir::WalkDir;

use crate::api::schema::*;
use crate::archive::blob_gatherer::ImageBlobGatherer;
use crate::error::handler::*;
use crate::history::store::{History, HistoryError};
use crate::log::logging::*;
use crate::manifests::catalogs::encoded_digest;
use crate::mirror::copy::RegistryInterface;

pub const ARCHIVE_FILE_PREFIX: &str = "mirror";
const IMAGESET_CONFIG_PREFIX: &str = "isc_";
pub const CACHE_REPOSITORIES_DIR: &str = "docker/registry/v2/repositories";
pub const CACHE_BLOBS_DIR: &str = "docker/registry/v2/blobs";
pub const CACHE_FILE_PREFIX: &str = "docker/registry/v2";
pub const WORKING_DIRECTORY: &str = "working-dir";
const SEG_MULTIPLIER: u64 = 1024 * 1024 * 1024;
const DEFAULT_SEG_SIZE: u64 = 500;
const TAR_BLOCK: u64 = 512;

// segmented tar writer. a file that alone exceeds the cap goes into its
// own oversized segment (permissive) or fails the build (strict)
struct ArchiveAdder {
    destination: String,
    max_size: u64,
    strict: bool,
    chunk: usize,
    current_size: u64,
    entries_in_chunk: usize,
    builder: tar::Builder<File>,
    pub oversized: Vec<String>,
}

fn segment_path(destination: &str, chunk: usize) -> String {
    format!("{}/{}_{:06}.tar", destination, ARCHIVE_FILE_PREFIX, chunk)
}

fn entry_size(file_size: u64) -> u64 {
    // header block plus contents padded to block size
    TAR_BLOCK + ((file_size + TAR_BLOCK - 1) / TAR_BLOCK) * TAR_BLOCK
}

impl ArchiveAdder {
    fn new(destination: &str, max_size: u64, strict: bool) -> Result<ArchiveAdder, MirrorError> {
        fs::create_dir_all(destination)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", destination, e)))?;
        let first = segment_path(destination, 1);
        let file = File::create(&first)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", first, e)))?;
        Ok(ArchiveAdder {
            destination: destination.to_string(),
            max_size,
            strict,
            chunk: 1,
            current_size: 0,
            entries_in_chunk: 0,
            builder: tar::Builder::new(file),
            oversized: vec![],
        })
    }

    fn next_chunk(&mut self) -> Result<(), MirrorError> {
        self.builder
            .finish()
            .map_err(|e| MirrorError::new(&format!("finishing archive segment {}", e)))?;
        self.chunk += 1;
        self.current_size = 0;
        self.entries_in_chunk = 0;
        let next = segment_path(&self.destination, self.chunk);
        let file = File::create(&next)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", next, e)))?;
        self.builder = tar::Builder::new(file);
        Ok(())
    }

    fn add_file(&mut self, path_to_file: &str, path_in_tar: &str) -> Result<(), MirrorError> {
        let metadata = fs::metadata(path_to_file)
            .map_err(|e| MirrorError::new(&format!("reading {} {}", path_to_file, e)))?;
        let size = entry_size(metadata.len());

        if size > self.max_size {
            if self.strict {
                return Err(MirrorError::new(&format!(
                    "file {} exceeds the archive segment size ({} bytes > {} bytes)",
                    path_to_file,
                    metadata.len(),
                    self.max_size
                )));
            }
            // permissive - the file gets a segment of its own
            if self.current_size > 0 {
                self.next_chunk()?;
            }
            self.builder
                .append_path_with_name(path_to_file, path_in_tar)
                .map_err(|e| {
                    MirrorError::new(&format!("archiving {} {}", path_to_file, e))
                })?;
            self.oversized.push(format!(
                "{} ({} bytes) exceeds the configured archive segment size",
                path_in_tar,
                metadata.len()
            ));
            self.next_chunk()?;
            return Ok(());
        }

        if self.current_size + size > self.max_size && self.current_size > 0 {
            self.next_chunk()?;
        }
        self.builder
            .append_path_with_name(path_to_file, path_in_tar)
            .map_err(|e| MirrorError::new(&format!("archiving {} {}", path_to_file, e)))?;
        self.current_size += size;
        self.entries_in_chunk += 1;
        Ok(())
    }

    fn add_all_folder(&mut self, folder: &str, relative_to: &str) -> Result<(), MirrorError> {
        if !Path::new(folder).exists() {
            return Ok(());
        }
        for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().display().to_string();
            let name = entry
                .path()
                .strip_prefix(relative_to)
                .map_err(|e| MirrorError::new(&format!("relative path {}", e)))?
                .display()
                .to_string();
            self.add_file(&path, &name)?;
        }
        Ok(())
    }

    fn close(mut self) -> Result<Vec<String>, MirrorError> {
        self.builder
            .finish()
            .map_err(|e| MirrorError::new(&format!("finishing archive segment {}", e)))?;
        // an oversized cutover can leave an empty trailing segment behind
        if self.entries_in_chunk == 0 && self.chunk > 1 {
            let last = segment_path(&self.destination, self.chunk);
            fs::remove_file(&last)
                .map_err(|e| MirrorError::new(&format!("removing {} {}", last, e)))?;
        }
        Ok(self.oversized)
    }
}

pub struct MirrorArchive<'a, T: RegistryInterface> {
    pub reg_con: &'a T,
    pub opts: &'a MirrorOptions,
    pub history: History,
    pub archive_size_gib: Option<i64>,
}

impl<'a, T: RegistryInterface + Send + Sync> MirrorArchive<'a, T> {
    fn max_size(&self) -> u64 {
        let configured = match self.archive_size_gib {
            Some(size) if size > 0 => size as u64,
            _ => DEFAULT_SEG_SIZE,
        };
        configured * SEG_MULTIPLIER
    }

    // the archive lands in the destination directory; entries are
    // 1. cache repositories   2. working-dir  3. imageset config
    // 4. the blob delta against history (appended to history on success)
    pub async fn build_archive(
        &self,
        log: &Logging,
        collected_images: &[CopyImageSchema],
    ) -> Result<(), MirrorError> {
        let mut adder = ArchiveAdder::new(
            &self.opts.destination,
            self.max_size(),
            self.opts.strict_archive,
        )?;

        let repositories_dir = format!("{}/{}", self.opts.cache_dir, CACHE_REPOSITORIES_DIR);
        adder
            .add_all_folder(&repositories_dir, &self.opts.cache_dir)
            .map_err(|e| {
                MirrorError::new(&format!("unable to add cache repositories to the archive : {}", e))
            })?;

        let working_dir_parent = Path::new(&self.opts.working_dir)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| String::from("/"));
        adder
            .add_all_folder(&self.opts.working_dir, &working_dir_parent)
            .map_err(|e| {
                MirrorError::new(&format!("unable to add working-dir to the archive : {}", e))
            })?;

        let isc_name = format!(
            "{}{}",
            IMAGESET_CONFIG_PREFIX,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        adder.add_file(&self.opts.config_path, &isc_name).map_err(|e| {
            MirrorError::new(&format!(
                "unable to add image set configuration to the archive : {}",
                e
            ))
        })?;

        // blob delta - everything not shipped by a previous run
        let blobs_in_history = match self.history.read() {
            Ok(blobs) => blobs,
            Err(HistoryError::Empty(_)) => HashSet::new(),
            Err(e) => {
                return Err(MirrorError::new(&format!(
                    "unable to read history metadata from working-dir : {}",
                    e
                )))
            }
        };

        let gatherer = ImageBlobGatherer {
            reg_con: self.reg_con,
            opts: self.opts,
        };
        let mut added_blobs: HashSet<String> = HashSet::new();
        for img in collected_images.iter() {
            let img_blobs = gatherer
                .gather_blobs(log, &img.destination)
                .await
                .map_err(|e| {
                    MirrorError::new(&format!(
                        "unable to find blobs corresponding to {}: {}",
                        img.destination, e
                    ))
                })?;
            for blob in img_blobs.into_iter() {
                if blobs_in_history.contains(&blob) || added_blobs.contains(&blob) {
                    continue;
                }
                let encoded = encoded_digest(&blob)?;
                let blob_dir = format!(
                    "{}/{}/sha256/{}/{}",
                    self.opts.cache_dir,
                    CACHE_BLOBS_DIR,
                    &encoded[..2],
                    encoded
                );
                adder.add_all_folder(&blob_dir, &self.opts.cache_dir)?;
                added_blobs.insert(blob);
            }
        }

        let oversized = adder.close()?;
        for warning in oversized.iter() {
            log.warn(&format!("[MirrorArchive] {}", warning));
        }

        // history becomes visible only after the segments are complete
        self.history
            .append(&added_blobs)
            .map_err(|e| MirrorError::new(&format!("unable to update history metadata: {}", e)))?;
        Ok(())
    }
}

// module dry run
//
// writes the planned mapping without mirroring anything, and reports which
// images are missing from the cache in the mirror to disk workflow

use std::fs;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;
use crate::mirror::copy::RegistryInterface;

pub const DRY_RUN_OUT_DIR: &str = "dry-run";
pub const MAPPING_FILE: &str = "mapping.txt";
pub const MISSING_IMGS_FILE: &str = "missing.txt";

pub struct DryRun {
    pub opts: MirrorOptions,
}

impl DryRun {
    pub async fn process<T: RegistryInterface + Send + Sync>(
        &self,
        log: &Logging,
        reg_con: &T,
        all_images: &[CopyImageSchema],
    ) -> Result<(), MirrorError> {
        let out_dir = format!("{}/{}", self.opts.working_dir, DRY_RUN_OUT_DIR);
        rm_rf::ensure_removed(&out_dir)
            .map_err(|e| MirrorError::new(&format!("clearing {} {:?}", out_dir, e)))?;
        fs::create_dir_all(&out_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", out_dir, e)))?;

        let mut mapping = String::new();
        let mut missing = String::new();
        let mut missing_count = 0;
        for img in all_images.iter() {
            mapping.push_str(&format!("{}={}\n", img.source, img.destination));
            if self.opts.is_mirror_to_disk() {
                let exists = match reg_con
                    .check(log, img.destination.clone(), &self.opts)
                    .await
                {
                    Ok(exists) => exists,
                    Err(e) => {
                        log.debug(&format!(
                            "unable to check existence of {} in local cache: {}",
                            img.destination, e
                        ));
                        false
                    }
                };
                if !exists {
                    missing.push_str(&format!("{}={}\n", img.source, img.destination));
                    missing_count += 1;
                }
            }
        }

        let mapping_file = format!("{}/{}", out_dir, MAPPING_FILE);
        fs::write(&mapping_file, mapping)
            .map_err(|e| MirrorError::new(&format!("writing mapping file {}", e)))?;

        if missing_count > 0 {
            let missing_file = format!("{}/{}", out_dir, MISSING_IMGS_FILE);
            fs::write(&missing_file, missing)
                .map_err(|e| MirrorError::new(&format!("writing missing mapping file {}", e)))?;
            log.warn(&format!(
                "{}/{} images necessary for mirroring are not available in the cache",
                missing_count,
                all_images.len()
            ));
            log.warn(&format!(
                "list of missing images in : {} - please re-run the mirror to disk process",
                missing_file
            ));
        }
        log.info(&format!("list of all images for mirroring in : {}", mapping_file));
        Ok(())
    }
}

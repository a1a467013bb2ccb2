// module batch worker
//
// bounded parallel executor over the planned copy list. failures are
// captured per image with their owning operators and bundles and written
// to a log file, the batch itself keeps going

use chrono::Local;
use futures::{stream, StreamExt};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tokio::time::timeout;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;
use crate::mirror::copy::RegistryInterface;

const WORKER_PREFIX: &str = "[Worker] ";

// in flight work is bounded by images x layers
pub const MAX_PARALLEL_LAYER_DOWNLOADS: usize = 10;
pub const MAX_PARALLEL_IMAGE_DOWNLOADS: usize = 8;
pub const LIMIT_OVERALL_PARALLEL_DOWNLOADS: usize = 200;

#[derive(Debug, Clone)]
pub struct MirrorSchemaError {
    pub image: CopyImageSchema,
    pub error: MirrorError,
    pub operators: Vec<String>,
    pub bundles: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub copied: usize,
    pub failed: Vec<MirrorSchemaError>,
    pub error_log: String,
}

fn format_error_msg(err: &MirrorSchemaError) -> String {
    if !err.operators.is_empty() || !err.bundles.is_empty() {
        return format!(
            "error mirroring image {} (Operator bundles: {:?} - Operators: {:?}) error: {}",
            err.image.origin, err.bundles, err.operators, err.error
        );
    }
    format!("error mirroring image {} error: {}", err.image.origin, err.error)
}

fn save_errors(
    log: &Logging,
    logs_dir: &str,
    errors: &[MirrorSchemaError],
) -> Result<String, MirrorError> {
    if errors.is_empty() {
        return Ok(String::from(""));
    }
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let filename = format!("mirroring_errors_{}.txt", timestamp);
    fs::create_dir_all(logs_dir)
        .map_err(|e| MirrorError::new(&format!("creating {} {}", logs_dir, e)))?;
    let path = format!("{}/{}", logs_dir, filename);
    let mut contents = String::new();
    for err in errors.iter() {
        let msg = format_error_msg(err);
        log.error(&format!("{}{}", WORKER_PREFIX, msg));
        contents.push_str(&msg);
        contents.push('\n');
    }
    fs::write(&path, contents)
        .map_err(|e| MirrorError::new(&format!("writing error log {} {}", path, e)))?;
    Ok(path)
}

pub struct BatchWorker {
    pub logs_dir: String,
}

impl BatchWorker {
    // effective image parallelism, keeping images x layers under the cap
    fn worker_width(&self, opts: &MirrorOptions) -> usize {
        let images = if opts.parallel_images == 0 {
            MAX_PARALLEL_IMAGE_DOWNLOADS
        } else {
            opts.parallel_images
        };
        let layers = if opts.parallel_layers == 0 {
            MAX_PARALLEL_LAYER_DOWNLOADS
        } else {
            opts.parallel_layers
        };
        if images * layers > LIMIT_OVERALL_PARALLEL_DOWNLOADS {
            let reduced = LIMIT_OVERALL_PARALLEL_DOWNLOADS / layers;
            return reduced.max(1);
        }
        images
    }

    pub async fn worker<T: RegistryInterface + Send + Sync>(
        &self,
        log: &Logging,
        reg_con: &T,
        collector_schema: &CollectorSchema,
        opts: &MirrorOptions,
    ) -> Result<BatchResult, MirrorError> {
        let width = self.worker_width(opts);
        let total = collector_schema.all_images.len();
        log.info(&format!(
            "{}{} images to {} (parallelism {})",
            WORKER_PREFIX,
            total,
            if opts.is_delete() { "delete" } else { "copy" },
            width
        ));

        // the dedup set also serializes same-reference work
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique_images = vec![];
        for img in collector_schema.all_images.iter() {
            let key = format!("{}|{}", img.source, img.destination);
            if seen.insert(key) {
                unique_images.push(img.clone());
            }
        }

        let timeout_secs = if opts.image_timeout_secs == 0 {
            600
        } else {
            opts.image_timeout_secs
        };

        let results = stream::iter(unique_images.into_iter().map(|img| async move {
            let outcome = if opts.is_delete() {
                timeout(
                    Duration::from_secs(timeout_secs),
                    reg_con.delete_image(log, img.destination.clone(), opts),
                )
                .await
            } else {
                timeout(
                    Duration::from_secs(timeout_secs),
                    reg_con.copy(log, img.source.clone(), img.destination.clone(), opts),
                )
                .await
            };
            let flattened = match outcome {
                Ok(res) => res,
                Err(_) => Err(MirrorError::new(&format!(
                    "timed out after {}s",
                    timeout_secs
                ))),
            };
            (img, flattened)
        }))
        .buffer_unordered(width)
        .collect::<Vec<(CopyImageSchema, Result<(), MirrorError>)>>()
        .await;

        let mut batch_result = BatchResult::default();
        for (img, res) in results.into_iter() {
            match res {
                Ok(_) => {
                    log.debug(&format!("{}completed {}", WORKER_PREFIX, img.destination));
                    batch_result.copied += 1;
                }
                Err(e) => {
                    // enrich the failure with its owning operators/bundles
                    let origin_key = img
                        .origin
                        .trim_start_matches(DOCKER_PROTOCOL)
                        .to_string();
                    let operators = collector_schema
                        .copy_image_schema_map
                        .operators_by_image
                        .get(&origin_key)
                        .map(|s| {
                            let mut v: Vec<String> = s.iter().cloned().collect();
                            v.sort();
                            v
                        })
                        .unwrap_or_default();
                    let bundles = collector_schema
                        .copy_image_schema_map
                        .bundles_by_image
                        .get(&origin_key)
                        .map(|s| {
                            let mut v: Vec<String> = s.iter().cloned().collect();
                            v.sort();
                            v
                        })
                        .unwrap_or_default();
                    batch_result.failed.push(MirrorSchemaError {
                        image: img,
                        error: e,
                        operators,
                        bundles,
                    });
                }
            }
        }

        // release payloads and catalogs are load bearing - abort on those
        for err in batch_result.failed.iter() {
            if matches!(
                err.image.image_type,
                ImageType::OcpRelease | ImageType::OperatorCatalog
            ) {
                save_errors(log, &self.logs_dir, &batch_result.failed)?;
                return Err(MirrorError::new(&format!(
                    "{}fatal mirroring failure {}",
                    WORKER_PREFIX,
                    format_error_msg(err)
                )));
            }
        }

        batch_result.error_log = save_errors(log, &self.logs_dir, &batch_result.failed)?;
        if !batch_result.failed.is_empty() {
            log.warn(&format!(
                "{}{}/{} images failed - details in {}",
                WORKER_PREFIX,
                batch_result.failed.len(),
                total,
                batch_result.error_log
            ));
        }
        Ok(batch_result)
    }
}

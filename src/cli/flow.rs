// module mirror flow controller
//
// sequences the phases : validate, setup, extract (diskToMirror), collect,
// plan adjustments, rebuild, batch, graph, archive (mirrorToDisk)

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::additional::collector::CollectAdditional;
use crate::api::schema::*;
use crate::archive::build::MirrorArchive;
use crate::archive::extract::MirrorUnArchiver;
use crate::batch::worker::BatchWorker;
use crate::cli::dry_run::DryRun;
use crate::cli::local_storage::LocalStorage;
use crate::cli::setup::create_directories;
use crate::cli::validate::check_args;
use crate::collector::manager::{merge_collector_schemas, CollectorManager};
use crate::config::load::read_mirror_config;
use crate::error::handler::*;
use crate::helm::collector::{CollectHelm, ManifestScanExtractor};
use crate::history::store::History;
use crate::image::reference::{parse_ref, with_max_nested_paths};
use crate::log::logging::*;
use crate::mirror::copy::ImplRegistryInterface;
use crate::operator::collector::CollectOperator;
use crate::operator::rebuild::RebuildCatalog;
use crate::release::collector::CollectRelease;
use crate::release::graph::{GraphUpdate, GRAPH_URL};

pub struct MirrorFlowController {
    pub opts: MirrorOptions,
}

// the since flag becomes the history cutoff (midnight utc of that day)
fn since_cutoff(opts: &MirrorOptions) -> Result<Option<DateTime<Utc>>, MirrorError> {
    if opts.since.is_empty() {
        return Ok(None);
    }
    let date = NaiveDate::parse_from_str(&opts.since, "%Y-%m-%d")
        .map_err(|e| MirrorError::new(&format!("unable to parse since flag: {}", e)))?;
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)
        .ok_or_else(|| MirrorError::new("unable to construct since cutoff"))?;
    Ok(Some(DateTime::from_naive_utc_and_offset(
        date.and_time(midnight),
        Utc,
    )))
}

// collapse destination paths for registries with nested path limits
pub fn apply_max_nested_paths(
    images: &[CopyImageSchema],
    max_nested_paths: usize,
) -> Result<Vec<CopyImageSchema>, MirrorError> {
    if max_nested_paths == 0 {
        return Ok(images.to_vec());
    }
    let mut out = vec![];
    for img in images.iter() {
        let mut updated = img.clone();
        updated.destination = with_max_nested_paths(&img.destination, max_nested_paths)?;
        out.push(updated);
    }
    Ok(out)
}

// drop copies whose origin matches a blocked image entry
pub fn exclude_images(
    images: Vec<CopyImageSchema>,
    blocked: &Option<Vec<Image>>,
) -> Vec<CopyImageSchema> {
    let Some(blocked) = blocked else {
        return images;
    };
    images
        .into_iter()
        .filter(|img| {
            if img.origin.is_empty() {
                return true;
            }
            let origin = match img.origin.split_once("://") {
                Some((_, rest)) => rest,
                None => img.origin.as_str(),
            };
            !blocked.iter().any(|b| b.name == origin)
        })
        .collect()
}

// mirror to disk also ships the rebuilt catalog images in the archive
pub fn add_rebuilt_catalogs(mut schema: CollectorSchema) -> Result<CollectorSchema, MirrorError> {
    let mut rebuilt = vec![];
    for img in schema.all_images.iter() {
        if img.image_type == ImageType::OperatorCatalog && !img.rebuilt_tag.is_empty() {
            let spec = parse_ref(&img.destination).map_err(|e| {
                MirrorError::new(&format!(
                    "unable to add rebuilt catalog for {}: {}",
                    img.origin, e
                ))
            })?;
            let reference = spec.set_tag(&img.rebuilt_tag).reference_with_transport;
            rebuilt.push(CopyImageSchema {
                source: reference.clone(),
                destination: reference,
                origin: img.origin.clone(),
                image_type: ImageType::OperatorCatalog,
                rebuilt_tag: String::from(""),
            });
        }
    }
    schema.all_images.extend(rebuilt);
    Ok(schema)
}

impl MirrorFlowController {
    pub async fn process(&mut self, log: &Logging) -> Result<(), MirrorError> {
        check_args(log, &mut self.opts)?;
        log.info("setting up the environment");
        create_directories(log, &mut self.opts)?;
        log.info(&format!("workflow mode: {}", self.opts.mode));

        let config = read_mirror_config(&self.opts.config_path)?;
        let opts = self.opts.clone();

        // disk to mirror starts by rehydrating the archive segments
        if opts.is_disk_to_mirror() {
            let extractor =
                MirrorUnArchiver::new(&opts.from, &opts.working_dir, &opts.cache_dir)?;
            extractor.unarchive()?;
        }

        let local_storage = LocalStorage { opts: opts.clone() };
        local_storage.setup(log)?;
        if opts.is_mirror_to_disk() {
            local_storage.check_port()?;
        }

        let mut manager = CollectorManager::new();
        manager.add_collector(Box::new(CollectRelease {
            reg_con: ImplRegistryInterface {},
            config: config.clone(),
            opts: opts.clone(),
        }));
        manager.add_collector(Box::new(CollectAdditional {
            config: config.clone(),
            opts: opts.clone(),
        }));
        manager.add_collector(Box::new(CollectOperator {
            reg_con: ImplRegistryInterface {},
            config: config.clone(),
            opts: opts.clone(),
        }));
        manager.add_collector(Box::new(CollectHelm {
            config: config.clone(),
            opts: opts.clone(),
            extractor: ManifestScanExtractor::default(),
        }));

        let schemas = manager.collect_all_images(log).await?;
        let mut copied_images = merge_collector_schemas(&schemas);
        log.info(&format!(
            "collected {} images ({} release, {} operator, {} additional, {} helm)",
            copied_images.all_images.len(),
            copied_images.total_release_images,
            copied_images.total_operator_images,
            copied_images.total_additional_images,
            copied_images.total_helm_images
        ));

        if opts.dry_run {
            let dry_run = DryRun { opts: opts.clone() };
            dry_run
                .process(log, &ImplRegistryInterface {}, &copied_images.all_images)
                .await?;
            return Ok(());
        }

        copied_images.all_images =
            apply_max_nested_paths(&copied_images.all_images, opts.max_nested_paths)?;
        copied_images.all_images =
            exclude_images(copied_images.all_images, &config.mirror.blocked_images);

        let rebuild = RebuildCatalog {
            reg_con: ImplRegistryInterface {},
            config: config.clone(),
            opts: opts.clone(),
        };
        if let Err(e) = rebuild.rebuild(log, &copied_images).await {
            log.warn(&format!("{}", e));
        }

        let worker = BatchWorker {
            logs_dir: opts.logs_dir.clone(),
        };
        worker
            .worker(log, &ImplRegistryInterface {}, &copied_images, &opts)
            .await?;

        let graph = GraphUpdate {
            reg_con: ImplRegistryInterface {},
            config: config.clone(),
            opts: opts.clone(),
        };
        let graph_image = graph.create(log, GRAPH_URL).await?;
        if !graph_image.is_empty() {
            log.debug(&format!("graph image {}", graph_image));
        }

        if opts.is_mirror_to_disk() {
            let archived = add_rebuilt_catalogs(copied_images)?;
            log.info("preparing the tarball archive");
            let history = History::new(&opts.working_dir, since_cutoff(&opts)?)?;
            let reg_con = ImplRegistryInterface {};
            let archive = MirrorArchive {
                reg_con: &reg_con,
                opts: &opts,
                history,
                archive_size_gib: config.mirror.archive_size,
            };
            archive.build_archive(log, &archived.all_images).await?;
        }

        log.info("mirror completed");
        Ok(())
    }
}

// module delete flow controller
//
// drives the delete workflow : --generate collects and writes the delete
// yaml, a plain delete replays it against the destination registry

use crate::additional::collector::CollectAdditional;
use crate::api::schema::*;
use crate::cli::setup::create_directories;
use crate::cli::validate::check_delete_args;
use crate::collector::manager::{merge_collector_schemas, CollectorManager};
use crate::config::load::read_delete_config;
use crate::delete::images::DeleteImages;
use crate::error::handler::*;
use crate::helm::collector::{CollectHelm, ManifestScanExtractor};
use crate::log::logging::*;
use crate::mirror::copy::ImplRegistryInterface;
use crate::operator::collector::CollectOperator;
use crate::release::collector::CollectRelease;

pub struct DeleteFlowController {
    pub opts: MirrorOptions,
}

impl DeleteFlowController {
    pub async fn process(&mut self, log: &Logging) -> Result<(), MirrorError> {
        check_delete_args(&mut self.opts)?;
        log.info("setting up the environment");
        create_directories(log, &mut self.opts)?;
        log.info("workflow mode: delete");

        let delete_config = read_delete_config(&self.opts.config_path)?;
        let opts = self.opts.clone();
        let delete = DeleteImages { opts: opts.clone() };

        if opts.delete_generate {
            // the collectors consume the delete: section like a mirror: one
            let config = ImageSetConfig {
                kind: delete_config.kind.clone(),
                api_version: delete_config.api_version.clone(),
                mirror: delete_config.delete.clone(),
            };
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
            let merged = merge_collector_schemas(&schemas);
            delete.write_delete_metadata(log, &merged.all_images)?;
            return Ok(());
        }

        let list = delete.read_delete_metadata(log)?;
        delete
            .delete_registry_images(log, &ImplRegistryInterface {}, &list)
            .await?;
        log.info("delete completed");
        Ok(())
    }
}

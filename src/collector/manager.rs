// module collector manager
//
// fans out to the registered collectors and aggregates their results

use async_trait::async_trait;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

#[async_trait]
pub trait ImageCollector {
    async fn collect(&self, log: &Logging) -> Result<CollectorSchema, MirrorError>;
}

// collectors are registered per manager instance so several managers can
// coexist in one process
pub struct CollectorManager {
    collectors: Vec<Box<dyn ImageCollector + Send + Sync>>,
}

impl Default for CollectorManager {
    fn default() -> Self {
        CollectorManager::new()
    }
}

impl CollectorManager {
    pub fn new() -> CollectorManager {
        CollectorManager { collectors: vec![] }
    }

    pub fn add_collector(&mut self, collector: Box<dyn ImageCollector + Send + Sync>) {
        self.collectors.push(collector);
    }

    // collectors run serially, a failing collector aborts the run
    pub async fn collect_all_images(
        &self,
        log: &Logging,
    ) -> Result<Vec<CollectorSchema>, MirrorError> {
        let mut all = vec![];
        for collector in self.collectors.iter() {
            let schema = collector.collect(log).await?;
            all.push(schema);
        }
        Ok(all)
    }
}

// merge the per collector results, preserving per type counts and the
// operator catalog filter map
pub fn merge_collector_schemas(schemas: &[CollectorSchema]) -> CollectorSchema {
    let mut result = CollectorSchema::default();
    for schema in schemas.iter() {
        for img in schema.all_images.iter() {
            match img.image_type {
                ImageType::CincinnatiGraph
                | ImageType::OcpRelease
                | ImageType::OcpReleaseContent
                | ImageType::KubeVirtContainer => result.total_release_images += 1,
                ImageType::Generic => result.total_additional_images += 1,
                ImageType::OperatorBundle
                | ImageType::OperatorCatalog
                | ImageType::OperatorRelatedImage => result.total_operator_images += 1,
                ImageType::HelmImage => result.total_helm_images += 1,
                ImageType::Invalid => {}
            }
        }
        result.all_images.extend(schema.all_images.clone());
        for (key, value) in schema.catalog_to_fbc_map.iter() {
            result.catalog_to_fbc_map.insert(key.clone(), value.clone());
        }
        for (key, value) in schema.copy_image_schema_map.operators_by_image.iter() {
            result
                .copy_image_schema_map
                .operators_by_image
                .entry(key.clone())
                .or_default()
                .extend(value.iter().cloned());
        }
        for (key, value) in schema.copy_image_schema_map.bundles_by_image.iter() {
            result
                .copy_image_schema_map
                .bundles_by_image
                .entry(key.clone())
                .or_default()
                .extend(value.iter().cloned());
        }
    }
    result
}

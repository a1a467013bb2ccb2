// module helm collector
//
// fetches chart repository indexes, downloads chart tarballs and scans the
// chart manifests for image references. template rendering is out of scope,
// image discovery is a pluggable extractor

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde_derive::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;
use tar::Archive;

use crate::api::schema::*;
use crate::collector::manager::ImageCollector;
use crate::error::handler::*;
use crate::image::reference::parse_ref;
use crate::log::logging::*;
use crate::operator::collector::digest_tag;

pub const HELM_DIR: &str = "helm";
pub const HELM_CHART_DIR: &str = "charts";
pub const HELM_INDEXES_DIR: &str = "indexes";
const HELM_INDEX_FILE: &str = "index.yaml";
const COLLECTOR_PREFIX: &str = "[HelmImageCollector] ";

// jsonpaths known to hold image references in rendered manifests
const KNOWN_IMAGE_PATHS: [&str; 4] = [
    "$.spec.template.spec.initContainers[*].image",
    "$.spec.template.spec.containers[*].image",
    "$.spec.initContainers[*].image",
    "$.spec.containers[*].image",
];

// chart repository index (the subset the collector needs)
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HelmIndex {
    #[serde(rename = "entries", default)]
    pub entries: HashMap<String, Vec<HelmChartVersion>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HelmChartVersion {
    #[serde(rename = "name", default)]
    pub name: String,

    #[serde(rename = "version", default)]
    pub version: String,

    #[serde(rename = "type", default)]
    pub chart_type: String,

    #[serde(rename = "urls", default)]
    pub urls: Vec<String>,
}

// image discovery over a chart on disk
pub trait ChartImageExtractor {
    fn extract(
        &self,
        log: &Logging,
        chart_path: &str,
        image_paths: &[String],
    ) -> Result<Vec<RelatedImage>, MirrorError>;
}

// default extractor : walks the chart archive's yaml manifests and applies
// the known jsonpaths. documents that fail to parse (unrendered template
// expressions) are skipped
#[derive(Default)]
pub struct ManifestScanExtractor {}

// evaluate a single dotted path with [*] array hops against a yaml document
fn json_path_values(value: &serde_yaml::Value, path: &str) -> Vec<String> {
    let trimmed = path
        .trim_start_matches('$')
        .trim_start_matches('.')
        .trim_start_matches('{')
        .trim_end_matches('}');
    let mut current = vec![value];
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (field, is_array) = match segment.strip_suffix("[*]") {
            Some(field) => (field, true),
            None => (segment, false),
        };
        let mut next = vec![];
        for v in current.iter() {
            if let Some(child) = v.get(field) {
                if is_array {
                    if let Some(items) = child.as_sequence() {
                        next.extend(items.iter());
                    }
                } else {
                    next.push(child);
                }
            }
        }
        current = next;
    }
    current
        .into_iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.to_string())
        .collect()
}

impl ChartImageExtractor for ManifestScanExtractor {
    fn extract(
        &self,
        log: &Logging,
        chart_path: &str,
        image_paths: &[String],
    ) -> Result<Vec<RelatedImage>, MirrorError> {
        let file = fs::File::open(chart_path)
            .map_err(|e| MirrorError::new(&format!("opening chart {} {}", chart_path, e)))?;
        let mut archive = Archive::new(GzDecoder::new(file));
        let mut paths: Vec<String> = KNOWN_IMAGE_PATHS.iter().map(|p| p.to_string()).collect();
        paths.extend(image_paths.iter().cloned());

        let mut images = vec![];
        let mut seen: HashSet<String> = HashSet::new();
        let entries = archive
            .entries()
            .map_err(|e| MirrorError::new(&format!("reading chart {} {}", chart_path, e)))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| MirrorError::new(&format!("reading chart entry {}", e)))?;
            let name = entry
                .path()
                .map_err(|e| MirrorError::new(&format!("reading chart entry path {}", e)))?
                .display()
                .to_string();
            if !name.ends_with(".yaml") && !name.ends_with(".yml") {
                continue;
            }
            let mut contents = String::new();
            if entry.read_to_string(&mut contents).is_err() {
                continue;
            }
            for document in contents.split("\n---") {
                let parsed: serde_yaml::Value = match serde_yaml::from_str(document) {
                    Ok(value) => value,
                    Err(_) => {
                        // template expressions do not parse as yaml
                        log.trace(&format!(
                            "{}skipping unparseable document in {}",
                            COLLECTOR_PREFIX, name
                        ));
                        continue;
                    }
                };
                for path in paths.iter() {
                    for image in json_path_values(&parsed, path) {
                        if image.is_empty() || !seen.insert(image.clone()) {
                            continue;
                        }
                        images.push(RelatedImage {
                            name: String::from(""),
                            image,
                            image_type: ImageType::HelmImage,
                            ..Default::default()
                        });
                    }
                }
            }
        }
        Ok(images)
    }
}

pub struct CollectHelm<E: ChartImageExtractor> {
    pub config: ImageSetConfig,
    pub opts: MirrorOptions,
    pub extractor: E,
}

fn namespace_from_url(url: &str) -> String {
    let parts: Vec<&str> = url.split('/').collect();
    if parts.len() <= 3 {
        return String::from("");
    }
    parts[2..parts.len() - 1].join("/")
}

impl<E: ChartImageExtractor + Send + Sync> CollectHelm<E> {
    fn helm(&self) -> Helm {
        self.config.mirror.helm.clone().unwrap_or_default()
    }

    fn chart_file(&self, chart: &Chart) -> String {
        format!(
            "{}/{}/{}/{}-{}.tgz",
            self.opts.working_dir, HELM_DIR, HELM_CHART_DIR, chart.name, chart.version
        )
    }

    fn local_chart_images(&self, log: &Logging) -> Vec<RelatedImage> {
        let mut images = vec![];
        for chart in self.helm().local.unwrap_or_default().iter() {
            let image_paths = chart.image_paths.clone().unwrap_or_default();
            match self.extractor.extract(log, &chart.path, &image_paths) {
                Ok(mut found) => images.append(&mut found),
                Err(e) => log.warn(&format!("{}{}", COLLECTOR_PREFIX, e)),
            }
        }
        images
    }

    async fn fetch_index(&self, repo: &Repository) -> Result<HelmIndex, MirrorError> {
        let mut index_url = repo.url.clone();
        if !index_url.ends_with(HELM_INDEX_FILE) {
            if !index_url.ends_with('/') {
                index_url.push('/');
            }
            index_url.push_str(HELM_INDEX_FILE);
        }
        let res = reqwest::get(&index_url)
            .await
            .map_err(|e| MirrorError::new(&format!("fetching helm index {} {}", index_url, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "fetching helm index {} status {}",
                index_url,
                res.status()
            )));
        }
        let body = res
            .text()
            .await
            .map_err(|e| MirrorError::new(&format!("reading helm index {}", e)))?;
        let index: HelmIndex = serde_yaml::from_str(&body)
            .map_err(|e| MirrorError::new(&format!("parsing helm index {} {}", index_url, e)))?;

        // keep a copy for the disk to mirror workflow
        let namespace = namespace_from_url(&index_url);
        let index_dir = format!(
            "{}/{}/{}/{}",
            self.opts.working_dir, HELM_DIR, HELM_INDEXES_DIR, namespace
        );
        fs::create_dir_all(&index_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", index_dir, e)))?;
        fs::write(format!("{}/{}", index_dir, HELM_INDEX_FILE), &body)
            .map_err(|e| MirrorError::new(&format!("writing helm index {}", e)))?;
        Ok(index)
    }

    fn load_stored_index(&self, repo: &Repository) -> Result<HelmIndex, MirrorError> {
        let mut index_url = repo.url.clone();
        if !index_url.ends_with(HELM_INDEX_FILE) {
            if !index_url.ends_with('/') {
                index_url.push('/');
            }
            index_url.push_str(HELM_INDEX_FILE);
        }
        let namespace = namespace_from_url(&index_url);
        let file = format!(
            "{}/{}/{}/{}/{}",
            self.opts.working_dir, HELM_DIR, HELM_INDEXES_DIR, namespace, HELM_INDEX_FILE
        );
        let data = fs::read_to_string(&file)
            .map_err(|e| MirrorError::new(&format!("reading helm index {} {}", file, e)))?;
        let index: HelmIndex = serde_yaml::from_str(&data)
            .map_err(|e| MirrorError::new(&format!("parsing helm index {} {}", file, e)))?;
        Ok(index)
    }

    // charts from the config, or every non library chart in the index
    fn charts_from_index(&self, repo: &Repository, index: &HelmIndex) -> Vec<Chart> {
        if let Some(charts) = &repo.charts {
            return charts.clone();
        }
        let mut charts = vec![];
        for (name, versions) in index.entries.iter() {
            for version in versions.iter() {
                if version.chart_type == "library" {
                    continue;
                }
                charts.push(Chart {
                    name: name.clone(),
                    version: version.version.clone(),
                    ..Default::default()
                });
            }
        }
        charts
    }

    async fn download_chart(
        &self,
        log: &Logging,
        repo: &Repository,
        index: &HelmIndex,
        chart: &Chart,
    ) -> Result<String, MirrorError> {
        let dest = self.chart_file(chart);
        if Path::new(&dest).exists() {
            return Ok(dest);
        }
        let versions = index.entries.get(&chart.name).ok_or_else(|| {
            MirrorError::new(&format!(
                "chart {} not found in repository {}",
                chart.name, repo.name
            ))
        })?;
        let version = versions
            .iter()
            .find(|v| chart.version.is_empty() || v.version == chart.version)
            .ok_or_else(|| {
                MirrorError::new(&format!(
                    "chart {}:{} not found in repository {}",
                    chart.name, chart.version, repo.name
                ))
            })?;
        let url = version
            .urls
            .first()
            .ok_or_else(|| MirrorError::new(&format!("chart {} has no download url", chart.name)))?;
        let absolute = if url.starts_with("http") {
            url.clone()
        } else {
            let mut base = repo.url.trim_end_matches('/').to_string();
            base.push('/');
            base.push_str(url);
            base
        };
        log.debug(&format!("{}pulling chart {}", COLLECTOR_PREFIX, absolute));
        let res = reqwest::get(&absolute)
            .await
            .map_err(|e| MirrorError::new(&format!("downloading chart {} {}", absolute, e)))?;
        if !res.status().is_success() {
            return Err(MirrorError::new(&format!(
                "downloading chart {} status {}",
                absolute,
                res.status()
            )));
        }
        let body = res
            .bytes()
            .await
            .map_err(|e| MirrorError::new(&format!("reading chart {}", e)))?;
        if let Some(parent) = Path::new(&dest).parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MirrorError::new(&format!("creating {} {}", parent.display(), e)))?;
        }
        fs::write(&dest, body)
            .map_err(|e| MirrorError::new(&format!("writing chart {} {}", dest, e)))?;
        Ok(dest)
    }

    fn prepare_m2d_copy_batch(
        &self,
        log: &Logging,
        images: &[RelatedImage],
    ) -> Vec<CopyImageSchema> {
        let mut result = vec![];
        for img in images.iter() {
            let spec = match parse_ref(&img.image) {
                Ok(spec) => spec,
                Err(e) => {
                    log.warn(&format!("{} : SKIPPING", e));
                    continue;
                }
            };
            let tag = if spec.is_image_by_digest_only() {
                digest_tag(&spec)
            } else {
                spec.tag.clone()
            };
            let dest = format!(
                "{}{}/{}:{}",
                DOCKER_PROTOCOL,
                self.opts.destination_registry(),
                spec.path_component,
                tag
            );
            result.push(CopyImageSchema {
                source: spec.reference_with_transport.clone(),
                destination: dest,
                origin: img.image.clone(),
                image_type: ImageType::HelmImage,
                rebuilt_tag: String::from(""),
            });
        }
        result
    }

    fn prepare_d2m_copy_batch(
        &self,
        log: &Logging,
        images: &[RelatedImage],
    ) -> Vec<CopyImageSchema> {
        let mut result = vec![];
        for img in images.iter() {
            let spec = match parse_ref(&img.image) {
                Ok(spec) => spec,
                Err(e) => {
                    log.warn(&format!("{} : SKIPPING", e));
                    continue;
                }
            };
            let tag = if spec.is_image_by_digest_only() {
                digest_tag(&spec)
            } else {
                spec.tag.clone()
            };
            let src = format!(
                "{}{}/{}:{}",
                DOCKER_PROTOCOL, self.opts.local_storage_fqdn, spec.path_component, tag
            );
            let dest = format!("{}/{}:{}", self.opts.destination, spec.path_component, tag);
            result.push(CopyImageSchema {
                source: src,
                destination: dest,
                origin: img.image.clone(),
                image_type: ImageType::HelmImage,
                rebuilt_tag: String::from(""),
            });
        }
        result
    }
}

#[async_trait]
impl<E: ChartImageExtractor + Send + Sync> ImageCollector for CollectHelm<E> {
    async fn collect(&self, log: &Logging) -> Result<CollectorSchema, MirrorError> {
        log.hi("helm collector");
        let mut all_helm_images = self.local_chart_images(log);
        let helm = self.helm();
        let repositories = helm.repositories.unwrap_or_default();

        if self.opts.is_mirror_to_disk() || self.opts.is_mirror_to_mirror() {
            for repo in repositories.iter() {
                let index = match self.fetch_index(repo).await {
                    Ok(index) => index,
                    Err(e) => {
                        log.warn(&format!("{}{} : SKIPPING", COLLECTOR_PREFIX, e));
                        continue;
                    }
                };
                for chart in self.charts_from_index(repo, &index).iter() {
                    let path = match self.download_chart(log, repo, &index, chart).await {
                        Ok(path) => path,
                        Err(e) => {
                            log.warn(&format!("{}{} : SKIPPING", COLLECTOR_PREFIX, e));
                            continue;
                        }
                    };
                    let image_paths = chart.image_paths.clone().unwrap_or_default();
                    match self.extractor.extract(log, &path, &image_paths) {
                        Ok(mut images) => all_helm_images.append(&mut images),
                        Err(e) => log.warn(&format!("{}{}", COLLECTOR_PREFIX, e)),
                    }
                }
            }
            // deduplicate by image string across charts
            let mut seen = HashSet::new();
            all_helm_images.retain(|img| seen.insert(img.image.clone()));
            return Ok(CollectorSchema {
                all_images: self.prepare_m2d_copy_batch(log, &all_helm_images),
                ..Default::default()
            });
        }

        // disk to mirror - charts were downloaded by a prior run
        for repo in repositories.iter() {
            let charts = match &repo.charts {
                Some(charts) => charts.clone(),
                None => match self.load_stored_index(repo) {
                    Ok(index) => self.charts_from_index(repo, &index),
                    Err(e) => {
                        log.warn(&format!("{}{} : SKIPPING", COLLECTOR_PREFIX, e));
                        continue;
                    }
                },
            };
            for chart in charts.iter() {
                let path = self.chart_file(chart);
                let image_paths = chart.image_paths.clone().unwrap_or_default();
                match self.extractor.extract(log, &path, &image_paths) {
                    Ok(mut images) => all_helm_images.append(&mut images),
                    Err(e) => log.warn(&format!("{}{}", COLLECTOR_PREFIX, e)),
                }
            }
        }
        let mut seen = HashSet::new();
        all_helm_images.retain(|img| seen.insert(img.image.clone()));
        Ok(CollectorSchema {
            all_images: self.prepare_d2m_copy_batch(log, &all_helm_images),
            ..Default::default()
        })
    }
}

// module catalog handler
//
// loads file based catalogs (declarative config) into a flat arena,
// filters them by operator selector and enumerates related images

use semver::{Version, VersionReq};
use std::collections::{HashMap, HashSet};
use std::fs;
use walkdir::WalkDir;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

// the forest lives in flat vectors, channels and bundles refer to their
// package by index
#[derive(Debug, Clone, Default)]
pub struct OperatorCatalog {
    pub packages: Vec<CatalogPackage>,
    pub channels: Vec<CatalogChannel>,
    pub bundles: Vec<CatalogBundle>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogPackage {
    pub name: String,
    pub default_channel: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogChannel {
    pub package: usize,
    pub name: String,
    pub entries: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogBundle {
    pub package: usize,
    pub name: String,
    pub image: String,
    pub related_images: Vec<RelatedImage>,
    pub version: Option<Version>,
}

impl OperatorCatalog {
    pub fn package_index(&self, name: &str) -> Option<usize> {
        self.packages.iter().position(|p| p.name == name)
    }

    pub fn channels_of(&self, package: usize) -> Vec<&CatalogChannel> {
        self.channels.iter().filter(|c| c.package == package).collect()
    }

    pub fn bundle_of(&self, package: usize, name: &str) -> Option<&CatalogBundle> {
        self.bundles
            .iter()
            .find(|b| b.package == package && b.name == name)
    }

    // configured default, falling back to the greatest channel name
    pub fn default_channel_of(&self, package: usize) -> Option<String> {
        if let Some(channel) = self.packages[package].default_channel.clone() {
            if self.channels.iter().any(|c| c.package == package && c.name == channel) {
                return Some(channel);
            }
        }
        self.channels
            .iter()
            .filter(|c| c.package == package)
            .map(|c| c.name.clone())
            .max()
    }
}

fn bundle_version(properties: &Option<Vec<Property>>) -> Option<Version> {
    for property in properties.as_ref()?.iter() {
        if property.property_type == "olm.package" {
            let version = property.value.get("version")?.as_str()?;
            return Version::parse(version).ok();
        }
    }
    None
}

// load every json document found below dir into the arena
pub fn get_declarative_config(log: &Logging, dir: &str) -> Result<OperatorCatalog, MirrorError> {
    let mut documents = vec![];
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.path().display().to_string();
        if !name.ends_with(".json") {
            continue;
        }
        let contents = fs::read_to_string(&name)
            .map_err(|e| MirrorError::new(&format!("reading catalog file {} {}", name, e)))?;
        // catalog files hold concatenated json documents
        let stream = serde_json::Deserializer::from_str(&contents).into_iter::<DeclarativeConfig>();
        for document in stream {
            match document {
                Ok(dc) => documents.push(dc),
                Err(e) => {
                    return Err(MirrorError::new(&format!(
                        "parsing catalog file {} {}",
                        name, e
                    )))
                }
            }
        }
    }
    if documents.is_empty() {
        return Err(MirrorError::new(&format!(
            "no declarative config documents found under {}",
            dir
        )));
    }

    let mut catalog = OperatorCatalog::default();
    let mut package_by_name: HashMap<String, usize> = HashMap::new();
    // packages first so channels and bundles can resolve their index
    for dc in documents.iter() {
        if dc.schema == "olm.package" {
            package_by_name.insert(dc.name.clone(), catalog.packages.len());
            catalog.packages.push(CatalogPackage {
                name: dc.name.clone(),
                default_channel: dc.default_channel.clone(),
            });
        }
    }
    for dc in documents.iter() {
        match dc.schema.as_str() {
            "olm.channel" => {
                let package = match package_by_name.get(&dc.package) {
                    Some(idx) => *idx,
                    None => {
                        log.warn(&format!(
                            "channel {} references unknown package {} : SKIPPING",
                            dc.name, dc.package
                        ));
                        continue;
                    }
                };
                catalog.channels.push(CatalogChannel {
                    package,
                    name: dc.name.clone(),
                    entries: dc.entries.clone().unwrap_or_default(),
                });
            }
            "olm.bundle" => {
                let package = match package_by_name.get(&dc.package) {
                    Some(idx) => *idx,
                    None => {
                        log.warn(&format!(
                            "bundle {} references unknown package {} : SKIPPING",
                            dc.name, dc.package
                        ));
                        continue;
                    }
                };
                catalog.bundles.push(CatalogBundle {
                    package,
                    name: dc.name.clone(),
                    image: dc.image.clone(),
                    related_images: dc.related_images.clone().unwrap_or_default(),
                    version: bundle_version(&dc.properties),
                });
            }
            _ => {}
        }
    }
    Ok(catalog)
}

// serialize the arena back to one catalog.json per package, documents in
// deterministic order so repeated runs produce identical trees
pub fn save_declarative_config(catalog: &OperatorCatalog, dir: &str) -> Result<(), MirrorError> {
    for (idx, package) in catalog.packages.iter().enumerate() {
        let package_dir = format!("{}/{}", dir, package.name);
        fs::create_dir_all(&package_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", package_dir, e)))?;

        let mut documents = vec![];
        let package_doc = DeclarativeConfig {
            schema: "olm.package".to_string(),
            name: package.name.clone(),
            default_channel: package.default_channel.clone(),
            ..Default::default()
        };
        documents.push(serde_json::to_string_pretty(&package_doc));

        let mut channels: Vec<&CatalogChannel> =
            catalog.channels.iter().filter(|c| c.package == idx).collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        for channel in channels.iter() {
            let channel_doc = DeclarativeConfig {
                schema: "olm.channel".to_string(),
                name: channel.name.clone(),
                package: package.name.clone(),
                entries: Some(channel.entries.clone()),
                ..Default::default()
            };
            documents.push(serde_json::to_string_pretty(&channel_doc));
        }

        let mut bundles: Vec<&CatalogBundle> =
            catalog.bundles.iter().filter(|b| b.package == idx).collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));
        for bundle in bundles.iter() {
            let mut properties = None;
            if let Some(version) = &bundle.version {
                properties = Some(vec![Property {
                    property_type: "olm.package".to_string(),
                    value: serde_json::json!({
                        "packageName": package.name,
                        "version": version.to_string(),
                    }),
                }]);
            }
            let bundle_doc = DeclarativeConfig {
                schema: "olm.bundle".to_string(),
                name: bundle.name.clone(),
                package: package.name.clone(),
                image: bundle.image.clone(),
                related_images: Some(bundle.related_images.clone()),
                properties,
                ..Default::default()
            };
            documents.push(serde_json::to_string_pretty(&bundle_doc));
        }

        let mut out = String::new();
        for doc in documents.into_iter() {
            let doc = doc.map_err(|e| MirrorError::new(&format!("serializing catalog {}", e)))?;
            out.push_str(&doc);
            out.push('\n');
        }
        let file = format!("{}/catalog.json", package_dir);
        fs::write(&file, out)
            .map_err(|e| MirrorError::new(&format!("writing {} {}", file, e)))?;
    }
    Ok(())
}

// effective semver range for a package/channel selection
// channel settings win over package settings
fn selection_range(
    package: &IncludePackage,
    channel: Option<&IncludeChannel>,
) -> Result<Option<VersionReq>, MirrorError> {
    let (range, min, max) = match channel {
        Some(c) if !c.version_range.is_empty() || !c.min_version.is_empty() || !c.max_version.is_empty() => {
            (c.version_range.clone(), c.min_version.clone(), c.max_version.clone())
        }
        _ => (
            package.version_range.clone(),
            package.min_version.clone(),
            package.max_version.clone(),
        ),
    };
    if !range.is_empty() {
        // the grammar uses spaces between comparators
        let normalized = range.split_whitespace().collect::<Vec<&str>>().join(", ");
        let req = VersionReq::parse(&normalized)
            .map_err(|e| MirrorError::new(&format!("invalid version range {} {}", range, e)))?;
        return Ok(Some(req));
    }
    let mut comparators = vec![];
    if !min.is_empty() {
        comparators.push(format!(">={}", min));
    }
    if !max.is_empty() {
        comparators.push(format!("<={}", max));
    }
    if comparators.is_empty() {
        return Ok(None);
    }
    let expr = comparators.join(", ");
    let req = VersionReq::parse(&expr)
        .map_err(|e| MirrorError::new(&format!("invalid version range {} {}", expr, e)))?;
    Ok(Some(req))
}

// the channel head is the entry no other entry replaces or skips,
// ties resolved by highest bundle version
fn channel_head<'a>(
    catalog: &OperatorCatalog,
    channel: &'a CatalogChannel,
) -> Option<&'a ChannelEntry> {
    let mut replaced = HashSet::new();
    for entry in channel.entries.iter() {
        if let Some(replaces) = &entry.replaces {
            replaced.insert(replaces.clone());
        }
        if let Some(skips) = &entry.skips {
            for skip in skips.iter() {
                replaced.insert(skip.clone());
            }
        }
    }
    let mut candidates: Vec<&ChannelEntry> = channel
        .entries
        .iter()
        .filter(|e| !replaced.contains(&e.name))
        .collect();
    if candidates.is_empty() {
        candidates = channel.entries.iter().collect();
    }
    candidates.into_iter().max_by_key(|e| {
        catalog
            .bundle_of(channel.package, &e.name)
            .and_then(|b| b.version.clone())
            .unwrap_or_else(|| Version::new(0, 0, 0))
    })
}

// walk the replaces chain from the head, keeping bundles inside the range
// (the head alone when no range is set)
fn entries_for_selection(
    log: &Logging,
    catalog: &OperatorCatalog,
    channel: &CatalogChannel,
    range: &Option<VersionReq>,
) -> Vec<ChannelEntry> {
    let head = match channel_head(catalog, channel) {
        Some(head) => head,
        None => {
            log.warn(&format!("channel {} has no entries", channel.name));
            return vec![];
        }
    };
    let mut selected = vec![];
    match range {
        None => selected.push(head.clone()),
        Some(req) => {
            let by_name: HashMap<&str, &ChannelEntry> = channel
                .entries
                .iter()
                .map(|e| (e.name.as_str(), e))
                .collect();
            let mut current = Some(head);
            let mut visited = HashSet::new();
            while let Some(entry) = current {
                if !visited.insert(entry.name.clone()) {
                    break;
                }
                let in_range = catalog
                    .bundle_of(channel.package, &entry.name)
                    .and_then(|b| b.version.as_ref())
                    .map(|v| req.matches(v))
                    .unwrap_or(false);
                if in_range {
                    selected.push(entry.clone());
                }
                current = entry
                    .replaces
                    .as_ref()
                    .and_then(|r| by_name.get(r.as_str()).copied());
            }
        }
    }
    // drop links to entries that were filtered away
    let kept: HashSet<String> = selected.iter().map(|e| e.name.clone()).collect();
    selected
        .iter()
        .map(|e| {
            let mut entry = e.clone();
            if let Some(replaces) = &entry.replaces {
                if !kept.contains(replaces) {
                    entry.replaces = None;
                }
            }
            if let Some(skips) = &entry.skips {
                let remaining: Vec<String> =
                    skips.iter().filter(|s| kept.contains(*s)).cloned().collect();
                entry.skips = if remaining.is_empty() { None } else { Some(remaining) };
            }
            entry
        })
        .collect()
}

// produce the sub forest selected by the operator entry
pub fn filter_catalog(
    log: &Logging,
    catalog: &OperatorCatalog,
    operator: &Operator,
) -> Result<OperatorCatalog, MirrorError> {
    let mut filtered = OperatorCatalog::default();
    let packages = operator.packages.clone().unwrap_or_default();

    for package_selection in packages.iter() {
        let package_idx = match catalog.package_index(&package_selection.name) {
            Some(idx) => idx,
            None => {
                log.warn(&format!(
                    "package {} not found in catalog : SKIPPING",
                    package_selection.name
                ));
                continue;
            }
        };

        // selected channels, or the default channel when none are listed
        let mut channel_selections: Vec<(String, Option<IncludeChannel>)> = vec![];
        match &package_selection.channels {
            Some(channels) if !channels.is_empty() => {
                for channel in channels.iter() {
                    channel_selections.push((channel.name.clone(), Some(channel.clone())));
                }
            }
            _ => match catalog.default_channel_of(package_idx) {
                Some(name) => channel_selections.push((name, None)),
                None => {
                    log.warn(&format!(
                        "package {} has no channels : SKIPPING",
                        package_selection.name
                    ));
                    continue;
                }
            },
        }

        let new_package_idx = filtered.packages.len();
        let mut kept_channels = vec![];
        let mut kept_bundles: HashSet<String> = HashSet::new();

        for (channel_name, channel_selection) in channel_selections.iter() {
            let channel = match catalog
                .channels
                .iter()
                .find(|c| c.package == package_idx && &c.name == channel_name)
            {
                Some(channel) => channel,
                None => {
                    log.warn(&format!(
                        "channel {} not found in package {} : SKIPPING",
                        channel_name, package_selection.name
                    ));
                    continue;
                }
            };
            let range = selection_range(package_selection, channel_selection.as_ref())?;
            let entries = entries_for_selection(log, catalog, channel, &range);
            if entries.is_empty() {
                log.warn(&format!(
                    "no bundles selected in channel {} of package {}",
                    channel_name, package_selection.name
                ));
                continue;
            }
            for entry in entries.iter() {
                kept_bundles.insert(entry.name.clone());
            }
            kept_channels.push(CatalogChannel {
                package: new_package_idx,
                name: channel.name.clone(),
                entries,
            });
        }

        if kept_channels.is_empty() {
            continue;
        }

        // keep the original default channel when it survived the filter
        let original_default = catalog.default_channel_of(package_idx);
        let default_channel = match original_default {
            Some(ref name) if kept_channels.iter().any(|c| &c.name == name) => {
                Some(name.clone())
            }
            _ => Some(kept_channels[0].name.clone()),
        };

        filtered.packages.push(CatalogPackage {
            name: package_selection.name.clone(),
            default_channel,
        });
        filtered.channels.append(&mut kept_channels);
        for bundle_name in kept_bundles.iter() {
            match catalog.bundle_of(package_idx, bundle_name) {
                Some(bundle) => {
                    let mut kept = bundle.clone();
                    kept.package = new_package_idx;
                    filtered.bundles.push(kept);
                }
                None => {
                    return Err(MirrorError::new(&format!(
                        "channel entry {} has no bundle in package {}",
                        bundle_name, package_selection.name
                    )))
                }
            }
        }
    }
    // stable ordering keeps serialized output deterministic
    filtered.bundles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(filtered)
}

// one related image per unique reference, with reverse maps from image to
// owning operators and bundles for error reporting
pub fn get_related_images_from_catalog(
    log: &Logging,
    catalog: &OperatorCatalog,
    schema_map: &mut CopyImageSchemaMap,
) -> HashMap<String, Vec<RelatedImage>> {
    let mut result: HashMap<String, Vec<RelatedImage>> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for bundle in catalog.bundles.iter() {
        let package_name = catalog.packages[bundle.package].name.clone();
        let images = result.entry(package_name.clone()).or_default();

        if !bundle.image.is_empty() && seen.insert(bundle.image.clone()) {
            images.push(RelatedImage {
                name: bundle.name.clone(),
                image: bundle.image.clone(),
                image_type: ImageType::OperatorBundle,
                ..Default::default()
            });
        }
        record_owner(schema_map, &bundle.image, &package_name, &bundle.name);

        for related in bundle.related_images.iter() {
            if related.image.is_empty() {
                log.warn(&format!(
                    "empty related image in bundle {} : SKIPPING",
                    bundle.name
                ));
                continue;
            }
            record_owner(schema_map, &related.image, &package_name, &bundle.name);
            if !seen.insert(related.image.clone()) {
                continue;
            }
            images.push(RelatedImage {
                name: related.name.clone(),
                image: related.image.clone(),
                image_type: ImageType::OperatorRelatedImage,
                ..Default::default()
            });
        }
    }
    result
}

fn record_owner(schema_map: &mut CopyImageSchemaMap, image: &str, operator: &str, bundle: &str) {
    if image.is_empty() {
        return;
    }
    schema_map
        .operators_by_image
        .entry(image.to_string())
        .or_default()
        .insert(operator.to_string());
    schema_map
        .bundles_by_image
        .entry(image.to_string())
        .or_default()
        .insert(bundle.to_string());
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;

    fn bundle_doc(package: &str, name: &str, version: &str, images: &[(&str, &str)]) -> String {
        let related: Vec<String> = images
            .iter()
            .map(|(n, i)| format!("{{\"name\": \"{}\", \"image\": \"{}\"}}", n, i))
            .collect();
        format!(
            "{{\"schema\": \"olm.bundle\", \"name\": \"{}\", \"package\": \"{}\", \"image\": \"quay.io/ns/{}@sha256:{:064}\", \"relatedImages\": [{}], \"properties\": [{{\"type\": \"olm.package\", \"value\": {{\"packageName\": \"{}\", \"version\": \"{}\"}}}}]}}",
            name,
            package,
            name,
            version.len(),
            related.join(","),
            package,
            version
        )
    }

    fn write_test_catalog(dir: &std::path::Path) {
        let op1 = dir.join("op1");
        fs::create_dir_all(&op1).unwrap();
        let mut docs = vec![
            "{\"schema\": \"olm.package\", \"name\": \"op1\", \"defaultChannel\": \"stable\"}"
                .to_string(),
            "{\"schema\": \"olm.channel\", \"name\": \"stable\", \"package\": \"op1\", \"entries\": [{\"name\": \"op1.v1.0.0\"}, {\"name\": \"op1.v1.1.0\", \"replaces\": \"op1.v1.0.0\"}, {\"name\": \"op1.v2.0.0\", \"replaces\": \"op1.v1.1.0\"}]}".to_string(),
            "{\"schema\": \"olm.channel\", \"name\": \"candidate\", \"package\": \"op1\", \"entries\": [{\"name\": \"op1.v2.0.0\"}]}".to_string(),
        ];
        docs.push(bundle_doc(
            "op1",
            "op1.v1.0.0",
            "1.0.0",
            &[("controller", "quay.io/ns/controller:v1.0.0")],
        ));
        docs.push(bundle_doc(
            "op1",
            "op1.v1.1.0",
            "1.1.0",
            &[("controller", "quay.io/ns/controller:v1.1.0")],
        ));
        docs.push(bundle_doc(
            "op1",
            "op1.v2.0.0",
            "2.0.0",
            &[
                ("controller", "quay.io/ns/controller:v2.0.0"),
                ("sidecar", "quay.io/ns/sidecar:v2.0.0"),
            ],
        ));
        fs::write(op1.join("catalog.json"), docs.join("\n")).unwrap();

        let op2 = dir.join("op2");
        fs::create_dir_all(&op2).unwrap();
        let docs = vec![
            // no defaultChannel - the greatest channel name wins
            "{\"schema\": \"olm.package\", \"name\": \"op2\"}".to_string(),
            "{\"schema\": \"olm.channel\", \"name\": \"alpha\", \"package\": \"op2\", \"entries\": [{\"name\": \"op2.v0.1.0\"}]}".to_string(),
            "{\"schema\": \"olm.channel\", \"name\": \"beta\", \"package\": \"op2\", \"entries\": [{\"name\": \"op2.v0.2.0\"}]}".to_string(),
            bundle_doc("op2", "op2.v0.1.0", "0.1.0", &[]),
            bundle_doc("op2", "op2.v0.2.0", "0.2.0", &[]),
        ];
        fs::write(op2.join("catalog.json"), docs.join("\n")).unwrap();
    }

    fn logging() -> Logging {
        Logging {
            log_level: Level::DEBUG,
        }
    }

    #[test]
    fn get_declarative_config_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();
        assert_eq!(catalog.packages.len(), 2);
        assert_eq!(catalog.channels.len(), 4);
        assert_eq!(catalog.bundles.len(), 5);
        let op1 = catalog.package_index("op1").unwrap();
        assert_eq!(catalog.channels_of(op1).len(), 2);
    }

    #[test]
    fn get_declarative_config_empty_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let res = get_declarative_config(&logging(), &tmp.path().display().to_string());
        assert!(res.is_err());
    }

    #[test]
    fn filter_catalog_head_only_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let operator = Operator {
            catalog: "registry.example.com/ns/ctlg:v1".to_string(),
            packages: Some(vec![IncludePackage {
                name: "op1".to_string(),
                channels: Some(vec![IncludeChannel {
                    name: "stable".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let filtered = filter_catalog(&logging(), &catalog, &operator).unwrap();
        assert_eq!(filtered.packages.len(), 1);
        assert_eq!(filtered.channels.len(), 1);
        // head only - op1.v2.0.0
        assert_eq!(filtered.bundles.len(), 1);
        assert_eq!(filtered.bundles[0].name, "op1.v2.0.0");
        assert_eq!(filtered.packages[0].default_channel, Some("stable".to_string()));
    }

    #[test]
    fn filter_catalog_version_range_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let operator = Operator {
            catalog: "registry.example.com/ns/ctlg:v1".to_string(),
            packages: Some(vec![IncludePackage {
                name: "op1".to_string(),
                channels: Some(vec![IncludeChannel {
                    name: "stable".to_string(),
                    version_range: ">=1.1.0 <=2.0.0".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let filtered = filter_catalog(&logging(), &catalog, &operator).unwrap();
        let names: Vec<String> = filtered.bundles.iter().map(|b| b.name.clone()).collect();
        assert_eq!(names, vec!["op1.v1.1.0", "op1.v2.0.0"]);
        // the dangling replaces link to v1.0.0 was cleared
        let entries = &filtered.channels[0].entries;
        let oldest = entries.iter().find(|e| e.name == "op1.v1.1.0").unwrap();
        assert!(oldest.replaces.is_none());
    }

    #[test]
    fn filter_catalog_min_max_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let operator = Operator {
            catalog: "registry.example.com/ns/ctlg:v1".to_string(),
            packages: Some(vec![IncludePackage {
                name: "op1".to_string(),
                min_version: "1.0.0".to_string(),
                max_version: "2.0.0".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        // no channels listed - the default channel (stable) is used
        let filtered = filter_catalog(&logging(), &catalog, &operator).unwrap();
        assert_eq!(filtered.channels.len(), 1);
        assert_eq!(filtered.channels[0].name, "stable");
        assert_eq!(filtered.bundles.len(), 3);
    }

    #[test]
    fn filter_catalog_default_channel_fallback_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let operator = Operator {
            catalog: "registry.example.com/ns/ctlg:v1".to_string(),
            packages: Some(vec![IncludePackage {
                name: "op2".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let filtered = filter_catalog(&logging(), &catalog, &operator).unwrap();
        // op2 has no defaultChannel - lexicographically greatest wins
        assert_eq!(filtered.channels.len(), 1);
        assert_eq!(filtered.channels[0].name, "beta");
        assert_eq!(filtered.bundles[0].name, "op2.v0.2.0");
    }

    #[test]
    fn filter_catalog_unknown_package_skips_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let operator = Operator {
            catalog: "registry.example.com/ns/ctlg:v1".to_string(),
            packages: Some(vec![IncludePackage {
                name: "does-not-exist".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let filtered = filter_catalog(&logging(), &catalog, &operator).unwrap();
        assert_eq!(filtered.packages.len(), 0);
    }

    #[test]
    fn save_and_reload_round_trip_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let out = tempfile::tempdir().unwrap();
        save_declarative_config(&catalog, &out.path().display().to_string()).unwrap();
        let reloaded =
            get_declarative_config(&logging(), &out.path().display().to_string()).unwrap();
        assert_eq!(reloaded.packages.len(), catalog.packages.len());
        assert_eq!(reloaded.channels.len(), catalog.channels.len());
        assert_eq!(reloaded.bundles.len(), catalog.bundles.len());

        // serialization is deterministic
        let first = fs::read_to_string(out.path().join("op1/catalog.json")).unwrap();
        save_declarative_config(&catalog, &out.path().display().to_string()).unwrap();
        let second = fs::read_to_string(out.path().join("op1/catalog.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn get_related_images_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_test_catalog(tmp.path());
        let catalog =
            get_declarative_config(&logging(), &tmp.path().display().to_string()).unwrap();

        let mut schema_map = CopyImageSchemaMap::default();
        let related = get_related_images_from_catalog(&logging(), &catalog, &mut schema_map);
        let op1_images = related.get("op1").unwrap();
        // 3 bundles + 3 controller tags + 1 sidecar
        assert_eq!(op1_images.len(), 7);
        let owners = schema_map
            .operators_by_image
            .get("quay.io/ns/controller:v2.0.0")
            .unwrap();
        assert!(owners.contains("op1"));
        let bundles = schema_map
            .bundles_by_image
            .get("quay.io/ns/sidecar:v2.0.0")
            .unwrap();
        assert!(bundles.contains("op1.v2.0.0"));
    }
}

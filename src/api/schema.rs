// module schema

use clap::{Args, Parser, Subcommand};
use serde_derive::Deserialize;
use serde_derive::Serialize;
use std::collections::{HashMap, HashSet};

// transport prefixes and workflow modes used across all modules
pub const DOCKER_PROTOCOL: &str = "docker://";
pub const OCI_PROTOCOL: &str = "oci://";
pub const OCI_PROTOCOL_TRIMMED: &str = "oci:";
pub const FILE_PROTOCOL: &str = "file://";

pub const MIRROR_TO_DISK: &str = "mirrorToDisk";
pub const DISK_TO_MIRROR: &str = "diskToMirror";
pub const MIRROR_TO_MIRROR: &str = "mirrorToMirror";

pub const COPY_FUNCTION: &str = "copy";
pub const DELETE_FUNCTION: &str = "delete";

/// rust-container-mirror cli struct
#[derive(Parser, Debug)]
#[command(name = "rust-container-mirror")]
#[command(version = "0.2.0")]
#[command(about = "Used to mirror release, operator, additional and helm images between registries and disk", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// mirror images according to the imageset configuration
    Mirror(MirrorArgs),
    /// delete previously mirrored images from a destination registry
    Delete(DeleteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// path to the imageset configuration file
    #[arg(short, long, value_name = "config")]
    pub config: String,

    /// destination : file://<dir> or docker://<registry>
    pub destination: String,

    /// local storage directory for the disk to mirror workflow
    #[arg(long, default_value = "")]
    pub from: String,

    /// workspace where resources and internal artifacts are generated (mirror to mirror workflow)
    #[arg(long, default_value = "")]
    pub workspace: String,

    /// log level one of (info, debug, trace)
    #[arg(long, default_value = "info")]
    pub loglevel: String,

    /// number of images mirrored in parallel
    #[arg(long = "parallel-images", default_value_t = 8)]
    pub parallel_images: usize,

    /// number of image layers mirrored in parallel
    #[arg(long = "parallel-layers", default_value_t = 10)]
    pub parallel_layers: usize,

    /// timeout in seconds for mirroring a single image
    #[arg(long = "image-timeout", default_value_t = 600)]
    pub image_timeout: u64,

    /// retry attempts for transient registry errors
    #[arg(long, default_value_t = 3)]
    pub retry: u32,

    /// tls verification when reading from the source registry
    #[arg(long = "src-tls-verify", default_value_t = true, action = clap::ArgAction::Set)]
    pub src_tls_verify: bool,

    /// tls verification when pushing to the destination registry
    #[arg(long = "dest-tls-verify", default_value_t = true, action = clap::ArgAction::Set)]
    pub dest_tls_verify: bool,

    /// one of (system, all, index-only)
    #[arg(long = "multi-arch", default_value = "system")]
    pub multi_arch: String,

    /// include all new content since the specified date (yyyy-MM-dd)
    #[arg(long, default_value = "")]
    pub since: String,

    /// collapse destination paths for registries that limit nested paths
    #[arg(long = "max-nested-paths", default_value_t = 0)]
    pub max_nested_paths: usize,

    /// fail instead of warn when a single file exceeds archiveSize
    #[arg(long = "strict-archive", default_value_t = false)]
    pub strict_archive: bool,

    /// print planned actions without mirroring images
    #[arg(long = "dry-run", default_value_t = false)]
    pub dry_run: bool,

    /// enable signature verification policy
    #[arg(long = "secure-policy", default_value_t = false)]
    pub secure_policy: bool,

    /// cache directory location (defaults to $HOME/.oc-mirror/.cache)
    #[arg(long = "cache-dir", default_value = "")]
    pub cache_dir: String,

    /// http port used by the local cache registry
    #[arg(long, default_value_t = 55000)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// path to the delete imageset configuration file
    #[arg(short, long, value_name = "config")]
    pub config: String,

    /// destination : docker://<registry>
    pub destination: String,

    /// generate the delete-images yaml without deleting anything
    #[arg(long, default_value_t = false)]
    pub generate: bool,

    /// path to a previously generated delete-images yaml
    #[arg(long = "delete-yaml-file", default_value = "")]
    pub delete_yaml_file: String,

    /// workspace where resources and internal artifacts are generated
    #[arg(long, default_value = "")]
    pub workspace: String,

    /// identifier used to version the generated delete yaml files
    #[arg(long = "delete-id", default_value = "")]
    pub delete_id: String,

    /// also delete the images from the local cache registry
    #[arg(long = "force-cache-delete", default_value_t = false)]
    pub force_cache_delete: bool,

    /// derive destination tags the way the v1 migration did
    #[arg(long = "delete-v1-images", default_value_t = false)]
    pub delete_v1_images: bool,

    /// log level one of (info, debug, trace)
    #[arg(long, default_value = "info")]
    pub loglevel: String,

    /// number of images deleted in parallel
    #[arg(long = "parallel-images", default_value_t = 8)]
    pub parallel_images: usize,

    /// retry attempts for transient registry errors
    #[arg(long, default_value_t = 3)]
    pub retry: u32,

    /// tls verification against the destination registry
    #[arg(long = "dest-tls-verify", default_value_t = true, action = clap::ArgAction::Set)]
    pub dest_tls_verify: bool,

    /// cache directory location (defaults to $HOME/.oc-mirror/.cache)
    #[arg(long = "cache-dir", default_value = "")]
    pub cache_dir: String,

    /// http port used by the local cache registry
    #[arg(long, default_value_t = 55000)]
    pub port: u16,
}

// shared runtime options - threaded through every phase
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    pub mode: String,
    pub function: String,
    pub local_storage_fqdn: String,
    pub destination: String,
    pub original_destination: String,
    pub working_dir: String,
    pub from: String,
    pub workspace: String,
    pub config_path: String,
    pub cache_dir: String,
    pub logs_dir: String,
    pub log_level: String,
    pub port: u16,
    pub parallel_images: usize,
    pub parallel_layers: usize,
    pub retry: u32,
    pub retry_delay_secs: u64,
    pub image_timeout_secs: u64,
    pub src_tls_verify: bool,
    pub dest_tls_verify: bool,
    pub multi_arch: String,
    pub since: String,
    pub max_nested_paths: usize,
    pub strict_archive: bool,
    pub dry_run: bool,
    pub secure_policy: bool,
    pub generate_v1_dest_tags: bool,
    pub delete_id: String,
    pub delete_yaml: String,
    pub delete_generate: bool,
    pub force_cache_delete: bool,
    pub delete_destination: String,
}

impl MirrorOptions {
    pub fn is_mirror_to_disk(&self) -> bool {
        self.mode == MIRROR_TO_DISK
    }

    pub fn is_disk_to_mirror(&self) -> bool {
        self.mode == DISK_TO_MIRROR
    }

    pub fn is_mirror_to_mirror(&self) -> bool {
        self.mode == MIRROR_TO_MIRROR
    }

    pub fn is_delete(&self) -> bool {
        self.function == DELETE_FUNCTION
    }

    // the registry images are pushed to in the current mode
    pub fn destination_registry(&self) -> String {
        if self.is_disk_to_mirror() || self.is_mirror_to_mirror() {
            self.destination
                .trim_start_matches(DOCKER_PROTOCOL)
                .to_string()
        } else {
            self.local_storage_fqdn.clone()
        }
    }
}

// image typing - drives tag policy, path components and reporting totals
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageType {
    #[serde(rename = "ocpRelease")]
    OcpRelease,
    #[serde(rename = "ocpReleaseContent")]
    OcpReleaseContent,
    #[serde(rename = "operatorCatalog")]
    OperatorCatalog,
    #[serde(rename = "operatorBundle")]
    OperatorBundle,
    #[serde(rename = "operatorRelatedImage")]
    OperatorRelatedImage,
    #[serde(rename = "generic")]
    Generic,
    #[serde(rename = "helmImage")]
    HelmImage,
    #[serde(rename = "cincinnatiGraph")]
    CincinnatiGraph,
    #[serde(rename = "kubeVirtContainer")]
    KubeVirtContainer,
    #[default]
    #[serde(rename = "invalid")]
    Invalid,
}

impl ImageType {
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            ImageType::OcpRelease
                | ImageType::OcpReleaseContent
                | ImageType::CincinnatiGraph
                | ImageType::KubeVirtContainer
        )
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            ImageType::OperatorCatalog
                | ImageType::OperatorBundle
                | ImageType::OperatorRelatedImage
        )
    }

    pub fn is_additional_image(&self) -> bool {
        matches!(self, ImageType::Generic)
    }

    pub fn is_helm_image(&self) -> bool {
        matches!(self, ImageType::HelmImage)
    }
}

fn is_invalid_type(image_type: &ImageType) -> bool {
    matches!(image_type, ImageType::Invalid)
}

// a logical image as discovered by a collector
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RelatedImage {
    #[serde(rename = "name", default)]
    pub name: String,

    #[serde(rename = "image")]
    pub image: String,

    #[serde(rename = "type", default, skip_serializing_if = "is_invalid_type")]
    pub image_type: ImageType,

    #[serde(rename = "targetTag", default, skip_serializing_if = "String::is_empty")]
    pub target_tag: String,

    #[serde(rename = "targetCatalog", default, skip_serializing_if = "String::is_empty")]
    pub target_catalog: String,

    #[serde(rename = "rebuiltTag", default, skip_serializing_if = "String::is_empty")]
    pub rebuilt_tag: String,

    // legacy marker for catalogs that were mirrored from disk by v1
    #[serde(skip)]
    pub origin_from_operator_catalog_on_disk: bool,
}

// a planned transfer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CopyImageSchema {
    #[serde(rename = "source")]
    pub source: String,

    #[serde(rename = "destination")]
    pub destination: String,

    // canonical identity of the logical image, used for dedup and reporting
    #[serde(rename = "origin")]
    pub origin: String,

    #[serde(rename = "type", default)]
    pub image_type: ImageType,

    #[serde(rename = "rebuiltTag", default)]
    pub rebuilt_tag: String,
}

// per catalog filtering outcome
#[derive(Debug, Clone, Default)]
pub struct CatalogFilterResult {
    pub operator_filter: Operator,
    pub filtered_config_path: String,
    pub to_rebuild: bool,
}

// reverse maps used to enrich per-image error reports
#[derive(Debug, Clone, Default)]
pub struct CopyImageSchemaMap {
    pub operators_by_image: HashMap<String, HashSet<String>>,
    pub bundles_by_image: HashMap<String, HashSet<String>>,
}

// aggregated collector output
#[derive(Debug, Clone, Default)]
pub struct CollectorSchema {
    pub all_images: Vec<CopyImageSchema>,
    pub total_release_images: usize,
    pub total_operator_images: usize,
    pub total_additional_images: usize,
    pub total_helm_images: usize,
    pub catalog_to_fbc_map: HashMap<String, CatalogFilterResult>,
    pub copy_image_schema_map: CopyImageSchemaMap,
}

// oci image index / manifest as found on disk in an image layout
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OCISchema {
    #[serde(rename = "schemaVersion")]
    pub schema_version: i64,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(rename = "manifests", skip_serializing_if = "Option::is_none")]
    pub manifests: Option<Vec<OCIManifest>>,

    #[serde(rename = "config", skip_serializing_if = "Option::is_none")]
    pub config: Option<OCIManifest>,

    #[serde(rename = "layers", skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<OCIManifest>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OCIManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    #[serde(rename = "digest")]
    pub digest: String,

    #[serde(rename = "size")]
    pub size: i64,

    #[serde(rename = "annotations", skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,

    #[serde(rename = "platform", skip_serializing_if = "Option::is_none")]
    pub platform: Option<ManifestPlatform>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestPlatform {
    #[serde(rename = "architecture")]
    pub architecture: String,

    #[serde(rename = "os")]
    pub os: String,
}

// the subset of the image config blob the operator collector needs
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OperatorConfigSchema {
    #[serde(rename = "config", default)]
    pub config: ContainerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    pub labels: ConfigLabels,

    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ConfigLabels {
    #[serde(
        rename = "operators.operatorframework.io.index.configs.v1",
        skip_serializing_if = "Option::is_none"
    )]
    pub operators_operatorframework_io_index_configs_v1: Option<String>,
}

// registry http manifests (docker v2 schema2 and manifest lists)
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestList {
    #[serde(rename = "manifests")]
    pub manifests: Vec<Manifest>,

    #[serde(rename = "mediaType")]
    pub media_type: Option<String>,

    #[serde(rename = "schemaVersion")]
    pub schema_version: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Manifest {
    #[serde(rename = "digest")]
    pub digest: Option<String>,

    #[serde(rename = "mediaType")]
    pub media_type: Option<String>,

    #[serde(rename = "platform")]
    pub platform: Option<ManifestPlatform>,

    #[serde(rename = "size")]
    pub size: Option<i64>,

    #[serde(rename = "config")]
    pub config: Option<ManifestConfig>,

    #[serde(rename = "layers")]
    pub layers: Option<Vec<Layer>>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfig {
    pub media_type: String,
    pub size: i64,
    pub digest: String,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub media_type: String,
    pub size: i64,
    pub digest: String,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(rename = "token")]
    pub token: Option<String>,
    #[serde(rename = "access_token")]
    pub access_token: Option<String>,
    #[serde(rename = "expires_in")]
    pub expires_in: Option<i64>,
}

// registry credential store (podman/docker auth.json)
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    pub auths: HashMap<String, AuthProvider>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct AuthProvider {
    pub auth: String,
    pub email: Option<String>,
}

/// imageset configuration schema
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ImageSetConfig {
    #[serde(rename = "kind")]
    pub kind: String,

    #[serde(rename = "apiVersion")]
    pub api_version: String,

    #[serde(rename = "mirror")]
    pub mirror: Mirror,
}

/// delete imageset configuration schema
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeleteImageSetConfig {
    #[serde(rename = "kind")]
    pub kind: String,

    #[serde(rename = "apiVersion")]
    pub api_version: String,

    #[serde(rename = "delete")]
    pub delete: Mirror,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Mirror {
    #[serde(rename = "platform")]
    pub platform: Option<Platform>,

    #[serde(rename = "operators")]
    pub operators: Option<Vec<Operator>>,

    #[serde(rename = "additionalImages")]
    pub additional_images: Option<Vec<Image>>,

    #[serde(rename = "helm")]
    pub helm: Option<Helm>,

    #[serde(rename = "blockedImages")]
    pub blocked_images: Option<Vec<Image>>,

    // maximum archive segment size in GiB
    #[serde(rename = "archiveSize")]
    pub archive_size: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Platform {
    #[serde(rename = "releases", default)]
    pub releases: Vec<Image>,

    #[serde(rename = "graph", default)]
    pub graph: bool,

    #[serde(rename = "kubeVirtContainer", default)]
    pub kube_virt_container: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Image {
    #[serde(rename = "name")]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Operator {
    #[serde(rename = "catalog")]
    pub catalog: String,

    #[serde(rename = "targetCatalog", default)]
    pub target_catalog: String,

    #[serde(rename = "targetTag", default)]
    pub target_tag: String,

    #[serde(rename = "targetCatalogSourceTemplate", default)]
    pub target_catalog_source_template: String,

    #[serde(rename = "full", default)]
    pub full: bool,

    #[serde(rename = "packages")]
    pub packages: Option<Vec<IncludePackage>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IncludePackage {
    #[serde(rename = "name")]
    pub name: String,

    #[serde(rename = "channels")]
    pub channels: Option<Vec<IncludeChannel>>,

    #[serde(rename = "minVersion", default)]
    pub min_version: String,

    #[serde(rename = "maxVersion", default)]
    pub max_version: String,

    // free form semver range, e.g. ">=4.1.0 <4.3.0" or "~1.2"
    #[serde(rename = "versionRange", default)]
    pub version_range: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IncludeChannel {
    #[serde(rename = "name")]
    pub name: String,

    #[serde(rename = "minVersion", default)]
    pub min_version: String,

    #[serde(rename = "maxVersion", default)]
    pub max_version: String,

    #[serde(rename = "versionRange", default)]
    pub version_range: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Helm {
    #[serde(rename = "repositories")]
    pub repositories: Option<Vec<Repository>>,

    #[serde(rename = "local")]
    pub local: Option<Vec<Chart>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Repository {
    #[serde(rename = "name")]
    pub name: String,

    #[serde(rename = "url")]
    pub url: String,

    #[serde(rename = "charts")]
    pub charts: Option<Vec<Chart>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Chart {
    #[serde(rename = "name")]
    pub name: String,

    #[serde(rename = "version", default)]
    pub version: String,

    #[serde(rename = "path", default)]
    pub path: String,

    #[serde(rename = "imagePaths")]
    pub image_paths: Option<Vec<String>>,
}

// delete metadata written by `delete --generate`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeleteImageList {
    #[serde(rename = "kind")]
    pub kind: String,

    #[serde(rename = "apiVersion")]
    pub api_version: String,

    #[serde(rename = "items")]
    pub items: Vec<DeleteItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeleteItem {
    #[serde(rename = "imageName")]
    pub image_name: String,

    #[serde(rename = "imageReference")]
    pub image_reference: String,

    #[serde(rename = "type", default)]
    pub image_type: ImageType,
}

// release payload image-references (imagestream shaped)
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReleaseSchema {
    #[serde(rename = "spec")]
    pub spec: Spec,
    #[serde(rename = "kind")]
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "metadata")]
    pub metadata: MetaData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Spec {
    #[serde(rename = "lookupPolicy")]
    pub lookup: Option<LookupPolicy>,
    #[serde(rename = "tags")]
    pub tags: Vec<Tags>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LookupPolicy {
    #[serde(rename = "local")]
    pub local: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Tags {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "from")]
    pub from: From,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct From {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "kind")]
    pub kind: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MetaData {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "creationTimestamp")]
    pub creation: Option<String>,
}

// coreos bootimages configmap (yaml with an embedded json stream document)
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstallerConfigMap {
    #[serde(rename = "data")]
    pub data: InstallerData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstallerData {
    #[serde(rename = "stream")]
    pub stream: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstallerBootableImages {
    #[serde(rename = "architectures")]
    pub architectures: Architectures,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Architectures {
    #[serde(rename = "x86_64")]
    pub x86_64: ArchitectureImages,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArchitectureImages {
    #[serde(rename = "images")]
    pub images: BootableImages,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BootableImages {
    #[serde(rename = "kubevirt")]
    pub kubevirt: Option<KubeVirtImage>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct KubeVirtImage {
    #[serde(rename = "digestRef")]
    pub digest_ref: String,
}

// declarative config documents (file based catalogs)

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeclarativeConfig {
    #[serde(rename = "schema")]
    pub schema: String,

    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(rename = "package", default, skip_serializing_if = "String::is_empty")]
    pub package: String,

    #[serde(rename = "image", default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(rename = "defaultChannel", skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,

    #[serde(rename = "entries", skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<ChannelEntry>>,

    #[serde(rename = "relatedImages", skip_serializing_if = "Option::is_none")]
    pub related_images: Option<Vec<RelatedImage>>,

    #[serde(rename = "properties", skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<Property>>,
}

// ChannelEntry used in the olm.channel documents
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChannelEntry {
    #[serde(rename = "name")]
    pub name: String,

    #[serde(rename = "replaces", skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,

    #[serde(rename = "skips", skip_serializing_if = "Option::is_none")]
    pub skips: Option<Vec<String>>,

    #[serde(rename = "skipRange", skip_serializing_if = "Option::is_none")]
    pub skip_range: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Property {
    #[serde(rename = "type")]
    pub property_type: String,

    #[serde(rename = "value")]
    pub value: serde_json::Value,
}

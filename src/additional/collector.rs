// module additional collector
//
// plans copies for the loose images listed under additionalImages

use async_trait::async_trait;

use crate::api::schema::*;
use crate::collector::manager::ImageCollector;
use crate::error::handler::*;
use crate::image::reference::*;
use crate::log::logging::*;
use crate::operator::collector::digest_tag;

const COLLECTOR_PREFIX: &str = "[AdditionalImagesCollector] ";

pub struct CollectAdditional {
    pub config: ImageSetConfig,
    pub opts: MirrorOptions,
}

impl CollectAdditional {
    fn plan(&self, log: &Logging, spec: &ImageSpec) -> (String, String) {
        let mut src;
        let mut dest;
        if self.opts.is_mirror_to_disk() || self.opts.is_mirror_to_mirror() {
            src = spec.reference_with_transport.clone();
            if spec.transport == DOCKER_PROTOCOL {
                if spec.is_image_by_digest_only() {
                    dest = format!(
                        "{}{}/{}:{}",
                        DOCKER_PROTOCOL,
                        self.opts.destination_registry(),
                        spec.path_component,
                        digest_tag(spec)
                    );
                } else if spec.is_image_by_tag_and_digest() {
                    log.warn(&format!(
                        "{}{} has both tag and digest : using digest to pull, but tag only for mirroring",
                        COLLECTOR_PREFIX, spec.reference
                    ));
                    src = format!(
                        "{}{}/{}@{}:{}",
                        spec.transport, spec.domain, spec.path_component, spec.algorithm, spec.digest
                    );
                    dest = format!(
                        "{}{}/{}:{}",
                        DOCKER_PROTOCOL,
                        self.opts.destination_registry(),
                        spec.path_component,
                        spec.tag
                    );
                } else {
                    dest = format!(
                        "{}{}/{}:{}",
                        DOCKER_PROTOCOL,
                        self.opts.destination_registry(),
                        spec.path_component,
                        spec.tag
                    );
                }
            } else {
                dest = format!(
                    "{}{}/{}:latest",
                    DOCKER_PROTOCOL,
                    self.opts.destination_registry(),
                    spec.path_component.trim_start_matches('/')
                );
            }
        } else {
            // disk to mirror (and delete)
            if spec.transport == DOCKER_PROTOCOL {
                if spec.is_image_by_digest_only() {
                    src = format!(
                        "{}{}/{}:{}",
                        DOCKER_PROTOCOL,
                        self.opts.local_storage_fqdn,
                        spec.path_component,
                        digest_tag(spec)
                    );
                    if self.opts.generate_v1_dest_tags {
                        dest = format!(
                            "{}/{}:latest",
                            self.opts.destination, spec.path_component
                        );
                    } else {
                        dest = format!(
                            "{}/{}:{}",
                            self.opts.destination,
                            spec.path_component,
                            digest_tag(spec)
                        );
                    }
                } else if spec.is_image_by_tag_and_digest() {
                    // the cache only ever held the tag side
                    log.warn(&format!(
                        "{}{} has both tag and digest : using tag only",
                        COLLECTOR_PREFIX, spec.reference
                    ));
                    src = format!(
                        "{}{}/{}:{}",
                        DOCKER_PROTOCOL, self.opts.local_storage_fqdn, spec.path_component, spec.tag
                    );
                    dest = format!(
                        "{}/{}:{}",
                        self.opts.destination, spec.path_component, spec.tag
                    );
                } else {
                    src = format!(
                        "{}{}/{}:{}",
                        DOCKER_PROTOCOL, self.opts.local_storage_fqdn, spec.path_component, spec.tag
                    );
                    dest = format!(
                        "{}/{}:{}",
                        self.opts.destination, spec.path_component, spec.tag
                    );
                }
            } else {
                src = format!(
                    "{}{}/{}:latest",
                    DOCKER_PROTOCOL,
                    self.opts.local_storage_fqdn,
                    spec.path_component.trim_start_matches('/')
                );
                dest = format!(
                    "{}/{}:latest",
                    self.opts.destination,
                    spec.path_component.trim_start_matches('/')
                );
            }
        }
        (src, dest)
    }
}

#[async_trait]
impl ImageCollector for CollectAdditional {
    async fn collect(&self, log: &Logging) -> Result<CollectorSchema, MirrorError> {
        log.hi("additional images collector");
        let mut all_images = vec![];
        let additional = self
            .config
            .mirror
            .additional_images
            .clone()
            .unwrap_or_default();

        for img in additional.iter() {
            if img.name.is_empty() {
                log.warn(&format!("{}empty image name : SKIPPING", COLLECTOR_PREFIX));
                continue;
            }
            let spec = match parse_ref(&img.name) {
                Ok(spec) => spec,
                Err(e) => {
                    log.warn(&format!("{} : SKIPPING", e));
                    continue;
                }
            };
            let (src, dest) = self.plan(log, &spec);
            log.debug(&format!("{}source {}", COLLECTOR_PREFIX, src));
            log.debug(&format!("{}destination {}", COLLECTOR_PREFIX, dest));
            all_images.push(CopyImageSchema {
                source: src,
                destination: dest,
                origin: img.name.clone(),
                image_type: ImageType::Generic,
                rebuilt_tag: String::from(""),
            });
        }
        Ok(CollectorSchema {
            all_images,
            ..Default::default()
        })
    }
}

use hex;
use sha2::{Digest, Sha256};

use crate::api::schema::*;
use crate::error::handler::*;

// parsed form of [transport://][domain/]path[:tag][@algorithm:digest]
// for oci:// and file:// the reference is a filesystem path and
// domain/tag/digest stay empty
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageSpec {
    pub transport: String,
    pub reference: String,
    pub reference_with_transport: String,
    pub name: String,
    pub domain: String,
    pub path_component: String,
    pub tag: String,
    pub algorithm: String,
    pub digest: String,
}

impl ImageSpec {
    pub fn is_image_by_digest_only(&self) -> bool {
        self.tag.is_empty() && !self.digest.is_empty()
    }

    pub fn is_image_by_tag_and_digest(&self) -> bool {
        !self.tag.is_empty() && !self.digest.is_empty()
    }

    // last path segment without tag or digest, used for working-dir layout
    pub fn component_name(&self) -> String {
        self.name.clone()
    }

    // re-render with the given tag, dropping any digest
    pub fn set_tag(&self, tag: &str) -> ImageSpec {
        let mut updated = self.clone();
        updated.tag = tag.to_string();
        updated.algorithm = String::from("");
        updated.digest = String::from("");
        updated.reference = render(&updated);
        updated.reference_with_transport = updated.transport.clone() + &updated.reference;
        updated
    }
}

fn render(spec: &ImageSpec) -> String {
    if spec.transport != DOCKER_PROTOCOL {
        return spec.reference.clone();
    }
    let mut out = String::new();
    if !spec.domain.is_empty() {
        out.push_str(&spec.domain);
        out.push('/');
    }
    out.push_str(&spec.path_component);
    if !spec.tag.is_empty() {
        out.push(':');
        out.push_str(&spec.tag);
    }
    if !spec.digest.is_empty() {
        out.push('@');
        out.push_str(&spec.algorithm);
        out.push(':');
        out.push_str(&spec.digest);
    }
    out
}

// the first path component is a registry when it looks like a host
fn is_domain(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

pub fn parse_ref(image: &str) -> Result<ImageSpec, MirrorError> {
    if image.is_empty() {
        return Err(MirrorError::new("image reference is empty"));
    }

    let (transport, rest) = match image.split_once("://") {
        Some((t, r)) => {
            let prefix = format!("{}://", t);
            match prefix.as_str() {
                DOCKER_PROTOCOL | OCI_PROTOCOL | FILE_PROTOCOL => (prefix, r.to_string()),
                _ => {
                    return Err(MirrorError::new(&format!(
                        "invalid reference {} : unknown transport {}",
                        image, t
                    )))
                }
            }
        }
        None => (DOCKER_PROTOCOL.to_string(), image.to_string()),
    };

    if rest.is_empty() {
        return Err(MirrorError::new(&format!(
            "invalid reference {} : empty path",
            image
        )));
    }

    // on disk layouts - the rest is a plain filesystem path
    if transport != DOCKER_PROTOCOL {
        let trimmed = rest.trim_end_matches('/').to_string();
        let name = trimmed
            .rsplit('/')
            .next()
            .unwrap_or(trimmed.as_str())
            .to_string();
        return Ok(ImageSpec {
            transport: transport.clone(),
            reference: trimmed.clone(),
            reference_with_transport: transport + &trimmed,
            name,
            path_component: rest.trim_start_matches('/').trim_end_matches('/').to_string(),
            ..Default::default()
        });
    }

    let (named, algorithm, digest) = match rest.split_once('@') {
        Some((n, d)) => {
            let (alg, dgst) = d.split_once(':').ok_or_else(|| {
                MirrorError::new(&format!("invalid reference {} : malformed digest", image))
            })?;
            if dgst.is_empty() || !dgst.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(MirrorError::new(&format!(
                    "invalid reference {} : digest is not hex",
                    image
                )));
            }
            (n.to_string(), alg.to_string(), dgst.to_string())
        }
        None => (rest.clone(), String::from(""), String::from("")),
    };

    // a tag separator is a colon after the last path separator
    let (repo, tag) = match named.rfind(':') {
        Some(idx) if idx > named.rfind('/').map_or(0, |s| s) => (
            named[..idx].to_string(),
            named[idx + 1..].to_string(),
        ),
        _ => (named.clone(), String::from("")),
    };

    if repo.is_empty() {
        return Err(MirrorError::new(&format!(
            "invalid reference {} : empty repository",
            image
        )));
    }

    let (domain, path_component) = match repo.split_once('/') {
        Some((first, remainder)) if is_domain(first) => {
            (first.to_string(), remainder.to_string())
        }
        _ => (String::from(""), repo.clone()),
    };

    if path_component.is_empty() {
        return Err(MirrorError::new(&format!(
            "invalid reference {} : empty path component",
            image
        )));
    }
    // repository names are lowercase, tags a restricted charset
    if !path_component.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/' || c == '.' || c == '_' || c == '-'
    }) {
        return Err(MirrorError::new(&format!(
            "invalid reference {} : malformed repository path",
            image
        )));
    }
    if !tag.is_empty()
        && !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(MirrorError::new(&format!(
            "invalid reference {} : malformed tag",
            image
        )));
    }

    let name = path_component
        .rsplit('/')
        .next()
        .unwrap_or(path_component.as_str())
        .to_string();

    let mut spec = ImageSpec {
        transport,
        reference: String::from(""),
        reference_with_transport: String::from(""),
        name,
        domain,
        path_component,
        tag,
        algorithm,
        digest,
    };
    spec.reference = render(&spec);
    spec.reference_with_transport = spec.transport.clone() + &spec.reference;
    Ok(spec)
}

// collapse destination paths for registries that limit nested repository paths
// components after the (max-1)th are replaced by a short digest of the
// collapsed tail (10 hex chars, 2^40 practical collision resistance)
pub fn with_max_nested_paths(destination: &str, max: usize) -> Result<String, MirrorError> {
    if max == 0 {
        return Ok(destination.to_string());
    }
    let spec = parse_ref(destination)?;
    let components: Vec<&str> = spec.path_component.split('/').collect();
    if components.len() <= max {
        return Ok(destination.to_string());
    }
    let kept = &components[..max - 1];
    let tail = components[max - 1..].join("/");
    let mut hasher = Sha256::new();
    hasher.update(tail.as_bytes());
    let short = hex::encode(hasher.finalize())[..10].to_string();

    let mut collapsed = spec.clone();
    collapsed.path_component = if kept.is_empty() {
        short.clone()
    } else {
        format!("{}/{}", kept.join("/"), short)
    };
    collapsed.name = short;
    collapsed.reference = render(&collapsed);
    collapsed.reference_with_transport = collapsed.transport.clone() + &collapsed.reference;
    Ok(collapsed.reference_with_transport)
}

// fnv32a over the origin reference - only used by the v1 tag migration path
pub fn fnv32a(data: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in data.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

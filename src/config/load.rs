use serde_yaml;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::api::schema::*;
use crate::error::handler::*;

// the two configuration kinds, discriminated by the yaml `kind` field
#[derive(Debug, Clone)]
pub enum MirrorConfig {
    Mirror(ImageSetConfig),
    Delete(DeleteImageSetConfig),
}

pub const IMAGESET_KIND: &str = "ImageSetConfiguration";
pub const DELETE_IMAGESET_KIND: &str = "DeleteImageSetConfiguration";

// read the 'image set config' file
pub fn load_config(dir: &str) -> Result<String, MirrorError> {
    let path = Path::new(dir);
    let mut file = File::open(path)
        .map_err(|e| MirrorError::new(&format!("opening config {} {}", path.display(), e)))?;
    let mut s = String::new();
    file.read_to_string(&mut s)
        .map_err(|e| MirrorError::new(&format!("reading config {} {}", path.display(), e)))?;
    Ok(s)
}

// parse the 'image set config' contents for the expected kind
// a mirror document with a delete: section is rejected (and vice versa)
pub fn parse_yaml_config(data: &str, kind: &str) -> Result<MirrorConfig, MirrorError> {
    if data.contains("mirror:") && kind == DELETE_IMAGESET_KIND {
        return Err(MirrorError::new(
            "mirror: is not allowed in DeleteImageSetConfiguration",
        ));
    }
    if data.contains("delete:") && kind == IMAGESET_KIND {
        return Err(MirrorError::new(
            "delete: is not allowed in ImageSetConfiguration",
        ));
    }
    match kind {
        IMAGESET_KIND => {
            let isc = serde_yaml::from_str::<ImageSetConfig>(data)
                .map_err(|e| MirrorError::new(&format!("parsing imagesetconfig {}", e)))?;
            if isc.kind != IMAGESET_KIND {
                return Err(MirrorError::new(&format!(
                    "unexpected kind {} (expected {})",
                    isc.kind, IMAGESET_KIND
                )));
            }
            Ok(MirrorConfig::Mirror(isc))
        }
        DELETE_IMAGESET_KIND => {
            let disc = serde_yaml::from_str::<DeleteImageSetConfig>(data)
                .map_err(|e| MirrorError::new(&format!("parsing delete imagesetconfig {}", e)))?;
            if disc.kind != DELETE_IMAGESET_KIND {
                return Err(MirrorError::new(&format!(
                    "unexpected kind {} (expected {})",
                    disc.kind, DELETE_IMAGESET_KIND
                )));
            }
            Ok(MirrorConfig::Delete(disc))
        }
        _ => Err(MirrorError::new(&format!(
            "could not parse imagesetconfiguration kind {}",
            kind
        ))),
    }
}

// convenience for call sites that only handle the mirror workflow
pub fn read_mirror_config(path: &str) -> Result<ImageSetConfig, MirrorError> {
    let contents = load_config(path)?;
    match parse_yaml_config(&contents, IMAGESET_KIND)? {
        MirrorConfig::Mirror(isc) => Ok(isc),
        MirrorConfig::Delete(_) => Err(MirrorError::new(
            "expected an ImageSetConfiguration document",
        )),
    }
}

pub fn read_delete_config(path: &str) -> Result<DeleteImageSetConfig, MirrorError> {
    let contents = load_config(path)?;
    match parse_yaml_config(&contents, DELETE_IMAGESET_KIND)? {
        MirrorConfig::Delete(disc) => Ok(disc),
        MirrorConfig::Mirror(_) => Err(MirrorError::new(
            "expected a DeleteImageSetConfiguration document",
        )),
    }
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;

    const ISC: &str = "
kind: ImageSetConfiguration
apiVersion: mirror.openshift.io/v2alpha1
mirror:
  platform:
    graph: true
    releases:
      - name: quay.io/openshift-release-dev/ocp-release:4.15.0-x86_64
  operators:
    - catalog: registry.redhat.io/redhat/certified-operator-index:v4.15
      packages:
        - name: aws-load-balancer-operator
          channels:
            - name: stable-v1
  additionalImages:
    - name: registry.redhat.io/ubi9/ubi:latest
  archiveSize: 4
";

    const DISC: &str = "
kind: DeleteImageSetConfiguration
apiVersion: mirror.openshift.io/v2alpha1
delete:
  operators:
    - catalog: registry.redhat.io/redhat/certified-operator-index:v4.15
";

    #[test]
    fn parse_isc_pass() {
        let res = parse_yaml_config(ISC, IMAGESET_KIND);
        assert!(res.is_ok());
        match res.unwrap() {
            MirrorConfig::Mirror(isc) => {
                assert_eq!(isc.kind, "ImageSetConfiguration");
                assert_eq!(isc.mirror.archive_size, Some(4));
                assert_eq!(isc.mirror.operators.unwrap().len(), 1);
                assert!(isc.mirror.platform.unwrap().graph);
            }
            MirrorConfig::Delete(_) => panic!("expected mirror config"),
        }
    }

    #[test]
    fn parse_disc_pass() {
        let res = parse_yaml_config(DISC, DELETE_IMAGESET_KIND);
        assert!(res.is_ok());
    }

    #[test]
    fn parse_isc_with_delete_section_fail() {
        let res = parse_yaml_config(DISC, IMAGESET_KIND);
        assert!(res.is_err());
    }

    #[test]
    fn parse_disc_with_mirror_section_fail() {
        let res = parse_yaml_config(ISC, DELETE_IMAGESET_KIND);
        assert!(res.is_err());
    }

    #[test]
    fn load_config_missing_file_fail() {
        let res = load_config("./nada.yaml");
        assert!(res.is_err());
    }
}

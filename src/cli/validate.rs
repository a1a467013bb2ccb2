// module validate
//
// destination / flag validation and workflow mode detection

use chrono::NaiveDate;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

// internal working directory names - destinations must not collide
pub const RESERVED_KEYWORDS: [&str; 11] = [
    "cluster-resources",
    "dry-run",
    "graph-preparation",
    "helm",
    "hold-operator",
    "hold-release",
    "delete",
    "logs",
    "operator-catalogs",
    "release-images",
    "signatures",
];

pub const WORKING_DIR: &str = "working-dir";

fn check_keyword(check: &str) -> Option<&'static str> {
    RESERVED_KEYWORDS
        .iter()
        .find(|keyword| check.contains(*keyword))
        .copied()
}

// validates flags and derives mode, working dir and destination
pub fn check_args(log: &Logging, opts: &mut MirrorOptions) -> Result<(), MirrorError> {
    if opts.config_path.is_empty() {
        return Err(MirrorError::new("use the --config flag it is mandatory"));
    }

    let destination = opts.original_destination.clone();
    let is_docker = destination.starts_with(DOCKER_PROTOCOL);
    let is_file = destination.starts_with(FILE_PROTOCOL);
    if !is_docker && !is_file {
        return Err(MirrorError::new(
            "destination must have either file:// (mirror to disk) or docker:// (disk to mirror) protocol prefixes",
        ));
    }

    if is_docker && !opts.from.is_empty() && !opts.workspace.is_empty() {
        return Err(MirrorError::new(
            "when destination is docker://, --from (assumes disk to mirror workflow) and --workspace (assumes mirror to mirror workflow) cannot be used together",
        ));
    }
    if is_docker && opts.from.is_empty() && opts.workspace.is_empty() {
        return Err(MirrorError::new(
            "when destination is docker://, either --from (assumes disk to mirror workflow) or --workspace (assumes mirror to mirror workflow) need to be provided",
        ));
    }

    if !opts.from.is_empty() && !opts.from.starts_with(FILE_PROTOCOL) {
        return Err(MirrorError::new("when --from is used, it must have file:// prefix"));
    }
    if !opts.workspace.is_empty() && !opts.workspace.starts_with(FILE_PROTOCOL) {
        return Err(MirrorError::new(
            "when --workspace is used, it must have file:// prefix",
        ));
    }

    if let Some(keyword) = check_keyword(&opts.from) {
        return Err(MirrorError::new(&format!(
            "the path set in --from flag contains an internal keyword '{}'",
            keyword
        )));
    }

    if is_file {
        if let Some(keyword) = check_keyword(&destination) {
            return Err(MirrorError::new(&format!(
                "the destination contains an internal keyword '{}'",
                keyword
            )));
        }
        let path = destination.trim_start_matches(FILE_PROTOCOL).to_string();
        opts.mode = MIRROR_TO_DISK.to_string();
        opts.destination = path.clone();
        opts.working_dir = format!("{}/{}", path, WORKING_DIR);
    } else if !opts.from.is_empty() {
        let from = opts.from.trim_start_matches(FILE_PROTOCOL).to_string();
        opts.mode = DISK_TO_MIRROR.to_string();
        opts.from = from.clone();
        opts.destination = destination.clone();
        opts.working_dir = format!("{}/{}", from, WORKING_DIR);
    } else {
        let workspace = opts.workspace.trim_start_matches(FILE_PROTOCOL).to_string();
        opts.mode = MIRROR_TO_MIRROR.to_string();
        opts.workspace = workspace.clone();
        opts.destination = destination.clone();
        opts.working_dir = format!("{}/{}", workspace, WORKING_DIR);
    }

    if !matches!(opts.multi_arch.as_str(), "system" | "all" | "index-only") {
        return Err(MirrorError::new(&format!(
            "unknown multi-arch option {}. Choose one of the supported options: 'system', 'all', or 'index-only'",
            opts.multi_arch
        )));
    }

    if !opts.since.is_empty() {
        if NaiveDate::parse_from_str(&opts.since, "%Y-%m-%d").is_err() {
            return Err(MirrorError::new("--since flag needs to be in format yyyy-MM-dd"));
        }
        if !opts.is_mirror_to_disk() {
            log.warn("since flag is only taken into account during mirrorToDisk workflow");
        }
    }
    Ok(())
}

// delete has its own smaller surface - destination is always a registry
pub fn check_delete_args(opts: &mut MirrorOptions) -> Result<(), MirrorError> {
    if opts.config_path.is_empty() {
        return Err(MirrorError::new("use the --config flag it is mandatory"));
    }
    if !opts.original_destination.starts_with(DOCKER_PROTOCOL) {
        return Err(MirrorError::new("delete destination must have the docker:// prefix"));
    }
    if opts.workspace.is_empty() {
        return Err(MirrorError::new(
            "use the --workspace flag it is mandatory for the delete workflow",
        ));
    }
    if !opts.workspace.starts_with(FILE_PROTOCOL) {
        return Err(MirrorError::new(
            "when --workspace is used, it must have file:// prefix",
        ));
    }
    let workspace = opts.workspace.trim_start_matches(FILE_PROTOCOL).to_string();
    opts.mode = DISK_TO_MIRROR.to_string();
    opts.function = DELETE_FUNCTION.to_string();
    opts.workspace = workspace.clone();
    opts.working_dir = format!("{}/{}", workspace, WORKING_DIR);
    opts.destination = opts.original_destination.clone();
    opts.delete_destination = opts.original_destination.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    // this brings everything from parent's scope into this scope
    use super::*;

    fn logging() -> Logging {
        Logging {
            log_level: Level::INFO,
        }
    }

    fn base_opts(destination: &str) -> MirrorOptions {
        MirrorOptions {
            config_path: String::from("isc.yaml"),
            original_destination: destination.to_string(),
            multi_arch: String::from("system"),
            ..Default::default()
        }
    }

    #[test]
    fn mirror_to_disk_mode_pass() {
        let mut opts = base_opts("file:///tmp/mirror");
        check_args(&logging(), &mut opts).unwrap();
        assert_eq!(opts.mode, MIRROR_TO_DISK);
        assert_eq!(opts.destination, "/tmp/mirror");
        assert_eq!(opts.working_dir, "/tmp/mirror/working-dir");
    }

    #[test]
    fn disk_to_mirror_mode_pass() {
        let mut opts = base_opts("docker://dest.example.com");
        opts.from = String::from("file:///tmp/mirror");
        check_args(&logging(), &mut opts).unwrap();
        assert_eq!(opts.mode, DISK_TO_MIRROR);
        assert_eq!(opts.destination, "docker://dest.example.com");
        assert_eq!(opts.working_dir, "/tmp/mirror/working-dir");
    }

    #[test]
    fn mirror_to_mirror_mode_pass() {
        let mut opts = base_opts("docker://dest.example.com");
        opts.workspace = String::from("file:///tmp/workspace");
        check_args(&logging(), &mut opts).unwrap();
        assert_eq!(opts.mode, MIRROR_TO_MIRROR);
        assert_eq!(opts.working_dir, "/tmp/workspace/working-dir");
    }

    #[test]
    fn from_and_workspace_together_fail() {
        let mut opts = base_opts("docker://dest.example.com");
        opts.from = String::from("file:///tmp/a");
        opts.workspace = String::from("file:///tmp/b");
        assert!(check_args(&logging(), &mut opts).is_err());
    }

    #[test]
    fn docker_without_from_or_workspace_fail() {
        let mut opts = base_opts("docker://dest.example.com");
        assert!(check_args(&logging(), &mut opts).is_err());
    }

    #[test]
    fn missing_protocol_fail() {
        let mut opts = base_opts("/tmp/mirror");
        assert!(check_args(&logging(), &mut opts).is_err());
    }

    #[test]
    fn reserved_keyword_in_destination_fail() {
        for keyword in RESERVED_KEYWORDS.iter() {
            let mut opts = base_opts(&format!("file:///tmp/{}", keyword));
            assert!(check_args(&logging(), &mut opts).is_err());
        }
    }

    #[test]
    fn reserved_keyword_in_from_fail() {
        let mut opts = base_opts("docker://dest.example.com");
        opts.from = String::from("file:///tmp/hold-release");
        assert!(check_args(&logging(), &mut opts).is_err());
    }

    #[test]
    fn bad_since_fail() {
        let mut opts = base_opts("file:///tmp/mirror");
        opts.since = String::from("01-01-2024");
        assert!(check_args(&logging(), &mut opts).is_err());
        opts.since = String::from("2024-01-01");
        assert!(check_args(&logging(), &mut opts).is_ok());
    }

    #[test]
    fn bad_multi_arch_fail() {
        let mut opts = base_opts("file:///tmp/mirror");
        opts.multi_arch = String::from("everything");
        assert!(check_args(&logging(), &mut opts).is_err());
    }

    #[test]
    fn delete_args_pass() {
        let mut opts = MirrorOptions {
            config_path: String::from("delete.yaml"),
            original_destination: String::from("docker://dest.example.com"),
            workspace: String::from("file:///tmp/workspace"),
            ..Default::default()
        };
        check_delete_args(&mut opts).unwrap();
        assert!(opts.is_delete());
        assert_eq!(opts.mode, DISK_TO_MIRROR);
        assert_eq!(opts.delete_destination, "docker://dest.example.com");
    }

    #[test]
    fn delete_args_file_destination_fail() {
        let mut opts = MirrorOptions {
            config_path: String::from("delete.yaml"),
            original_destination: String::from("file:///tmp/x"),
            workspace: String::from("file:///tmp/workspace"),
            ..Default::default()
        };
        assert!(check_delete_args(&mut opts).is_err());
    }
}

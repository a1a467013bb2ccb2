use clap::Parser;

// define local modules
mod additional;
mod api;
mod archive;
mod auth;
mod batch;
mod catalog;
mod cli;
mod collector;
mod config;
mod delete;
mod error;
mod helm;
mod history;
mod image;
mod imagebuilder;
mod log;
mod manifests;
mod mirror;
mod operator;
mod release;

// use local modules
use api::schema::*;
use cli::delete_flow::DeleteFlowController;
use cli::flow::MirrorFlowController;
use log::logging::*;

fn log_level(level: &str) -> Level {
    match level {
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn mirror_options(args: &MirrorArgs) -> MirrorOptions {
    MirrorOptions {
        mode: String::from(""),
        function: COPY_FUNCTION.to_string(),
        local_storage_fqdn: format!("localhost:{}", args.port),
        destination: String::from(""),
        original_destination: args.destination.clone(),
        working_dir: String::from(""),
        from: args.from.clone(),
        workspace: args.workspace.clone(),
        config_path: args.config.clone(),
        cache_dir: args.cache_dir.clone(),
        logs_dir: String::from(""),
        log_level: args.loglevel.clone(),
        port: args.port,
        parallel_images: args.parallel_images,
        parallel_layers: args.parallel_layers,
        retry: args.retry,
        retry_delay_secs: 5,
        image_timeout_secs: args.image_timeout,
        src_tls_verify: args.src_tls_verify,
        dest_tls_verify: args.dest_tls_verify,
        multi_arch: args.multi_arch.clone(),
        since: args.since.clone(),
        max_nested_paths: args.max_nested_paths,
        strict_archive: args.strict_archive,
        dry_run: args.dry_run,
        secure_policy: args.secure_policy,
        ..Default::default()
    }
}

fn delete_options(args: &DeleteArgs) -> MirrorOptions {
    MirrorOptions {
        mode: String::from(""),
        function: DELETE_FUNCTION.to_string(),
        local_storage_fqdn: format!("localhost:{}", args.port),
        original_destination: args.destination.clone(),
        workspace: args.workspace.clone(),
        config_path: args.config.clone(),
        cache_dir: args.cache_dir.clone(),
        log_level: args.loglevel.clone(),
        port: args.port,
        parallel_images: args.parallel_images,
        parallel_layers: 10,
        retry: args.retry,
        retry_delay_secs: 5,
        image_timeout_secs: 600,
        dest_tls_verify: args.dest_tls_verify,
        multi_arch: String::from("system"),
        delete_generate: args.generate,
        delete_yaml: args.delete_yaml_file.clone(),
        delete_id: args.delete_id.clone(),
        force_cache_delete: args.force_cache_delete,
        generate_v1_dest_tags: args.delete_v1_images,
        ..Default::default()
    }
}

// main entry point (use async)
#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let result = match &args.command {
        Commands::Mirror(mirror_args) => {
            let log = &Logging {
                log_level: log_level(&mirror_args.loglevel),
            };
            let start = std::time::Instant::now();
            let mut controller = MirrorFlowController {
                opts: mirror_options(mirror_args),
            };
            let res = controller.process(log).await;
            if res.is_ok() {
                log.info(&format!("mirror time : {:?}", start.elapsed()));
            }
            res
        }
        Commands::Delete(delete_args) => {
            let log = &Logging {
                log_level: log_level(&delete_args.loglevel),
            };
            let mut controller = DeleteFlowController {
                opts: delete_options(delete_args),
            };
            controller.process(log).await
        }
    };

    if let Err(err) = result {
        let log = &Logging {
            log_level: Level::INFO,
        };
        log.error(&format!("{}", err));
        std::process::exit(1);
    }
    std::process::exit(exitcode::OK);
}

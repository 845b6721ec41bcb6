//! `kiln`: the command-line front end for the build orchestrator.
//!
//! This binary is intentionally thin — it parses the `build`/`dev`/`clean`
//! flag surface, assembles a [`kiln_engine::BuildContext`], and hands off
//! to the engine crates that do the actual work. The recipe parser and
//! package-graph generator are external collaborators out of scope for
//! this crate; [`demo`] stands in for them with a small bundled graph.

mod demo;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use kiln_archive::{Archive, HttpArchive, LocalArchive};
use kiln_config::{ArchiveConfig, DownloadPolicy};
use kiln_engine::{BuildContext, NameFormatter, apply_formatter, cook, do_clean, touch_packages};
use kiln_graph::{Graph, PackageId};
use kiln_hash::Digest;
use kiln_sandbox::SandboxSpec;
use kiln_state::StateStore;
use log::{error, info, warn};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "kiln", version, about = "Reproducible, content-addressed package build orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build packages into stable, digest-keyed release workspaces.
    Build(BuildArgs),
    /// Build packages into human-friendly, per-run numbered develop workspaces.
    Dev(BuildArgs),
    /// Remove workspaces no longer referenced by the current package graph.
    Clean(CleanArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Name(s) of the package(s) to build.
    #[arg(required = true)]
    packages: Vec<String>,

    /// Re-execute every visited step regardless of recorded state.
    #[arg(short = 'f', long)]
    force: bool,

    /// Only cook the requested package(s) themselves, not their dependencies.
    #[arg(short = 'n', long = "no-deps")]
    no_deps: bool,

    /// Skip checkout steps that already have a recorded result.
    #[arg(short = 'b', long = "build-only")]
    build_only: bool,

    /// Decrease verbosity; may be repeated.
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    quiet: u8,

    /// Increase verbosity; may be repeated.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override or add an environment variable, as NAME or NAME=VALUE.
    #[arg(short = 'D', value_name = "NAME[=VAL]")]
    define: Vec<String>,

    /// Add NAME to the environment whitelist passed through to child processes.
    #[arg(short = 'e', value_name = "NAME")]
    env_whitelist: Vec<String>,

    /// Preserve the entire calling environment instead of scrubbing it.
    #[arg(short = 'E', long = "preserve-env")]
    preserve_env: bool,

    /// Copy the build result into DIR (forbidden with more than one package).
    #[arg(long)]
    destination: Option<PathBuf>,

    /// Upload freshly-built deterministic package outputs to the archive.
    #[arg(long)]
    upload: bool,

    /// Archive download policy for package steps.
    #[arg(long, value_enum)]
    download: Option<DownloadArg>,

    /// Empty a step's workspace before re-executing it.
    #[arg(long = "clean-build")]
    clean_build: bool,
}

#[derive(clap::Args)]
struct CleanArgs {
    /// Restrict the "still referenced" closure to these packages (default: all known packages).
    packages: Vec<String>,

    /// Report what would be removed without touching the filesystem.
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DownloadArg {
    Yes,
    No,
    Deps,
}

impl From<DownloadArg> for DownloadPolicy {
    fn from(value: DownloadArg) -> Self {
        match value {
            DownloadArg::Yes => DownloadPolicy::Yes,
            DownloadArg::No => DownloadPolicy::No,
            DownloadArg::Deps => DownloadPolicy::Deps,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Build(#[from] kiln_engine::BuildError),
    #[error(transparent)]
    Config(#[from] kiln_config::ConfigError),
    #[error("sandbox provisioning failed: {0}")]
    Sandbox(#[from] kiln_sandbox::SandboxError),
    #[error(transparent)]
    State(#[from] kiln_state::StateError),
    #[error("unknown package '{0}'")]
    UnknownPackage(String),
    #[error("invalid sandbox checksum: {0}")]
    Digest(#[from] kiln_hash::MalformedDigest),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid -D argument '{0}': expected NAME or NAME=VALUE")]
    InvalidDefine(String),
    #[error("cannot build to a single --destination with more than one requested package")]
    MultipleDestinations,
}

fn parse_defines(raw: &[String]) -> Result<BTreeMap<String, Option<String>>, CliError> {
    let mut out = BTreeMap::new();
    for item in raw {
        if item.is_empty() {
            return Err(CliError::InvalidDefine(item.clone()));
        }
        match item.split_once('=') {
            Some((name, _)) if name.is_empty() => return Err(CliError::InvalidDefine(item.clone())),
            Some((name, value)) => {
                out.insert(name.to_string(), Some(value.to_string()));
            }
            None => {
                out.insert(item.clone(), None);
            }
        }
    }
    Ok(out)
}

fn resolve_roots(graph: &Graph, names: &[String]) -> Result<Vec<PackageId>, CliError> {
    names
        .iter()
        .map(|name| demo::find_package(graph, name).ok_or_else(|| CliError::UnknownPackage(name.clone())))
        .collect()
}

fn build_archive(cfg: &ArchiveConfig) -> Archive {
    match cfg {
        ArchiveConfig::None => Archive::None,
        ArchiveConfig::File { path } => Archive::Local(LocalArchive::new(path.clone())),
        ArchiveConfig::Http { url } => Archive::Http(HttpArchive::new(url.clone())),
    }
}

fn build_sandbox_spec(cfg: &kiln_config::SandboxConfig) -> Result<SandboxSpec, CliError> {
    let digest_sha1 = match &cfg.digest_sha1 {
        Some(s) if !s.is_empty() => Some(s.parse::<Digest>()?),
        _ => None,
    };
    Ok(SandboxSpec {
        url: cfg.url.clone(),
        digest_sha1,
        mount: cfg.mount.clone(),
    })
}

/// Recursively copy `src` into `dst`, replacing `dst` if it already exists
/// rather than merging into it.
fn copy_tree_replacing(src: &Path, dst: &Path) -> std::io::Result<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst)?;
    }
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree_replacing(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link_target = std::fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link_target, &target)?;
            #[cfg(not(unix))]
            std::fs::copy(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

async fn run_build_like(args: BuildArgs, develop: bool) -> Result<(), CliError> {
    if args.destination.is_some() && args.packages.len() > 1 {
        return Err(CliError::MultipleDestinations);
    }

    let config = kiln_config::load()?;

    let defines = parse_defines(&args.define)?;
    let mut graph = demo::build_graph(&defines);
    let roots = resolve_roots(&graph, &args.packages)?;

    std::fs::create_dir_all(&config.work_dir)?;

    let mut state = StateStore::open(&config.state_file)?;

    let sandbox_spec = build_sandbox_spec(&config.sandbox)?;
    let sandbox_enabled = !sandbox_spec.url.is_empty() && sandbox_spec.digest_sha1.is_some();
    if sandbox_enabled {
        let status = kiln_sandbox::provision(&sandbox_spec, &config.work_dir, &mut state)?;
        info!("sandbox: {status:?}");
    }

    let formatter = if develop {
        NameFormatter::develop(config.work_dir.clone())
    } else {
        NameFormatter::release(config.work_dir.clone(), sandbox_enabled)
    };
    apply_formatter(&mut graph, &formatter, &mut state)?;
    if develop {
        touch_packages(&mut graph, &roots, &formatter, &mut state)?;
    }

    let mut env_white_list = demo::env_white_list();
    env_white_list.extend(config.env_white_list.iter().cloned());
    env_white_list.extend(args.env_whitelist.iter().cloned());

    let global_paths = if develop {
        demo::dev_global_paths()
    } else {
        demo::build_global_paths()
    };

    let verbose = args.verbose as i32 - args.quiet as i32;
    let bob_root = std::env::current_dir()?;

    let mut ctx = BuildContext::new(
        state,
        verbose,
        args.force,
        args.no_deps,
        args.build_only,
        args.preserve_env,
        env_white_list,
        global_paths,
        sandbox_enabled,
        bob_root,
        args.clean_build,
    );

    ctx.set_sandbox_mounts(sandbox_spec.mount.clone());
    ctx.set_archive(build_archive(&config.archive));
    let download_policy = args
        .download
        .map(DownloadPolicy::from)
        .unwrap_or(if develop { DownloadPolicy::No } else { config.download });
    ctx.set_download_depth(download_policy.download_depth());
    ctx.set_upload(args.upload || config.upload);

    let mut last_path = config.work_dir.clone();
    for &root in &roots {
        let steps = graph.package_steps(root).to_vec();
        last_path = cook(&graph, &mut ctx, &steps, root, 0).await?;
        info!("{}: {}", graph.package(root).name, last_path.display());
    }

    if let Some(destination) = &args.destination {
        copy_tree_replacing(&last_path, destination)?;
        info!("copied result to {}", destination.display());
    }

    Ok(())
}

async fn run_clean(args: CleanArgs) -> Result<(), CliError> {
    let config = kiln_config::load()?;
    let mut graph = demo::build_graph(&BTreeMap::new());

    let names: Vec<String> = if args.packages.is_empty() {
        demo::all_package_names().into_iter().map(str::to_string).collect()
    } else {
        args.packages.clone()
    };
    let roots = resolve_roots(&graph, &names)?;

    let mut state = StateStore::open(&config.state_file)?;
    let formatter = NameFormatter::release(config.work_dir.clone(), false);
    apply_formatter(&mut graph, &formatter, &mut state)?;

    let bob_root = std::env::current_dir()?;
    let mut ctx = BuildContext::new(
        state,
        0,
        false,
        false,
        false,
        false,
        demo::env_white_list(),
        Vec::new(),
        false,
        bob_root,
        false,
    );

    let count = do_clean(&mut ctx, &graph, &roots, args.dry_run)?;
    if args.dry_run {
        info!("{count} workspace(s) would be removed");
    } else {
        info!("removed {count} workspace(s)");
    }
    Ok(())
}

fn report_error(err: &CliError) {
    error!("{err}");
    if let CliError::Build(build_error) = err {
        if !build_error.frames.is_empty() {
            warn!("--- while building ---");
            for frame in build_error.frames.iter().rev() {
                warn!("  in {frame}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Build(args) => run_build_like(args, false).await,
        Command::Dev(args) => run_build_like(args, true).await,
        Command::Clean(args) => run_clean(args).await,
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            std::process::ExitCode::FAILURE
        }
    }
}

//! Command-line front end for tlsync.

pub mod cli_args;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tlsync_core::{
    FileConfig, Freshness, LoggingDestination, SyncConverter, SyncProgressEvent,
    SyncProgressEventKind, compare_timestamps, config_path, init_logging, load_config,
    local_config_path, save_config,
};

use cli_args::{Cli, Command, ConfigCommand, ConfigLocationArgs, InfoArgs, SyncArgs, expand_path};

/// Install logging for the requested mode, then dispatch.
pub fn run(cli: Cli) -> Result<()> {
    let destination = match (&cli.command, cli.sync.silent) {
        (Some(_), _) => LoggingDestination::StderrOnly,
        (None, true) => LoggingDestination::FileOnly,
        (None, false) => LoggingDestination::FileAndStderr,
    };
    if let Err(err) = init_logging(destination) {
        eprintln!("Warning: logging disabled: {err}");
    }
    dispatch(cli)
}

/// Execute the parsed command line without touching global logging state.
pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Some(command) => {
            if cli.sync.source.is_some() {
                bail!("A source file cannot be combined with subcommands.");
            }
            match command {
                Command::Config(ConfigCommand::Init(args)) => config_init(&args),
                Command::Config(ConfigCommand::Show(args)) => config_show(&args),
                Command::Info(args) => info(&args),
            }
        }
        None => run_sync(&cli.sync),
    }
}

fn run_sync(args: &SyncArgs) -> Result<()> {
    let Some(source) = args.source_path() else {
        bail!("No source file given. Run `tlsync --help` for usage.");
    };

    let load = load_config(source.parent());
    if !args.silent {
        for warning in &load.warnings {
            eprintln!("Warning: {warning}");
        }
    }

    let mut converter = SyncConverter::new(load.config.settings);
    if !args.silent {
        converter = converter.with_progress(Arc::new(print_progress));
    }
    converter.run(&source)?;
    Ok(())
}

fn print_progress(event: SyncProgressEvent) {
    if event.kind == SyncProgressEventKind::End {
        return;
    }
    if let Some(message) = event.message {
        println!("{message}");
    }
}

fn config_init(args: &ConfigLocationArgs) -> Result<()> {
    let path = match args.dir_path() {
        Some(dir) => local_config_path(&dir),
        None => config_path(),
    };
    if path.exists() {
        bail!("Settings file already exists: \"{}\"", path.display());
    }
    save_config(&path, &FileConfig::default())
        .with_context(|| format!("Failed to write \"{}\"", path.display()))?;
    println!("Wrote default settings to \"{}\"", path.display());
    Ok(())
}

fn config_show(args: &ConfigLocationArgs) -> Result<()> {
    let dir = args.dir_path();
    let load = load_config(dir.as_deref());
    for warning in &load.warnings {
        eprintln!("Warning: {warning}");
    }
    if load.files.is_empty() {
        println!("# No settings files found; using defaults.");
    }
    for file in &load.files {
        println!("# From \"{}\"", file.display());
    }

    let settings = &load.config.settings;
    println!("scene_label = {:?}", settings.scene_label);
    println!("default_date_time = {:?}", settings.default_date_time);
    println!("scene_color = {:?}", settings.scene_color);
    println!("ignore_unspecific = {}", settings.ignore_unspecific);
    println!("datetime_to_dhm = {}", settings.datetime_to_dhm);
    println!("dhm_to_datetime = {}", settings.dhm_to_datetime);
    Ok(())
}

fn info(args: &InfoArgs) -> Result<()> {
    let project = expand_path(&args.project);
    let report = compare_timestamps(&project)?;
    println!("{}", describe_freshness(&project, report.freshness));
    if let Some(modified) = report.timeline_modified {
        println!(
            "Timeline last saved on {}",
            modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn describe_freshness(project: &Path, freshness: Freshness) -> String {
    let name = project
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match freshness {
        Freshness::TimelineNewer => format!("The timeline is newer than \"{name}\"."),
        Freshness::TimelineOlder => format!("The timeline is older than \"{name}\"."),
        Freshness::Unchanged => format!("The timeline and \"{name}\" were saved at the same time."),
        Freshness::TimelineMissing => format!("There is no timeline for \"{name}\" yet."),
    }
}

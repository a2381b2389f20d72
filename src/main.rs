// src/main.rs

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, InstallArgs, TargetArgs};
use serde_json::json;
use std::path::Path;
use strata::config::Config;
use strata::environment::{Environment, resolve_prefix};
use strata::executor::Confirm;
use strata::history::History;
use strata::index::LocalChannelIndex;
use strata::interpreter::PrefixInterpreter;
use strata::orchestrator::{Command, InstallRequest, Orchestrator, Outcome};
use strata::resolver::LatestResolver;
use tracing::info;

/// Shows the plan on stdout and asks on the terminal
struct TerminalConfirm {
    quiet: bool,
}

impl Confirm for TerminalConfirm {
    fn show_plan(&self, summary: &str) {
        if !self.quiet {
            println!("{}", summary);
        }
    }

    fn confirm(&self, prompt: &str) -> strata::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(|e| strata::Error::Internal(format!("confirmation prompt failed: {}", e)))
    }
}

fn request_from_args(command: Command, args: InstallArgs) -> InstallRequest {
    InstallRequest {
        command,
        name: args.target.name,
        prefix: args.target.prefix,
        packages: args.packages,
        file: args.file,
        all: args.all,
        force: args.force,
        no_deps: args.no_deps,
        dry_run: args.dry_run,
        clone: args.clone,
        revision: args.revision,
        offline: args.offline,
        use_local: args.use_local,
        mkdir: args.mkdir,
        no_default_packages: args.no_default_packages,
        no_pin: args.no_pin,
        alt_hint: args.alt_hint,
        channels: args.channels,
        override_channels: args.override_channels,
        // JSON mode never prompts
        yes: args.yes || args.json,
    }
}

fn activate_hint(request: &InstallRequest, prefix: &Path) {
    let target = match &request.name {
        Some(name) => name.clone(),
        None => prefix.display().to_string(),
    };
    println!("#");
    println!("# To activate this environment, use:");
    println!("# $ source activate {}", target);
    println!("#");
}

fn print_outcome(request: &InstallRequest, outcome: Outcome, json: bool) -> Result<()> {
    match outcome {
        Outcome::NothingToDo { prefix, specs } => {
            if json {
                println!(
                    "{}",
                    json!({"success": true, "message": "All requested packages already installed."})
                );
                return Ok(());
            }
            println!("\n# All requested packages already installed.");
            let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
            for pkg in Environment::new(&prefix).linked()? {
                if names.contains(&pkg.name.as_str()) {
                    println!("{:<25} {:<15} {}", pkg.name, pkg.version, pkg.build);
                }
            }
        }
        Outcome::DryRun(plan) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(
                        &json!({"success": true, "dry_run": true, "actions": plan})
                    )?
                );
            } else {
                println!("\nDry run: nothing was changed");
            }
        }
        Outcome::Aborted => println!("Exiting"),
        Outcome::Executed(plan) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({"success": true, "actions": plan}))?
                );
            } else if request.command == Command::Create {
                activate_hint(request, &plan.prefix);
            }
        }
        Outcome::Cloned(report) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({"success": true, "clone": report}))?
                );
            } else {
                println!(
                    "Cloned {} packages and {} files from {}",
                    report.actions.get(strata::plan::Instruction::Link).len(),
                    report.untracked_files.len(),
                    report.src_prefix.display()
                );
                activate_hint(request, &report.dst_prefix);
            }
        }
    }
    Ok(())
}

fn run_install(config: &Config, command: Command, args: InstallArgs) -> Result<()> {
    let json = args.json;
    let quiet = args.quiet || json;
    let request = request_from_args(command, args);

    let index = LocalChannelIndex::new(config);
    let resolver = LatestResolver::new(config.pkgs_dir());
    let interpreter = PrefixInterpreter::new(config.pkgs_dir());
    let confirm = TerminalConfirm { quiet };
    let orchestrator = Orchestrator::new(config, &index, &resolver, &interpreter, &confirm);

    match orchestrator.run(&request) {
        Ok(outcome) => print_outcome(&request, outcome, json),
        Err(e) if json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "success": false,
                    "error": e.to_string(),
                    "error_type": e.kind(),
                }))?
            );
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn run_list(config: &Config, target: TargetArgs, revisions: bool, json: bool) -> Result<()> {
    let prefix = resolve_prefix(config, target.name.as_deref(), target.prefix.as_deref(), false)?;
    let env = Environment::new(&prefix);

    if revisions {
        let events = History::new(&env).object_log()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&events)?);
            return Ok(());
        }
        for event in &events {
            println!("{}  (rev {})", event.date, event.rev);
            for dist in &event.install {
                println!("    +{}", dist);
            }
            for dist in &event.remove {
                println!("    -{}", dist);
            }
            for (old, new) in event.upgrade.iter().chain(&event.downgrade) {
                println!("     {}  ({})", old, new);
            }
            println!();
        }
        return Ok(());
    }

    let linked = env.linked()?;
    if json {
        let dists: Vec<String> = linked.iter().map(|p| p.dist()).collect();
        println!("{}", serde_json::to_string_pretty(&dists)?);
        return Ok(());
    }
    println!("# packages in environment at {}:", prefix.display());
    println!("#");
    for pkg in &linked {
        match &pkg.channel {
            Some(channel) => println!(
                "{:<25} {:<15} {:<15} {}",
                pkg.name, pkg.version, pkg.build, channel
            ),
            None => println!("{:<25} {:<15} {}", pkg.name, pkg.version, pkg.build),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays clean
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let Some(command) = cli.command else {
        println!("Strata Environment Manager v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'strata --help' for usage information");
        return Ok(());
    };

    if let Commands::Completions { shell } = &command {
        clap_complete::generate(*shell, &mut Cli::command(), "strata", &mut std::io::stdout());
        return Ok(());
    }

    let config = Config::load()?;
    info!("Using root {}", config.root_dir.display());

    match command {
        Commands::Install(args) => run_install(&config, Command::Install, args),
        Commands::Update(args) => run_install(&config, Command::Update, args),
        Commands::Create(args) => run_install(&config, Command::Create, args),
        Commands::List {
            target,
            revisions,
            json,
        } => run_list(&config, target, revisions, json),
        Commands::Completions { .. } => Ok(()),
    }
}

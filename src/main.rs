//! kitup - editor toolchain setup assistant
//!
//! Installs Neovim, ripgrep and fd from upstream releases, then writes an
//! editor configuration and syncs its plugins.

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use kitup::checksum::VerifyPolicy;
use kitup::config::{AppConfig, Profile};
use kitup::env_path::ensure_dir_in_path;
use kitup::installers::{install_tool, InstallEnv, TaskContext};
use kitup::logging::{init_logger, log_file_path, log_info};
use kitup::platform::Tool;
use kitup::status::status_for_tool;
use kitup::tasks::{list_backups, restore_backup, ApplySession, Planner, RunEvent, TemplateConfigWriter};

#[derive(Parser)]
#[command(name = "kitup", author, version, about = "Set up Neovim, ripgrep and fd from upstream releases")]
struct Cli {
    /// Profile to use instead of ~/.config/kitup/profile.toml
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Checksum policy: off, auto or require
    #[arg(long, global = true)]
    verify: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled step of the profile
    Apply,
    /// Show the steps `apply` would run
    Plan,
    /// Show installed and latest versions
    Status {
        /// neovim, ripgrep or fd; all tools when omitted
        tool: Option<String>,
    },
    /// Install a single tool
    Install {
        tool: String,
        /// Release tag to install instead of the latest
        #[arg(long)]
        tag: Option<String>,
    },
    /// List editor configurations kitup moved aside
    Backups,
    /// Put a backed-up configuration back in the profile's target directory
    Restore {
        /// Backup id as shown by `kitup backups`
        id: String,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        if let Some(path) = log_file_path() {
            eprintln!("See {} for details", path.display());
        }
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load();
    init_logger(config.log_console);
    log_info(&format!("kitup {} starting", env!("CARGO_PKG_VERSION")));

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let profile_path = cli.profile.clone().unwrap_or_else(Profile::default_path);
    let mut profile = Profile::load(&profile_path)?;
    if let Some(verify) = &cli.verify {
        let policy = VerifyPolicy::parse(verify).ok_or_else(|| format!("unknown verify policy '{}'", verify))?;
        profile.verify = policy.to_string();
    }

    match cli.command {
        Commands::Apply => apply(&config, &profile, cancel),
        Commands::Plan => {
            let planner = planner(&config, &profile);
            let tasks = planner.plan(&profile);
            if tasks.is_empty() {
                println!("Nothing to do: no features enabled in {}", profile_path.display());
            }
            for (i, task) in tasks.iter().enumerate() {
                println!("{:>2}. {}", i + 1, task.name);
            }
            Ok(())
        }
        Commands::Status { tool } => status(&config, tool.as_deref(), &cancel),
        Commands::Install { tool, tag } => {
            let tool = parse_tool(&tool)?;
            let mut config = config;
            if let Some(tag) = tag {
                config.pins.insert(tool.id().to_string(), tag);
            }
            let env = InstallEnv::from_config(&config);
            ensure_dir_in_path(&env.bin_dir);
            let ctx = TaskContext::new(
                |status| println!("{}", status),
                |line| println!("{}", line),
                |_, _| {},
                cancel,
            );
            let outcome = install_tool(tool, profile.verify_policy(), &env, &ctx)?;
            if outcome.skipped {
                println!("{} {} is already installed at {}", tool, outcome.tag, outcome.path.display());
            } else {
                println!("Installed {} {} to {}", tool, outcome.tag, outcome.path.display());
            }
            Ok(())
        }
        Commands::Backups => {
            let writer = config_writer(&profile);
            let backups = list_backups(writer.backups_dir())?;
            if backups.is_empty() {
                println!("No backups in {}", writer.backups_dir().display());
            }
            for backup in backups {
                match &backup.meta {
                    Some(meta) => println!("{:<32} {}  {} ({})", backup.id, meta.created_at, meta.source, meta.reason),
                    None => println!("{:<32} {}", backup.id, backup.path.display()),
                }
            }
            Ok(())
        }
        Commands::Restore { id } => {
            let writer = config_writer(&profile);
            let dest = writer.target_dir(&profile.config_target());
            restore_backup(writer.backups_dir(), &id, &dest, &|line: &str| println!("{}", line))?;
            Ok(())
        }
    }
}

fn parse_tool(id: &str) -> Result<Tool, String> {
    Tool::from_id(id).ok_or_else(|| format!("unknown tool '{}' (expected neovim, ripgrep or fd)", id))
}

fn config_writer(profile: &Profile) -> TemplateConfigWriter {
    let template = profile
        .template_dir
        .clone()
        .unwrap_or_else(|| kitup::kitup_path!("template"));
    TemplateConfigWriter::new(template)
}

fn planner(config: &AppConfig, profile: &Profile) -> Planner {
    let env = Arc::new(InstallEnv::from_config(config));
    Planner::new(env, Arc::new(config_writer(profile))).with_sync_timeout(config.sync_timeout())
}

fn apply(config: &AppConfig, profile: &Profile, cancel: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    let tasks = planner(config, profile).plan(profile);
    if tasks.is_empty() {
        println!("Nothing to do: no features enabled");
        return Ok(());
    }

    let session = ApplySession::new(tasks, cancel);
    let mut events = session.start().ok_or("a run is already active")?;

    loop {
        match follow(events) {
            Ok(()) => {
                println!("All steps completed.");
                return Ok(());
            }
            Err(failure) => {
                eprintln!("{}", failure);
                if failure.error.is_cancelled() || !confirm("Retry failed step? [y/N] ")? {
                    return Err(failure.into());
                }
                events = session.retry_failed().ok_or("nothing to retry")?;
            }
        }
    }
}

/// Print a run's events until it finishes.
fn follow(events: Receiver<RunEvent>) -> Result<(), kitup::tasks::TaskFailure> {
    for event in events {
        match event {
            RunEvent::Status(_) => {}
            RunEvent::Log(line) => println!("{}", line),
            RunEvent::Progress { completed, total } => println!("[{}/{} steps done]", completed, total),
            RunEvent::Finished(result) => return result,
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn status(config: &AppConfig, tool: Option<&str>, cancel: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let tools = match tool {
        Some(id) => vec![parse_tool(id)?],
        None => Tool::ALL.to_vec(),
    };
    let env = InstallEnv::from_config(config);
    ensure_dir_in_path(&env.bin_dir);

    for tool in tools {
        let status = status_for_tool(tool, &env, cancel);
        let current = if status.current_version_known {
            status.current_version.clone()
        } else if status.present {
            "unknown version".to_string()
        } else {
            "not installed".to_string()
        };
        let latest = if status.latest_version_known {
            status.latest_version.clone()
        } else {
            "unknown".to_string()
        };
        let marker = if status.update_available() { "  (update available)" } else { "" };
        println!("{:<8} {:<16} latest {}{}", tool.display_name(), current, latest, marker);
        if let Some(path) = &status.installed_path {
            println!("         {}", path.display());
        }
        if let Some(err) = &status.last_error {
            println!("         lookup failed: {}", err);
        }
    }
    Ok(())
}

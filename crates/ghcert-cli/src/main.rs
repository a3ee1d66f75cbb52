// ABOUTME: Entry point for the ghcert CLI
// ABOUTME: Logs in for a short-lived SSH certificate, shows its status, or signs a policy

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ghcert_cli::loopback::stdin_entry;
use ghcert_cli::{output, status, ClientConfig, CliOutput, HttpStatusProbe, LoginOptions};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ghcert")]
#[command(about = "Get a short-lived SSH certificate for git hosting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Show the installed certificate instead of logging in
    #[arg(long)]
    status: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to ~/.config/ghcert/config.toml)
    #[arg(long, env = "GHCERT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// SSH key to certify (defaults to ~/.config/ghcert/id_ed25519)
    #[arg(long, global = true)]
    key: Option<PathBuf>,

    /// Trust policy file
    #[arg(long, env = "GHCERT_POLICY", global = true)]
    policy: Option<PathBuf>,

    /// Issuance server URL (overrides the policy)
    #[arg(long, env = "GHCERT_SERVER")]
    server: Option<String>,

    /// Accept a policy without a signature
    #[arg(long)]
    allow_unsigned_policy: bool,

    /// Do not run ssh-add
    #[arg(long)]
    no_agent: bool,

    /// Never prompt; fail when the certificate does not arrive in time
    #[arg(long)]
    non_interactive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and install a certificate (the default)
    Login,

    /// Show the installed certificate
    Status,

    /// Trust policy commands
    #[command(subcommand)]
    Policy(PolicyCommands),
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Sign a policy; prints the [signature] table to append to it
    Sign {
        /// ed25519 private key to sign with
        #[arg(long)]
        key: PathBuf,

        /// Policy file to sign
        #[arg(long)]
        policy: PathBuf,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    ghcert_log::init_for("ghcert_cli", tracing::Level::WARN);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // A manual paste abandoned on Ctrl-C is still blocked reading stdin.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> ExitCode {
    let json = cli.json;
    match dispatch(cli).await {
        Ok((out, code)) => {
            if json {
                println!("{}", out.to_json());
            }
            code
        }
        Err(e) => {
            if json {
                println!("{}", CliOutput::error(&e).to_json());
            } else {
                eprintln!("{} {e:#}", "error:".red().bold());
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(key) = &cli.key {
        config.key_path = Some(key.clone());
    }
    if let Some(policy) = &cli.policy {
        config.policy_path = Some(policy.clone());
    }
    if let Some(server) = &cli.server {
        config.server_url = Some(server.clone());
    }
    if cli.allow_unsigned_policy {
        config.allow_unsigned_policy = true;
    }
    if cli.no_agent {
        config.add_to_agent = false;
    }
    Ok(config)
}

async fn dispatch(cli: Cli) -> Result<(CliOutput, ExitCode)> {
    let config = load_config(&cli)?;

    let command = match cli.command {
        None if cli.status => Commands::Status,
        None => Commands::Login,
        Some(command) => command,
    };

    match command {
        Commands::Login => {
            let opts = LoginOptions::from_config(&config)?;
            let probe = HttpStatusProbe::new().context("Failed to set up loopback probe")?;
            let interactive = !cli.non_interactive && std::io::stdin().is_terminal();
            let manual = interactive.then(stdin_entry);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let report = ghcert_cli::login(&opts, &probe, &cancel, manual).await?;
            if !cli.json {
                println!("  Certificate: {}", report.cert_path.display());
                output::print_cert_info(&report.info);
                if report.added_to_agent {
                    println!("  Added to ssh-agent");
                }
            }
            Ok((
                CliOutput::Issued {
                    cert_path: report.cert_path,
                    added_to_agent: report.added_to_agent,
                    certificate: report.info,
                },
                ExitCode::SUCCESS,
            ))
        }
        Commands::Status => {
            let opts = LoginOptions::from_config(&config)?;
            let cert_path = opts.cert_path();
            let info = status::check(&opts)?;

            if !cli.json {
                println!("{}", cert_path.display().to_string().bold());
                output::print_cert_info(&info);
            }
            let code = if info.is_expired {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            Ok((
                CliOutput::Status {
                    cert_path,
                    certificate: info,
                },
                code,
            ))
        }
        Commands::Policy(PolicyCommands::Sign { key, policy }) => {
            let signature = ghcert_cli::policy::sign_policy_file(&key, &policy)?;
            if !cli.json {
                print!(
                    "{}",
                    signature
                        .to_toml_table()
                        .context("Failed to render signature")?
                );
            }
            Ok((CliOutput::PolicySigned { signature }, ExitCode::SUCCESS))
        }
    }
}

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ownermail::client::ApiClient;
use ownermail::config::Config;
use ownermail::credentials::{self, TokenVault};
use ownermail::owners::{self, OwnerExtractor};
use ownermail::{files, projects, web};

/// Collect project-owner emails from a test-management API and mail them
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to config file
    #[clap(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the id of every visible project to a CSV file
    FetchIds {
        /// API base URL
        #[clap(long)]
        endpoint: Option<String>,

        /// Long-lived API token
        #[clap(long)]
        token: Option<String>,

        /// Output CSV path
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Projects requested per page
        #[clap(long)]
        page_size: Option<u32>,

        /// Accept invalid TLS certificates
        #[clap(long)]
        insecure: bool,
    },

    /// Collect owner emails for every project id in the input CSV
    Owners {
        /// API base URL
        #[clap(long)]
        endpoint: Option<String>,

        /// API token
        #[clap(long)]
        token: Option<String>,

        /// Authorization scheme (Api-Token or Bearer)
        #[clap(long)]
        token_type: Option<String>,

        /// Input CSV with project ids
        #[clap(short, long)]
        input: Option<PathBuf>,

        /// Output CSV for emails
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Pause between projects, in milliseconds
        #[clap(long)]
        delay_ms: Option<u64>,

        /// Log up to N raw collaborator records per project
        #[clap(long)]
        debug_samples: Option<usize>,

        /// Accept invalid TLS certificates
        #[clap(long)]
        insecure: bool,
    },

    /// Run the bulk mailer web form
    Serve {
        /// Listen address
        #[clap(short, long)]
        bind: Option<String>,
    },

    /// Manage the API token stored in the system keyring
    Token {
        #[clap(subcommand)]
        action: TokenAction,
    },

    /// Inspect or create the config file
    Config {
        #[clap(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store a token for an endpoint
    Set {
        #[clap(long)]
        token: String,

        #[clap(long)]
        endpoint: Option<String>,
    },

    /// Remove the stored token for an endpoint
    Clear {
        #[clap(long)]
        endpoint: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default config file if none exists
    Init,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    let config_path = match &args.config {
        Some(path) => shellexpand::tilde(path).into_owned(),
        None => Config::default_path().to_string_lossy().into_owned(),
    };
    let mut config = Config::load(&config_path).with_context(|| format!("Failed to load {}", config_path))?;
    config.apply_env();

    match args.command {
        Commands::FetchIds {
            endpoint,
            token,
            output,
            page_size,
            insecure,
        } => {
            if let Some(endpoint) = endpoint {
                config.api.endpoint = endpoint;
            }
            config.api.insecure_tls |= insecure;
            let output = output.unwrap_or_else(|| config.projects.output.clone());
            let page_size = page_size.unwrap_or(config.projects.page_size);

            let Some(token) = credentials::resolve_token(token, config.api.api_token.clone(), &config.api.endpoint) else {
                eprintln!("No API token. Set ALLURE_USER_TOKEN, pass --token, or run `ownermail token set`.");
                process::exit(1);
            };

            let client = ApiClient::new(&config.api)?;
            let report = projects::run(&client, &token, page_size, output)?;
            println!("Wrote {} ids to {}", report.ids.len(), report.output.display());
        }

        Commands::Owners {
            endpoint,
            token,
            token_type,
            input,
            output,
            delay_ms,
            debug_samples,
            insecure,
        } => {
            if let Some(endpoint) = endpoint {
                config.api.endpoint = endpoint;
            }
            if let Some(token_type) = token_type {
                config.api.token_type = token_type;
            }
            config.api.insecure_tls |= insecure;
            let input = input.unwrap_or_else(|| config.owners.input.clone());
            let output = output.unwrap_or_else(|| config.owners.output.clone());
            let delay = Duration::from_millis(delay_ms.unwrap_or(config.owners.request_delay_ms));
            let debug_samples = debug_samples.unwrap_or(config.owners.debug_samples);

            if !input.exists() {
                eprintln!("Input file not found: {}", input.display());
                process::exit(1);
            }

            let project_ids = files::read_project_ids(&input)?;
            println!("Found {} project ids", project_ids.len());

            // nothing to look up, so no credential is needed
            if project_ids.is_empty() {
                owners::write_report(&owners::OwnerReport::default(), &output)?;
                println!("Found 0 unique emails");
                println!("Saved to {}", output.display());
                return Ok(());
            }

            let Some(token) = credentials::resolve_token(token, config.api.api_token.clone(), &config.api.endpoint) else {
                eprintln!("No API token. Set ALLURE_TOKEN, pass --token, or run `ownermail token set`.");
                process::exit(1);
            };

            let client = ApiClient::new(&config.api)?;
            let extractor = OwnerExtractor::new(&client, &config.api.token_type, &token)
                .with_delay(delay)
                .with_debug_samples(debug_samples);
            let report = owners::run_to_file(&extractor, &project_ids, &output)?;

            let failed = report.projects.iter().filter(|p| p.error.is_some()).count();
            if failed > 0 {
                println!("{} of {} projects could not be read", failed, report.projects.len());
            }
            println!("Found {} unique emails", report.emails.len());
            println!("Saved to {}", output.display());
        }

        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.mailer.bind = bind;
            }
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(web::serve(config.mailer))?;
        }

        Commands::Token { action } => {
            let vault = TokenVault::new();
            match action {
                TokenAction::Set { token, endpoint } => {
                    let endpoint = endpoint.unwrap_or(config.api.endpoint);
                    vault.store(&endpoint, &token)?;
                    println!("Token stored for {}", credentials::account_key(&endpoint));
                }
                TokenAction::Clear { endpoint } => {
                    let endpoint = endpoint.unwrap_or(config.api.endpoint);
                    vault.delete(&endpoint)?;
                    println!("Token removed for {}", credentials::account_key(&endpoint));
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("Config file: {}", config_path);
                println!("Endpoint: {}", config.api.endpoint);
                println!("Token: {}", config.masked_token());
                println!("Token type: {}", config.api.token_type);
                println!("Insecure TLS: {}", config.api.insecure_tls);
                println!("Project ids file: {}", config.projects.output.display());
                println!("Owners input: {}", config.owners.input.display());
                println!("Owners output: {}", config.owners.output.display());
                println!("Mailer bind: {}", config.mailer.bind);
            }
            ConfigAction::Init => {
                if std::path::Path::new(&config_path).exists() {
                    println!("Config already exists at {}", config_path);
                } else {
                    // defaults only; env overrides stay out of the file
                    Config::default().save(&config_path)?;
                    println!("Default config written to {}", config_path);
                }
            }
        },
    }

    Ok(())
}

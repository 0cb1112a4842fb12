use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, ValueEnum};
use ed25519_dalek::SigningKey;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use job_ingest::config::{
    IngestConfig, SecurityConfig, SecurityMode, ValidatorConfig, DEFAULT_BATCH_TIMEOUT_MS,
    DEFAULT_LISTEN_PORT, DEFAULT_MAX_VALIDATORS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use job_ingest::grpc::IngestClient;
use job_ingest::job::{Credentials, JobFlags, RoleMask, SubmitRequest};
use job_ingest::node::Node;
use job_ingest::shutdown::install_shutdown_handler;
use job_ingest::sign::{wrap_ed25519, wrap_none};

#[derive(Parser, Debug)]
#[command(name = "job-ingest")]
#[command(version)]
#[command(about = "Batched job ingestion for a cluster resource manager")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a job-ingest component
    Server(ServerArgs),

    /// Job commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Print the id generator high-water timestamp of a component
    Info {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Ask a component to drain and stop
    Shutdown {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Generate an ed25519 signing keypair
    Keygen {
        /// Write the base64 secret key to this file instead of stdout
        #[arg(long)]
        secret_out: Option<PathBuf>,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Component id, used as the id generator id (0 is the primary)
    #[arg(long, default_value = "0")]
    component_id: u32,

    /// Port to listen on for gRPC
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: std::net::IpAddr,

    /// Primary component address (required when component id is not 0)
    #[arg(long)]
    primary: Option<String>,

    /// Downstream job manager address; in-memory when omitted
    #[arg(long)]
    job_manager: Option<String>,

    /// Batch coalescing window in milliseconds
    #[arg(long, default_value_t = DEFAULT_BATCH_TIMEOUT_MS)]
    batch_timeout_ms: u64,

    /// How long shutdown waits for validators to exit, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_MS)]
    shutdown_timeout_ms: u64,

    /// External validator program; jobspecs are only checked to be JSON
    /// objects when omitted
    #[arg(long)]
    validator: Option<PathBuf>,

    /// Validator arguments (comma-separated)
    #[arg(long, default_value = "")]
    validator_args: String,

    /// Maximum number of validator processes
    #[arg(long, default_value_t = DEFAULT_MAX_VALIDATORS)]
    max_validators: usize,

    /// Accepted signing mechanisms
    #[arg(long, value_enum, default_value = "none")]
    sign_type: SecurityMode,

    /// JSON file of trusted signer keys (userid -> base64 public key)
    #[arg(long)]
    trusted_keys: Option<PathBuf>,
}

// =============================================================================
// Client Arguments (shared by client commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50061")]
    addr: String,

    /// Userid presented to the server
    #[arg(long, default_value = "0")]
    userid: u32,

    /// Present the instance owner role instead of the user role
    #[arg(long)]
    owner: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

impl ClientArgs {
    fn credentials(&self) -> Credentials {
        let rolemask = if self.owner {
            RoleMask::OWNER
        } else {
            RoleMask::USER
        };
        Credentials::new(self.userid, rolemask)
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SubmitFlag {
    Debug,
    Waitable,
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Jobspec file, or "-" for stdin
    #[arg(default_value = "-")]
    jobspec: PathBuf,

    /// Signing mechanism
    #[arg(long, value_enum, default_value = "none")]
    sign_type: SecurityMode,

    /// File containing the base64 ed25519 secret key
    #[arg(long, required_if_eq("sign_type", "ed25519"))]
    key: Option<PathBuf>,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Sign and submit a jobspec
    Submit {
        #[command(flatten)]
        sign: SignArgs,

        /// Job priority (0-31)
        #[arg(long)]
        priority: Option<i32>,

        /// Submit flags (comma-separated)
        #[arg(long, value_enum, value_delimiter = ',')]
        flags: Vec<SubmitFlag>,
    },
    /// Print a signed envelope without submitting it
    Sign {
        #[command(flatten)]
        sign: SignArgs,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    id: u64,
    dothex: String,
}

#[derive(Serialize)]
struct InfoOutput {
    timestamp: u64,
}

#[derive(Serialize)]
struct ShutdownOutput {
    active_validators: u32,
}

#[derive(Serialize)]
struct KeygenOutput {
    public: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn read_jobspec(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    Ok(std::fs::read(path)?)
}

fn load_signing_key(path: &Path) -> Result<SigningKey, Box<dyn std::error::Error>> {
    let encoded = std::fs::read_to_string(path)?;
    let bytes = STANDARD.decode(encoded.trim())?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| format!("{}: secret key must be 32 bytes", path.display()))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn sign_jobspec(args: &SignArgs, userid: u32) -> Result<String, Box<dyn std::error::Error>> {
    let jobspec = read_jobspec(&args.jobspec)?;
    match args.sign_type {
        SecurityMode::None => Ok(wrap_none(&jobspec, userid)),
        SecurityMode::Ed25519 => {
            let path = args.key.as_ref().ok_or("--key is required for ed25519")?;
            let key = load_signing_key(path)?;
            Ok(wrap_ed25519(&jobspec, userid, &key))
        }
    }
}

fn submit_flags(flags: &[SubmitFlag]) -> JobFlags {
    flags.iter().fold(JobFlags::empty(), |acc, flag| {
        acc | match flag {
            SubmitFlag::Debug => JobFlags::DEBUG,
            SubmitFlag::Waitable => JobFlags::WAITABLE,
        }
    })
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr = SocketAddr::new(args.bind, args.port);
    let mut config = IngestConfig::new(args.component_id, listen_addr)
        .with_batch_timeout_ms(args.batch_timeout_ms)
        .with_shutdown_timeout_ms(args.shutdown_timeout_ms)
        .with_validator(ValidatorConfig {
            path: args.validator,
            args: ValidatorConfig::parse_args(&args.validator_args),
            max_workers: args.max_validators,
        })
        .with_security(SecurityConfig {
            mode: args.sign_type,
            trusted_keys: args.trusted_keys,
        });
    if let Some(primary) = args.primary {
        config = config.with_primary(primary);
    }
    if let Some(job_manager) = args.job_manager {
        config = config.with_job_manager(job_manager);
    }

    tracing::info!(
        component_id = config.component_id,
        listen_addr = %config.listen_addr,
        primary = ?config.primary_addr,
        job_manager = ?config.job_manager_addr,
        validator = ?config.validator.path,
        sign_type = ?config.security.mode,
        "Starting job-ingest component"
    );

    let shutdown = install_shutdown_handler()?;
    Node::new(config).run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &mut IngestClient,
    request: SubmitRequest,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match client.submit(request).await {
        Ok(id) => match output_format {
            OutputFormat::Json => {
                let output = JobSubmitOutput {
                    id: id.get(),
                    dothex: id.dothex(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Job submitted successfully!");
                println!("Job ID: {} ({})", id, id.dothex());
            }
        },
        Err(status) => {
            eprintln!("Error: Job submission failed: {}", status.message());
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn handle_info(
    client: &mut IngestClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let timestamp = client.get_info().await?;
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&InfoOutput { timestamp })?);
        }
        OutputFormat::Table => {
            println!("High-water timestamp: {}", timestamp);
        }
    }
    Ok(())
}

async fn handle_shutdown(
    client: &mut IngestClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let active_validators = client.shutdown().await?;
    match output_format {
        OutputFormat::Json => {
            let output = ShutdownOutput { active_validators };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Shutdown started");
            println!("Active validators: {}", active_validators);
        }
    }
    Ok(())
}

fn handle_keygen(secret_out: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let public = STANDARD.encode(key.verifying_key().to_bytes());
    let secret = STANDARD.encode(key.to_bytes());

    let secret = match secret_out {
        Some(path) => {
            std::fs::write(&path, format!("{secret}\n"))?;
            eprintln!("Secret key written to {}", path.display());
            None
        }
        None => Some(secret),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&KeygenOutput { public, secret })?
    );
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => match command {
            JobCommands::Submit {
                sign,
                priority,
                flags,
            } => {
                let signed = sign_jobspec(&sign, client.userid)?;
                let mut request = SubmitRequest::new(signed).with_flags(submit_flags(&flags));
                if let Some(priority) = priority {
                    request = request.with_priority(priority);
                }
                let mut grpc_client = IngestClient::connect(&client.addr, client.credentials()).await?;
                handle_job_submit(&mut grpc_client, request, &client.output).await?;
            }
            JobCommands::Sign { sign } => {
                println!("{}", sign_jobspec(&sign, client.userid)?);
            }
        },
        Commands::Info { client } => {
            let mut grpc_client = IngestClient::connect(&client.addr, client.credentials()).await?;
            handle_info(&mut grpc_client, &client.output).await?;
        }
        Commands::Shutdown { client } => {
            let mut grpc_client = IngestClient::connect(&client.addr, client.credentials()).await?;
            handle_shutdown(&mut grpc_client, &client.output).await?;
        }
        Commands::Keygen { secret_out } => {
            handle_keygen(secret_out)?;
        }
    }

    Ok(())
}

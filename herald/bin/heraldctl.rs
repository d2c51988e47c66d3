//! Command-line utility for managing a running herald instance
//!
//! Everything goes through the control socket:
//! - Submitting announcements and processing, retrying or viewing jobs
//! - Reading a job's or batch's audit trail
//! - Running a recovery pass
//! - System status and health checks

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use herald_common::DeliveryMode;
use herald_control::{
    AuditCommand, ControlClient, DEFAULT_CONTROL_SOCKET, JobCommand, RecoveryCommand, Request,
    RequestCommand, ResponsePayload, SystemCommand,
};
use herald_dispatch::NewEmail;

/// Command-line utility for managing herald
#[derive(Parser, Debug)]
#[command(name = "heraldctl")]
#[command(about = "Manage a running herald instance", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,

    /// Who to record on audit events, defaults to $USER
    #[arg(long)]
    actor: Option<String>,

    /// Print responses as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit and manage announcement jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Read the audit trail, newest event first
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
    /// Reset stuck work and pick up queued jobs now
    Recover,
    /// System status and health
    System {
        #[command(subcommand)]
        action: SystemAction,
    },
}

#[derive(Subcommand, Debug)]
enum JobAction {
    /// Create a job, split it into batches and queue it
    Submit {
        #[arg(long)]
        subject: String,

        /// HTML body
        #[arg(long, conflicts_with = "body_file", required_unless_present = "body_file")]
        body: Option<String>,

        /// Read the HTML body from a file
        #[arg(long)]
        body_file: Option<PathBuf>,

        /// Recipient address, may be repeated
        #[arg(long = "to")]
        recipients: Vec<String>,

        /// Read recipients from a file, one per line
        #[arg(long)]
        recipients_file: Option<PathBuf>,

        /// Override the configured delivery mode
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },
    /// Put an existing job on the queue
    Enqueue { email_id: String },
    /// Process a job now and wait for it to finish
    Process { email_id: String },
    /// Resend a job's failed batches
    Retry { email_id: String },
    /// Show a job and its batches
    View { email_id: String },
}

#[derive(Subcommand, Debug)]
enum AuditAction {
    /// Events for a job and all of its batches
    Email { email_id: String },
    /// Events for a single batch
    Batch { batch_id: String },
}

#[derive(Subcommand, Debug)]
enum SystemAction {
    /// Check if herald is responding
    Ping,
    /// Queue length and work in progress
    Status {
        /// Watch mode - continuously update
        #[arg(long)]
        watch: bool,

        /// Update interval in seconds (for watch mode)
        #[arg(long, default_value = "2")]
        interval: u64,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Individual,
    Bcc,
}

impl From<Mode> for DeliveryMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Individual => Self::Individual,
            Mode::Bcc => Self::Bcc,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let actor = cli.actor.or_else(|| std::env::var("USER").ok());

    if let Commands::System {
        action: SystemAction::Status {
            watch: true,
            interval,
        },
    } = cli.command
    {
        let client = check_control_socket(&cli.control_socket)?.with_persistent_connection();
        loop {
            // Clear screen
            print!("\x1B[2J\x1B[1;1H");

            let request = Request::new(RequestCommand::System(SystemCommand::Status));
            send(&client, request, cli.json).await?;

            println!("\nPress Ctrl+C to exit");

            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    let command = build_command(cli.command)?;
    let mut request = Request::new(command);
    if let Some(actor) = actor {
        request = request.with_actor(actor);
    }

    let client = check_control_socket(&cli.control_socket)?;
    send(&client, request, cli.json).await
}

fn build_command(command: Commands) -> anyhow::Result<RequestCommand> {
    Ok(match command {
        Commands::Job { action } => RequestCommand::Job(match action {
            JobAction::Submit {
                subject,
                body,
                body_file,
                mut recipients,
                recipients_file,
                mode,
            } => {
                let body = match (body, body_file) {
                    (Some(body), _) => body,
                    (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                        anyhow::anyhow!("Failed to read body from {}: {e}", path.display())
                    })?,
                    (None, None) => anyhow::bail!("Either --body or --body-file is required"),
                };

                if let Some(path) = recipients_file {
                    let content = std::fs::read_to_string(&path).map_err(|e| {
                        anyhow::anyhow!("Failed to read recipients from {}: {e}", path.display())
                    })?;
                    recipients.extend(
                        content
                            .lines()
                            .map(str::trim)
                            .filter(|line| !line.is_empty() && !line.starts_with('#'))
                            .map(ToString::to_string),
                    );
                }

                JobCommand::Submit(NewEmail {
                    subject,
                    body,
                    recipients,
                    owner: None,
                    mode: mode.map(DeliveryMode::from),
                })
            }
            JobAction::Enqueue { email_id } => JobCommand::Enqueue { email_id },
            JobAction::Process { email_id } => JobCommand::Process { email_id },
            JobAction::Retry { email_id } => JobCommand::Retry { email_id },
            JobAction::View { email_id } => JobCommand::View { email_id },
        }),
        Commands::Audit { action } => RequestCommand::Audit(match action {
            AuditAction::Email { email_id } => AuditCommand::Email { email_id },
            AuditAction::Batch { batch_id } => AuditCommand::Batch { batch_id },
        }),
        Commands::Recover => RequestCommand::Recovery(RecoveryCommand::Run),
        Commands::System { action } => RequestCommand::System(match action {
            SystemAction::Ping => SystemCommand::Ping,
            SystemAction::Status { .. } => SystemCommand::Status,
        }),
    })
}

/// Check control socket connectivity and return client
fn check_control_socket(socket_path: &str) -> anyhow::Result<ControlClient> {
    let client = ControlClient::new(socket_path);

    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to herald control socket at {socket_path}.\n\
             Error: {e}\n\
             \n\
             Is herald running?\n\
             You can configure the socket path with --control-socket or in herald.config.ron"
        );
    }

    Ok(client)
}

async fn send(client: &ControlClient, request: Request, json: bool) -> anyhow::Result<()> {
    let response = client.send_request(request).await?;

    match response.payload {
        ResponsePayload::Ok => println!("✓ Command completed successfully"),
        ResponsePayload::Data(data) if json => {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        ResponsePayload::Data(data) => print!("{data}"),
        ResponsePayload::Error { code, message } => match code {
            Some(code) => anyhow::bail!("Server error [{code}]: {message}"),
            None => anyhow::bail!("Server error: {message}"),
        },
    }

    Ok(())
}

// SPDX-License-Identifier: MIT
//! Operator CLI for the attribution pipeline.
//!
//! Each subcommand exercises one pipeline stage against the configured
//! backends: capture at install time, linking after sign-in, first-login
//! dispatch, consent recording, and a status dump for debugging.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use adbridge::attribution::{AttributionParams, AttributionStore};
use adbridge::auth::StaticIdentity;
use adbridge::profile::MemoryProfileStore;
use adbridge::config::{self, PipelineConfig};
use adbridge::consent::TrackingConsentStatus;
use adbridge::dispatch::IdentityHints;
use adbridge::storage::Storage;
use adbridge::Pipeline;

#[derive(Parser)]
#[command(
    name = "adbridge",
    about = "Attribution capture and conversion-event delivery pipeline",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for the SQLite database and adbridge.toml
    #[arg(long, env = "ADBRIDGE_DATA_DIR", global = true)]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ADBRIDGE_LOG", global = true)]
    log: Option<String>,

    /// Identity token for the document backend
    #[arg(long, env = "ADBRIDGE_ID_TOKEN", global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Capture attribution parameters (first parameters observed win).
    ///
    /// Run at install or referral-click time, before any user exists.
    Capture {
        #[arg(long)]
        click_id: Option<String>,
        #[arg(long)]
        campaign_id: Option<String>,
        #[arg(long)]
        network: Option<String>,
    },
    /// Link the captured attribution to a signed-in user.
    Link {
        #[arg(long)]
        user_id: String,
        /// Email on the credential (used only for identity matching).
        #[arg(long)]
        email: Option<String>,
    },
    /// Run the first-login dispatch sequence for a user.
    Dispatch {
        #[arg(long)]
        user_id: String,
        /// Email to attach as a hashed identity hint.
        #[arg(long)]
        email: Option<String>,
        /// Registration method reported with the event.
        #[arg(long, default_value = "email")]
        method: String,
    },
    /// Record a tracking-consent prompt outcome.
    Consent {
        #[arg(long)]
        user_id: String,
        /// One of: not_determined, authorized, denied, restricted.
        #[arg(long)]
        status: String,
        /// Also record that the prompt was shown, before the outcome.
        #[arg(long)]
        prompt_shown: bool,
    },
    /// Print device-local state and, with --user-id, the durable record.
    Status {
        #[arg(long)]
        user_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .compact()
        .init();

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(config::default_data_dir);
    let cfg = PipelineConfig::load(data_dir);
    let token = args.token.clone();

    match args.command {
        Command::Capture {
            click_id,
            campaign_id,
            network,
        } => {
            // Capture is pre-authentication; no document backend involved.
            let storage = Arc::new(Storage::new(&cfg.data_dir).await?);
            let store = AttributionStore::new(storage, Arc::new(MemoryProfileStore::new()));
            let record = store
                .capture(AttributionParams {
                    click_id,
                    campaign_id,
                    network,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Command::Link { user_id, email } => {
            let (pipeline, profiles) = connect(token.as_deref(), cfg, &user_id, email.as_deref()).await?;
            let token = pipeline.gate.ensure_ready(&user_id).await?;
            profiles.install_token(&token).await;

            let outcome = pipeline.attribution.consume_for_user(&user_id).await?;
            info!(?outcome, "link complete");
        }

        Command::Dispatch {
            user_id,
            email,
            method,
        } => {
            let (pipeline, profiles) = connect(token.as_deref(), cfg, &user_id, email.as_deref()).await?;
            let token = pipeline.gate.ensure_ready(&user_id).await?;
            profiles.install_token(&token).await;

            let hints = IdentityHints {
                user_id: Some(user_id.clone()),
                email,
            };
            let report = pipeline
                .dispatcher
                .report_first_login(&user_id, &hints, &method)
                .await?;
            println!(
                "skipped={} install_sent={} registration_sent={} marker_written={}",
                report.skipped, report.install_sent, report.registration_sent, report.marker_written
            );
        }

        Command::Consent {
            user_id,
            status,
            prompt_shown,
        } => {
            let status: TrackingConsentStatus =
                status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let (pipeline, profiles) = connect(token.as_deref(), cfg, &user_id, None).await?;
            let token = pipeline.gate.ensure_ready(&user_id).await?;
            profiles.install_token(&token).await;

            if prompt_shown {
                pipeline.consent.record_prompt_shown(&user_id).await?;
            }
            pipeline.consent.record_result(&user_id, status).await?;
        }

        Command::Status { user_id } => {
            let storage = Storage::new(&cfg.data_dir).await?;
            let record = storage.attribution_record().await?;
            let install_sent = storage.install_event_sent().await?;
            println!("device-local:");
            println!("  attribution_record: {}", match &record {
                Some(r) => serde_json::to_string(r)?,
                None => "none".to_string(),
            });
            println!("  install_event_sent: {install_sent}");

            if let Some(user_id) = user_id {
                let (pipeline, profiles) = connect(token.as_deref(), cfg, &user_id, None).await?;
                let token = pipeline.gate.ensure_ready(&user_id).await?;
                profiles.install_token(&token).await;
                match pipeline.profiles.fetch(&user_id).await? {
                    Some(record) => {
                        println!("user record:");
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                    None => println!("user record: none"),
                }
            }
        }
    }

    Ok(())
}

/// Build the pipeline against the configured HTTP backends with a static
/// credential from --token / ADBRIDGE_ID_TOKEN.
async fn connect(
    token: Option<&str>,
    cfg: PipelineConfig,
    user_id: &str,
    email: Option<&str>,
) -> Result<(Pipeline, Arc<adbridge::profile::RestProfileStore>)> {
    let token = token.context("an identity token is required (--token or ADBRIDGE_ID_TOKEN)")?;
    let identity = Arc::new(StaticIdentity::new(user_id, email, token));
    Pipeline::connect(cfg, identity).await
}

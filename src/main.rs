use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod alerts;
mod engine;
mod error;
mod external;
mod models;
mod notify;
mod presence;
mod push;
mod rules;
mod store;

use engine::AlertEngine;
use external::{LoggingMailTrigger, NoopEnrichment};
use models::AlertStatus;
use store::PgStore;

#[derive(Parser)]
#[command(name = "feedback-alert-engine")]
#[command(about = "Alert detection and notification engine for course feedback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Submit a feedback response and run alert detection
    Submit {
        #[arg(long)]
        questionnaire: Uuid,
        #[arg(long)]
        rating: i32,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        submitter: String,
    },
    /// List alerts for a staff user
    Alerts {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        status: Option<String>,
    },
    /// List notifications for a staff user
    Notifications {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        unread_only: bool,
    },
    /// Mark an alert as treated
    Treat {
        #[arg(long)]
        alert: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Attach a staff comment to an alert
    Comment {
        #[arg(long)]
        alert: Uuid,
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        text: String,
    },
    /// Mark one notification as read
    MarkRead {
        #[arg(long)]
        notification: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Mark all notifications of a user as read
    MarkAllRead {
        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedback_alert_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PgStore::new(pool));
    let engine = AlertEngine::new(
        store.clone(),
        Arc::new(NoopEnrichment),
        Arc::new(LoggingMailTrigger),
    );

    match cli.command {
        Commands::InitDb => {
            store.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.seed().await?;
            println!("Seed data inserted.");
        }
        Commands::Submit {
            questionnaire,
            rating,
            comment,
            submitter,
        } => {
            let outcome = engine
                .submit_response(questionnaire, rating, comment, submitter)
                .await?;
            println!("Response {} recorded.", outcome.response.id);
            match outcome.alert {
                Some(alert) => println!(
                    "Alert {} ({}) for owner {}: {}",
                    alert.id,
                    alert.kind.as_str(),
                    alert.recipient_user_id,
                    alert.message
                ),
                None => println!("Aggregate within thresholds, no alert."),
            }
        }
        Commands::Alerts { user, status } => {
            let status = match status.as_deref() {
                Some(value) => Some(AlertStatus::parse(value).context("unknown alert status")?),
                None => None,
            };
            let alerts = engine.list_alerts(user, status).await?;
            if alerts.is_empty() {
                println!("No alerts for this user.");
            }
            for alert in alerts {
                println!(
                    "- {} [{}] {} ({}, updated {})",
                    alert.id,
                    alert.status.as_str(),
                    alert.message,
                    alert.kind.as_str(),
                    alert.updated_at
                );
                if let Some(comment) = alert.comment {
                    println!("  comment: {comment}");
                }
            }
        }
        Commands::Notifications { user, unread_only } => {
            let filter = if unread_only { Some(false) } else { None };
            let notifications = engine.list_notifications(user, filter).await?;
            if notifications.is_empty() {
                println!("No notifications for this user.");
            }
            for notification in notifications {
                let marker = if notification.is_read { " " } else { "*" };
                println!(
                    "{marker} {} {}: {} ({})",
                    notification.id,
                    notification.title,
                    notification.message,
                    notification.created_at
                );
            }
        }
        Commands::Treat { alert, user } => {
            engine.treat_alert(alert, user).await?;
            println!("Done.");
        }
        Commands::Comment { alert, user, text } => {
            engine.comment_alert(alert, user, &text).await?;
            println!("Done.");
        }
        Commands::MarkRead { notification, user } => {
            let changed = engine.mark_read(notification, user).await?;
            if changed {
                println!("Notification marked read.");
            } else {
                println!("Nothing to do.");
            }
        }
        Commands::MarkAllRead { user } => {
            let changed = engine.mark_all_read(user).await?;
            println!("Marked {changed} notification(s) read.");
        }
    }

    Ok(())
}

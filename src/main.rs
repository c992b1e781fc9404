//! # relay
//!
//! SMS inbox relay binary: runs the backend server or the headless inbox
//! client against it.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use relay_client::contacts::{ContactResolver, CrmDirectory};
use relay_client::schedule::spawn_periodic;
use relay_client::{
    BackendClient, ClientStorage, ConversationReconciler, Inbox, JsonFileBackend, LogSink,
    NotificationPoller, OutstandingNotifications,
};
use relay_provider::types::MessageQuery;
use relay_provider::{ConversationProvider, TwilioConfig, TwilioProvider};
use relay_server::forward::Forwarder;
use relay_server::{AppState, ServerConfig};
use relay_settings::RelaySettings;
use relay_store::EventStore;
use relay_telemetry::{init_telemetry, TelemetryConfig};

/// SMS inbox relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "SMS inbox relay", version)]
struct Cli {
    /// Settings file (defaults to ~/.relay/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Human-readable logs even for `serve`.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve,
    /// Poll for notifications and reconcile conversations.
    Watch {
        /// Run a single cycle of each task and exit.
        #[arg(long)]
        once: bool,
    },
    /// List unread conversations.
    Unread,
    /// Clear a conversation's unread flag.
    MarkRead { conversation_sid: String },
    /// Forget the notification cursor.
    ResetCursor,
    /// Print a conversation thread.
    Thread { conversation_sid: String },
    /// Send a message into a conversation.
    Send {
        conversation_sid: String,
        message: String,
        #[arg(long)]
        author: Option<String>,
    },
    /// Dump conversations, participants and recent messages straight from the provider.
    Diagnose {
        #[arg(long, default_value = "10")]
        limit: usize,
        #[arg(long, default_value = "5")]
        messages: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => relay_settings::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let json = settings.logging.json || (matches!(cli.command, Command::Serve) && !cli.pretty);
    init_telemetry(&TelemetryConfig::from_level_str(&settings.logging.level, json))
        .context("failed to initialize logging")?;

    match cli.command {
        Command::Serve => serve(settings).await,
        Command::Watch { once } => watch(settings, once).await,
        Command::Unread => unread(&settings),
        Command::MarkRead { conversation_sid } => {
            let storage = Arc::new(open_storage(&settings)?);
            let outstanding = Arc::new(OutstandingNotifications::new(Duration::ZERO));
            let inbox = Inbox::new(storage, outstanding);
            let was_unread = inbox.open_conversation(&conversation_sid)?;
            println!(
                "{conversation_sid}: {} (badge {})",
                if was_unread { "marked read" } else { "was not unread" },
                inbox.badge()
            );
            Ok(())
        }
        Command::ResetCursor => {
            open_storage(&settings)?.reset_cursor()?;
            println!("notification cursor cleared");
            Ok(())
        }
        Command::Thread { conversation_sid } => {
            let backend = BackendClient::from_settings(&settings.client)?;
            for message in backend.list_messages(&conversation_sid).await? {
                println!(
                    "[{}] {}: {}",
                    message.date_created.as_deref().unwrap_or("-"),
                    message.author.as_deref().unwrap_or("?"),
                    message.body.as_deref().unwrap_or("")
                );
                for media in &message.media {
                    println!("    attachment: {}", backend.media_url(&message.sid, &media.sid)?);
                }
            }
            Ok(())
        }
        Command::Send {
            conversation_sid,
            message,
            author,
        } => {
            let backend = BackendClient::from_settings(&settings.client)?;
            let sent = backend.send_message(&conversation_sid, &message, author.as_deref()).await?;
            println!("sent {}", sent.sid);
            Ok(())
        }
        Command::Diagnose { limit, messages } => diagnose(&settings, limit, messages).await,
    }
}

async fn serve(settings: RelaySettings) -> Result<()> {
    let metrics = match relay_telemetry::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let twilio = TwilioConfig::from_settings(&settings.provider);
    if !twilio.has_credentials() {
        tracing::warn!("provider credentials missing; provider-backed routes will fail");
    }
    let provider = Arc::new(TwilioProvider::new(twilio)?);
    let forwarder = Forwarder::from_settings(&settings.forwarding)?.map(Arc::new);
    let events = Arc::new(EventStore::new(settings.server.event_capacity));

    let state = AppState::new(events, provider)
        .configure(&settings.server)
        .with_forwarder(forwarder)
        .with_metrics(metrics);
    let handle = relay_server::start(ServerConfig::from_settings(&settings.server), state)
        .await
        .context("failed to start server")?;

    tracing::info!(
        port = handle.port,
        notification_source = settings.server.notification_source.as_str(),
        "relay server ready"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn open_storage(settings: &RelaySettings) -> Result<ClientStorage> {
    let path = settings.client.resolved_state_path();
    ClientStorage::open(JsonFileBackend::new(&path))
        .with_context(|| format!("failed to open client state at {}", path.display()))
}

async fn watch(settings: RelaySettings, once: bool) -> Result<()> {
    let client = &settings.client;
    let backend = Arc::new(BackendClient::from_settings(client)?);
    let storage = Arc::new(open_storage(&settings)?);
    let ttl = Duration::from_secs(client.notification_ttl_secs);
    let outstanding = Arc::new(OutstandingNotifications::new(ttl));
    let sink = Arc::new(LogSink);

    let mut poller = NotificationPoller::new(
        backend.clone(),
        Arc::clone(&storage),
        sink.clone(),
        Arc::clone(&outstanding),
    );
    if let Some(directory_settings) = &client.contact_directory {
        let timeout = Duration::from_millis(client.request_timeout_ms);
        if let Some(directory) = CrmDirectory::from_settings(directory_settings, timeout)? {
            let resolver = ContactResolver::new(Arc::new(directory), Arc::clone(&storage));
            poller = poller.with_contacts(Arc::new(resolver));
        }
    }
    let poller = Arc::new(poller);
    let reconciler = Arc::new(ConversationReconciler::new(
        backend,
        Arc::clone(&storage),
        sink,
        Arc::clone(&outstanding),
        client.conversation_limit,
    ));

    if once {
        let polled = poller.poll_once().await;
        let reconciled = reconciler.reconcile_once().await;
        println!("poll: {polled:?}");
        println!("reconcile: {reconciled:?}");
        println!("unread: {}", storage.badge());
        return Ok(());
    }

    tracing::info!(
        poll_secs = client.poll_interval_secs,
        refresh_secs = client.refresh_interval_secs,
        "watching for activity"
    );
    let poll_task = spawn_periodic(
        "notification-poll",
        Duration::from_secs(client.poll_interval_secs.max(1)),
        None,
        move || {
            let poller = Arc::clone(&poller);
            async move {
                poller.poll_once().await;
            }
        },
    );
    let refresh_task = spawn_periodic(
        "conversation-refresh",
        Duration::from_secs(client.refresh_interval_secs.max(1)),
        None,
        move || {
            let reconciler = Arc::clone(&reconciler);
            async move {
                reconciler.reconcile_once().await;
            }
        },
    );
    let expiry_task = spawn_periodic("notification-expiry", Duration::from_secs(60), None, move || {
        let outstanding = Arc::clone(&outstanding);
        async move {
            let expired = outstanding.expire();
            if expired > 0 {
                tracing::debug!(expired, "expired outstanding notifications");
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!(unread = storage.badge(), "stopping watch");
    poll_task.abort();
    refresh_task.abort();
    expiry_task.abort();
    Ok(())
}

fn unread(settings: &RelaySettings) -> Result<()> {
    let storage = open_storage(settings)?;
    let known = storage.known_conversations();
    let unread = storage.unread();
    println!("{} unread", unread.len());
    for sid in unread {
        let name = known
            .get(&sid)
            .and_then(|c| c.friendly_name.as_deref())
            .unwrap_or("(unknown)");
        println!("  {sid}  {name}");
    }
    Ok(())
}

async fn diagnose(settings: &RelaySettings, limit: usize, messages: usize) -> Result<()> {
    let provider = TwilioProvider::new(TwilioConfig::from_settings(&settings.provider))?;
    let conversations = provider
        .list_conversations(limit)
        .await
        .context("failed to list conversations")?;
    println!("{} conversations", conversations.len());

    for conversation in conversations {
        println!(
            "\n{}  {}  updated {}",
            conversation.sid,
            conversation.friendly_name.as_deref().unwrap_or("-"),
            conversation
                .date_updated
                .map(|d| relay_core::time::format_timestamp(&d))
                .unwrap_or_else(|| "-".to_string())
        );
        match provider.list_participants(&conversation.sid).await {
            Ok(participants) => {
                for participant in participants {
                    println!(
                        "  participant {} {}",
                        participant.sid,
                        participant.address().unwrap_or("(no address)")
                    );
                }
            }
            Err(e) => println!("  participants unavailable: {e}"),
        }
        match provider
            .list_messages(&conversation.sid, MessageQuery::newest(messages))
            .await
        {
            Ok(recent) => {
                for message in recent.iter().rev() {
                    println!(
                        "  {} {}: {}{}",
                        message.sid,
                        message.author.as_deref().unwrap_or("?"),
                        message.body.as_deref().unwrap_or(""),
                        if message.has_media() { " [media]" } else { "" }
                    );
                }
            }
            Err(e) => println!("  messages unavailable: {e}"),
        }
    }
    Ok(())
}

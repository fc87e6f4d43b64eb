use board_digest_cli::config::Settings;
use board_digest_cli::runner::{Pipeline, RunOutcome};
use board_digest_cli::sinks::sink_for_mode;
use board_digest_cli::transport::{DiscordTransport, LineNotifyTransport, Transport};
use board_digest_cli::DeliveryMode;
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    Discord,
    Line,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Digest the newest board thread into a chat channel", long_about = None)]
struct Args {
    /// What to deliver: a chat preview, text files, or MP3 audio
    #[arg(short, long, value_enum, default_value_t = DeliveryMode::AudioFile)]
    mode: DeliveryMode,

    /// Where to deliver
    #[arg(short, long, value_enum, default_value_t = TransportKind::Discord)]
    transport: TransportKind,

    /// Maximum characters per converted part
    #[arg(short, long)]
    chunk_size: Option<usize>,

    /// Directory for generated files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Skip TLS certificate verification for board fetches
    #[arg(long)]
    insecure: bool,

    /// Run every stage but do not deliver anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::from_env()?;
    if let Some(size) = args.chunk_size.filter(|s| *s > 0) {
        settings.chunk_size = size;
    }
    if let Some(dir) = args.output_dir {
        settings.output_dir = dir;
    }
    if args.insecure {
        settings.board.skip_tls_verification = true;
    }

    // Credentials are checked before anything touches the network.
    let transport: Option<Box<dyn Transport>> = if args.dry_run {
        None
    } else {
        let transport: Box<dyn Transport> = match args.transport {
            TransportKind::Discord => {
                let creds = settings.require_discord()?;
                Box::new(DiscordTransport::new(&creds.bot_token, &creds.channel_id)?)
            }
            TransportKind::Line => Box::new(LineNotifyTransport::new(settings.require_line()?)?),
        };
        Some(transport)
    };

    tracing::info!(mode = ?args.mode, transport = ?args.transport, dry_run = args.dry_run, "starting board digest");

    let sink = sink_for_mode(args.mode, &settings)?;
    let mut pipeline = Pipeline::new(settings, args.mode)?;
    if let Some(sink) = sink {
        pipeline = pipeline.with_sink(sink);
    }
    if let Some(transport) = transport {
        pipeline = pipeline.with_transport(transport);
    }

    match pipeline.run().await {
        RunOutcome::NoThread => tracing::warn!("nothing to deliver: no matching thread"),
        RunOutcome::NoPosts { thread } => {
            tracing::warn!(name = %thread.display_name, "nothing to deliver: no posts extracted")
        }
        RunOutcome::Previewed { thread, post_count, delivered } => {
            tracing::info!(name = %thread.display_name, post_count, delivered, "preview finished")
        }
        RunOutcome::Converted {
            thread,
            post_count,
            report,
            delivered,
        } => tracing::info!(
            name = %thread.display_name,
            post_count,
            parts = report.per_chunk.len(),
            failed = report.failed_count(),
            bytes = report.total_bytes,
            delivered,
            "digest finished"
        ),
    }

    Ok(())
}

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quilt_client::{ClientConfig, CollabClient, Command, Notice};

#[derive(Parser)]
#[command(name = "quilt")]
#[command(about = "Collaborative snippet editor client")]
struct Cli {
    /// App server handing out session workers.
    #[arg(short = 's', long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Session to join or create.
    #[arg(long)]
    session: String,

    /// User id; generated when omitted.
    #[arg(long)]
    user: Option<String>,

    /// Verify chain/editor consistency after every batch.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "quilt_client=info,info".into()),
        )
        .init();
    let cli = Cli::parse();

    let user_id = cli
        .user
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let config = ClientConfig::default()
        .with_app_server(cli.server)
        .with_consistency_checks(cli.check);

    info!(session = %cli.session, user = %user_id, "joining session");
    let (mut client, mut notices, mut text) =
        CollabClient::connect(config, user_id, cli.session).await?;

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    // Each stdin line is appended to the snippet as one paste.
    let stdin_commands = commands_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut text = line;
            text.push('\n');
            if stdin_commands
                .send(Command::Insert { pos: None, text })
                .is_err()
            {
                return;
            }
        }
        let _ = stdin_commands.send(Command::Close);
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = commands_tx.send(Command::Close);
        }
    });

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                Notice::Disconnected => error!("connection lost, recovering"),
                Notice::Reconnected => info!("connection restored"),
                Notice::NoWorker => error!("no worker available, retrying"),
                Notice::Divergence { chain, editor } => {
                    error!(%chain, %editor, "replica diverged from its chain")
                }
                Notice::JobOutput(log) => {
                    info!(job = %log.job.job_id, output = %log.output, "job finished")
                }
            }
        }
    });

    tokio::spawn(async move {
        while text.changed().await.is_ok() {
            let snippet = text.borrow_and_update().clone();
            println!("--- snippet ---\n{snippet}\n---------------");
        }
    });

    client.run(commands_rx).await?;
    Ok(())
}

mod app;
mod backend;
mod dependency;
mod model;
mod msg;
mod server;
#[cfg(test)]
mod test_support;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use app::App;
use backend::{Backend, LocalBackend};
use dependency::DependencyBootstrap;
use model::config::{AppConfig, project_dirs};
use msg::Msg;

const PROMPT: &str = "magnet> ";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize logging to file (never stdout)
    let _log_guard = init_logging(&config)?;
    tracing::info!("magnet starting");

    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(&config));
    let bootstrap = Arc::new(DependencyBootstrap::new(Arc::clone(&backend)));
    // Polling lives as long as this handle.
    let _poller = bootstrap.spawn_poller(config.poll_interval());

    let (tx, rx) = mpsc::unbounded_channel::<Msg>();
    let app = App::new(config, backend, bootstrap, tx.clone());
    spawn_input_reader(tx);

    if let Err(e) = run(app, rx).await {
        eprintln!("magnet error: {e:?}");
    }

    tracing::info!("magnet stopped");
    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<WorkerGuard> {
    let log_dir = project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "magnet.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .init();

    Ok(guard)
}

async fn run(mut app: App, mut rx: UnboundedReceiver<Msg>) -> Result<()> {
    app.update(Msg::Reload)?;
    println!("magnet: type help for commands");

    // ── Main event loop ──
    while let Some(first) = rx.recv().await {
        // Batch-drain all pending messages
        app.update(first)?;
        while let Ok(msg) = rx.try_recv() {
            app.update(msg)?;
        }

        let mut stdout = io::stdout().lock();
        for line in app.take_notifications() {
            writeln!(stdout, "{line}")?;
        }
        if app.should_quit {
            break;
        }
        write!(stdout, "{PROMPT}")?;
        stdout.flush()?;
    }

    Ok(())
}

/// Forwards stdin lines as `Msg::Input`; end of input quits.
fn spawn_input_reader(tx: UnboundedSender<Msg>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(Msg::Input(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(Msg::Quit);
                    break;
                }
                Err(err) => {
                    tracing::warn!("stdin read failed: {err}");
                    let _ = tx.send(Msg::Quit);
                    break;
                }
            }
        }
    });
}

//! MQTT relay viewer: terminal client of the relayer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use shared::BrokerConnection;
use tokio::sync::mpsc;
use viewer::cli::{self, Commands, PayloadArgs};
use viewer::relay_client::{self, ClientConfig, Dispatch, RelayerApi};
use viewer::session::ViewerSession;
use viewer::state::{FileStore, ViewerState};
use viewer::{payload, render};

type Session = ViewerSession<RelayerApi, FileStore>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = ClientConfig::from_env();
    let api = RelayerApi::new(&config.relayer_url);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let session = open_session(&config, api)?;
            run(&config, session).await?;
        }
        Commands::Connect {
            host,
            port,
            client_id,
            username,
            password,
        } => {
            let connection = BrokerConnection {
                host,
                port,
                client_id,
                username,
                password,
            };
            connection.validate().map_err(anyhow::Error::msg)?;
            let status = api.connect(&connection).await?;
            println!("{} as {}", status.state.as_str(), connection.client_id);
        }
        Commands::Disconnect => {
            let status = api.disconnect().await?;
            open_session(&config, api)?.forget_subscriptions();
            println!("{}", status.state.as_str());
        }
        Commands::Status => {
            let status = api.status().await?;
            println!("state: {}", status.state.as_str());
            println!("client id: {}", status.client_id.as_deref().unwrap_or("-"));
            if status.subscriptions.is_empty() {
                println!("subscriptions: -");
            } else {
                println!("subscriptions: {}", status.subscriptions.join(", "));
            }
        }
        Commands::Subscribe { topic } => {
            let session = open_session(&config, api)?;
            session.load_mirror();
            session.toggle_subscribe(&topic, true).await?;
            println!("subscribed to {}", topic.trim());
        }
        Commands::Unsubscribe { topic } => {
            let session = open_session(&config, api)?;
            session.load_mirror();
            session.toggle_subscribe(&topic, false).await?;
            println!("unsubscribed from {}", topic.trim());
        }
        Commands::SubscribeAll => {
            let session = open_session(&config, api)?;
            session.load_mirror();
            report_failures(session.subscribe_all().await)?;
            println!("subscribed: {}", session.state().subscriptions().join(", "));
        }
        Commands::UnsubscribeAll => {
            let session = open_session(&config, api)?;
            session.load_mirror();
            report_failures(session.unsubscribe_all().await)?;
            println!("unsubscribed from all topics");
        }
        Commands::Publish { topic, payload } => {
            let raw = read(payload)?;
            let shape = payload::validate(&raw)?;
            println!("publishing {} item(s) to {}", shape.items, topic);
            let state = ViewerState::new();
            let result = relay_client::publish_and_follow(
                &config.ws_url,
                &api,
                &state,
                &topic,
                &raw,
                |p| println!("{}", render::progress_line(p)),
            )
            .await?;
            println!("{}", render::result_line(&result));
        }
        Commands::Validate { payload } => {
            let shape = payload::validate(&read(payload)?)?;
            if shape.is_array {
                println!("valid: array of {} item(s)", shape.items);
            } else {
                println!("valid: single item");
            }
        }
        Commands::Format { payload } => {
            println!("{}", payload::format(&read(payload)?)?);
        }
        Commands::Results { limit } => {
            for r in api.recent_results(limit).await? {
                println!("{}", render::result_row(&r));
            }
        }
        Commands::Latest => {
            let state = ViewerState::new();
            for message in api.latest_messages().await? {
                state.on_message(&message);
            }
            let now = Instant::now();
            print!("{}", render::latest_table(&state.latest_messages_at(now), now));
        }
    }

    Ok(())
}

fn open_session(config: &ClientConfig, api: RelayerApi) -> anyhow::Result<Session> {
    let store = FileStore::default_location()?;
    tracing::debug!(path = %store.path().display(), "subscription store");
    Ok(ViewerSession::new(
        api,
        store,
        Arc::new(ViewerState::new()),
        config.client_id.clone(),
    ))
}

fn read(args: PayloadArgs) -> anyhow::Result<String> {
    payload::read_payload(args.payload, args.file.as_deref())
}

fn report_failures(failed: Vec<(String, anyhow::Error)>) -> anyhow::Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    for (topic, e) in &failed {
        eprintln!("{}: {}", topic, e);
    }
    anyhow::bail!("{} topic(s) failed", failed.len())
}

fn redraw(state: &ViewerState) {
    print!("\x1b[2J\x1b[H{}", render::screen(state, Instant::now()));
}

/// Follow the relayer until Ctrl-C: mirror messages, restore subscriptions
/// whenever the broker link comes up, redraw on debounced changes.
async fn run(config: &ClientConfig, session: Session) -> anyhow::Result<()> {
    let state = session.state().clone();
    session.load_mirror();

    let (tx, mut events) = mpsc::channel(256);
    let ws_url = config.ws_url.clone();
    let ws_state = state.clone();
    let client = tokio::spawn(async move {
        if let Err(e) = relay_client::run_ws_client(&ws_url, ws_state, tx).await {
            tracing::error!("relayer client stopped: {}", e);
        }
    });

    let mut changes = state.changes();
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    redraw(&state);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Dispatch::Hello(hello) if hello.connected => {
                        let n = session.restore().await;
                        tracing::info!(restored = n, "subscriptions restored");
                        redraw(&state);
                    }
                    Dispatch::ConnectionStatus(connected) => {
                        if connected {
                            let n = session.restore().await;
                            tracing::info!(restored = n, "subscriptions restored");
                        }
                        redraw(&state);
                    }
                    Dispatch::PublishResult(r) => {
                        tracing::info!("{}", render::result_line(&r));
                    }
                    _ => {}
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                redraw(&state);
            }
            _ = sweep.tick() => {
                let evicted = state.sweep_expired_at(Instant::now());
                tracing::debug!(evicted, "cache sweep");
                redraw(&state);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    client.abort();
    Ok(())
}

use clap::{Parser, ValueEnum};
use hub_writer::config::Action;
use hub_writer::hub::{FrameSink, HubClient};
use hub_writer::kafka::KafkaHubClient;
use hub_writer::message::{
    FrameDecoder, FrameEncoder, FrameReader, MessageMapper, DEFAULT_DELIMITER,
};
use hub_writer::table::{CsvRowSource, RowSource};
use hub_writer::{Config, Error, ExportCoordinator, ExportOptions, Result, ShutdownHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "hub-writer")]
#[command(about = "Streams table rows as messages into an event hub", long_about = None)]
struct Args {
    #[arg(long, value_name = "DIR", env = "KBC_DATADIR", default_value = "/data")]
    data_dir: PathBuf,

    #[arg(short, long, value_name = "FILE", help = "Defaults to <DATA_DIR>/config.json")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Overrides the action of the configuration file")]
    action: Option<CliAction>,

    #[arg(
        long,
        default_value = DEFAULT_DELIMITER,
        help = "Frame delimiter of export-frames and publish-frames"
    )]
    frame_delimiter: String,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CliAction {
    Run,
    TestConnection,
    ExportFrames,
    PublishFrames,
}

impl From<Action> for CliAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Run => CliAction::Run,
            Action::TestConnection => CliAction::TestConnection,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join("config.json"));
    info!("Loading configuration from {:?}", config_path);

    let config = match Config::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => exit_with(e, &[]),
    };
    let action = args.action.unwrap_or_else(|| config.action.into());

    if let Err(e) = execute(&args, &config, action).await {
        exit_with(e, &config.secrets());
    }
}

async fn execute(args: &Args, config: &Config, action: CliAction) -> Result<()> {
    let params = &config.parameters;
    let validate_for = match action {
        CliAction::TestConnection => Action::TestConnection,
        _ => Action::Run,
    };
    config.validate(validate_for)?;

    info!(
        action = ?action,
        hub = %params.hub.hub_name,
        mode = %params.mode,
        batch_size = params.batch_size,
        "Configuration summary"
    );

    let options = ExportOptions::from_parameters(params);
    match action {
        CliAction::TestConnection => {
            let client = kafka_client(config, &options)?;
            let mut coordinator = ExportCoordinator::new(client, options);
            let properties = coordinator.test_connection().await?;
            info!(
                hub = %properties.name,
                partitions = properties.partition_ids.len(),
                "Connection OK"
            );
            println!("{}", serde_json::json!({ "success": true }));
        }
        CliAction::Run => {
            let (source, mapper) = open_table(args, config)?;
            let client = kafka_client(config, &options)?;
            let mut coordinator = ExportCoordinator::new(client, options);
            watch_signals(coordinator.shutdown_handle());
            coordinator.run(source, mapper).await?;
        }
        CliAction::ExportFrames => {
            let (source, mapper) = open_table(args, config)?;
            let encoder = FrameEncoder::new(&args.frame_delimiter)?;
            let sink = FrameSink::new(
                params.hub.hub_name.clone(),
                tokio::io::stdout(),
                encoder,
                params.max_batch_bytes,
            );
            let mut coordinator = ExportCoordinator::new(Arc::new(sink), options);
            watch_signals(coordinator.shutdown_handle());
            coordinator.run(source, mapper).await?;
        }
        CliAction::PublishFrames => {
            let decoder = FrameDecoder::new(&args.frame_delimiter)?;
            let frames = FrameReader::new(tokio::io::stdin(), decoder);
            let client = kafka_client(config, &options)?;
            let mut coordinator = ExportCoordinator::new(client, options);
            watch_signals(coordinator.shutdown_handle());
            coordinator.run_frames(frames).await?;
        }
    }
    Ok(())
}

fn kafka_client(config: &Config, options: &ExportOptions) -> Result<Arc<dyn HubClient>> {
    let params = &config.parameters;
    let client = KafkaHubClient::new(&params.hub, params.max_batch_bytes, options.connect_timeout)?;
    Ok(Arc::new(client))
}

fn open_table(args: &Args, config: &Config) -> Result<(CsvRowSource, MessageMapper)> {
    let table_id = config.table_id()?;
    let path = config.table_csv_path(&args.data_dir)?;
    info!(table = %table_id, path = ?path, "Opening input table");

    let source = CsvRowSource::open(&path, table_id.as_str())?;
    let mapper = MessageMapper::from_parameters(&config.parameters, source.header(), &table_id)?;
    Ok((source, mapper))
}

fn watch_signals(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Shutdown signal received, stopping export");
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn exit_with(err: Error, secrets: &[&str]) -> ! {
    let err = err.sanitized(secrets);
    if err.is_user_error() {
        error!("{}", err);
    } else {
        error!(error = ?err, "Application error: {}", err);
    }
    std::process::exit(err.exit_code());
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("hub_writer=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hub_writer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

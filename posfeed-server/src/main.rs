use std::time::Duration;

use clap::Parser;
use posfeed_server::broadcaster::Broadcaster;
use posfeed_server::csv_writer::CsvPersister;
use posfeed_server::discovery::LogDiscovery;
use posfeed_server::sink::{DistributionSink, StdoutPrinter};
use posfeed_server::tracker::TrackerService;
use posfeed_server::{logging, Cli};
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    logging::init(
        args.verbose.log_level_filter(),
        args.session_log_dir.as_deref(),
        args.keep_logs,
    )?;

    let discovery = LogDiscovery::new(args.logs_dir(), args.suffix.clone());
    let logs = discovery.list_logs()?;
    log::info!(
        "Watching {} ({} logs present)",
        discovery.dir().display(),
        logs.len()
    );

    let broadcaster = Broadcaster::bind(args.listen_addr(), args.broadcast_rate).await?;

    let mut sink = DistributionSink::new();
    if let Some(path) = &args.csv {
        sink.add(Box::new(CsvPersister::create(path, args.csv_rate)?));
    }
    sink.add(Box::new(broadcaster.handle()));
    if args.output {
        sink.add(Box::new(StdoutPrinter::new()));
    }

    let service = TrackerService::new(
        discovery,
        args.tracker_config(),
        args.liveness_config(),
        args.poll_interval(),
        sink,
    )
    .restart_on_fatal(args.restart_on_fatal);

    Toplevel::new(move |s| async move {
        broadcaster.start(&s);
        s.start(SubsystemBuilder::new("tracker", move |s| service.run(s)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(1000))
    .await?;

    Ok(())
}

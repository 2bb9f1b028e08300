use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use idbx::tracing::prefix;
use idbx_core::{IdbValue, PutMode, TransactionId, TransactionMode};
use idbx_dispatch::{
    ChannelSender, CursorOptions, DatabaseHandle, DispatcherConfig, IdbOutcome, MessageSender,
    PrefetchPolicy, Request, WorkerLoop, WorkerRouter,
};
use idbx_memory::MemoryBackend;
use idbx_proto::{HostMessage, WorkerId};
use tokio::task::LocalSet;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "idbx-demo")]
#[command(about = "Fill an in-memory database and walk it with a prefetching cursor")]
#[command(version)]
struct Args {
    /// Number of records to store and iterate
    #[arg(short, long, default_value = "200")]
    records: u32,

    /// Plain continues before prefetching starts
    #[arg(long, default_value = "2")]
    threshold: u32,

    /// First prefetch batch size
    #[arg(long, default_value = "5")]
    min_prefetch: u32,

    /// Largest prefetch batch size
    #[arg(long, default_value = "100")]
    max_prefetch: u32,

    /// JSON dispatcher configuration (overrides the prefetch flags)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

const ORIGIN: &str = "https://demo.idbx";
const STORE: i64 = 1;

/// Counts cursor traffic on its way to the backend.
struct CountingSender {
    inner: ChannelSender,
    cursor_requests: Cell<usize>,
}

impl MessageSender for CountingSender {
    fn send(&self, message: HostMessage) -> idbx::Result<()> {
        if matches!(
            message,
            HostMessage::CursorContinue { .. }
                | HostMessage::CursorAdvance { .. }
                | HostMessage::CursorPrefetch { .. }
        ) {
            self.cursor_requests.set(self.cursor_requests.get() + 1);
        }
        self.inner.send(message)
    }
}

fn load_config(args: &Args) -> Result<DispatcherConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        let json = std::fs::read_to_string(path).map_err(idbx::Error::from)?;
        return Ok(DispatcherConfig::from_json(&json)?);
    }
    let config = DispatcherConfig::default().with_prefetch(PrefetchPolicy::new(
        args.threshold,
        args.min_prefetch,
        args.max_prefetch,
    ));
    config.validate()?;
    Ok(config)
}

/// Dispatch inbound messages until `request` has something to say.
async fn next_outcome(
    worker: &mut WorkerLoop,
    request: &mut Request,
) -> Result<IdbOutcome, Box<dyn std::error::Error>> {
    loop {
        if let Some(outcome) = request.try_next() {
            return match outcome {
                IdbOutcome::Error(err) => Err(err.into()),
                outcome => Ok(outcome),
            };
        }
        if !worker.turn().await {
            return Err("worker inbox closed".into());
        }
    }
}

fn unexpected(step: &str, outcome: IdbOutcome) -> Box<dyn std::error::Error> {
    format!("{step}: unexpected outcome {outcome:?}").into()
}

/// Store `records` generated values and wait until every put is acknowledged.
async fn fill_store(
    worker: &mut WorkerLoop,
    db: &DatabaseHandle,
    txn: TransactionId,
    records: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut puts: Vec<Request> = (0..records)
        .map(|i| {
            let value = IdbValue::new(format!("record {i}").into_bytes());
            db.put(txn, STORE, value, None, PutMode::AddOnly, Vec::new())
        })
        .collect();
    for put in &mut puts {
        match next_outcome(worker, put).await? {
            IdbOutcome::Key(Some(_)) => {}
            other => return Err(unexpected("put", other)),
        }
    }
    debug!("{} stored {} records", prefix::STORE, records);
    Ok(())
}

async fn run(args: Args, config: DispatcherConfig) -> Result<(), Box<dyn std::error::Error>> {
    let router = WorkerRouter::new();
    let (channel, host_rx) = ChannelSender::pair();
    let sender = Rc::new(CountingSender {
        inner: channel,
        cursor_requests: Cell::new(0),
    });

    let route = router.clone();
    let backend = tokio::spawn(idbx_memory::serve(MemoryBackend::new(), host_rx, move |m| {
        route.route(m)
    }));

    let mut worker = WorkerLoop::start(&router, WorkerId(1), sender.clone(), config);
    let dispatcher = worker.dispatcher();

    // Create the database and fill it inside the upgrade transaction
    let upgrade = TransactionId(1);
    let mut open = dispatcher.open(ORIGIN, "demo", Some(1), upgrade);
    let db = match next_outcome(&mut worker, &mut open.request).await? {
        IdbOutcome::UpgradeNeeded { database, .. } => database,
        other => return Err(unexpected("open", other)),
    };
    db.create_object_store(upgrade, STORE, "records", None, true);
    fill_store(&mut worker, &db, upgrade, args.records).await?;
    db.commit(upgrade);
    match next_outcome(&mut worker, &mut open.request).await? {
        IdbOutcome::Database { metadata, .. } => {
            info!("{} opened {} at version {}", prefix::OPEN, metadata.name, metadata.version)
        }
        other => return Err(unexpected("upgrade", other)),
    }

    // Walk every record the way a script's success handler would
    let txn = TransactionId(2);
    db.create_transaction(txn, vec![STORE], TransactionMode::ReadOnly);
    let started = Instant::now();
    let mut first = db.open_cursor(txn, CursorOptions::object_store(STORE));
    let cursor = match next_outcome(&mut worker, &mut first).await? {
        IdbOutcome::Cursor { cursor, .. } => cursor,
        IdbOutcome::Value(None) => {
            info!("{} nothing to iterate", prefix::DB);
            return Ok(());
        }
        other => return Err(unexpected("open cursor", other)),
    };
    let mut seen = 1usize;
    loop {
        let mut next = cursor.continue_next();
        cursor.post_success_handler_callback();
        match next_outcome(&mut worker, &mut next).await? {
            IdbOutcome::CursorContinue(entry) => {
                seen += 1;
                debug!("{} {:?} {:?}", prefix::PREFETCH, entry.key, cursor.prefetch_stats());
            }
            IdbOutcome::Value(None) => break,
            other => return Err(unexpected("continue", other)),
        }
    }
    let elapsed = started.elapsed();
    let stats = cursor.prefetch_stats();
    drop(cursor);
    db.commit(txn);

    info!(
        "{} iterated {} records with {} cursor requests in {:?}",
        prefix::DB,
        seen,
        sender.cursor_requests.get(),
        elapsed
    );
    info!("{} final prefetch amount {}", prefix::PREFETCH, stats.prefetch_amount);

    db.close();
    drop(db);
    drop(dispatcher);
    drop(open);
    drop(sender);
    worker.stop();

    let backend = backend.await?;
    info!(
        "{} backend holds {} records, {} connections",
        prefix::CLOSE,
        backend.record_count(ORIGIN, "demo", STORE).unwrap_or(0),
        backend.connection_count()
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    idbx::tracing::init_with_filter(&args.log_level);

    let config = load_config(&args)?;
    info!("Starting idbx demo");
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));
    info!("  Records: {}", args.records);
    info!("  Prefetch: {:?}", config.prefetch);

    // The dispatcher is single threaded; keep it on a LocalSet
    LocalSet::new().run_until(run(args, config)).await
}

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::app_error::GatewayResult;

/// Console-only subscriber, used by tests and local runs.
pub fn setup_local_tracing() -> GatewayResult<()> {
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    Ok(())
}

/// Node subscriber: console plus an hourly-rolling log file.
///
/// The returned guard must live as long as the process; dropping it stops
/// the non-blocking writer thread.
pub fn setup_tracing() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::hourly("logs", "gatemq.log");

    // the file half goes through the non-blocking worker so a slow disk
    // never stalls a streaming call
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    let writer = non_blocking.and(std::io::stdout);

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    worker_guard
}

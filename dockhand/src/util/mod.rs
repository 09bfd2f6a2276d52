pub mod process;

use dockhand_shared::constants::envs;
use tracing_appender::non_blocking::NonBlocking;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when neither `DOCKHAND_LOG` nor `RUST_LOG` is set.
const DEFAULT_FILTER: &str = "warn";

/// Install a stderr subscriber for applications that have none.
///
/// The filter comes from `DOCKHAND_LOG`, then `RUST_LOG`. Keep the returned
/// guard alive for as long as logs should be flushed.
pub fn init_tracing() -> WorkerGuard {
    let env_filter = EnvFilter::try_from_env(envs::DOCKHAND_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    register_to_tracing(non_blocking, env_filter);
    guard
}

/// Register a formatting layer writing to `non_blocking`.
///
/// Does nothing if a global subscriber is already installed.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}

//! Shared constants
//!
//! Values that the host-side engine and every exec backend must agree on.

/// Signal numbers as seen *inside* the container.
///
/// These are Linux numbers and deliberately do not come from the host's libc,
/// which may disagree (e.g. a macOS host talking to a Linux container).
pub mod signals {
    pub const SIGHUP: i32 = 1;
    pub const SIGINT: i32 = 2;
    pub const SIGKILL: i32 = 9;
    pub const SIGTERM: i32 = 15;

    /// Exit codes above this value mean "terminated by signal (code - 128)"
    /// for shells and for the Docker exec API.
    pub const SIGNAL_EXIT_BASE: i32 = 128;
}

/// Exec session timing.
pub mod exec {
    use std::time::Duration;

    /// Interval between exec status inspections while a process runs.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Once a process is terminal, output collection stops after this long
    /// without a new chunk. Background children can hold the output pipes
    /// open forever.
    pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

    /// Chunks buffered per output stream before the pump waits for a reader.
    pub const OUTPUT_CHANNEL_DEPTH: usize = 64;

    /// Default grace period between SIGTERM and SIGKILL.
    pub const DEFAULT_KILL_AFTER: Duration = Duration::from_secs(1);
}

/// Archive transfer sizing.
pub mod archive {
    /// Size of a single chunk moved through an archive stream.
    pub const CHUNK_SIZE: usize = 64 * 1024;

    /// Chunks buffered between the tar codec and the transport.
    pub const CHANNEL_DEPTH: usize = 8;

    /// Mode used by `write` when the caller does not pick one.
    pub const DEFAULT_FILE_MODE: u32 = 0o644;
}

/// Interpreter defaults.
pub mod shell {
    /// Default interpreter inside the container.
    pub const DEFAULT_PATH: &str = "/bin/sh";

    /// Default working directory inside the container.
    pub const DEFAULT_WORKDIR: &str = "/";
}

/// Host-side environment variables.
pub mod envs {
    /// Endpoint override for the container engine connection.
    pub const DOCKER_HOST: &str = "DOCKER_HOST";

    /// Log filter for `dockhand::util::init_tracing`.
    pub const DOCKHAND_LOG: &str = "DOCKHAND_LOG";
}

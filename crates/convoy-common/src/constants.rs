//! System-wide constants and defaults.

/// Binary name for the CLI.
pub const BIN_NAME: &str = "convoy";

/// Manifest path used when none is given.
pub const DEFAULT_MANIFEST: &str = "/etc/convoy/manifest.yml";

/// Container runtime binary used by the Docker CLI backend.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Grace period between SIGTERM and SIGKILL when stopping a container.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Name of the environment function that substitutes a fetched body.
pub const FETCH_FUNCTION: &str = "fetch";

/// Key of the hostname marker that defers to the engine default.
pub const HOSTNAME_USE_DEFAULT: &str = "use-default";

/// Derived variable carrying the host's placement zone.
pub const ENV_DATACENTER: &str = "DATACENTER";

/// Derived variable carrying the host's own hostname.
pub const ENV_HOST_HOSTNAME: &str = "HOST_HOSTNAME";

/// Derived variable carrying the syslog target.
pub const ENV_SYSLOG_ADDRESS: &str = "SYSLOG_ADDRESS";

/// Syslog address reachable from `host` network mode.
pub const SYSLOG_LOOPBACK: &str = "127.0.0.1";

/// Syslog address reachable from `bridge` network mode (docker0 gateway).
pub const SYSLOG_BRIDGE_GATEWAY: &str = "172.17.0.1";

/// Port the host syslog daemon listens on.
pub const SYSLOG_PORT: u16 = 514;

/// Infix of transient pre-start hook container names.
pub const HOOK_CONTAINER_INFIX: &str = "prestart";

/// Infix of transient one-off container names.
pub const ONE_OFF_CONTAINER_INFIX: &str = "run";

//! Application constants
//!
//! Protocol and timing values shared by the transports, the layout machine
//! and the session multiplexer.

/// Directory name under the platform data/config dirs
pub const APP_DIR_NAME: &str = "canopy";

/// Prefix of every PTY session identifier
pub const PTY_SESSION_PREFIX: &str = "pty-";

/// Separates a base path from a duplicate discriminator (`/ws/api#1712345678`).
/// Not legal in the workspace paths the app manages.
pub const DUPLICATE_SEPARATOR: char = '#';

/// Replacement for path separators inside session identifiers
pub const SESSION_ID_SAFE_CHAR: char = '-';

/// Minimum spacing between two layout broadcasts for the same workspace
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 300;

/// Quiet period before a PTY resize is sent while the panel is being dragged
pub const DEFAULT_RESIZE_DEBOUNCE_MS: u64 = 100;

/// Poll interval for `pty_read` in request/response mode
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// How long the panel stays shrunk during a resize nudge
pub const DEFAULT_NUDGE_DELAY_MS: u64 = 50;

/// WebSocket reconnect backoff bounds
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 500;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;

/// Default browser-mode backend address
pub const DEFAULT_HTTP_BASE_URL: &str = "http://127.0.0.1:7420";

/// Smallest terminal the fit computation will produce
pub const MIN_COLS: u16 = 20;
pub const MIN_ROWS: u16 = 5;

/// Environment variables
pub const ENV_TRANSPORT: &str = "CANOPY_TRANSPORT";
pub const ENV_IPC_PORT: &str = "CANOPY_IPC_PORT";
pub const ENV_HTTP_URL: &str = "CANOPY_HTTP_URL";
pub const ENV_WS_URL: &str = "CANOPY_WS_URL";
pub const ENV_LOG_LEVEL: &str = "CANOPY_LOG_LEVEL";
pub const ENV_LOG_STDERR: &str = "CANOPY_LOG_STDERR";
pub const ENV_LOG_DIR: &str = "CANOPY_LOG_DIR";
pub const ENV_LOG_DISABLE: &str = "CANOPY_LOG_DISABLE";

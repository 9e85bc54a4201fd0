/// Prefix of every personal room (`user:<id>`)
pub const PERSONAL_ROOM_PREFIX: &str = "user:";

/// Prefix of every direct conversation room (`dm:<uuid>`)
pub const DIRECT_ROOM_PREFIX: &str = "dm:";

/// Maximum message content size in bytes
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Characters kept in a conversation-touched preview
pub const PREVIEW_CHARS: usize = 80;

/// Per-connection outbound event queue capacity
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Seconds without an inbound frame before a WebSocket is closed
pub const WS_IDLE_TIMEOUT_SECS: u64 = 90;

/// Client-side window during which identical content is not resubmitted
pub const SEND_COOLDOWN_MS: u64 = 2_000;

/// Default page size for message listing
pub const DEFAULT_MESSAGE_PAGE: u32 = 200;

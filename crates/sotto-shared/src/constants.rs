/// Maximum WebSocket frame size and maximum decoded ciphertext size (10 KiB)
pub const MAX_MESSAGE_SIZE: usize = 10_240;

/// Capacity of a session's outbound frame channel
pub const OUTBOUND_BUFFER: usize = 256;

/// How long a connection may stay silent before the read side gives up (seconds)
pub const PONG_WAIT_SECS: u64 = 60;

/// Keepalive ping cadence; must be shorter than [`PONG_WAIT_SECS`] (seconds)
pub const PING_PERIOD_SECS: u64 = 54;

/// Deadline for a single transport write (seconds)
pub const WRITE_WAIT_SECS: u64 = 10;

/// Maximum allowed clock skew on auth timestamps (seconds)
pub const AUTH_MAX_SKEW_SECS: i64 = 300;

/// Default per-device message rate limit (events per minute)
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 120;

/// Sliding rate-limit window (seconds)
pub const RATE_WINDOW_SECS: u64 = 60;

/// Chat and invitation lifetime in the store (seconds)
pub const CHAT_TTL_SECS: u64 = 24 * 60 * 60;

/// Lifetime of a used invitation marker, kept only for replay rejection (seconds)
pub const INVITE_USED_TTL_SECS: u64 = 60 * 60;

/// Queued ciphertext lifetime (seconds)
pub const QUEUED_MESSAGE_TTL_SECS: u64 = 5 * 60;

/// Key bundle and prekey lifetime (seconds)
pub const KEY_BUNDLE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Push registration lifetime, matches the chat lifetime (seconds)
pub const PUSH_TTL_SECS: u64 = 24 * 60 * 60;

/// Abuse warning lifetime (seconds)
pub const WARNING_TTL_SECS: u64 = 24 * 60 * 60;

/// Window for duplicate-content and cadence abuse counters (seconds)
pub const ABUSE_COUNTER_TTL_SECS: u64 = 5 * 60;

/// Duplicate-content sends of the same ciphertext hash that trip the abuse path
pub const DUPLICATE_CONTENT_LIMIT: i64 = 10;

/// Sub-[`MIN_MESSAGE_GAP_MS`] sends within the counter window that trip the abuse path
pub const BOT_CADENCE_LIMIT: i64 = 20;

/// Minimum human-plausible gap between two sends (milliseconds)
pub const MIN_MESSAGE_GAP_MS: i64 = 500;

/// Declared chat message TTLs a client may choose from (seconds)
pub const VALID_CHAT_MESSAGE_TTLS: [u32; 5] = [5, 30, 60, 180, 300];

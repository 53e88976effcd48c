/// The relay silently drops any inbound frame larger than this.
pub const RELAY_READ_LIMIT_BYTES: usize = 64 * 1024;

/// Clients refuse to send an envelope larger than this.
pub const CLIENT_SEND_LIMIT_BYTES: usize = 60 * 1024;

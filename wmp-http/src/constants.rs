//! Endpoint paths, header names and defaults of the provider protocol.

use std::time::Duration;

/// Path segments of the session collection, relative to the provider URL.
pub const SESSIONS_PATH: [&str; 3] = ["api", "me", "sessions"];

/// Final path segment of a session's streaming channel.
pub const CHANNEL_SEGMENT: &str = "channel";

/// Link relation naming the streaming channel of a session resource.
pub const CHANNEL_REL: &str = "channel";

/// Default timeout of each negotiation request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

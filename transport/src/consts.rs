use std::time::Duration;

/// How long an outbound request waits for its response datagram.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram we are willing to build or accept. Anything bigger is
/// a protocol violation, not a fragmentation candidate.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Name advertised in request envelopes and contact records.
pub const PROTOCOL_NAME: &str = "udp";

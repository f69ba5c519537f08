use std::fmt;
use std::sync::Arc;

use instant::Instant;

use crate::proto::Protocol;
use crate::Id;

/// Addressable handle for a remote peer: its identifier, network location
/// and the outbound protocol used to reach it.
///
/// Equality is by id alone, so a contact stays the same peer even when its
/// advertised address drifts.
#[derive(Clone, Debug)]
pub struct Contact {
    pub id: Id,
    pub host: String,
    pub port: u16,
    pub protocol: Arc<dyn Protocol>,
    pub last_seen: Instant,
}

impl Contact {
    pub fn new(id: Id, host: impl Into<String>, port: u16, protocol: Arc<dyn Protocol>) -> Self {
        Contact {
            id,
            host: host.into(),
            port,
            protocol,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

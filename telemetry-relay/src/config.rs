use crate::cli::ServeArgs;

pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Welcome plus one replay per cache slot must fit before the writer starts.
pub(crate) const MIN_OUTBOUND_QUEUE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// Cache frame/stats traffic and fan it out to consumers.
    #[default]
    Relay,
    /// Answer every message on the connection that sent it; nothing is
    /// cached or shared.
    Echo,
}

impl RelayMode {
    pub fn welcome(self) -> &'static str {
        match self {
            RelayMode::Relay => "Connected to telemetry relay",
            RelayMode::Echo => "Connected to echo test server",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mode: RelayMode,
    /// Messages buffered per connection before the relay drops it as too slow.
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::Relay,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl RelayConfig {
    pub fn echo() -> Self {
        Self {
            mode: RelayMode::Echo,
            ..Self::default()
        }
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.outbound_queue.max(MIN_OUTBOUND_QUEUE)
    }
}

impl From<&ServeArgs> for RelayConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            mode: if args.echo {
                RelayMode::Echo
            } else {
                RelayMode::Relay
            },
            outbound_queue: args.outbound_queue,
        }
    }
}

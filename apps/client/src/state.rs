use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected { registered: bool },
    Reconnecting { attempt: u32, delay: Duration },
    Failed { reason: String },
}

/// What the UI shows for a connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Online,
    Connecting,
    Reconnecting,
    /// Disconnected for good; the user has to retry.
    Offline,
}

impl ConnectionState {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Connected { registered: true })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn indicator(&self) -> Indicator {
        match self {
            Self::Connected { registered: true } => Indicator::Online,
            Self::Connecting { attempt: 1 } | Self::Connected { registered: false } => {
                Indicator::Connecting
            }
            Self::Connecting { .. } | Self::Reconnecting { .. } => Indicator::Reconnecting,
            Self::Disconnected | Self::Failed { .. } => Indicator::Offline,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConnectionState, Indicator};

    #[test]
    fn retrying_is_distinguishable_from_failed() {
        let retrying = ConnectionState::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(1),
        };
        assert_eq!(retrying.indicator(), Indicator::Reconnecting);
        assert!(!retrying.is_terminal());

        let failed = ConnectionState::Failed {
            reason: "gave up".to_string(),
        };
        assert_eq!(failed.indicator(), Indicator::Offline);
        assert!(failed.is_terminal());
    }
}

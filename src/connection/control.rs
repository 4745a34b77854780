//! The DCP control-option surface.
//!
//! Recognized keys are a closed enumeration with typed values; anything else
//! fails at ingress with `InvalidArgument`, matching Design Notes
//! ("define the recognized options as a closed enumeration with typed
//! values; unknown keys fail at ingress").

use std::time::Duration;

use crate::error::DcpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlOption {
    SetNoopInterval(Duration),
    EnableNoop(bool),
    SendStreamEndOnClientCloseStream(bool),
    ForceValueCompression(bool),
    SetPriority(Priority),
    EnableSyncReplication(bool),
    SupportsCursorDropping(bool),
    SupportsSnappy(bool),
}

impl ControlOption {
    /// Parses a `(key, value)` pair from a `Control` message. Unknown keys
    /// are `InvalidArgument`, never merely ignored.
    pub fn parse(key: &str, value: &str) -> Result<ControlOption, DcpError> {
        match key {
            "set_noop_interval" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| DcpError::InvalidArgument(format!("invalid noop interval: {}", value)))?;
                Ok(ControlOption::SetNoopInterval(Duration::from_secs(secs)))
            }
            "enable_noop" => Ok(ControlOption::EnableNoop(parse_bool(value)?)),
            "send_stream_end_on_client_close_stream" => {
                Ok(ControlOption::SendStreamEndOnClientCloseStream(parse_bool(value)?))
            }
            "force_value_compression" => Ok(ControlOption::ForceValueCompression(parse_bool(value)?)),
            "set_priority" => {
                let p = match value {
                    "low" => Priority::Low,
                    "med" | "medium" => Priority::Medium,
                    "high" => Priority::High,
                    other => {
                        return Err(DcpError::InvalidArgument(format!("invalid priority: {}", other)))
                    }
                };
                Ok(ControlOption::SetPriority(p))
            }
            "enable_sync_replication" => Ok(ControlOption::EnableSyncReplication(parse_bool(value)?)),
            "supports_cursor_dropping" => Ok(ControlOption::SupportsCursorDropping(parse_bool(value)?)),
            "supports_snappy" => Ok(ControlOption::SupportsSnappy(parse_bool(value)?)),
            other => Err(DcpError::InvalidArgument(format!("unrecognized control key: {}", other))),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, DcpError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(DcpError::InvalidArgument(format!("invalid boolean: {}", other))),
    }
}

/// The subset of negotiated control options that drive connection behavior,
/// kept as plain fields rather than a map so transitions stay exhaustive.
#[derive(Debug, Clone)]
pub struct ControlState {
    pub noop_interval: Duration,
    pub noop_enabled: bool,
    pub send_stream_end_on_client_close_stream: bool,
    pub force_value_compression: bool,
    pub priority: Priority,
    pub sync_replication_enabled: bool,
    pub supports_cursor_dropping: bool,
    pub consumer_supports_snappy: bool,
}

impl Default for ControlState {
    fn default() -> ControlState {
        ControlState {
            noop_interval: Duration::from_secs(60),
            noop_enabled: false,
            send_stream_end_on_client_close_stream: false,
            force_value_compression: false,
            priority: Priority::Medium,
            sync_replication_enabled: false,
            supports_cursor_dropping: false,
            consumer_supports_snappy: false,
        }
    }
}

impl ControlState {
    /// Applies a parsed control option, validating cross-field invariants
    /// such as `set_noop_interval` dividing the connection-manager interval.
    pub fn apply(
        &mut self,
        option: ControlOption,
        connection_manager_interval: Duration,
    ) -> Result<(), DcpError> {
        match option {
            ControlOption::SetNoopInterval(d) => {
                // The manager interval must evenly divide the requested noop
                // interval, since the noop timer can only fire on a manager
                // tick, not the reverse.
                let mgr = connection_manager_interval.as_secs();
                let requested = d.as_secs();
                if mgr == 0 || requested == 0 || requested % mgr != 0 {
                    return Err(DcpError::InvalidArgument(format!(
                        "noop interval {}s is not a multiple of the connection manager interval {}s",
                        requested, mgr
                    )));
                }
                self.noop_interval = d;
            }
            ControlOption::EnableNoop(b) => self.noop_enabled = b,
            ControlOption::SendStreamEndOnClientCloseStream(b) => {
                self.send_stream_end_on_client_close_stream = b
            }
            ControlOption::ForceValueCompression(b) => self.force_value_compression = b,
            ControlOption::SetPriority(p) => self.priority = p,
            ControlOption::EnableSyncReplication(b) => self.sync_replication_enabled = b,
            ControlOption::SupportsCursorDropping(b) => self.supports_cursor_dropping = b,
            ControlOption::SupportsSnappy(b) => self.consumer_supports_snappy = b,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_interval_must_divide_manager_interval() {
        let mut state = ControlState::default();
        let mgr = Duration::from_secs(2);

        let err = state
            .apply(ControlOption::parse("set_noop_interval", "1").unwrap(), mgr)
            .unwrap_err();
        assert!(matches!(err, DcpError::InvalidArgument(_)));

        state
            .apply(ControlOption::parse("set_noop_interval", "2").unwrap(), mgr)
            .unwrap();
        assert_eq!(state.noop_interval, Duration::from_secs(2));
    }

    #[test]
    fn unknown_key_is_invalid_argument() {
        let err = ControlOption::parse("not_a_real_key", "true").unwrap_err();
        assert!(matches!(err, DcpError::InvalidArgument(_)));
    }
}

use crate::event::Event;
use std::fmt;

/// Phase of the at-most-one active call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallStatus {
    /// Initial and terminal state; a new call re-enters from here.
    #[default]
    Disconnected,
    Incoming,
    Outgoing,
    Ringing,
    OnHold,
    Established,
    /// Transient overlay carrying a verbatim status label from the agent's
    /// call-debug output.
    Debug(String),
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Disconnected => write!(f, "DISCONNECTED"),
            CallStatus::Incoming => write!(f, "INCOMING"),
            CallStatus::Outgoing => write!(f, "OUTGOING"),
            CallStatus::Ringing => write!(f, "RINGING"),
            CallStatus::OnHold => write!(f, "ON HOLD"),
            CallStatus::Established => write!(f, "ESTABLISHED"),
            CallStatus::Debug(label) => write!(f, "{}", label),
        }
    }
}

/// Mirror of the agent-side call state, owned by the reader loop.
///
/// Invariant: `remote_number` is `Some` whenever `status` is anything other
/// than `Disconnected`; any transition to `Disconnected` clears the number
/// and resets the mute flag.
#[derive(Debug, Clone, Default)]
pub struct CallSession {
    pub remote_number: Option<String>,
    pub status: CallStatus,
    pub mic_muted: bool,
    pub last_timestamp: Option<String>,
}

/// Callback-dispatch instruction produced by applying an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Ready,
    AccountsMissing,
    LoginOk,
    LoginFailed(String),
    IncomingCall(String),
    CallRejected(String),
    OutgoingCall(String),
    Ringing,
    Established,
    /// Fired iff the visible status actually changed.
    StatusChanged(CallStatus),
    CallTimestamp(String),
    CallEnded {
        reason: String,
        number: Option<String>,
    },
    MicMuted,
    MicUnmuted,
    DtmfReceived(char, u32),
    AudioSourceFailed,
    Stopping,
    Unclassified(String),
}

impl CallSession {
    /// Apply one classified event; total over every (status, event) pair.
    pub fn apply(&mut self, event: &Event) -> Vec<Notification> {
        let mut out = Vec::new();
        match event {
            Event::Ready => out.push(Notification::Ready),
            Event::NoAccounts => out.push(Notification::AccountsMissing),
            Event::LoginOk => out.push(Notification::LoginOk),
            Event::LoginFailed(line) => out.push(Notification::LoginFailed(line.clone())),
            Event::IncomingCall(number) => {
                self.remote_number = Some(number.clone());
                self.set_status(CallStatus::Incoming, &mut out);
                out.push(Notification::IncomingCall(number.clone()));
            }
            Event::CallRejected(number) => out.push(Notification::CallRejected(number.clone())),
            Event::Ringing => {
                self.set_status(CallStatus::Ringing, &mut out);
                out.push(Notification::Ringing);
            }
            Event::Connecting(number) => {
                self.remote_number = Some(number.clone());
                self.set_status(CallStatus::Outgoing, &mut out);
                out.push(Notification::OutgoingCall(number.clone()));
            }
            Event::Established => {
                self.set_status(CallStatus::Established, &mut out);
                out.push(Notification::Established);
            }
            Event::Hold => self.set_status(CallStatus::OnHold, &mut out),
            Event::Terminated(duration) => {
                self.set_status(CallStatus::Disconnected, &mut out);
                self.last_timestamp = Some(duration.clone());
                out.push(Notification::CallTimestamp(duration.clone()));
            }
            Event::Muted => {
                self.mic_muted = true;
                out.push(Notification::MicMuted);
            }
            Event::Unmuted => {
                self.mic_muted = false;
                out.push(Notification::MicUnmuted);
            }
            Event::SessionClosed { reason, number } => {
                self.set_status(CallStatus::Disconnected, &mut out);
                out.push(Notification::CallEnded {
                    reason: reason.clone(),
                    number: number.clone(),
                });
            }
            Event::NoActiveCalls => self.set_status(CallStatus::Disconnected, &mut out),
            Event::DebugStatus(label) => {
                self.set_status(CallStatus::Debug(label.clone()), &mut out)
            }
            Event::CallTimestamp(ts) => {
                self.last_timestamp = Some(ts.clone());
                out.push(Notification::CallTimestamp(ts.clone()));
            }
            Event::AudioSourceError => out.push(Notification::AudioSourceFailed),
            Event::ProcessStopping => out.push(Notification::Stopping),
            Event::DtmfReceived(digit, duration) => {
                out.push(Notification::DtmfReceived(*digit, *duration))
            }
            Event::Unclassified(line) => out.push(Notification::Unclassified(line.clone())),
        }
        out
    }

    /// Collapse to the no-active-call state without emitting notifications.
    /// Used for optimistic caller-side updates and process-death cleanup.
    pub fn reset(&mut self) {
        self.remote_number = None;
        self.status = CallStatus::Disconnected;
        self.mic_muted = false;
    }

    fn set_status(&mut self, status: CallStatus, out: &mut Vec<Notification>) {
        if status == self.status {
            return;
        }
        if status == CallStatus::Disconnected {
            self.remote_number = None;
            self.mic_muted = false;
        }
        self.status = status.clone();
        out.push(Notification::StatusChanged(status));
    }
}

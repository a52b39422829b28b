use once_cell::sync::Lazy;
use regex::Regex;

/// Structured classification of one raw console line from the agent.
///
/// The agent's console output is a reverse-engineered, order-sensitive text
/// protocol; every variant corresponds to one recognized line shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready,
    NoAccounts,
    LoginOk,
    LoginFailed(String),
    IncomingCall(String),
    CallRejected(String),
    Ringing,
    Connecting(String),
    Established,
    Hold,
    /// Call ended, carries the reported duration (`MM:SS`).
    Terminated(String),
    Muted,
    Unmuted,
    SessionClosed {
        reason: String,
        number: Option<String>,
    },
    NoActiveCalls,
    /// Verbatim status label from a `===== Call debug =====` block.
    DebugStatus(String),
    /// Elapsed-time token from the active-calls listing. Does not change
    /// call status.
    CallTimestamp(String),
    AudioSourceError,
    ProcessStopping,
    DtmfReceived(char, u32),
    Unclassified(String),
}

static DTMF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"received DTMF: '(.)' \(duration=(\d+)\)").unwrap());

const ACTIVE_CALLS_HEADER: &str = "--- List of active calls (1): ---";

/// Ordered, first-match-wins line classifier.
///
/// Holds the previously processed line (for duplicate suppression and the
/// two-line active-calls listing) and the last surfaced call timestamp.
pub struct Classifier {
    prev_line: String,
    last_timestamp: Option<String>,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            prev_line: String::new(),
            last_timestamp: None,
        }
    }

    /// Classify one raw console line. Returns `None` when the line repeats
    /// the previously processed line, or when a rule matched but surfaced
    /// nothing (a matched rule consumes its line either way).
    pub fn classify(&mut self, raw: &str, active_number: Option<&str>) -> Option<Event> {
        let line = raw.trim();
        if line == self.prev_line {
            return None;
        }
        let event = self.classify_line(line, active_number);
        self.prev_line = line.to_string();
        event
    }

    fn classify_line(&mut self, out: &str, active_number: Option<&str>) -> Option<Event> {
        if out.contains("baresip is ready.") {
            return Some(Event::Ready);
        }
        if out.contains("account: No SIP accounts found") {
            return Some(Event::NoAccounts);
        }
        if out.contains("200 OK") {
            return Some(Event::LoginOk);
        }
        if out.contains("ua: SIP register failed:")
            || out.contains("401 Unauthorized")
            || out.contains("Register: Destination address required")
            || out.contains("Register: Connection timed out")
        {
            return Some(Event::LoginFailed(out.to_string()));
        }
        if let Some(rest) = substr_after(out, "Incoming call from: ") {
            let number = rest
                .split(" - (press 'a' to accept)")
                .next()
                .unwrap_or("")
                .trim();
            return Some(Event::IncomingCall(number.to_string()));
        }
        if out.contains("call: rejecting incoming call from ") {
            let rest = substr_after(out, "rejecting incoming call from ").unwrap_or("");
            let number = rest.split(' ').next().unwrap_or("").trim();
            return Some(Event::CallRejected(number.to_string()));
        }
        if out.contains("call: SIP Progress: 180 Ringing") {
            return Some(Event::Ringing);
        }
        if let Some(rest) = substr_after(out, "call: connecting to '") {
            let number = rest.split('\'').next().unwrap_or("");
            return Some(Event::Connecting(number.to_string()));
        }
        if out.contains("Call established:") {
            return Some(Event::Established);
        }
        if out.contains("call: hold ") {
            return Some(Event::Hold);
        }
        if out.contains("Call with ") && out.contains("terminated (duration: ") {
            let rest = substr_after(out, "terminated (duration: ").unwrap_or("");
            let duration = rest.strip_suffix(')').unwrap_or(rest);
            return Some(Event::Terminated(duration.to_string()));
        }
        if out.contains("call muted") {
            return Some(Event::Muted);
        }
        if out.contains("call un-muted") {
            return Some(Event::Unmuted);
        }
        if let Some(rest) = substr_after(out, "session closed:") {
            let reason = rest.trim().to_string();
            let number = out
                .split_once(": session closed:")
                .map(|(n, _)| n.trim().to_string());
            return Some(Event::SessionClosed { reason, number });
        }
        if out.contains("(no active calls)") {
            return Some(Event::NoActiveCalls);
        }
        if out.contains("===== Call debug ") {
            let label = out
                .split('(')
                .nth(1)
                .and_then(|s| s.split(')').next())
                .unwrap_or("")
                .to_string();
            return Some(Event::DebugStatus(label));
        }
        if self.prev_line.contains(ACTIVE_CALLS_HEADER) {
            // Second line of the active-calls listing; the elapsed time sits
            // between the line tag and the status column.
            if out.contains("ESTABLISHED") && active_number.map_or(false, |n| out.contains(n)) {
                if let Some(rest) = substr_after(out, "[line 1]") {
                    let ts = rest.split("ESTABLISHED").next().unwrap_or("").trim();
                    if !ts.is_empty() && self.last_timestamp.as_deref() != Some(ts) {
                        self.last_timestamp = Some(ts.to_string());
                        return Some(Event::CallTimestamp(ts.to_string()));
                    }
                }
            }
            return None;
        }
        if out.contains("failed to set audio-source (No such device)") {
            return Some(Event::AudioSourceError);
        }
        if out.contains("terminated by signal") || out.contains("ua: stop all") {
            return Some(Event::ProcessStopping);
        }
        if out.contains("received DTMF:") {
            if let Some(caps) = DTMF_RE.captures(out) {
                let digit = caps.get(1).and_then(|m| m.as_str().chars().next())?;
                let duration = caps.get(2).and_then(|m| m.as_str().parse().ok())?;
                return Some(Event::DtmfReceived(digit, duration));
            }
            return None;
        }
        Some(Event::Unclassified(out.to_string()))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn substr_after<'a>(haystack: &'a str, marker: &str) -> Option<&'a str> {
    haystack.find(marker).map(|i| &haystack[i + marker.len()..])
}

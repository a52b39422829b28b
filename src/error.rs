use thiserror::Error;

/// Failure taxonomy for the agent session.
///
/// Only `Launch` and `Registration` end the session; everything else is
/// recovered locally (logged no-op, respawn, or forced hang-up).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to launch agent process {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent not ready, command dropped: {0}")]
    NotReady(String),

    #[error("SIP registration failed: {0}")]
    Registration(String),

    #[error("agent process exited")]
    ProcessDied,

    #[error("audio device unavailable")]
    AudioDevice,

    #[error("no active call")]
    NoActiveCall,

    #[error("invalid dtmf digits: {0}")]
    InvalidDtmf(String),

    #[error("media processing failed: {0}")]
    Media(#[source] anyhow::Error),

    #[error("agent session stopped")]
    Stopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

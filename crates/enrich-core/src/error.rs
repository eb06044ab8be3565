/// Process-level error conditions (§7 items 6 and 8).
///
/// Per-event failures never surface here — they are converted to `BadRow`
/// values and routed to the bad sink. Only sink failures and startup
/// failures reach this type.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("sink write failed terminally: {0}")]
    SinkFailure(String),

    #[error("startup failure: {0}")]
    Startup(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

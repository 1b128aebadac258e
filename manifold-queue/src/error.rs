#[derive(Debug)]
pub enum QueueError {
    /// Could not reach or authenticate with the broker.
    Connect(String),
    /// Publish was rejected or timed out.
    Publish(String),
    /// Subscription setup failed, or the topic already has a subscriber.
    Subscribe(String),
    /// Payload could not be encoded or decoded.
    Codec(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Connect(msg) => write!(f, "queue connect error: {msg}"),
            QueueError::Publish(msg) => write!(f, "queue publish error: {msg}"),
            QueueError::Subscribe(msg) => write!(f, "queue subscribe error: {msg}"),
            QueueError::Codec(msg) => write!(f, "queue codec error: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Codec(err.to_string())
    }
}

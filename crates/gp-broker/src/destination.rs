use std::fmt;

/// Delivery semantics of a destination.
///
/// The kind is fixed at creation: sending or subscribing through the wrong-kind
/// API is a configuration error reported at registration, never deferred to
/// first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    /// Broadcast: every subscriber connected at publish time receives a copy.
    Topic,
    /// Point-to-point: one message goes to exactly one competing consumer.
    Queue,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Topic => write!(f, "topic"),
            DestinationKind::Queue => write!(f, "queue"),
        }
    }
}

/// A named broker destination. Identity is `(name, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
}

impl Destination {
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
        }
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_includes_kind() {
        let topic = Destination::topic("stage");
        let queue = Destination::queue("stage");
        assert_ne!(topic, queue);
        assert_eq!(topic, Destination::topic("stage"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Destination::topic("stage").to_string(), "topic 'stage'");
        assert_eq!(Destination::queue("alert").to_string(), "queue 'alert'");
    }
}

/// Role a worker currently plays on the shared topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkerMode {
    /// Subscribed to the topic, monitoring the speaker's lifesign.
    #[default]
    Listener,
    /// Broadcasting on the topic and signaling its own lifesign.
    Speaker,
}

impl WorkerMode {
    /// Convert to string for logs and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Speaker => "speaker",
        }
    }

    /// Parse from string. Unknown names yield `None`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "listener" => Some(Self::Listener),
            "speaker" => Some(Self::Speaker),
            _ => None,
        }
    }

    pub fn is_speaker(&self) -> bool {
        matches!(self, Self::Speaker)
    }
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

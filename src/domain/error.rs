use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised while producing a prop value.
///
/// Prop failures are never fatal to a render: the resolver logs them and
/// leaves the key out of the page.
#[derive(Debug, Error)]
pub enum PropError {
    #[error("prop resolver failed: {message}")]
    Failed { message: String },
    #[error("prop resolver failed: {source}")]
    Source {
        #[source]
        source: BoxError,
    },
    #[error("prop value could not be serialised: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("prop evaluation cancelled")]
    Cancelled,
}

impl PropError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn other(source: impl Into<BoxError>) -> Self {
        Self::Source {
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } | Self::Source { .. } => "failed",
            Self::Serialize(_) => "serialize",
            Self::Cancelled => "cancelled",
        }
    }
}

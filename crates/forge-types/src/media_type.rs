use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Media type of a manifest layer, per spec §3/§6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MediaType {
    Model,
    Adapter,
    Projector,
    Template,
    System,
    License,
    Params,
    Messages,
    /// `application/vnd.docker.container.image.v1+json`, used for the config layer.
    Config,
}

#[derive(Debug, Error)]
#[error("unknown media type {0:?}")]
pub struct MediaTypeError(String);

impl MediaType {
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaType::Model => "application/vnd.ollama.image.model",
            MediaType::Adapter => "application/vnd.ollama.image.adapter",
            MediaType::Projector => "application/vnd.ollama.image.projector",
            MediaType::Template => "application/vnd.ollama.image.template",
            MediaType::System => "application/vnd.ollama.image.system",
            MediaType::License => "application/vnd.ollama.image.license",
            MediaType::Params => "application/vnd.ollama.image.params",
            MediaType::Messages => "application/vnd.ollama.image.messages",
            MediaType::Config => "application/vnd.docker.container.image.v1+json",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "application/vnd.ollama.image.model" => MediaType::Model,
            "application/vnd.ollama.image.adapter" => MediaType::Adapter,
            "application/vnd.ollama.image.projector" => MediaType::Projector,
            "application/vnd.ollama.image.template" => MediaType::Template,
            "application/vnd.ollama.image.system" => MediaType::System,
            "application/vnd.ollama.image.license" => MediaType::License,
            "application/vnd.ollama.image.params" => MediaType::Params,
            "application/vnd.ollama.image.messages" => MediaType::Messages,
            "application/vnd.docker.container.image.v1+json" => MediaType::Config,
            other => return Err(MediaTypeError(other.to_string())),
        })
    }
}

impl TryFrom<String> for MediaType {
    type Error = MediaTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MediaType> for String {
    fn from(value: MediaType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        for mt in [
            MediaType::Model,
            MediaType::Adapter,
            MediaType::Projector,
            MediaType::Template,
            MediaType::System,
            MediaType::License,
            MediaType::Params,
            MediaType::Messages,
            MediaType::Config,
        ] {
            let s = mt.to_string();
            let parsed: MediaType = s.parse().unwrap();
            assert_eq!(parsed, mt);
        }
    }

    #[test]
    fn rejects_unknown() {
        assert!("application/octet-stream".parse::<MediaType>().is_err());
    }
}

//! Execution affinity: the context a task declares it must run in.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    /// Single-threaded cooperative scheduler. Must not block.
    Cooperative,
    /// Bounded worker-thread pool. Blocking calls are fine.
    Thread,
    /// Bounded worker-process pool. Payload and result are serialized.
    Process,
    /// Thread pool, acknowledged immediately, outcome only reported out of band.
    Background,
}

impl Affinity {
    pub const ALL: [Affinity; 4] = [
        Affinity::Cooperative,
        Affinity::Thread,
        Affinity::Process,
        Affinity::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Affinity::Cooperative => "cooperative",
            Affinity::Thread => "thread",
            Affinity::Process => "process",
            Affinity::Background => "background",
        }
    }
}

impl std::fmt::Display for Affinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Affinity {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooperative" => Ok(Affinity::Cooperative),
            "thread" => Ok(Affinity::Thread),
            "process" => Ok(Affinity::Process),
            "background" | "fire-and-forget" => Ok(Affinity::Background),
            other => Err(DispatchError::configuration(format!(
                "unknown affinity '{other}' (expected cooperative, thread, process or background)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_affinities() {
        for affinity in Affinity::ALL {
            assert_eq!(affinity.as_str().parse::<Affinity>().unwrap(), affinity);
        }
        assert_eq!(
            "Fire-And-Forget".parse::<Affinity>().unwrap(),
            Affinity::Background
        );
    }

    #[test]
    fn test_parse_invalid_affinity_is_configuration_error() {
        let err = "gpu".parse::<Affinity>().unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(msg) if msg.contains("gpu")));
    }
}

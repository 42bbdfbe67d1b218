// -- std imports
use std::time::Duration;

// -- crate imports
use serde::{Deserialize, Deserializer};

/// Deserializes human readable durations such as `500ms` or `1m 30s`.
pub mod humantime_serde_duration {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "humantime_serde_duration::deserialize")]
        delay: Duration,
    }

    #[test]
    fn parses_compound_durations() {
        let w: Wrapper = serde_yaml::from_str("delay: 1m 30s").unwrap();
        assert_eq!(w.delay, Duration::from_secs(90));

        let w: Wrapper = serde_yaml::from_str("delay: 250ms").unwrap();
        assert_eq!(w.delay, Duration::from_millis(250));
    }
}

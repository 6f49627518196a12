// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, EngineSection, RawConfigFile, StageSection};
use crate::engine::MAX_ITERATIONS_LIMIT;
use crate::errors::{Result, StagedagError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StagedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_engine(&raw)?;
        validate_pipeline(&raw)?;

        let stage_timeout = raw
            .engine
            .stage_timeout
            .as_deref()
            .map(|s| parse_timeout("[engine].stage_timeout", s))
            .transpose()?;

        let mut stage = std::collections::BTreeMap::new();
        for (name, section) in raw.stage {
            let timeout = section
                .timeout
                .as_deref()
                .map(|s| parse_timeout(&format!("[stage.{name}].timeout"), s))
                .transpose()?;
            stage.insert(name, StageSection { timeout });
        }

        Ok(ConfigFile {
            engine: EngineSection {
                max_iterations: raw.engine.max_iterations,
                conflict_policy: raw.engine.conflict_policy,
                stage_timeout,
            },
            stage,
            pipeline: raw.pipeline,
        })
    }
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.max_iterations > MAX_ITERATIONS_LIMIT {
        return Err(StagedagError::ConfigError(format!(
            "[engine].max_iterations must be <= {} (got {})",
            MAX_ITERATIONS_LIMIT, cfg.engine.max_iterations
        )));
    }
    Ok(())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.max_keywords == 0 {
        return Err(StagedagError::ConfigError(
            "[pipeline].max_keywords must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn parse_timeout(key: &str, value: &str) -> Result<Duration> {
    let timeout = parse_duration(value)
        .map_err(|e| StagedagError::ConfigError(format!("{key}: {e}")))?;
    if timeout.is_zero() {
        return Err(StagedagError::ConfigError(format!(
            "{key}: timeout must be greater than zero"
        )));
    }
    Ok(timeout)
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_with_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 30s "), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn durations_without_units_are_rejected() {
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("s").is_err());
    }
}

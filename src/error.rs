use thiserror::Error;

/// Rejected construction parameters.
///
/// The measurement operations themselves never fail; only the constructors and
/// validators that accept runtime configuration return this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("interval range is empty: min {min}us is greater than max {max}us")]
    InvalidRange { min: u64, max: u64 },
    #[error("time window must be greater than zero")]
    ZeroWindow,
    #[error("interval must be greater than zero")]
    ZeroInterval,
}

/// Validates a time window given in microseconds.
pub fn ensure_window(micros: u64) -> Result<u64, ConfigError> {
    if micros == 0 {
        return Err(ConfigError::ZeroWindow);
    }
    Ok(micros)
}

/// Validates a throttle interval given in microseconds.
pub fn ensure_interval(micros: u64) -> Result<u64, ConfigError> {
    if micros == 0 {
        return Err(ConfigError::ZeroInterval);
    }
    Ok(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_rejected() {
        assert_eq!(ensure_window(0), Err(ConfigError::ZeroWindow));
        assert_eq!(ensure_interval(0), Err(ConfigError::ZeroInterval));
        assert_eq!(ensure_window(1_000), Ok(1_000));
    }

    #[test]
    fn range_message_names_both_bounds() {
        let err = ConfigError::InvalidRange { min: 20, max: 10 };
        let msg = err.to_string();
        assert!(msg.contains("20us"));
        assert!(msg.contains("10us"));
    }
}

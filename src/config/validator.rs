use crate::config::Config;
use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 128;

/// Validates a memory size such as `2G`, `1536M` or `1048576`.
///
/// Only digits followed by an optional `K`, `M` or `G` suffix are accepted, so
/// the value can never smuggle an extra argument into the launch command.
pub fn validate_memory(memory: &str) -> Result<()> {
    let digits = memory
        .strip_suffix(|c: char| matches!(c, 'K' | 'k' | 'M' | 'm' | 'G' | 'g'))
        .unwrap_or(memory);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "Invalid memory size '{}'; expected a number with an optional K, M or G suffix",
            memory
        )));
    }
    Ok(())
}

/// Validates a single console command line.
///
/// Rejects empty commands and anything containing a line terminator, which
/// would let one request inject several commands into the child.
pub fn validate_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(Error::InvalidInput("No command provided".to_string()));
    }
    let is_terminator = |c: char| {
        matches!(
            c,
            '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}' | '\0'
        )
    };
    if command.contains(is_terminator) {
        return Err(Error::InvalidInput(
            "Command must be a single line".to_string(),
        ));
    }
    Ok(())
}

/// Validates a world or backup name used as a single path component.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "{} name must be between 1 and {} characters",
            kind, MAX_NAME_LEN
        )));
    }
    if name.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "{} name must not start with '.'",
            kind
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::InvalidInput(format!(
            "{} name contains invalid character {:?}",
            kind, bad
        )));
    }
    Ok(())
}

/// Validates that properties content is plain text.
pub fn validate_text(content: &str) -> Result<()> {
    if let Some(bad) = content
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(Error::InvalidInput(format!(
            "Content is not plain text (found control character {:?})",
            bad
        )));
    }
    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    if config.launch.command.trim().is_empty() {
        return Err(Error::ConfigInvalid("Launch command is empty".to_string()));
    }
    if config.console_capacity == 0 {
        return Err(Error::ConfigInvalid(
            "consoleCapacity must be at least 1".to_string(),
        ));
    }
    if config.backup_retention == 0 {
        return Err(Error::ConfigInvalid(
            "backupRetention must be at least 1".to_string(),
        ));
    }
    if config.stop_timeout_secs == 0 {
        return Err(Error::ConfigInvalid(
            "stopTimeoutSecs must be at least 1".to_string(),
        ));
    }
    if config.stop_command.trim().is_empty() {
        return Err(Error::ConfigInvalid("stopCommand is empty".to_string()));
    }
    validate_memory(&config.memory)
        .map_err(|e| Error::ConfigInvalid(format!("memory: {}", e)))?;
    validate_name("Default world", &config.default_world)
        .map_err(|e| Error::ConfigInvalid(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sizes() {
        for ok in ["2G", "1536M", "512m", "1048576", "64k"] {
            assert!(validate_memory(ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in ["", "G", "2GB", "-2G", "2G -jar evil.jar", "2.5G"] {
            assert!(validate_memory(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_command_terminators() {
        assert!(validate_command("say hi").is_ok());
        assert!(validate_command("say hi\nstop").is_err());
        assert!(validate_command("say hi\rstop").is_err());
        assert!(validate_command("say\u{2028}stop").is_err());
        assert!(validate_command("   ").is_err());
    }

    #[test]
    fn test_names() {
        assert!(validate_name("World", "survival_2").is_ok());
        assert!(validate_name("World", "..").is_err());
        assert!(validate_name("World", "a/b").is_err());
        assert!(validate_name("World", ".hidden").is_err());
        assert!(validate_name("World", "").is_err());
    }
}

//! Partition names.
//!
//! A partition scopes which writers a reader receives from. The empty name is
//! the default partition.

/// Maximum partition name length.
pub const MAX_PARTITION_NAME_LENGTH: usize = 256;

/// The default partition.
pub const DEFAULT_PARTITION: &str = "";

/// Validate a partition name.
///
/// # Errors
///
/// Returns an error message if the partition name is invalid.
pub fn validate_partition_name(name: &str) -> Result<(), &'static str> {
    if name.len() > MAX_PARTITION_NAME_LENGTH {
        return Err("Partition name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Partition name contains control characters");
    }
    if name.contains(['*', '?']) {
        return Err("Partition wildcards are not supported");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_validation() {
        assert!(validate_partition_name("teamA").is_ok());
        assert!(validate_partition_name("équipe").is_ok());
        assert!(validate_partition_name(DEFAULT_PARTITION).is_ok());
        assert!(validate_partition_name("team\n").is_err());
        assert!(validate_partition_name("team*").is_err());

        let long_name = "a".repeat(MAX_PARTITION_NAME_LENGTH + 1);
        assert!(validate_partition_name(&long_name).is_err());
    }
}

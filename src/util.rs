//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else (including unset) maps to `default`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Return the value of `$HOME`, falling back to `/root`.
pub fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/root".to_string())
}

/// Mask a credential value for log/display output.
///
/// Keeps the first four characters so a user can recognise which key is
/// meant, hides the rest. Values of eight characters or fewer are fully
/// masked.
pub fn mask_secret(value: &str) -> String {
    if value.len() <= 8 {
        return "********".to_string();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{}…({} chars)", prefix, value.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_bool_recognises_truthy_values() {
        std::env::set_var("KEYWARDEN_TEST_BOOL_A", "yes");
        assert!(env_var_bool("KEYWARDEN_TEST_BOOL_A", false));
        std::env::set_var("KEYWARDEN_TEST_BOOL_A", "off");
        assert!(!env_var_bool("KEYWARDEN_TEST_BOOL_A", true));
        std::env::remove_var("KEYWARDEN_TEST_BOOL_A");
        assert!(env_var_bool("KEYWARDEN_TEST_BOOL_A", true));
    }

    #[test]
    fn mask_secret_hides_short_values_entirely() {
        assert_eq!(mask_secret("abc"), "********");
        assert_eq!(mask_secret("12345678"), "********");
    }

    #[test]
    fn mask_secret_keeps_recognisable_prefix() {
        let masked = mask_secret("sk-abcdefghijklmnop");
        assert!(masked.starts_with("sk-a"));
        assert!(!masked.contains("bcdefghijklmnop"));
    }
}

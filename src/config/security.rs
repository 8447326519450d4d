use crate::errors::WardenError;

const DANGEROUS_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "<script",
    "javascript:",
    "vbscript:",
    "file:",
    "$(",
    "`",
];

/// Subtrees holding patterns on purpose (deny lists) are not screened.
const UNSCREENED_PATHS: &[&str] = &["policy.destructive_patterns"];

pub fn validate_security_patterns(value: &serde_yaml::Value) -> Result<(), WardenError> {
    check_value(value, &mut Vec::new())
}

fn check_value(value: &serde_yaml::Value, path: &mut Vec<String>) -> Result<(), WardenError> {
    let joined = path.join(".");
    if UNSCREENED_PATHS.contains(&joined.as_str()) {
        return Ok(());
    }

    match value {
        serde_yaml::Value::String(s) => {
            let lower = s.to_lowercase();
            if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| lower.contains(*p)) {
                let location = if path.is_empty() { "root".to_string() } else { joined };
                return Err(WardenError::Config(format!(
                    "Dangerous pattern '{}' found at config path: {}", pattern, location
                )));
            }
            Ok(())
        }
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                path.push(k.as_str().unwrap_or("unknown").to_string());
                let result = check_value(v, path);
                path.pop();
                result?;
            }
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                path.push(format!("[{}]", i));
                let result = check_value(v, path);
                path.pop();
                result?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_safe_config_passes() {
        assert!(validate_security_patterns(&yaml("run:\n  target: https://example.com\n")).is_ok());
    }

    #[test]
    fn test_directory_traversal_blocked() {
        let err = validate_security_patterns(&yaml("tools_dir: ../../etc")).unwrap_err();
        assert!(err.to_string().contains("tools_dir"));
    }

    #[test]
    fn test_command_substitution_blocked() {
        let doc = "tools:\n  - name: x\n    image: alpine\n    command: ['sh', '$(id)']\n";
        let err = validate_security_patterns(&yaml(doc)).unwrap_err();
        assert!(err.to_string().contains("tools.[0].command.[1]"));
    }

    #[test]
    fn test_destructive_patterns_are_not_screened() {
        let doc = "policy:\n  destructive_patterns: ['`reboot`', 'rm -rf']\n";
        assert!(validate_security_patterns(&yaml(doc)).is_ok());
    }

    #[test]
    fn test_numeric_values_pass() {
        assert!(validate_security_patterns(&yaml("engine:\n  max_fanout: 8\n")).is_ok());
    }
}

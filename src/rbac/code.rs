//! Permission code helpers.
//!
//! Codes are `MODULE:ACTION` strings (uppercase, underscores allowed),
//! e.g. `USER:CREATE` or `DOC:EDIT`. The evaluator treats them as opaque;
//! only creation validates the form.

const SEPARATOR: char = ':';

fn is_valid_part(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

/// Whether a string is a well-formed permission code
pub fn is_valid(code: &str) -> bool {
    match code.split_once(SEPARATOR) {
        Some((module, action)) => is_valid_part(module) && is_valid_part(action),
        None => false,
    }
}

/// Build a code from a module and an action (both uppercased)
pub fn compose(module: &str, action: &str) -> String {
    format!(
        "{}{}{}",
        module.to_ascii_uppercase(),
        SEPARATOR,
        action.to_ascii_uppercase()
    )
}

/// The module part of a well-formed code
pub fn module(code: &str) -> Option<&str> {
    is_valid(code)
        .then(|| code.split_once(SEPARATOR))
        .flatten()
        .map(|(module, _)| module)
}

/// The action part of a well-formed code
pub fn action(code: &str) -> Option<&str> {
    is_valid(code)
        .then(|| code.split_once(SEPARATOR))
        .flatten()
        .map(|(_, action)| action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid() {
        assert!(is_valid("USER:CREATE"));
        assert!(is_valid("SYSTEM_CONFIG:READ_ALL"));

        assert!(!is_valid("user:create"));
        assert!(!is_valid("USERCREATE"));
        assert!(!is_valid("USER:"));
        assert!(!is_valid(":CREATE"));
        assert!(!is_valid("USER:CRE ATE"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_compose_uppercases() {
        assert_eq!(compose("user", "create"), "USER:CREATE");
        assert!(is_valid(&compose("doc", "edit")));
    }

    #[test]
    fn test_module_and_action() {
        assert_eq!(module("USER:CREATE"), Some("USER"));
        assert_eq!(action("USER:CREATE"), Some("CREATE"));
        assert_eq!(module("bogus"), None);
        assert_eq!(action("bogus"), None);
    }
}

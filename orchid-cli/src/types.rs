//! Common types used across CLI modules

use uuid::Uuid;

/// Execution identifier given either in full or as an unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrPrefix {
    Full(Uuid),
    Prefix(String),
}

impl IdOrPrefix {
    /// Parses a full UUID first, otherwise keeps the input as a prefix
    ///
    /// Returns `None` for empty or blank input, which would match every id.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        Some(match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.to_lowercase()),
        })
    }

    /// Whether `id` is this identifier or starts with this prefix
    pub fn matches(&self, id: Uuid) -> bool {
        match self {
            IdOrPrefix::Full(uuid) => *uuid == id,
            IdOrPrefix::Prefix(prefix) => id.to_string().starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_and_prefix() {
        let id = Uuid::new_v4();

        assert_eq!(IdOrPrefix::parse(&id.to_string()), Some(IdOrPrefix::Full(id)));
        assert_eq!(
            IdOrPrefix::parse(" 3F2a "),
            Some(IdOrPrefix::Prefix("3f2a".to_string()))
        );
    }

    #[test]
    fn test_blank_input_is_rejected() {
        assert_eq!(IdOrPrefix::parse(""), None);
        assert_eq!(IdOrPrefix::parse("   "), None);
    }

    #[test]
    fn test_prefix_matching() {
        let id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000001").unwrap();

        let prefix = |input| IdOrPrefix::parse(input).unwrap();
        assert!(prefix("3f2a").matches(id));
        assert!(prefix("3F2A9C").matches(id));
        assert!(!prefix("3f2b").matches(id));
        assert!(IdOrPrefix::Full(id).matches(id));
        assert!(!IdOrPrefix::Full(Uuid::new_v4()).matches(id));
    }
}

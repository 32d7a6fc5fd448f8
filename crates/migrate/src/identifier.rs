//! Migration identifiers and their total order

use std::cmp::Ordering;
use std::fmt;

use crate::error::{MigrateError, MigrateResult};

/// Maximum identifier length; matches the tracking table's `VARCHAR(255)`
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Stable, validated identifier of a migration unit
///
/// Ordering is derived from the text alone: a numeric prefix compares by
/// value (so `9_x < 10_x` and `001_x` sits with `1_x`), then the slug after
/// it, then the raw text. Identifiers without a numeric prefix sort after
/// every numbered one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    pub fn parse(identifier: impl Into<String>) -> MigrateResult<Self> {
        let identifier = identifier.into();
        let invalid = |reason: &str| MigrateError::InvalidIdentifier {
            identifier: identifier.clone(),
            reason: reason.to_string(),
        };

        if identifier.is_empty() {
            return Err(invalid("identifier cannot be empty"));
        }
        if identifier.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid("identifier is longer than 255 bytes"));
        }
        if let Some(c) = identifier
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '_' | '-' | '.')))
        {
            return Err(invalid(&format!("unsupported character {:?}", c)));
        }

        Ok(Self(identifier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Numeric prefix with leading zeros removed, and the slug that follows it
    fn split(&self) -> (Option<&str>, &str) {
        let digits = self.0.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return (None, &self.0);
        }
        let (number, rest) = self.0.split_at(digits);
        let number = number.trim_start_matches('0');
        let slug = rest.trim_start_matches(&['_', '-', '.'][..]);
        (Some(number), slug)
    }

    /// True when both identifiers occupy the same position in the order,
    /// e.g. `001_create_users` and `1_create_users`
    pub fn collides_with(&self, other: &MigrationId) -> bool {
        self.split() == other.split()
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    // Leading zeros are already stripped, so longer means larger.
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for MigrationId {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_num, a_slug) = self.split();
        let (b_num, b_slug) = other.split();

        let by_number = match (a_num, b_num) {
            (Some(a), Some(b)) => compare_numbers(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        by_number
            .then_with(|| a_slug.cmp(b_slug))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for MigrationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for MigrationId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for MigrationId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MigrationId {
        MigrationId::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_prefix_ordering() {
        let mut ids = vec![
            id("10_add_deals"),
            id("002_add_index"),
            id("9_add_contacts"),
            id("001_create_users"),
        ];
        ids.sort();

        let ordered: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(
            ordered,
            vec!["001_create_users", "002_add_index", "9_add_contacts", "10_add_deals"]
        );
    }

    #[test]
    fn test_timestamp_identifiers_order_by_value() {
        assert!(id("20240101120000_a") < id("20240102000000_a"));
        assert!(id("20240101_120000_b") < id("20240101_130000_a"));
    }

    #[test]
    fn test_unnumbered_sort_last() {
        assert!(id("999_last_numbered") < id("baseline"));
        assert!(id("alpha") < id("beta"));
    }

    #[test]
    fn test_same_number_orders_by_slug() {
        assert!(id("002_add_column") < id("002_add_index"));
    }

    #[test]
    fn test_collision_ignores_leading_zeros() {
        assert!(id("001_create_users").collides_with(&id("1_create_users")));
        assert!(!id("001_create_users").collides_with(&id("001_create_user")));
        // Still a total order consistent with Eq
        assert_ne!(id("001_create_users"), id("1_create_users"));
        assert_ne!(
            id("001_create_users").cmp(&id("1_create_users")),
            Ordering::Equal
        );
    }

    #[test]
    fn test_validation() {
        assert!(MigrationId::parse("").is_err());
        assert!(MigrationId::parse("001 create users").is_err());
        assert!(MigrationId::parse("001;drop").is_err());
        assert!(MigrationId::parse("x".repeat(256)).is_err());
        assert!(MigrationId::parse("2024.01.01-create_users").is_ok());
    }
}

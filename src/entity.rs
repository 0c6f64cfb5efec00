//! Entity types and identity management.
//!
//! A [`NamedEntity`] is any directory record with a stable id and a
//! human-entered name: a guest, a household, a vendor. Duplicate detection
//! works on names; keeper ranking works on the secondary fields.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum length of a name or contact field.
pub const MAX_FIELD_LEN: usize = 1024;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
    })
}

/// Globally unique, stable entity identifier.
///
/// # Examples
///
/// ```
/// use dedupkit::EntityId;
///
/// let id = EntityId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Kind of directory record.
///
/// Detection never groups entities of different kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// An invited person
    Guest,
    /// A household grouping guests
    Household,
    /// A service provider
    Vendor,
    /// A custom kind
    Custom(String),
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest => write!(f, "guest"),
            Self::Household => write!(f, "household"),
            Self::Vendor => write!(f, "vendor"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// A directory record with a name and the fields used to rank merge
/// candidates.
///
/// # Examples
///
/// ```
/// use dedupkit::{EntityKind, NamedEntity};
///
/// let vendor = NamedEntity::new("Elegant Events", EntityKind::Vendor)
///     .with_secondary_key("Austin")
///     .with_email("hello@elegant.example");
/// assert_eq!(vendor.version, 1);
/// assert!(vendor.has_email());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEntity {
    /// Globally unique identifier
    pub id: EntityId,

    /// Display name as entered.
    pub name: String,

    /// What the record describes.
    pub kind: EntityKind,

    /// Optional partition key such as a city or household name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,

    /// Set when the record was verified by staff.
    #[serde(default)]
    pub verified: bool,

    /// Set when an owner account has claimed the record.
    #[serde(default)]
    pub claimed: bool,

    /// Contact email, validated on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Public website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Contact phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last change.
    pub updated_at: DateTime<Utc>,

    /// Starts at 1 and grows on every update.
    pub version: u64,

    /// Free-form attributes carried along unchanged.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NamedEntity {
    /// Creates a new entity with the given name and kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self::with_id(EntityId::new(), name, kind)
    }

    /// Creates a new entity with a specific ID.
    ///
    /// This is useful during imports and in tests.
    #[must_use]
    pub fn with_id(id: EntityId, name: impl Into<String>, kind: EntityKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            kind,
            secondary_key: None,
            verified: false,
            claimed: false,
            email: None,
            website: None,
            phone: None,
            created_at: now,
            updated_at: now,
            version: 1,
            metadata: serde_json::Value::Null,
        }
    }

    /// Sets the secondary key (city, household).
    #[must_use]
    pub fn with_secondary_key(mut self, key: impl Into<String>) -> Self {
        self.secondary_key = Some(key.into());
        self
    }

    /// Sets the contact email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the website.
    #[must_use]
    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// Sets the phone number.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Marks the record verified or not.
    #[must_use]
    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    /// Marks the record claimed by an owner or not.
    #[must_use]
    pub fn with_claimed(mut self, claimed: bool) -> Self {
        self.claimed = claimed;
        self
    }

    /// Renames the entity, bumping its version.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Marks the entity as modified: bumps the version and update time.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// True when the record is verified or claimed by an owner.
    #[must_use]
    pub const fn is_trusted(&self) -> bool {
        self.verified || self.claimed
    }

    /// True when a non-blank email is set.
    #[must_use]
    pub fn has_email(&self) -> bool {
        is_present(self.email.as_deref())
    }

    /// True when a non-blank website is set.
    #[must_use]
    pub fn has_website(&self) -> bool {
        is_present(self.website.as_deref())
    }

    /// Validates the entity before it is written to a store.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for an empty or oversized name, oversized
    /// contact fields, or a malformed email address.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        check_len("name", &self.name)?;
        for (field, value) in [
            ("secondary_key", &self.secondary_key),
            ("email", &self.email),
            ("website", &self.website),
            ("phone", &self.phone),
        ] {
            if let Some(v) = value {
                check_len(field, v)?;
            }
        }

        if let Some(email) = self.email.as_deref().map(str::trim) {
            if !email.is_empty() && !email_regex().is_match(email) {
                return Err(ValidationError::InvalidField {
                    field: "email".to_string(),
                    reason: format!("'{email}' is not an email address"),
                });
            }
        }
        Ok(())
    }
}

fn is_present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn check_len(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_unique() {
        let id1 = EntityId::new();
        let id2 = EntityId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_entity_id_serde_transparent() {
        let id = EntityId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Vendor.to_string(), "vendor");
        assert_eq!(EntityKind::Custom("venue".into()).to_string(), "custom:venue");
    }

    #[test]
    fn test_rename_bumps_version() {
        let mut e = NamedEntity::new("Smith Family", EntityKind::Household);
        e.rename("The Smiths");
        assert_eq!(e.version, 2);
        assert_eq!(e.name, "The Smiths");
    }

    #[test]
    fn test_blank_contact_fields_are_absent() {
        let e = NamedEntity::new("A", EntityKind::Vendor)
            .with_email("   ")
            .with_website("");
        assert!(!e.has_email());
        assert!(!e.has_website());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let e = NamedEntity::new("  ", EntityKind::Guest);
        assert_eq!(e.validate(), Err(ValidationError::EmptyEntityName));
    }

    #[test]
    fn test_validate_rejects_bad_email() {
        let e = NamedEntity::new("Ann", EntityKind::Guest).with_email("not-an-email");
        assert!(matches!(e.validate(), Err(ValidationError::InvalidField { .. })));

        let ok = NamedEntity::new("Ann", EntityKind::Guest).with_email("ann@example.com");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_long_fields() {
        let e = NamedEntity::new("x".repeat(MAX_FIELD_LEN + 1), EntityKind::Guest);
        assert!(matches!(e.validate(), Err(ValidationError::FieldTooLong { .. })));
    }

    #[test]
    fn test_trusted_when_claimed_or_verified() {
        let e = NamedEntity::new("A", EntityKind::Vendor);
        assert!(!e.is_trusted());
        assert!(e.clone().with_claimed(true).is_trusted());
        assert!(e.with_verified(true).is_trusted());
    }
}

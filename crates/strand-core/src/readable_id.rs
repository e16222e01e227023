//! Readable-id derivation for collections
//!
//! A readable id is a URL-safe slug derived from the collection name plus a
//! short random suffix. Once the user types their own id, name edits stop
//! overwriting it.

use regex::Regex;
use std::sync::OnceLock;

use crate::CollectionDetails;

/// Length of the random uniqueness suffix
pub const SUFFIX_LEN: usize = 6;
/// Longest accepted collection name
pub const MAX_NAME_LEN: usize = 64;
pub const MIN_READABLE_ID_LEN: usize = 3;
pub const MAX_READABLE_ID_LEN: usize = 63;

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9\s-]").expect("static regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

fn hyphen_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").expect("static regex"))
}

fn valid_readable_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("static regex"))
}

/// Slug base for a collection name, without the suffix.
///
/// `"My Collection!!"` becomes `"my-collection"`.
pub fn readable_id_base(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = disallowed_chars().replace_all(&lowered, "");
    let hyphenated = whitespace_runs().replace_all(stripped.trim(), "-");
    let collapsed = hyphen_runs().replace_all(&hyphenated, "-");
    collapsed.trim_matches('-').to_string()
}

/// Six random lowercase alphanumeric characters
pub fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string()
}

/// Full readable id: `base-suffix`, or just the suffix for an empty base.
///
/// The base is cut short so the id stays within `MAX_READABLE_ID_LEN`.
pub fn generate_readable_id(name: &str, suffix: &str) -> String {
    let mut base = readable_id_base(name);
    let max_base = MAX_READABLE_ID_LEN.saturating_sub(suffix.len() + 1);
    if base.len() > max_base {
        // base is ASCII after slugging
        base.truncate(max_base);
        base.truncate(base.trim_end_matches('-').len());
    }
    if base.is_empty() {
        suffix.to_string()
    } else {
        format!("{}-{}", base, suffix)
    }
}

/// Whether `id` is an acceptable readable id
pub fn is_valid_readable_id(id: &str) -> bool {
    (MIN_READABLE_ID_LEN..=MAX_READABLE_ID_LEN).contains(&id.len())
        && valid_readable_id().is_match(id)
}

/// Name/id pair for the "create collection" form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadableIdField {
    name: String,
    readable_id: String,
    suffix: String,
    user_edited: bool,
}

impl ReadableIdField {
    pub fn new() -> Self {
        Self::with_suffix(random_suffix())
    }

    /// Fixed suffix (deterministic ids for tests and replays)
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        Self {
            name: String::new(),
            readable_id: suffix.clone(),
            suffix,
            user_edited: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn readable_id(&self) -> &str {
        &self.readable_id
    }

    pub fn user_edited(&self) -> bool {
        self.user_edited
    }

    /// The id this field would hold if the user never touched it
    pub fn derived_id(&self) -> String {
        generate_readable_id(&self.name, &self.suffix)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        if !self.user_edited {
            self.readable_id = self.derived_id();
        }
    }

    /// Record a manual edit of the id field
    pub fn set_readable_id(&mut self, readable_id: impl Into<String>) {
        let readable_id = readable_id.into();
        self.user_edited = readable_id != self.derived_id();
        self.readable_id = readable_id;
    }

    pub fn to_details(&self) -> CollectionDetails {
        CollectionDetails::new(self.name.clone()).with_readable_id(self.readable_id.clone())
    }
}

impl Default for ReadableIdField {
    fn default() -> Self {
        Self::new()
    }
}

/// Inline form error for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate collection details before anything reaches the backend
pub fn validate_collection_details(details: &CollectionDetails) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let name = details.name.trim();
    if name.is_empty() {
        errors.push(FieldError {
            field: "name",
            message: "Name is required".to_string(),
        });
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(FieldError {
            field: "name",
            message: format!("Name must be at most {} characters", MAX_NAME_LEN),
        });
    }

    if let Some(id) = &details.readable_id {
        if !valid_readable_id().is_match(id) {
            errors.push(FieldError {
                field: "readable_id",
                message: "Only lowercase letters, numbers and hyphens are allowed".to_string(),
            });
        } else if !(MIN_READABLE_ID_LEN..=MAX_READABLE_ID_LEN).contains(&id.len()) {
            errors.push(FieldError {
                field: "readable_id",
                message: format!(
                    "Must be between {} and {} characters",
                    MIN_READABLE_ID_LEN, MAX_READABLE_ID_LEN
                ),
            });
        }
    }

    errors
}

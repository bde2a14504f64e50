//! Per-user settings read by prompt construction.
//!
//! Only explicit settings updates write these rows; the indexing core never
//! touches them.

/// One settings change issued by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceUpdate {
    Occupation(String),
    Traits(Vec<String>),
    AdditionalInformations(String),
}

impl PreferenceUpdate {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            PreferenceUpdate::Occupation(_) => "occupation",
            PreferenceUpdate::Traits(_) => "traits",
            PreferenceUpdate::AdditionalInformations(_) => "additional_informations",
        }
    }

    /// Column value as stored. Traits are kept as a JSON array.
    pub(crate) fn to_column_value(&self) -> serde_json::Result<String> {
        match self {
            PreferenceUpdate::Occupation(v) | PreferenceUpdate::AdditionalInformations(v) => {
                Ok(v.trim().to_string())
            }
            PreferenceUpdate::Traits(traits) => serde_json::to_string(traits),
        }
    }
}

/// Splits a comma separated settings input ("quiet, curious,  witty") into
/// trimmed, non-empty traits.
pub fn parse_traits(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

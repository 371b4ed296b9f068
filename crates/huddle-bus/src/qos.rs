//! Quality-of-service profiles.
//!
//! Writers and readers are created with a [`QosProfile`], usually looked up
//! by name in a [`QosLibrary`]. A library can be loaded from TOML:
//!
//! ```toml
//! name = "Chat_Library"
//!
//! [profiles.ChatUser_Profile]
//! durability = "transient_local"
//! history_depth = 1
//!
//! [profiles.ChatMessage_Profile]
//! durability = "transient_local"
//! history_depth = 100
//! max_samples = 0
//! ```

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Name of the builtin library.
pub const DEFAULT_LIBRARY: &str = "Chat_Library";

/// Builtin profile for presence records.
pub const USER_PROFILE: &str = "ChatUser_Profile";

/// Builtin profile for chat messages.
pub const MESSAGE_PROFILE: &str = "ChatMessage_Profile";

/// Whether late-joining readers receive previously written data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Only data written after the reader exists is delivered.
    #[default]
    Volatile,
    /// Alive instances and retained samples are replayed to new readers.
    TransientLocal,
}

/// A named set of QoS settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosProfile {
    /// Durability kind.
    #[serde(default)]
    pub durability: Durability,

    /// Samples kept per instance by keyed readers, and samples a topic retains
    /// for late joiners of unkeyed records. Zero keeps all up to `max_samples`.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,

    /// Upper bound on samples cached by a reader. Zero means unbounded.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_history_depth() -> usize {
    1
}

fn default_max_samples() -> usize {
    4096
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            durability: Durability::Volatile,
            history_depth: default_history_depth(),
            max_samples: default_max_samples(),
        }
    }
}

impl QosProfile {
    /// Whether this profile replays data to late joiners.
    #[must_use]
    pub fn is_transient_local(&self) -> bool {
        self.durability == Durability::TransientLocal
    }
}

/// A library of named QoS profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosLibrary {
    /// Library name, used to qualify profile names (`Library::Profile`).
    pub name: String,

    /// Profiles by name.
    #[serde(default)]
    pub profiles: HashMap<String, QosProfile>,
}

impl Default for QosLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl QosLibrary {
    /// The builtin chat library.
    #[must_use]
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            USER_PROFILE.to_string(),
            QosProfile {
                durability: Durability::TransientLocal,
                history_depth: 1,
                max_samples: default_max_samples(),
            },
        );
        profiles.insert(
            MESSAGE_PROFILE.to_string(),
            QosProfile {
                durability: Durability::TransientLocal,
                history_depth: 100,
                max_samples: 0,
            },
        );

        Self {
            name: DEFAULT_LIBRARY.to_string(),
            profiles,
        }
    }

    /// Parse a library from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml_str(contents: &str) -> Result<Self, BusError> {
        toml::from_str(contents).map_err(|e| BusError::InvalidQos(e.to_string()))
    }

    /// Load a library from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Look up a profile by plain (`Profile`) or qualified (`Library::Profile`) name.
    ///
    /// # Errors
    ///
    /// Returns an error if no such profile exists.
    pub fn profile(&self, name: &str) -> Result<&QosProfile, BusError> {
        let plain = match name.split_once("::") {
            Some((library, profile)) if library == self.name => profile,
            Some(_) => return Err(BusError::UnknownProfile(name.to_string())),
            None => name,
        };

        self.profiles
            .get(plain)
            .ok_or_else(|| BusError::UnknownProfile(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_profiles() {
        let library = QosLibrary::builtin();

        let user = library.profile(USER_PROFILE).unwrap();
        assert!(user.is_transient_local());
        assert_eq!(user.history_depth, 1);

        let qualified = format!("{DEFAULT_LIBRARY}::{MESSAGE_PROFILE}");
        let message = library.profile(&qualified).unwrap();
        assert_eq!(message.history_depth, 100);
        // Readers drain messages with take; they never drop a burst.
        assert_eq!(message.max_samples, 0);
    }

    #[test]
    fn test_unknown_profile() {
        let library = QosLibrary::builtin();
        assert!(matches!(
            library.profile("Missing_Profile"),
            Err(BusError::UnknownProfile(_))
        ));
        assert!(matches!(
            library.profile(&format!("Other_Library::{USER_PROFILE}")),
            Err(BusError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_library_from_toml() {
        let toml_str = r#"
            name = "Test_Library"

            [profiles.Fast]
            history_depth = 0

            [profiles.Durable]
            durability = "transient_local"
            max_samples = 10
        "#;

        let library = QosLibrary::from_toml_str(toml_str).unwrap();
        assert_eq!(library.name, "Test_Library");

        let fast = library.profile("Fast").unwrap();
        assert_eq!(fast.durability, Durability::Volatile);
        assert_eq!(fast.history_depth, 0);
        assert_eq!(fast.max_samples, 4096);

        let durable = library.profile("Test_Library::Durable").unwrap();
        assert!(durable.is_transient_local());
        assert_eq!(durable.history_depth, 1);
        assert_eq!(durable.max_samples, 10);
    }

    #[test]
    fn test_library_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"File_Library\"").unwrap();

        let library = QosLibrary::from_file(file.path()).unwrap();
        assert_eq!(library.name, "File_Library");
        assert!(library.profiles.is_empty());

        assert!(matches!(
            QosLibrary::from_toml_str("name = "),
            Err(BusError::InvalidQos(_))
        ));
    }
}

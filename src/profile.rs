//! Selection profiles and their registry.
//!
//! A profile names a host-selection policy: a storage tier steering the
//! weight function toward cheap storage or cheap bandwidth, and an optional
//! country allowlist. Every profile owns its own weighted tree in the
//! database, because weights are profile-dependent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the built-in profile that always exists.
pub const DEFAULT_PROFILE: &str = "default";

/// Profile names are short lowercase identifiers.
pub const MAX_PROFILE_NAME_LEN: usize = 32;

/// Qualitative storage temperature steering the weight function.
///
/// Cold data is written once and rarely read, so cheap storage dominates.
/// Hot data is moved frequently, so cheap bandwidth dominates. Warm is
/// balanced between the two and is the tier of the default profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Cold,
    Warm,
    Hot,
}

impl StorageTier {
    /// Parse a user-supplied tier name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cold" => Some(StorageTier::Cold),
            "warm" => Some(StorageTier::Warm),
            "hot" => Some(StorageTier::Hot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Cold => "cold",
            StorageTier::Warm => "warm",
            StorageTier::Hot => "hot",
        }
    }

    /// Exponents applied to the inverse storage, upload, and download
    /// prices. The emphasised axis of a tier penalises price cubically,
    /// the others linearly.
    pub fn price_exponents(&self) -> (i32, i32, i32) {
        match self {
            StorageTier::Cold => (3, 1, 1),
            StorageTier::Warm => (1, 1, 1),
            StorageTier::Hot => (1, 3, 3),
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings of a profile that can be reconfigured after creation.
pub mod settings {
    pub const STORAGE_TIER: &str = "storagetier";
    pub const ADD_LOCATION: &str = "addlocation";
    pub const REMOVE_LOCATION: &str = "removelocation";
}

/// A named host-selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub storage_tier: StorageTier,

    /// Country codes the profile restricts hosts to; empty means any.
    pub locations: BTreeSet<String>,
}

impl Profile {
    /// Create a profile after validating its name.
    pub fn new(name: &str, storage_tier: StorageTier) -> Result<Self> {
        validate_profile_name(name)?;
        Ok(Self {
            name: name.to_string(),
            storage_tier,
            locations: BTreeSet::new(),
        })
    }

    /// The built-in default profile: warm tier, no location restriction.
    pub fn default_profile() -> Self {
        Self {
            name: DEFAULT_PROFILE.to_string(),
            storage_tier: StorageTier::Warm,
            locations: BTreeSet::new(),
        }
    }

    /// Whether a host with the given resolved country passes the profile's
    /// location restriction.
    pub fn allows_country(&self, country: Option<&str>) -> bool {
        if self.locations.is_empty() {
            return true;
        }
        match country {
            Some(c) => self.locations.contains(c),
            None => false,
        }
    }
}

/// Check a profile name: 1 to 32 chars of `[a-z0-9_-]`.
pub fn validate_profile_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_PROFILE_NAME_LEN {
        return Err(Error::invalid(format!(
            "profile name must be 1 to {} characters",
            MAX_PROFILE_NAME_LEN
        )));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !ok {
        return Err(Error::invalid(
            "profile name may only contain lowercase letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// Collection of all profiles, keyed by name.
///
/// The registry guarantees that the `default` profile always exists and
/// can never be deleted.
#[derive(Debug)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,

    /// Country codes users may restrict profiles to; empty accepts any
    /// syntactically valid code.
    allowed_locations: Vec<String>,
}

impl ProfileRegistry {
    pub fn new(allowed_locations: Vec<String>) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default_profile());
        Self {
            profiles,
            allowed_locations,
        }
    }

    /// Add a new profile with the given tier.
    pub fn add(&mut self, name: &str, storage_tier: &str) -> Result<Profile> {
        let tier = StorageTier::parse(storage_tier)
            .ok_or_else(|| Error::invalid(format!("no such storage tier: {storage_tier}")))?;
        let profile = Profile::new(name, tier)?;
        if self.profiles.contains_key(name) {
            return Err(Error::duplicate(format!("profile {name}")));
        }
        self.profiles.insert(name.to_string(), profile.clone());
        Ok(profile)
    }

    /// Update one setting of a profile, returning the updated profile.
    pub fn configure(&mut self, name: &str, setting: &str, value: &str) -> Result<Profile> {
        let profile = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("profile {name}")))?;

        match setting {
            settings::STORAGE_TIER => {
                let tier = StorageTier::parse(value)
                    .ok_or_else(|| Error::invalid(format!("no such storage tier: {value}")))?;
                if profile.storage_tier == tier {
                    return Err(Error::invalid(format!("storage tier {value} is already set")));
                }
                profile.storage_tier = tier;
            }
            settings::ADD_LOCATION => {
                validate_location(value, &self.allowed_locations)?;
                if !profile.locations.insert(value.to_string()) {
                    return Err(Error::invalid(format!("location {value} is already set")));
                }
            }
            settings::REMOVE_LOCATION => {
                if !profile.locations.remove(value) {
                    return Err(Error::invalid(format!(
                        "location {value} cannot be removed as it is not set"
                    )));
                }
            }
            _ => return Err(Error::invalid(format!("no such setting: {setting}"))),
        }

        Ok(profile.clone())
    }

    /// Delete a profile. The default profile is protected.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if name == DEFAULT_PROFILE {
            return Err(Error::Protected);
        }
        self.profiles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("profile {name}")))
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// All profiles, ordered by name.
    pub fn list(&self) -> Vec<Profile> {
        self.profiles.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Replace the profile set from a loaded snapshot. The default profile
    /// is recreated if the snapshot somehow lacks it.
    pub fn replace_all(&mut self, profiles: Vec<Profile>) {
        self.profiles = profiles.into_iter().map(|p| (p.name.clone(), p)).collect();
        self.profiles
            .entry(DEFAULT_PROFILE.to_string())
            .or_insert_with(Profile::default_profile);
    }
}

/// A location must be a two-letter lowercase country code and, when an
/// allowlist is configured, a member of it.
fn validate_location(value: &str, allowed: &[String]) -> Result<()> {
    let well_formed = value.len() == 2 && value.chars().all(|c| c.is_ascii_lowercase());
    if !well_formed {
        return Err(Error::invalid(format!(
            "location {value} is not a two-letter country code"
        )));
    }
    if !allowed.is_empty() && !allowed.iter().any(|a| a == value) {
        return Err(Error::invalid(format!("no such location: {value}")));
    }
    Ok(())
}

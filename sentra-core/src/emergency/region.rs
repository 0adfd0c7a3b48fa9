//! Country → emergency-number resolution.
//!
//! Kept as a configuration table rather than branching logic: each entry
//! carries the country's general emergency number plus optional per-category
//! overrides for countries without a single unified number. Unknown or
//! missing country codes fall back to [`DEFAULT_NUMBER`].

use std::collections::HashMap;

use crate::events::SoundCategory;

/// The documented fallback when the country is unknown: the GSM-mandated
/// emergency number, routable from virtually any handset.
pub const DEFAULT_NUMBER: &str = "112";

/// Emergency numbers for one country.
#[derive(Debug, Clone)]
pub struct EmergencyNumbers {
    /// The general (police / unified) emergency number.
    pub general: String,
    /// Fire-brigade number, where it differs from the general one.
    pub fire: Option<String>,
}

impl EmergencyNumbers {
    fn unified(number: &str) -> Self {
        Self {
            general: number.to_string(),
            fire: None,
        }
    }

    fn split(general: &str, fire: &str) -> Self {
        Self {
            general: general.to_string(),
            fire: Some(fire.to_string()),
        }
    }
}

/// Lookup table from ISO 3166-1 alpha-2 country code to numbers.
#[derive(Debug, Clone)]
pub struct RegionTable {
    entries: HashMap<String, EmergencyNumbers>,
}

impl Default for RegionTable {
    fn default() -> Self {
        let mut entries = HashMap::new();
        for code in ["US", "CA", "MX", "PH"] {
            entries.insert(code.to_string(), EmergencyNumbers::unified("911"));
        }
        for code in ["GB", "IE"] {
            entries.insert(code.to_string(), EmergencyNumbers::unified("999"));
        }
        for code in [
            "DE", "FR", "ES", "IT", "PT", "NL", "BE", "SE", "NO", "DK", "FI", "PL", "CH", "AT",
        ] {
            entries.insert(code.to_string(), EmergencyNumbers::unified("112"));
        }
        entries.insert("AU".to_string(), EmergencyNumbers::unified("000"));
        entries.insert("NZ".to_string(), EmergencyNumbers::unified("111"));
        entries.insert("JP".to_string(), EmergencyNumbers::split("110", "119"));
        entries.insert("CN".to_string(), EmergencyNumbers::split("110", "119"));
        entries.insert("IN".to_string(), EmergencyNumbers::unified("112"));
        // Brazil has no unified number: military police 190, fire 193.
        entries.insert("BR".to_string(), EmergencyNumbers::split("190", "193"));
        Self { entries }
    }
}

impl RegionTable {
    /// Resolve the number to dial for `country` and the alert `category`.
    ///
    /// Fire-type alerts prefer the country's fire number when it has one;
    /// every other category uses the general number. Unknown countries get
    /// [`DEFAULT_NUMBER`].
    pub fn resolve(&self, country: Option<&str>, category: SoundCategory) -> String {
        let Some(entry) = country
            .map(|c| c.trim().to_ascii_uppercase())
            .and_then(|c| self.entries.get(&c))
        else {
            return DEFAULT_NUMBER.to_string();
        };

        if category == SoundCategory::FireAlarm {
            if let Some(ref fire) = entry.fire {
                return fire.clone();
            }
        }
        entry.general.clone()
    }

    /// Add or replace one country's entry.
    pub fn insert(&mut self, country: &str, numbers: EmergencyNumbers) {
        self.entries.insert(country.to_ascii_uppercase(), numbers);
    }
}

//! Vehicle, payment and address records used to fill the permit purchase
//! form. Loading them is all this crate does; the form itself is driven
//! elsewhere.

use chrono::{Duration, NaiveDate};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

pub const VEHICLES_FILE: &str = "info_cars.json";
pub const PAYMENT_CARDS_FILE: &str = "info_payment_cards.json";
pub const ADDRESS_FILE: &str = "info_addresses.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VehicleProfile {
    pub name: String,
    pub plate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCard {
    pub card_name: String,
    pub cardholder_name: String,
    #[serde(deserialize_with = "secret_string")]
    pub card_number: SecretString,
    pub card_expiry: String,
    #[serde(
        rename = "card_CVV",
        alias = "card_cvv",
        deserialize_with = "secret_string"
    )]
    pub card_cvv: SecretString,
}

fn secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl PaymentCard {
    /// Card number reduced to its last four digits.
    pub fn masked_number(&self) -> String {
        let digits: Vec<char> = self
            .card_number
            .expose_secret()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
        format!("**** {tail}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressProfile {
    #[serde(rename = "initals", alias = "initials")]
    pub initials: String,
    pub surname: String,
    #[serde(rename = "steetNumber", alias = "streetNumber")]
    pub street_number: String,
    #[serde(rename = "streetName")]
    pub street_name: String,
    pub permit_duration: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid profile data in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no vehicle #{index} (choose 1..={available})")]
    NoSuchVehicle { index: usize, available: usize },
    #[error("no payment card #{index} (choose 1..={available})")]
    NoSuchCard { index: usize, available: usize },
}

#[derive(Debug, Clone)]
pub struct PurchaseProfiles {
    pub vehicles: Vec<VehicleProfile>,
    pub cards: Vec<PaymentCard>,
    pub address: AddressProfile,
}

impl PurchaseProfiles {
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ProfileError> {
        let dir = dir.as_ref();
        Ok(Self {
            vehicles: read_json(&dir.join(VEHICLES_FILE))?,
            cards: read_json(&dir.join(PAYMENT_CARDS_FILE))?,
            address: read_json(&dir.join(ADDRESS_FILE))?,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ProfileError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ProfileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Inputs for a single permit purchase.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub vehicle: VehicleProfile,
    pub card: PaymentCard,
    pub address: AddressProfile,
    pub start_date: NaiveDate,
}

impl PurchaseRequest {
    /// Selects the vehicle and card by their 1-based position. Permits start
    /// the day after they are bought.
    pub fn prepare(
        profiles: &PurchaseProfiles,
        vehicle_index: usize,
        card_index: usize,
        today: NaiveDate,
    ) -> Result<Self, ProfileError> {
        let vehicle = pick(&profiles.vehicles, vehicle_index).ok_or(ProfileError::NoSuchVehicle {
            index: vehicle_index,
            available: profiles.vehicles.len(),
        })?;
        let card = pick(&profiles.cards, card_index).ok_or(ProfileError::NoSuchCard {
            index: card_index,
            available: profiles.cards.len(),
        })?;

        Ok(Self {
            vehicle: vehicle.clone(),
            card: card.clone(),
            address: profiles.address.clone(),
            start_date: today + Duration::days(1),
        })
    }

    /// Start date as the purchase form expects it.
    pub fn start_date_field(&self) -> String {
        self.start_date.format("%m/%d/%Y").to_string()
    }
}

fn pick<T>(items: &[T], index: usize) -> Option<&T> {
    index.checked_sub(1).and_then(|position| items.get(position))
}

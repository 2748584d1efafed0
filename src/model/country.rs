//! Countries and the id -> display lookup used when writing records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::period::{Period, ValidityWindow};
use crate::core::types::CountryId;

pub const UNKNOWN_COLOR: &str = "#808080";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub validity: ValidityWindow,
}

impl Country {
    pub fn new(id: CountryId, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: Some(color.into()),
            validity: ValidityWindow::always(),
        }
    }

    pub fn display_color(&self) -> &str {
        self.color.as_deref().unwrap_or(UNKNOWN_COLOR)
    }
}

/// Countries by id
#[derive(Debug, Clone, Default)]
pub struct CountryDirectory {
    countries: BTreeMap<CountryId, Country>,
}

impl CountryDirectory {
    pub fn new(countries: impl IntoIterator<Item = Country>) -> Self {
        Self {
            countries: countries.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn get(&self, id: CountryId) -> Option<&Country> {
        self.countries.get(&id)
    }

    /// A country that exists and whose validity window covers `period`
    pub fn resolve(&self, id: CountryId, period: Period) -> Option<&Country> {
        self.countries.get(&id).filter(|c| c.validity.covers(period))
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}

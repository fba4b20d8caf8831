//! Delivery address captured during checkout.

use serde::{Deserialize, Serialize};

use super::id::{LocationId, RegionId};

/// Delivery address as edited in the checkout form.
///
/// Persisted as a draft (camelCase JSON) on every change so a reload does
/// not lose what the customer typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    /// Region (state) name, e.g. "Lagos".
    pub region: String,
    pub region_id: Option<RegionId>,
    pub country: String,
    pub postcode: String,
    pub delivery_location_id: Option<LocationId>,
    pub delivery_location_name: Option<String>,
}

/// A single editable address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressField {
    FullName,
    Email,
    Phone,
    Address1,
    Address2,
    City,
    Region,
    Country,
    Postcode,
}

impl AddressField {
    /// Whether editing this field changes a live carrier quote.
    #[must_use]
    pub const fn affects_quote(self) -> bool {
        matches!(
            self,
            Self::FullName | Self::Phone | Self::Address1 | Self::Address2 | Self::City | Self::Region
        )
    }
}

fn present(s: &str) -> bool {
    !s.trim().is_empty()
}

impl Address {
    /// Whether every field the order needs is filled in.
    ///
    /// Delivery price resolution is checked separately by the session.
    #[must_use]
    pub fn has_required_fields(&self) -> bool {
        present(&self.full_name)
            && present(&self.email)
            && present(&self.phone)
            && present(&self.address1)
            && present(&self.region)
    }

    /// Update one field. Returns `true` if the value changed.
    pub fn set(&mut self, field: AddressField, value: impl Into<String>) -> bool {
        let value = value.into();
        let slot = match field {
            AddressField::FullName => &mut self.full_name,
            AddressField::Email => &mut self.email,
            AddressField::Phone => &mut self.phone,
            AddressField::Address1 => &mut self.address1,
            AddressField::Address2 => &mut self.address2,
            AddressField::City => &mut self.city,
            AddressField::Region => &mut self.region,
            AddressField::Country => &mut self.country,
            AddressField::Postcode => &mut self.postcode,
        };
        if *slot == value {
            return false;
        }
        *slot = value;
        true
    }

    /// Single-line street address: non-empty parts joined by ", ".
    #[must_use]
    pub fn street_line(&self) -> String {
        [
            self.address1.as_str(),
            self.address2.as_str(),
            self.city.as_str(),
            self.region.as_str(),
            self.postcode.as_str(),
            self.country.as_str(),
        ]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Free-text address sent to the backend, tagged with the delivery method.
    #[must_use]
    pub fn full_address_string(&self, delivery_label: &str) -> String {
        let mut out = self.street_line();
        if let Some(location) = self.delivery_location_name.as_deref().filter(|s| present(s)) {
            out.push_str(" | Pickup: ");
            out.push_str(location);
        }
        out.push_str(" | Delivery: ");
        out.push_str(delivery_label);
        out
    }

    /// Fill blank fields from a profile without overwriting what was typed.
    pub fn fill_missing_from(&mut self, profile: &Self) {
        fn fill(slot: &mut String, from: &str) {
            if !present(slot) && present(from) {
                from.clone_into(slot);
            }
        }
        fill(&mut self.full_name, &profile.full_name);
        fill(&mut self.email, &profile.email);
        fill(&mut self.phone, &profile.phone);
        fill(&mut self.address1, &profile.address1);
        fill(&mut self.address2, &profile.address2);
        fill(&mut self.city, &profile.city);
        fill(&mut self.country, &profile.country);
        fill(&mut self.postcode, &profile.postcode);
        if !present(&self.region) && present(&profile.region) {
            self.region.clone_from(&profile.region);
            self.region_id.clone_from(&profile.region_id);
        }
    }

    /// Drop the region and anything resolved from it.
    pub fn clear_region(&mut self) {
        self.region.clear();
        self.region_id = None;
        self.clear_delivery_location();
    }

    pub fn clear_delivery_location(&mut self) {
        self.delivery_location_id = None;
        self.delivery_location_name = None;
    }
}

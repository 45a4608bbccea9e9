use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed string enumeration with an exact, case-sensitive wire form.
macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            /// Comma separated list of accepted values, for error messages.
            pub fn allowed() -> String {
                Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| format!("must be one of {}", Self::allowed()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

closed_enum!(PropertyType {
    House => "house",
    Apartment => "apartment",
    Office => "office",
    CommercialUnit => "commercial-unit",
    Land => "land",
    Warehouse => "warehouse",
    Penthouse => "penthouse",
    Duplex => "duplex",
    Studio => "studio",
    IndustrialBuilding => "industrial-building",
});

closed_enum!(DealType {
    Sale => "sale",
    Rental => "rental",
    ShortTermRental => "short-term-rental",
});

closed_enum!(Currency {
    Usd => "USD",
    Ars => "ARS",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyImage {
    pub url: String,
    #[serde(default)]
    pub is_principal: bool,
}

impl PropertyImage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_principal: false,
        }
    }
}

/// Property fields after coercion, trimming and default-filling.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedProperty {
    pub title: String,
    pub description: String,
    pub address: String,
    pub property_type: PropertyType,
    pub deal_type: DealType,
    pub price: Price,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub rooms: i32,
    pub area_sq_meters: f64,
    pub available: bool,
}

/// Everything the store writes for one record.
#[derive(Debug, Clone)]
pub struct PropertyDraft {
    pub fields: NormalizedProperty,
    pub images: Vec<PropertyImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub address: String,
    pub property_type: PropertyType,
    pub deal_type: DealType,
    pub price: Price,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub rooms: i32,
    pub area_sq_meters: f64,
    pub images: Vec<PropertyImage>,
    pub available: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Property {
    pub fn from_draft(
        id: Uuid,
        draft: PropertyDraft,
        created_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Self {
        let f = draft.fields;
        Self {
            id,
            title: f.title,
            description: f.description,
            address: f.address,
            property_type: f.property_type,
            deal_type: f.deal_type,
            price: f.price,
            bedrooms: f.bedrooms,
            bathrooms: f.bathrooms,
            rooms: f.rooms,
            area_sq_meters: f.area_sq_meters,
            images: draft.images,
            available: f.available,
            created_at,
            updated_at,
        }
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.images.iter().map(|i| i.url.clone()).collect()
    }
}

#[derive(Debug, FromRow)]
pub struct PropertyRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub address: String,
    #[sqlx(try_from = "String")]
    pub property_type: PropertyType,
    #[sqlx(try_from = "String")]
    pub deal_type: DealType,
    pub price_amount: f64,
    #[sqlx(try_from = "String")]
    pub price_currency: Currency,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub rooms: i32,
    pub area_sq_meters: f64,
    pub images: Json<Vec<PropertyImage>>,
    pub available: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<PropertyRow> for Property {
    fn from(r: PropertyRow) -> Self {
        Self {
            id: r.id,
            title: r.title,
            description: r.description,
            address: r.address,
            property_type: r.property_type,
            deal_type: r.deal_type,
            price: Price {
                amount: r.price_amount,
                currency: r.price_currency,
            },
            bedrooms: r.bedrooms,
            bathrooms: r.bathrooms,
            rooms: r.rooms,
            area_sq_meters: r.area_sq_meters,
            images: r.images.0,
            available: r.available,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Sparse equality filter; `None` imposes no constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyFilter {
    pub property_type: Option<PropertyType>,
    pub deal_type: Option<DealType>,
    pub available: Option<bool>,
}

impl PropertyFilter {
    pub fn matches(&self, p: &Property) -> bool {
        self.property_type.map_or(true, |t| p.property_type == t)
            && self.deal_type.map_or(true, |d| p.deal_type == d)
            && self.available.map_or(true, |a| p.available == a)
    }
}

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, req: PageRequest, total_count: u64) -> Self {
        Self {
            items,
            page: req.page,
            page_size: req.page_size,
            total_count,
            total_pages: total_count.div_ceil(u64::from(req.page_size.max(1))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_exact_wire_values() {
        assert_eq!("commercial-unit".parse::<PropertyType>(), Ok(PropertyType::CommercialUnit));
        assert_eq!("short-term-rental".parse::<DealType>(), Ok(DealType::ShortTermRental));
        assert_eq!("USD".parse::<Currency>(), Ok(Currency::Usd));
        assert!("House".parse::<PropertyType>().is_err());
        assert!("usd".parse::<Currency>().is_err());
        assert_eq!(PropertyType::ALL.len(), 10);
    }

    #[test]
    fn enums_serialize_as_wire_values() {
        let json = serde_json::to_string(&PropertyType::IndustrialBuilding).unwrap();
        assert_eq!(json, "\"industrial-building\"");
        let json = serde_json::to_string(&Currency::Ars).unwrap();
        assert_eq!(json, "\"ARS\"");
    }

    #[test]
    fn total_pages_rounds_up() {
        let req = PageRequest { page: 1, page_size: 10 };
        assert_eq!(Page::<()>::new(vec![], req, 25).total_pages, 3);
        assert_eq!(Page::<()>::new(vec![], req, 20).total_pages, 2);
        assert_eq!(Page::<()>::new(vec![], req, 0).total_pages, 0);
        assert_eq!(PageRequest { page: 3, page_size: 10 }.offset(), 20);
    }
}

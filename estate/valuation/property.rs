use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ports::FeatureVector;

/// Number of model input features.
pub const FEATURE_COUNT: usize = 7;

/// Feature column names, in the order models are trained and queried with.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "Assessed Value",
    "area_m2",
    "meses_en_venta",
    "nro_habitaciones",
    "nro_pisos",
    "Property Type_Residential",
    "Property Type_Single Family",
];

/// Key carrying the historical sale amount in feature maps.
pub const SALE_AMOUNT_KEY: &str = "Sale Amount";

/// Property categories accepted at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Generic residential.
    Residential,
    /// Detached single-family house.
    #[serde(rename = "Single Family")]
    SingleFamily,
    /// Condominium unit.
    Condo,
    /// Two-family dwelling.
    #[serde(rename = "Two Family")]
    TwoFamily,
    /// Three-family dwelling.
    #[serde(rename = "Three Family")]
    ThreeFamily,
    /// Four-family dwelling.
    #[serde(rename = "Four Family")]
    FourFamily,
}

impl PropertyType {
    /// Every accepted tag, in display order.
    pub const ALL: [Self; 6] = [
        Self::Residential,
        Self::SingleFamily,
        Self::Condo,
        Self::TwoFamily,
        Self::ThreeFamily,
        Self::FourFamily,
    ];

    /// Canonical tag as it appears in datasets and forms.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Residential => "Residential",
            Self::SingleFamily => "Single Family",
            Self::Condo => "Condo",
            Self::TwoFamily => "Two Family",
            Self::ThreeFamily => "Three Family",
            Self::FourFamily => "Four Family",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label() == tag)
            .ok_or_else(|| format!("unknown property type '{tag}'"))
    }
}

/// Raw property attributes as submitted by a form or API caller.
///
/// The type tag stays free text so an unknown value is reported by the validator
/// instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInput {
    assessed_value: f64,
    area_m2: f64,
    months_on_market: i64,
    rooms: i64,
    floors: i64,
    property_type: String,
}

impl PropertyInput {
    /// Creates an input value; no validation happens here.
    #[must_use]
    pub fn new(
        assessed_value: f64,
        area_m2: f64,
        months_on_market: i64,
        rooms: i64,
        floors: i64,
        property_type: impl Into<String>,
    ) -> Self {
        Self {
            assessed_value,
            area_m2,
            months_on_market,
            rooms,
            floors,
            property_type: property_type.into(),
        }
    }

    /// Assessed value in currency units.
    #[must_use]
    pub const fn assessed_value(&self) -> f64 {
        self.assessed_value
    }

    /// Floor area in square metres.
    #[must_use]
    pub const fn area_m2(&self) -> f64 {
        self.area_m2
    }

    /// Months the property has been listed.
    #[must_use]
    pub const fn months_on_market(&self) -> i64 {
        self.months_on_market
    }

    /// Room count.
    #[must_use]
    pub const fn rooms(&self) -> i64 {
        self.rooms
    }

    /// Floor count.
    #[must_use]
    pub const fn floors(&self) -> i64 {
        self.floors
    }

    /// Raw property-type tag.
    #[must_use]
    pub fn property_type(&self) -> &str {
        &self.property_type
    }

    /// Parsed tag, if it belongs to the accepted set.
    #[must_use]
    pub fn parsed_type(&self) -> Option<PropertyType> {
        self.property_type.parse().ok()
    }
}

/// Domain entity fed to models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Assessed value in currency units.
    pub assessed_value: f64,
    /// Floor area in square metres.
    pub area_m2: f64,
    /// Months on the market.
    pub months_on_market: i64,
    /// Room count.
    pub rooms: i64,
    /// Floor count.
    pub floors: i64,
    /// 1.0 when the type tag is `Residential`.
    pub is_residential: f64,
    /// 1.0 when the type tag is `Single Family`.
    pub is_single_family: f64,
    /// Historical sale amount; only present on training records.
    pub sale_amount: Option<f64>,
}

impl Property {
    /// Converts a boundary input, deriving the two type indicators.
    #[must_use]
    pub fn from_input(input: &PropertyInput) -> Self {
        let kind = input.parsed_type();
        Self {
            assessed_value: input.assessed_value(),
            area_m2: input.area_m2(),
            months_on_market: input.months_on_market(),
            rooms: input.rooms(),
            floors: input.floors(),
            is_residential: indicator(kind == Some(PropertyType::Residential)),
            is_single_family: indicator(kind == Some(PropertyType::SingleFamily)),
            sale_amount: None,
        }
    }

    /// Hydrates a training record from a preprocessed feature row.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn from_features(features: &FeatureVector, sale_amount: Option<f64>) -> Self {
        Self {
            assessed_value: features[0],
            area_m2: features[1],
            months_on_market: features[2].round() as i64,
            rooms: features[3].round() as i64,
            floors: features[4].round() as i64,
            is_residential: features[5],
            is_single_family: features[6],
            sale_amount,
        }
    }

    /// Model input in [`FEATURE_COLUMNS`] order.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn features(&self) -> FeatureVector {
        [
            self.assessed_value,
            self.area_m2,
            self.months_on_market as f64,
            self.rooms as f64,
            self.floors as f64,
            self.is_residential,
            self.is_single_family,
        ]
    }

    /// Named feature map keyed by dataset column names; includes the sale amount when known.
    #[must_use]
    pub fn to_feature_map(&self) -> IndexMap<String, f64> {
        let mut map: IndexMap<String, f64> = FEATURE_COLUMNS
            .iter()
            .zip(self.features())
            .map(|(name, value)| ((*name).to_string(), value))
            .collect();
        if let Some(sale) = self.sale_amount {
            map.insert(SALE_AMOUNT_KEY.into(), sale);
        }
        map
    }

    /// Inverse of [`Self::to_feature_map`]; missing keys default to zero.
    #[must_use]
    pub fn from_feature_map(map: &IndexMap<String, f64>) -> Self {
        let mut features = [0.0; FEATURE_COUNT];
        for (slot, name) in features.iter_mut().zip(FEATURE_COLUMNS) {
            *slot = map.get(name).copied().unwrap_or(0.0);
        }
        Self::from_features(&features, map.get(SALE_AMOUNT_KEY).copied())
    }
}

const fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

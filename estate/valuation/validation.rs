use serde::{Deserialize, Serialize};

use crate::property::{Property, PropertyInput, PropertyType};

/// Bands outside which legal values raise a warning. Tune per market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    /// Lower edge of the typical assessed-value band.
    pub assessed_value_min: f64,
    /// Upper edge of the typical assessed-value band.
    pub assessed_value_max: f64,
    /// Smallest typical area in m².
    pub area_min: f64,
    /// Largest typical area in m².
    pub area_max: f64,
    /// Listing age above which a warning is raised.
    pub months_max: i64,
    /// Room count above which a warning is raised.
    pub rooms_max: i64,
    /// Floor count above which a warning is raised.
    pub floors_max: i64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            assessed_value_min: 50_000.0,
            assessed_value_max: 5_000_000.0,
            area_min: 30.0,
            area_max: 500.0,
            months_max: 24,
            rooms_max: 8,
            floors_max: 4,
        }
    }
}

/// Outcome of a detailed validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when no error was found.
    pub is_valid: bool,
    /// Blocking problems, in field order.
    pub errors: Vec<String>,
    /// Unusual but legal values, in field order.
    pub warnings: Vec<String>,
    /// Number of errors.
    pub error_count: usize,
    /// Number of warnings.
    pub warning_count: usize,
    /// One-line human readable verdict.
    pub summary: String,
}

impl ValidationReport {
    fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        let is_valid = errors.is_empty();
        let summary = if is_valid && warnings.is_empty() {
            "valid: all fields within expected ranges".to_string()
        } else if is_valid {
            format!("valid with {} warning(s)", warnings.len())
        } else {
            format!(
                "invalid: {} error(s), {} warning(s)",
                errors.len(),
                warnings.len()
            )
        };
        Self {
            is_valid,
            error_count: errors.len(),
            warning_count: warnings.len(),
            errors,
            warnings,
            summary,
        }
    }
}

/// Applies hard bounds and soft warning bands to property data.
#[derive(Debug, Clone, Default)]
pub struct PropertyValidator {
    thresholds: ValidationThresholds,
}

impl PropertyValidator {
    /// Creates a validator with custom warning bands.
    #[must_use]
    pub const fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    /// Active warning bands.
    #[must_use]
    pub const fn thresholds(&self) -> &ValidationThresholds {
        &self.thresholds
    }

    /// Quick verdict.
    #[must_use]
    pub fn validate(&self, input: &PropertyInput) -> bool {
        self.validate_detailed(input).is_valid
    }

    /// Full report for a boundary input, including the type tag check.
    #[must_use]
    pub fn validate_detailed(&self, input: &PropertyInput) -> ValidationReport {
        let mut findings = Findings::default();
        self.check_numeric(
            &mut findings,
            input.assessed_value(),
            input.area_m2(),
            input.months_on_market(),
            input.rooms(),
            input.floors(),
        );
        if input.parsed_type().is_none() {
            let accepted: Vec<_> = PropertyType::ALL.iter().map(|kind| kind.label()).collect();
            findings.errors.push(format!(
                "property type '{}' is not one of: {}",
                input.property_type(),
                accepted.join(", ")
            ));
        }
        findings.into_report()
    }

    /// Domain rules for an already converted entity.
    #[must_use]
    pub fn validate_entity(&self, property: &Property) -> ValidationReport {
        let mut findings = Findings::default();
        self.check_numeric(
            &mut findings,
            property.assessed_value,
            property.area_m2,
            property.months_on_market,
            property.rooms,
            property.floors,
        );
        if property.is_residential + property.is_single_family > 1.0 {
            findings
                .errors
                .push("property cannot be both residential and single family".into());
        }
        findings.into_report()
    }

    fn check_numeric(
        &self,
        findings: &mut Findings,
        assessed_value: f64,
        area_m2: f64,
        months: i64,
        rooms: i64,
        floors: i64,
    ) {
        let limits = &self.thresholds;

        // NaN and infinities are errors, not out-of-range warnings.
        if assessed_value.is_finite() && assessed_value > 0.0 {
            if assessed_value < limits.assessed_value_min
                || assessed_value > limits.assessed_value_max
            {
                findings.warnings.push(format!(
                    "assessed value {assessed_value:.0} is outside the typical range {:.0}-{:.0}",
                    limits.assessed_value_min, limits.assessed_value_max
                ));
            }
        } else {
            findings.errors.push(format!(
                "assessed value must be a finite amount greater than 0 (got {assessed_value})"
            ));
        }

        if area_m2.is_finite() && area_m2 > 0.0 {
            if area_m2 < limits.area_min || area_m2 > limits.area_max {
                findings.warnings.push(format!(
                    "area {area_m2} m2 is outside the typical range {}-{} m2",
                    limits.area_min, limits.area_max
                ));
            }
        } else {
            findings
                .errors
                .push(format!("area must be a finite size greater than 0 m2 (got {area_m2})"));
        }

        if months < 0 {
            findings.errors.push(format!(
                "months on market cannot be negative (got {months})"
            ));
        } else if months > limits.months_max {
            findings.warnings.push(format!(
                "{months} months on market is unusually long (>{})",
                limits.months_max
            ));
        }

        if rooms < 1 {
            findings
                .errors
                .push(format!("room count must be at least 1 (got {rooms})"));
        } else if rooms > limits.rooms_max {
            findings.warnings.push(format!(
                "{rooms} rooms is unusually high (>{})",
                limits.rooms_max
            ));
        }

        if floors < 1 {
            findings
                .errors
                .push(format!("floor count must be at least 1 (got {floors})"));
        } else if floors > limits.floors_max {
            findings.warnings.push(format!(
                "{floors} floors is unusually high (>{})",
                limits.floors_max
            ));
        }
    }
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn into_report(self) -> ValidationReport {
        ValidationReport::from_findings(self.errors, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(assessed: f64, area: f64, months: i64, rooms: i64, floors: i64, kind: &str) -> PropertyInput {
        PropertyInput::new(assessed, area, months, rooms, floors, kind)
    }

    #[test]
    fn typical_input_has_no_findings() {
        let report = PropertyValidator::default()
            .validate_detailed(&input(300_000.0, 150.0, 6, 3, 2, "Single Family"));
        assert!(report.is_valid);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.warning_count, 0);
        assert_eq!(report.summary, "valid: all fields within expected ranges");
    }

    #[test]
    fn infinite_amounts_are_errors() {
        let validator = PropertyValidator::default();
        let report = validator.validate_detailed(&input(f64::INFINITY, f64::INFINITY, 6, 3, 2, "Condo"));
        assert!(!report.is_valid);
        assert_eq!(report.error_count, 2);
        assert!(report.warnings.is_empty());
        assert!(!validator.validate(&input(300_000.0, f64::NEG_INFINITY, 6, 3, 2, "Condo")));
    }

    #[test]
    fn each_violation_reports_exactly_one_error() {
        let validator = PropertyValidator::default();
        let cases = [
            (input(0.0, 150.0, 6, 3, 2, "Condo"), "assessed value"),
            (input(300_000.0, -1.0, 6, 3, 2, "Condo"), "area"),
            (input(300_000.0, 150.0, -1, 3, 2, "Condo"), "months on market"),
            (input(300_000.0, 150.0, 6, 0, 2, "Condo"), "room count"),
            (input(300_000.0, 150.0, 6, 3, 0, "Condo"), "floor count"),
            (input(300_000.0, 150.0, 6, 3, 2, "Mansion"), "property type"),
        ];
        for (candidate, field) in cases {
            let report = validator.validate_detailed(&candidate);
            assert!(!validator.validate(&candidate));
            assert_eq!(report.errors.len(), 1, "{field}: {:?}", report.errors);
            assert!(report.errors[0].starts_with(field), "{}", report.errors[0]);
        }
    }

    #[test]
    fn nan_assessed_value_is_an_error() {
        let report =
            PropertyValidator::default().validate_detailed(&input(f64::NAN, 150.0, 6, 3, 2, "Condo"));
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn unusual_values_only_warn() {
        let report = PropertyValidator::default()
            .validate_detailed(&input(6_000_000.0, 800.0, 30, 9, 5, "Residential"));
        assert!(report.is_valid);
        assert_eq!(report.warning_count, 5);
        assert_eq!(report.summary, "valid with 5 warning(s)");
    }

    #[test]
    fn thresholds_are_configurable() {
        let validator = PropertyValidator::new(ValidationThresholds {
            rooms_max: 2,
            ..ValidationThresholds::default()
        });
        let report = validator.validate_detailed(&input(300_000.0, 150.0, 6, 3, 2, "Condo"));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("rooms"));
    }

    #[test]
    fn entity_rejects_conflicting_indicators() {
        let mut property = Property::from_input(&input(300_000.0, 150.0, 6, 3, 2, "Residential"));
        property.is_single_family = 1.0;
        let report = PropertyValidator::default().validate_entity(&property);
        assert!(!report.is_valid);
    }

    proptest! {
        #[test]
        fn in_bound_inputs_always_validate(
            assessed in 0.01f64..1.0e8,
            area in 0.01f64..1.0e4,
            months in 0i64..600,
            rooms in 1i64..100,
            floors in 1i64..100,
            kind in proptest::sample::select(PropertyType::ALL.to_vec()),
        ) {
            let candidate = input(assessed, area, months, rooms, floors, kind.label());
            let validator = PropertyValidator::default();
            prop_assert!(validator.validate(&candidate));
            prop_assert_eq!(validator.validate_detailed(&candidate).error_count, 0);
        }
    }
}

//! Demographic reference tables: fertility by age group, mortality by age group and gender, and
//! the sex ratio at birth. Each is keyed by year and is read-only once loaded.
//!
//! Lookups resolve the row whose year is nearest to the query year. When two rows are equally
//! near, the earlier year wins.

use std::collections::BTreeMap;

use crate::agent::Gender;
use crate::error::TbError;

/// The 18 five-year age groups of the mortality table. The last one is open-ended.
pub const MORTALITY_AGE_GROUPS: [&str; 18] = [
    "0-4", "5-9", "10-14", "15-19", "20-24", "25-29", "30-34", "35-39", "40-44", "45-49", "50-54",
    "55-59", "60-64", "65-69", "70-74", "75-79", "80-84", "85 +",
];

/// The seven five-year reproductive age groups of the fertility table.
pub const FERTILITY_AGE_GROUPS: [&str; 7] = [
    "15-19", "20-24", "25-29", "30-34", "35-39", "40-44", "45-49",
];

/// Females per 1000 males at birth when no sex-ratio row is available.
pub const DEFAULT_SEX_RATIO: f64 = 952.0;

const FIRST_FERTILITY_BUCKET: usize = 3;

/// Finds the entry whose year is closest to `year`, preferring the earlier year on a tie.
pub fn nearest_year<V>(rows: &BTreeMap<i32, V>, year: i32) -> Option<(i32, &V)> {
    let mut best: Option<(i32, &V)> = None;
    for (&row_year, value) in rows {
        let distance = (row_year - year).abs();
        match best {
            Some((best_year, _)) if (best_year - year).abs() <= distance => {}
            _ => best = Some((row_year, value)),
        }
    }
    best
}

/// Parses an age-group label such as `"20-24"`, `"85 +"` or `"85+"` into its mortality bucket.
///
/// # Errors
///
/// Returns `TbError::DataFormatError` if the label is not one of the 18 mortality groups.
pub fn parse_mortality_age_group(label: &str) -> Result<usize, TbError> {
    let normalized = normalize_age_group(label);
    MORTALITY_AGE_GROUPS
        .iter()
        .position(|group| normalize_age_group(group) == normalized)
        .ok_or_else(|| TbError::DataFormatError(format!("unknown mortality age group {label:?}")))
}

/// Parses a reproductive age-group label such as `"30-34"` into its fertility bucket.
///
/// # Errors
///
/// Returns `TbError::DataFormatError` if the label is not one of the seven fertility groups.
pub fn parse_fertility_age_group(label: &str) -> Result<usize, TbError> {
    let normalized = normalize_age_group(label);
    FERTILITY_AGE_GROUPS
        .iter()
        .position(|group| normalize_age_group(group) == normalized)
        .ok_or_else(|| TbError::DataFormatError(format!("unknown fertility age group {label:?}")))
}

fn normalize_age_group(label: &str) -> String {
    label.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Mortality bucket for an age: five-year groups, with everyone 85 and over in the last one.
///
/// # Errors
///
/// Returns `TbError::LookupError` for a negative or non-finite age.
pub fn mortality_bucket(age: f64) -> Result<usize, TbError> {
    if !age.is_finite() || age < 0.0 {
        return Err(TbError::LookupError(format!(
            "no mortality age group for age {age}"
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bucket = (age / 5.0).floor() as usize;
    Ok(bucket.min(MORTALITY_AGE_GROUPS.len() - 1))
}

/// Fertility bucket for an age in `[15, 50)`.
///
/// # Errors
///
/// Returns `TbError::LookupError` for ages outside the reproductive groups.
pub fn fertility_bucket(age: f64) -> Result<usize, TbError> {
    if !(15.0..50.0).contains(&age) {
        return Err(TbError::LookupError(format!(
            "no fertility age group for age {age}"
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bucket = (age / 5.0).floor() as usize;
    Ok(bucket - FIRST_FERTILITY_BUCKET)
}

/// Annual births per 1000 women, by age group, for one year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FertilityRow {
    rates: [Option<f64>; FERTILITY_AGE_GROUPS.len()],
}

impl FertilityRow {
    /// # Errors
    ///
    /// Returns `TbError::LookupError` if the age has no group or the group has no rate.
    pub fn rate(&self, age: f64) -> Result<f64, TbError> {
        let bucket = fertility_bucket(age)?;
        self.rates[bucket].ok_or_else(|| {
            TbError::LookupError(format!(
                "no fertility rate for age group {}",
                FERTILITY_AGE_GROUPS[bucket]
            ))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FertilityTable {
    rows: BTreeMap<i32, FertilityRow>,
}

impl FertilityTable {
    pub fn insert(&mut self, year: i32, bucket: usize, rate: f64) {
        self.rows.entry(year).or_default().rates[bucket] = Some(rate);
    }

    /// The row for the year nearest to `year`, if the table has any rows.
    #[must_use]
    pub fn nearest(&self, year: i32) -> Option<(i32, &FertilityRow)> {
        nearest_year(&self.rows, year)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Annual deaths per 1000, by age group and gender, for one year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MortalityRow {
    male: [Option<f64>; MORTALITY_AGE_GROUPS.len()],
    female: [Option<f64>; MORTALITY_AGE_GROUPS.len()],
}

impl MortalityRow {
    /// # Errors
    ///
    /// Returns `TbError::LookupError` if the age has no group or the group has no rate.
    pub fn rate(&self, gender: Gender, age: f64) -> Result<f64, TbError> {
        let bucket = mortality_bucket(age)?;
        let rates = match gender {
            Gender::Male => &self.male,
            Gender::Female => &self.female,
        };
        rates[bucket].ok_or_else(|| {
            TbError::LookupError(format!(
                "no {gender:?} mortality rate for age group {}",
                MORTALITY_AGE_GROUPS[bucket]
            ))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MortalityTable {
    rows: BTreeMap<i32, MortalityRow>,
}

impl MortalityTable {
    pub fn insert(&mut self, year: i32, bucket: usize, male: Option<f64>, female: Option<f64>) {
        let row = self.rows.entry(year).or_default();
        row.male[bucket] = male;
        row.female[bucket] = female;
    }

    #[must_use]
    pub fn nearest(&self, year: i32) -> Option<(i32, &MortalityRow)> {
        nearest_year(&self.rows, year)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Females born per 1000 males, by year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SexRatioTable {
    rows: BTreeMap<i32, f64>,
}

impl SexRatioTable {
    pub fn insert(&mut self, year: i32, ratio: f64) {
        self.rows.insert(year, ratio);
    }

    /// Probability that a newborn is female in the year nearest to `year`.
    #[must_use]
    pub fn female_probability(&self, year: i32) -> f64 {
        let ratio = self
            .nearest(year)
            .map_or(DEFAULT_SEX_RATIO, |(_, ratio)| *ratio);
        ratio / (1000.0 + ratio)
    }

    #[must_use]
    pub fn nearest(&self, year: i32) -> Option<(i32, &f64)> {
        nearest_year(&self.rows, year)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The three demographic tables, shared read-only by every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemographicTables {
    pub fertility: FertilityTable,
    pub mortality: MortalityTable,
    pub sex_ratio: SexRatioTable,
}

//! Loading of the tabular inputs: the synthetic population, the three demographic tables and the
//! calibration reference incidence. Each file is checked for its required columns before any row
//! is read, so a malformed input fails before the simulation starts.

use std::fs::File;
use std::path::Path;

use csv::{Reader, ReaderBuilder, Trim};
use indexmap::IndexSet;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::agent::Gender;
use crate::calibration::ReferenceIncidence;
use crate::error::TbError;
use crate::parameters::Parameters;
use crate::tables::{
    parse_fertility_age_group, parse_mortality_age_group, DemographicTables, FertilityTable,
    MortalityTable, SexRatioTable,
};

/// One row of the synthetic population.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PopulationRecord {
    #[serde(rename = "SexLabel")]
    pub gender: Gender,
    #[serde(rename = "Age")]
    pub age: f64,
    #[serde(rename = "HHID")]
    pub household_id: u32,
    #[serde(rename = "WorkPlaceID")]
    pub workplace_id: u32,
    #[serde(rename = "SchoolID")]
    pub school_id: u32,
    #[serde(rename = "AgentID")]
    pub agent_id: u32,
}

#[derive(Debug, Deserialize)]
struct FertilityRecord {
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Age group")]
    age_group: String,
    #[serde(rename = "Fertility Rate")]
    rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MortalityRecord {
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Age group")]
    age_group: String,
    #[serde(rename = "Male")]
    male: Option<f64>,
    #[serde(rename = "Female")]
    female: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SexRatioRecord {
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Ratio")]
    ratio: f64,
}

#[derive(Debug, Deserialize)]
struct ReferenceRecord {
    year: i32,
    week: u32,
    incidence: f64,
}

const POPULATION_COLUMNS: [&str; 6] = [
    "SexLabel",
    "Age",
    "HHID",
    "WorkPlaceID",
    "SchoolID",
    "AgentID",
];
const FERTILITY_COLUMNS: [&str; 3] = ["Year", "Age group", "Fertility Rate"];
const MORTALITY_COLUMNS: [&str; 5] = ["Year", "Age group", "Total", "Male", "Female"];
const SEX_RATIO_COLUMNS: [&str; 2] = ["Year", "Ratio"];
const REFERENCE_COLUMNS: [&str; 3] = ["year", "week", "incidence"];

fn open_csv(path: &Path) -> Result<Reader<File>, TbError> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| TbError::DataFormatError(format!("cannot open {}: {e}", path.display())))
}

/// Fails with `DataFormatError` naming the first required column absent from the header row.
fn require_columns(
    reader: &mut Reader<File>,
    path: &Path,
    required: &[&str],
) -> Result<(), TbError> {
    let headers = reader.headers()?;
    for column in required {
        if !headers.iter().any(|header| header == *column) {
            return Err(TbError::DataFormatError(format!(
                "{} is missing required column {column:?}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn read_records<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>, TbError> {
    let mut reader = open_csv(path)?;
    require_columns(&mut reader, path, required)?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, result)| {
            result.map_err(|e| {
                // Header is line 1.
                TbError::DataFormatError(format!("{} line {}: {e}", path.display(), i + 2))
            })
        })
        .collect()
}

/// Reads the synthetic population.
///
/// # Errors
///
/// Returns `TbError::DataFormatError` if a column is missing, a row is malformed, a household id
/// is 0, or an agent id appears twice.
pub fn load_synthetic_population(path: &Path) -> Result<Vec<PopulationRecord>, TbError> {
    let records: Vec<PopulationRecord> = read_records(path, &POPULATION_COLUMNS)?;
    let mut seen = IndexSet::with_capacity(records.len());
    for record in &records {
        if record.household_id == 0 {
            return Err(TbError::DataFormatError(format!(
                "agent {} in {} has household id 0",
                record.agent_id,
                path.display()
            )));
        }
        if !seen.insert(record.agent_id) {
            return Err(TbError::DataFormatError(format!(
                "duplicate agent id {} in {}",
                record.agent_id,
                path.display()
            )));
        }
    }
    info!(
        "loaded {} synthetic agents from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// # Errors
///
/// Returns `TbError::DataFormatError` if a column is missing or an age group is unknown.
pub fn load_fertility_table(path: &Path) -> Result<FertilityTable, TbError> {
    let mut table = FertilityTable::default();
    for record in read_records::<FertilityRecord>(path, &FERTILITY_COLUMNS)? {
        let bucket = parse_fertility_age_group(&record.age_group)?;
        if let Some(rate) = record.rate {
            table.insert(record.year, bucket, rate);
        }
    }
    Ok(table)
}

/// # Errors
///
/// Returns `TbError::DataFormatError` if a column is missing or an age group is unknown.
pub fn load_mortality_table(path: &Path) -> Result<MortalityTable, TbError> {
    let mut table = MortalityTable::default();
    for record in read_records::<MortalityRecord>(path, &MORTALITY_COLUMNS)? {
        let bucket = parse_mortality_age_group(&record.age_group)?;
        table.insert(record.year, bucket, record.male, record.female);
    }
    Ok(table)
}

/// # Errors
///
/// Returns `TbError::DataFormatError` if a column is missing or a row is malformed.
pub fn load_sex_ratio_table(path: &Path) -> Result<SexRatioTable, TbError> {
    let mut table = SexRatioTable::default();
    for record in read_records::<SexRatioRecord>(path, &SEX_RATIO_COLUMNS)? {
        table.insert(record.year, record.ratio);
    }
    Ok(table)
}

/// Loads the three demographic tables named in the parameters. A missing sex-ratio file is not
/// an error: births then use the default sex ratio.
///
/// # Errors
///
/// Returns `TbError::DataFormatError` if the fertility or mortality file is missing or
/// malformed, or if the sex-ratio file exists but is malformed.
pub fn load_demographic_tables(parameters: &Parameters) -> Result<DemographicTables, TbError> {
    let fertility = load_fertility_table(&parameters.fertility_data_path)?;
    let mortality = load_mortality_table(&parameters.mortality_data_path)?;
    let sex_ratio = if parameters.sex_ratio_data_path.exists() {
        load_sex_ratio_table(&parameters.sex_ratio_data_path)?
    } else {
        warn!(
            "sex ratio file {} not found; using the default ratio",
            parameters.sex_ratio_data_path.display()
        );
        SexRatioTable::default()
    };
    if fertility.is_empty() {
        warn!("fertility table is empty; no births will occur");
    }
    if mortality.is_empty() {
        warn!("mortality table is empty; no background deaths will occur");
    }
    Ok(DemographicTables {
        fertility,
        mortality,
        sex_ratio,
    })
}

/// Reads the weekly reference incidence used for calibration.
///
/// # Errors
///
/// Returns `TbError::DataFormatError` if `year`, `week` or `incidence` is missing, or if a
/// (year, week) appears twice.
pub fn load_reference_incidence(path: &Path) -> Result<Vec<ReferenceIncidence>, TbError> {
    let records: Vec<ReferenceRecord> = read_records(path, &REFERENCE_COLUMNS)?;
    let mut seen = IndexSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert((record.year, record.week)) {
            return Err(TbError::DataFormatError(format!(
                "week {} of {} appears twice in {}",
                record.week,
                record.year,
                path.display()
            )));
        }
    }
    Ok(records
        .into_iter()
        .map(|record| ReferenceIncidence {
            year: record.year,
            week: record.week,
            reference: record.incidence,
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod test_data {
    //! Small input files shared by tests.
    use std::fs;
    use std::path::{Path, PathBuf};

    pub const POPULATION_CSV: &str = "\
SexLabel,Age,HHID,WorkPlaceID,SchoolID,AgentID
Male,35.0,1,100,0,1
Female,33.0,1,101,0,2
Female,8.0,1,0,200,3
Male,2.0,1,0,0,4
Female,70.0,2,0,0,5
Male,41.5,2,100,0,6
Female,25.0,3,101,0,7
Male,15.0,3,0,200,8
Female,19.0,4,0,0,9
Male,52.0,4,102,0,10
";

    pub const FERTILITY_CSV: &str = "\
Year,Age group,Fertility Rate
2020,15-19,40.0
2020,20-24,120.0
2020,25-29,140.0
2020,30-34,110.0
2020,35-39,60.0
2020,40-44,20.0
2020,45-49,5.0
";

    pub const MORTALITY_CSV: &str = "\
Year,Age group,Total,Male,Female
2020,0-4,5.0,5.5,4.5
2020,5-9,1.0,1.1,0.9
2020,10-14,1.0,1.1,0.9
2020,15-19,1.5,1.8,1.2
2020,20-24,2.0,2.5,1.5
2020,25-29,2.0,2.5,1.5
2020,30-34,2.5,3.0,2.0
2020,35-39,3.0,3.5,2.5
2020,40-44,4.0,4.5,3.5
2020,45-49,5.0,6.0,4.0
2020,50-54,7.0,8.0,6.0
2020,55-59,10.0,12.0,8.0
2020,60-64,15.0,18.0,12.0
2020,65-69,22.0,26.0,18.0
2020,70-74,35.0,40.0,30.0
2020,75-79,55.0,60.0,50.0
2020,80-84,90.0,95.0,85.0
2020,85 +,160.0,170.0,150.0
";

    pub const SEX_RATIO_CSV: &str = "\
Year,Ratio
2020,950.0
";

    pub const REFERENCE_CSV: &str = "\
year,week,incidence
2021,1,20
2021,2,22
2021,3,24
";

    pub fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::test_data::*;
    use super::*;
    use crate::parameters::test_parameters;
    use tempfile::tempdir;

    #[test]
    fn loads_synthetic_population() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "population.csv", POPULATION_CSV);
        let records = load_synthetic_population(&path).unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(
            records[2],
            PopulationRecord {
                gender: Gender::Female,
                age: 8.0,
                household_id: 1,
                workplace_id: 0,
                school_id: 200,
                agent_id: 3,
            }
        );
    }

    #[test]
    fn missing_column_is_a_data_format_error() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "population.csv",
            "SexLabel,Age,HHID,WorkPlaceID,AgentID\nMale,35.0,1,100,1\n",
        );
        match load_synthetic_population(&path) {
            Err(TbError::DataFormatError(msg)) => assert!(msg.contains("SchoolID"), "{msg}"),
            other => panic!("expected data format error, got {other:?}"),
        }
    }

    #[test]
    fn zero_household_and_duplicate_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let zero = write(
            dir.path(),
            "zero.csv",
            "SexLabel,Age,HHID,WorkPlaceID,SchoolID,AgentID\nMale,35.0,0,0,0,1\n",
        );
        assert!(matches!(
            load_synthetic_population(&zero),
            Err(TbError::DataFormatError(_))
        ));
        let duplicate = write(
            dir.path(),
            "duplicate.csv",
            "SexLabel,Age,HHID,WorkPlaceID,SchoolID,AgentID\nMale,35.0,1,0,0,1\nFemale,30.0,1,0,0,1\n",
        );
        assert!(matches!(
            load_synthetic_population(&duplicate),
            Err(TbError::DataFormatError(_))
        ));
    }

    #[test]
    fn malformed_row_is_a_data_format_error() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "population.csv",
            "SexLabel,Age,HHID,WorkPlaceID,SchoolID,AgentID\nUnknown,35.0,1,0,0,1\n",
        );
        match load_synthetic_population(&path) {
            Err(TbError::DataFormatError(msg)) => assert!(msg.contains("line 2"), "{msg}"),
            other => panic!("expected data format error, got {other:?}"),
        }
    }

    #[test]
    fn loads_demographic_tables() {
        let dir = tempdir().unwrap();
        let mut parameters = test_parameters();
        parameters.fertility_data_path = write(dir.path(), "fertility.csv", FERTILITY_CSV);
        parameters.mortality_data_path = write(dir.path(), "mortality.csv", MORTALITY_CSV);
        parameters.sex_ratio_data_path = write(dir.path(), "sex_ratio.csv", SEX_RATIO_CSV);
        let tables = load_demographic_tables(&parameters).unwrap();

        let (_, fertility) = tables.fertility.nearest(2021).unwrap();
        assert_eq!(fertility.rate(27.0).unwrap(), 140.0);
        let (_, mortality) = tables.mortality.nearest(2021).unwrap();
        assert_eq!(mortality.rate(Gender::Male, 90.0).unwrap(), 170.0);
        assert_eq!(mortality.rate(Gender::Female, 0.5).unwrap(), 4.5);
        assert_eq!(tables.sex_ratio.nearest(2030), Some((2020, &950.0)));
    }

    #[test]
    fn missing_sex_ratio_file_uses_default() {
        let dir = tempdir().unwrap();
        let mut parameters = test_parameters();
        parameters.fertility_data_path = write(dir.path(), "fertility.csv", FERTILITY_CSV);
        parameters.mortality_data_path = write(dir.path(), "mortality.csv", MORTALITY_CSV);
        parameters.sex_ratio_data_path = dir.path().join("absent.csv");
        let tables = load_demographic_tables(&parameters).unwrap();
        assert!(tables.sex_ratio.is_empty());
    }

    #[test]
    fn unknown_age_group_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "fertility.csv",
            "Year,Age group,Fertility Rate\n2020,50-54,3.0\n",
        );
        assert!(matches!(
            load_fertility_table(&path),
            Err(TbError::DataFormatError(_))
        ));
    }

    #[test]
    fn loads_reference_incidence() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "reference.csv", REFERENCE_CSV);
        let reference = load_reference_incidence(&path).unwrap();
        assert_eq!(reference.len(), 3);
        assert_eq!(reference[1].year, 2021);
        assert_eq!(reference[1].week, 2);
        assert_eq!(reference[1].reference, 22.0);

        let bad = write(dir.path(), "bad.csv", "year,incidence\n2021,20\n");
        assert!(matches!(
            load_reference_incidence(&bad),
            Err(TbError::DataFormatError(_))
        ));
    }

    #[test]
    fn repeated_reference_weeks_are_rejected() {
        let dir = tempdir().unwrap();
        let repeated = write(
            dir.path(),
            "repeated.csv",
            "year,week,incidence\n2021,1,20\n2021,2,22\n2021,1,30\n",
        );
        assert!(matches!(
            load_reference_incidence(&repeated),
            Err(TbError::DataFormatError(_))
        ));

        // The same week number in another year is a different row.
        let two_years = write(
            dir.path(),
            "two_years.csv",
            "year,week,incidence\n2021,1,20\n2022,1,30\n",
        );
        assert_eq!(load_reference_incidence(&two_years).unwrap().len(), 2);
    }
}

//! Run export and end-of-run summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use dynamo_core::{Finding, Scheduler, Series};
use dynamo_settings::Settings;

use crate::error::RunError;
use crate::models::ModelKind;

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunExport {
    pub run_id: Uuid,
    pub model: ModelKind,
    pub dt: f64,
    pub initial_time: f64,
    pub ticks: u64,
    /// Simulated time at the end of each tick
    pub time: Vec<f64>,
    /// Committed setting values the model was built from
    pub settings: BTreeMap<String, f64>,
    pub series: Vec<Series>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

/// Final value and range of one reported series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub name: String,
    pub units: String,
    pub last: f64,
    pub min: f64,
    pub max: f64,
}

impl RunExport {
    /// Snapshots a ticked scheduler.
    pub fn capture(
        model: ModelKind,
        scheduler: &Scheduler,
        settings: &Settings,
        names: &[&str],
    ) -> Result<Self, RunError> {
        Ok(Self {
            run_id: Uuid::new_v4(),
            model,
            dt: scheduler.dt(),
            initial_time: scheduler.initial_time(),
            ticks: scheduler.tick_count(),
            time: scheduler.time_axis(),
            settings: settings
                .iter()
                .map(|s| (s.name().to_string(), s.value()))
                .collect(),
            series: scheduler.series_many(names)?,
            findings: scheduler.findings(),
        })
    }

    pub fn to_json(&self) -> Result<String, RunError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), RunError> {
        let output_error = |source: std::io::Error| RunError::Output {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(output_error)?;
        }
        fs::write(path, self.to_json()?).map_err(output_error)
    }

    pub fn summaries(&self) -> Vec<SeriesSummary> {
        self.series
            .iter()
            .filter_map(|series| {
                let (min, max) = series.range()?;
                Some(SeriesSummary {
                    name: series.name.clone(),
                    units: series.units.clone(),
                    last: series.last()?,
                    min,
                    max,
                })
            })
            .collect()
    }

    /// One aligned line per reported series.
    pub fn summary_lines(&self) -> Vec<String> {
        let width = self
            .series
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0);
        self.summaries()
            .into_iter()
            .map(|s| {
                format!(
                    "{:<width$}  final {:>12.3}  min {:>12.3}  max {:>12.3}  {}",
                    s.name, s.last, s.min, s.max, s.units
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export() -> RunExport {
        RunExport {
            run_id: Uuid::new_v4(),
            model: ModelKind::Decay,
            dt: 1.0,
            initial_time: 0.0,
            ticks: 3,
            time: vec![1.0, 2.0, 3.0],
            settings: BTreeMap::from([("decay_rate".to_string(), 0.1)]),
            series: vec![
                Series {
                    name: "level".to_string(),
                    units: "units".to_string(),
                    values: vec![90.0, 81.0, 72.9],
                },
                Series {
                    name: "broken".to_string(),
                    units: String::new(),
                    values: vec![f64::NAN],
                },
            ],
            findings: Vec::new(),
        }
    }

    #[test]
    fn test_summaries_skip_series_without_finite_values() {
        let summaries = export().summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "level");
        assert_eq!(summaries[0].last, 72.9);
        assert_eq!(summaries[0].min, 72.9);
        assert_eq!(summaries[0].max, 90.0);
    }

    #[test]
    fn test_summary_lines_are_aligned() {
        let lines = export().summary_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("level   final"));
        assert!(lines[0].ends_with("units"));
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&export().to_json().unwrap()).unwrap();
        assert_eq!(json["model"], "decay");
        assert_eq!(json["ticks"], 3);
        assert_eq!(json["series"][0]["values"][1], 81.0);
        assert_eq!(json["settings"]["decay_rate"], 0.1);
        assert!(json.get("findings").is_none());
        assert!(json["run_id"].as_str().unwrap().len() == 36);
    }
}

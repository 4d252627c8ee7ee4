//! Parquet loading and feature engineering for the outage model.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde::Serialize;
use tracing::{debug, info};

use super::error::{TrainingError, TrainingResult};
use super::scaler::quantile;

pub const WEATHER_COLUMNS: [&str; 8] = [
    "temperature",
    "humidity",
    "wind_speed",
    "wind_gust",
    "precipitation",
    "pressure",
    "visibility",
    "weather_severity_index",
];

pub const GRID_COLUMNS: [&str; 6] = [
    "load_percentage",
    "frequency",
    "voltage_stability",
    "maintenance_events",
    "equipment_age_index",
    "grid_congestion_index",
];

pub const TEMPORAL_COLUMNS: [&str; 4] = ["hour_sin", "hour_cos", "day_of_week", "season"];

/// Per-step features of the recurrent input.
pub const SEQUENCE_COLUMNS: [&str; 14] = [
    "temperature",
    "humidity",
    "wind_speed",
    "precipitation",
    "load_percentage",
    "frequency",
    "voltage_stability",
    "wind_gust",
    "pressure",
    "visibility",
    "maintenance_events",
    "equipment_age_index",
    "grid_congestion_index",
    "weather_severity_index",
];

pub const SEVERITY_CLASSES: usize = 4;
pub const TIME_WINDOW_CLASSES: usize = 6;

/// Timestamp column temporal features can be derived from.
const DATETIME_COLUMN: &str = "power_outage_datetime";

/// Share of highest-risk rows labelled positive when no usable label exists.
const SYNTHETIC_POSITIVE_QUANTILE: f64 = 0.85;

/// One decoded parquet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Time(NaiveDateTime),
    Text(String),
    Null,
}

impl Cell {
    fn from_field(field: &Field) -> Self {
        match field {
            Field::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
            Field::Byte(v) => Cell::Number(*v as f64),
            Field::Short(v) => Cell::Number(*v as f64),
            Field::Int(v) => Cell::Number(*v as f64),
            Field::Long(v) => Cell::Number(*v as f64),
            Field::UByte(v) => Cell::Number(*v as f64),
            Field::UShort(v) => Cell::Number(*v as f64),
            Field::UInt(v) => Cell::Number(*v as f64),
            Field::ULong(v) => Cell::Number(*v as f64),
            Field::Float(v) => Cell::Number(*v as f64),
            Field::Double(v) => Cell::Number(*v),
            Field::Str(s) => Cell::Text(s.clone()),
            Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms)
                .map(|dt| Cell::Time(dt.naive_utc()))
                .unwrap_or(Cell::Null),
            Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us)
                .map(|dt| Cell::Time(dt.naive_utc()))
                .unwrap_or(Cell::Null),
            Field::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(*days as i64)))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(Cell::Time)
                .unwrap_or(Cell::Null),
            _ => Cell::Null,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Time(dt) => Some(*dt),
            Cell::Text(s) => parse_datetime(s),
            _ => None,
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Column-oriented snapshot of the input file.
#[derive(Debug, Default, Clone)]
pub struct RawTable {
    rows: usize,
    columns: HashMap<String, Vec<Cell>>,
}

impl RawTable {
    /// Build a table from numeric columns of equal length.
    pub fn from_numeric(columns: Vec<(&str, Vec<f64>)>) -> Self {
        let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let columns = columns
            .into_iter()
            .map(|(name, values)| {
                let cells = values.into_iter().map(Cell::Number).collect();
                (name.to_string(), cells)
            })
            .collect();
        Self { rows, columns }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn insert_column(&mut self, name: &str, cells: Vec<Cell>) {
        self.columns.insert(name.to_string(), cells);
    }

    fn set(&mut self, name: &str, row: usize, cell: Cell) {
        let column = self.columns.entry(name.to_string()).or_default();
        if column.len() <= row {
            column.resize(row + 1, Cell::Null);
        }
        column[row] = cell;
    }

    fn pad(&mut self) {
        let rows = self.rows;
        for column in self.columns.values_mut() {
            column.resize(rows, Cell::Null);
        }
    }

    /// Numeric view of a column; absent columns are `None`.
    fn numbers(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.columns
            .get(name)
            .map(|cells| cells.iter().map(Cell::as_number).collect())
    }

    fn datetimes(&self, name: &str) -> Option<Vec<Option<NaiveDateTime>>> {
        self.columns
            .get(name)
            .map(|cells| cells.iter().map(Cell::as_datetime).collect())
    }
}

/// Read every row of a parquet file into a [`RawTable`].
pub fn read_parquet(path: &Path) -> TrainingResult<RawTable> {
    if !path.is_file() {
        return Err(TrainingError::MissingInput(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;

    let mut table = RawTable::default();
    for row in reader.get_row_iter(None)? {
        let row = row?;
        let index = table.rows;
        for (name, field) in row.get_column_iter() {
            table.set(name, index, Cell::from_field(field));
        }
        table.rows += 1;
    }
    table.pad();

    info!(rows = table.rows, path = %path.display(), "Loaded parquet");
    debug!(columns = ?table.column_names(), "Available columns");
    Ok(table)
}

/// Where the binary outage label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    Target,
    OutageLabel,
    CustomersOut,
    /// Top-risk rows from the weather/load heuristic.
    Synthesized,
}

/// Engineered, unscaled features for every row, in file order.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub weather: Array2<f64>,
    pub grid: Array2<f64>,
    pub temporal: Array2<f64>,
    pub sequence_base: Array2<f64>,
    pub outage: Array1<f32>,
    pub severity: Vec<usize>,
    pub time_window: Vec<usize>,
    pub label_source: LabelSource,
}

impl FeatureSet {
    pub fn from_table(table: &RawTable) -> Self {
        let rows = table.rows();
        let derived = derive_temporal(table);

        let column = |name: &str| -> Vec<f64> {
            match table.numbers(name).or_else(|| derived.get(name).cloned()) {
                Some(values) => fill_with_median(values),
                None => vec![0.0; rows],
            }
        };
        let matrix = |names: &[&str]| -> Array2<f64> {
            let mut out = Array2::zeros((rows, names.len()));
            for (j, name) in names.iter().enumerate() {
                for (i, v) in column(name).into_iter().enumerate() {
                    out[[i, j]] = v;
                }
            }
            out
        };

        let weather = matrix(&WEATHER_COLUMNS);
        let grid = matrix(&GRID_COLUMNS);
        let temporal = matrix(&TEMPORAL_COLUMNS);
        let sequence_base = matrix(&SEQUENCE_COLUMNS);

        let risk: Vec<f64> = {
            let severity_index = column("weather_severity_index");
            let load = column("load_percentage");
            let wind = column("wind_speed");
            let rain = column("precipitation");
            (0..rows)
                .map(|i| severity_index[i] * load[i] / 100.0 + wind[i] * 0.5 + rain[i] * 0.7)
                .collect()
        };

        let (outage, label_source) = outage_labels(table, &risk);
        let severity = risk_quartiles(&risk);
        let time_window = temporal
            .axis_iter(Axis(0))
            .map(|row| hour_bucket(row[0], row[1]))
            .collect();

        let positives = outage.iter().filter(|&&y| y > 0.5).count();
        info!(rows, positives, label_source = ?label_source, "Engineered features");

        Self {
            weather,
            grid,
            temporal,
            sequence_base,
            outage,
            severity,
            time_window,
            label_source,
        }
    }

    pub fn rows(&self) -> usize {
        self.outage.len()
    }
}

/// Temporal features computed from the outage timestamp, for those
/// temporal columns the file does not already carry.
fn derive_temporal(table: &RawTable) -> HashMap<&'static str, Vec<Option<f64>>> {
    let mut derived = HashMap::new();
    let Some(stamps) = table.datetimes(DATETIME_COLUMN) else {
        return derived;
    };

    for name in TEMPORAL_COLUMNS {
        if table.has_column(name) {
            continue;
        }
        let values = stamps
            .iter()
            .map(|stamp| {
                stamp.map(|dt| {
                    let hour = dt.hour() as f64 + dt.minute() as f64 / 60.0;
                    match name {
                        "hour_sin" => (2.0 * PI * hour / 24.0).sin(),
                        "hour_cos" => (2.0 * PI * hour / 24.0).cos(),
                        "day_of_week" => dt.weekday().num_days_from_monday() as f64,
                        _ => ((dt.month() % 12) / 3) as f64,
                    }
                })
            })
            .collect();
        derived.insert(name, values);
    }
    derived
}

/// Replace missing cells with the column median (0 when nothing is present).
fn fill_with_median(values: Vec<Option<f64>>) -> Vec<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let median = quantile(&present, 0.5);
    let fill = if median.is_finite() { median } else { 0.0 };
    values.into_iter().map(|v| v.unwrap_or(fill)).collect()
}

fn outage_labels(table: &RawTable, risk: &[f64]) -> (Array1<f32>, LabelSource) {
    let candidates = [
        ("target", LabelSource::Target),
        ("outage_label", LabelSource::OutageLabel),
        ("customers_out", LabelSource::CustomersOut),
    ];
    let labelled = candidates.iter().find_map(|(name, source)| {
        table.numbers(name).map(|values| {
            let labels: Array1<f32> = values
                .into_iter()
                .map(|v| match (source, v) {
                    (LabelSource::Target, Some(v)) if v != 0.0 => 1.0,
                    (_, Some(v)) if v > 0.0 => 1.0,
                    _ => 0.0,
                })
                .collect();
            (labels, *source)
        })
    });

    if let Some((labels, source)) = labelled {
        let positives = labels.iter().filter(|&&y| y > 0.5).count();
        if positives > 0 && positives < labels.len() {
            return (labels, source);
        }
        info!(label_source = ?source, "Label has a single class, synthesizing from risk");
    }

    let threshold = quantile(risk, SYNTHETIC_POSITIVE_QUANTILE);
    let labels = risk
        .iter()
        .map(|&r| if r >= threshold { 1.0 } else { 0.0 })
        .collect();
    (labels, LabelSource::Synthesized)
}

/// Risk quartile (0..=3) of every row.
fn risk_quartiles(risk: &[f64]) -> Vec<usize> {
    let cuts = [quantile(risk, 0.25), quantile(risk, 0.5), quantile(risk, 0.75)];
    risk.iter()
        .map(|&r| cuts.iter().filter(|&&c| r > c).count())
        .collect()
}

/// Four-hour bucket (0..=5) of the hour encoded by `(sin, cos)`.
fn hour_bucket(hour_sin: f64, hour_cos: f64) -> usize {
    let hour = (hour_sin.atan2(hour_cos) / (2.0 * PI) * 24.0).rem_euclid(24.0);
    ((hour / 4.0 + 1e-9).floor() as usize).min(TIME_WINDOW_CLASSES - 1)
}

/// Index of the first test row for a chronological split.
pub fn split_index(rows: usize, test_fraction: f64) -> TrainingResult<usize> {
    let split = ((1.0 - test_fraction) * rows as f64).floor() as usize;
    if rows < 2 || split == 0 || split >= rows {
        return Err(TrainingError::NotEnoughRows { rows });
    }
    Ok(split)
}

/// Trailing window of `len` rows ending at every row, front-padded by
/// repeating the window's first row.
pub fn sequence_windows(base: ArrayView2<f32>, len: usize) -> Array3<f32> {
    let (rows, features) = base.dim();
    let mut out = Array3::<f32>::zeros((rows, len, features));
    for i in 0..rows {
        let start = (i + 1).saturating_sub(len);
        let available = i + 1 - start;
        let pad = len - available;
        for step in 0..len {
            let src = if step < pad { start } else { start + step - pad };
            out.slice_mut(s![i, step, ..]).assign(&base.row(src));
        }
    }
    out
}

/// Class indices as cross-entropy targets, clamped into `0..width`.
pub fn class_targets(classes: &[usize], width: usize) -> Array1<i64> {
    classes.iter().map(|&c| c.min(width - 1) as i64).collect()
}

/// Scaled model inputs and targets for a set of rows.
#[derive(Debug, Clone)]
pub struct Samples {
    pub weather: Array2<f32>,
    pub grid: Array2<f32>,
    pub temporal: Array2<f32>,
    pub sequence: Array3<f32>,
    pub outage: Array1<f32>,
    pub severity: Array1<i64>,
    pub time_window: Array1<i64>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.outage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outage.is_empty()
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            weather: self.weather.select(Axis(0), indices),
            grid: self.grid.select(Axis(0), indices),
            temporal: self.temporal.select(Axis(0), indices),
            sequence: self.sequence.select(Axis(0), indices),
            outage: self.outage.select(Axis(0), indices),
            severity: self.severity.select(Axis(0), indices),
            time_window: self.time_window.select(Axis(0), indices),
        }
    }
}

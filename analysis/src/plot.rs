use crate::error::AnalysisError;
use crate::frame;
use itertools::Itertools;
use parser::{Table, Value};
use plotters::prelude::*;
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// Simulation time is in milliseconds; the x axis shows minutes.
const MINUTES_TO_MILLIS: f64 = 1000.0 * 60.0;

const CHART_SIZE: (u32, u32) = (1200, 900);

/// Blockchain-core measurements the fork charts read.
const CORE_PROTOCOL: &str = "core";
const BLOCKCHAIN_METRIC: &str = "global-blockchain";
const BLOCKS_METRIC: &str = "blocks";
const SEED_COLUMN: &str = "seed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Messages,
    ForksNumber,
    ForksRate,
    ForksDistribution,
}

/// One independent chart-generation task. Tasks read the shared immutable
/// tables and write to disjoint paths, so the pool can run them in any
/// order.
#[derive(Debug, Clone)]
pub struct ChartTask {
    pub kind: ChartKind,
    pub agg_diff: Vec<String>,
    pub agg_same: Option<String>,
}

impl ChartTask {
    pub fn run(&self, stats: &Table, freq: &Table, out_dir: &Path) -> Result<(), AnalysisError> {
        let agg_same = self.agg_same.as_deref();
        match self.kind {
            ChartKind::Messages => messages_line_charts(stats, &self.agg_diff, agg_same, out_dir),
            ChartKind::ForksNumber => forks_number_line_chart(freq, &self.agg_diff, agg_same, out_dir),
            ChartKind::ForksRate => {
                forks_rate_line_chart(stats, freq, &self.agg_diff, agg_same, out_dir)
            }
            ChartKind::ForksDistribution => {
                forks_distribution_line_chart(freq, &self.agg_diff, agg_same, out_dir)
            }
        }
    }
}

/// One chart per metric collected for each protocol in the stats table.
pub fn messages_line_charts(
    stats: &Table,
    agg_diff: &[String],
    agg_same: Option<&str>,
    out_dir: &Path,
) -> Result<(), AnalysisError> {
    for protocol in frame::distinct(stats, "protocol")? {
        let by_protocol = frame::filter_eq(stats, &[("protocol", protocol.clone())])?;
        for metric in frame::distinct(&by_protocol, "metric")? {
            let df = frame::filter_eq(&by_protocol, &[("metric", metric.clone())])?;

            let keys = aggregation_keys(agg_diff, agg_same);
            let grouped = frame::group_mean_std(&df, &keys, "mean")?;

            let output_dir = out_dir.join(protocol.to_string()).join(metric.to_string());
            line_charts(
                &grouped,
                &metric.to_string(),
                agg_diff,
                agg_same,
                &output_dir,
                &ChartStyle {
                    y_field: "mean_mean",
                    y_err_field: Some("mean_std"),
                    y_range: None,
                },
            )?;
        }
    }
    Ok(())
}

/// Total forks over time: per-seed frequency sums, averaged across seeds.
pub fn forks_number_line_chart(
    freq: &Table,
    agg_diff: &[String],
    agg_same: Option<&str>,
    out_dir: &Path,
) -> Result<(), AnalysisError> {
    let df = filter_core_blockchain(freq)?;
    if df.is_empty() {
        return Ok(());
    }

    let keys = aggregation_keys(agg_diff, agg_same);
    let per_seed = frame::group_sum(&df, &with_seed(&df, &keys), "frequency", "forks")?;
    let grouped = frame::group_mean_std(&per_seed, &keys, "forks")?;

    line_charts(
        &grouped,
        "forks",
        agg_diff,
        agg_same,
        &out_dir.join(CORE_PROTOCOL).join("forks"),
        &ChartStyle {
            y_field: "forks_mean",
            y_err_field: Some("forks_std"),
            y_range: None,
        },
    )
}

/// Forks per produced block over time; y is a rate in [0, 1].
pub fn forks_rate_line_chart(
    stats: &Table,
    freq: &Table,
    agg_diff: &[String],
    agg_same: Option<&str>,
    out_dir: &Path,
) -> Result<(), AnalysisError> {
    let forks_df = filter_core_blockchain(freq)?;
    let blocks_df = frame::filter_eq(
        stats,
        &[
            ("protocol", Value::Text(CORE_PROTOCOL.to_string())),
            ("metric", Value::Text(BLOCKS_METRIC.to_string())),
        ],
    )?;
    if forks_df.is_empty() || blocks_df.is_empty() {
        return Ok(());
    }

    let keys = aggregation_keys(agg_diff, agg_same);
    let blocks = frame::group_mean_std(&blocks_df, &keys, "mean")?;
    let per_seed = frame::group_sum(&forks_df, &with_seed(&forks_df, &keys), "frequency", "forks")?;
    let forks = frame::group_mean_std(&per_seed, &keys, "forks")?;

    let joined = frame::inner_join(&blocks, &forks, &keys)?;
    let rated = append_rate(&joined)?;

    line_charts(
        &rated,
        "forks-rate",
        agg_diff,
        agg_same,
        &out_dir.join(CORE_PROTOCOL).join("forks-rate"),
        &ChartStyle {
            y_field: "rate",
            y_err_field: None,
            y_range: Some((0.0, 1.0)),
        },
    )
}

/// Frequency of each fork size at the final sample time, one line per
/// series value, missing sizes completed with an explicit zero so every
/// series covers the same x grid.
pub fn forks_distribution_line_chart(
    freq: &Table,
    agg_diff: &[String],
    agg_same: Option<&str>,
    out_dir: &Path,
) -> Result<(), AnalysisError> {
    let df = filter_positive(&filter_core_blockchain(freq)?, &["value", "time"])?;
    if df.is_empty() {
        return Ok(());
    }

    let mut keys = aggregation_keys_no_time(agg_diff, agg_same);
    keys.push("value".to_string());
    let grouped = frame::group_mean_std(&df, &keys, "frequency")?;
    let grouped = keep_max_time(&grouped)?;

    let output_dir = out_dir.join(CORE_PROTOCOL).join("forks").join("distribution");
    fs::create_dir_all(&output_dir)?;

    for combo in frame::distinct_rows(&grouped, agg_diff)? {
        let match_df = filter_combo(&grouped, agg_diff, &combo)?;
        let all_xs = sorted_numeric(&frame::distinct(&match_df, "value")?);

        let series = match agg_same {
            Some(column) => {
                let mut series = Vec::new();
                for trace in frame::distinct(&match_df, column)? {
                    let sub = frame::filter_eq(&match_df, &[(column, trace.clone())])?;
                    let (xs, ys, errs) =
                        aligned_xy_err(&sub, "value", "frequency_mean", "frequency_std")?;
                    let points = all_xs
                        .iter()
                        .zip(complete_with_zeros(&xs, &ys, &all_xs))
                        .zip(complete_with_zeros(&xs, &errs, &all_xs))
                        .map(|((&x, y), err)| Point { x, y, err: Some(err) })
                        .collect();
                    series.push(Series {
                        label: format!("{column}={trace}"),
                        points,
                    });
                }
                series
            }
            None => vec![Series {
                label: String::new(),
                points: collect_points(
                    &match_df,
                    "value",
                    1.0,
                    "frequency_mean",
                    Some("frequency_std"),
                )?,
            }],
        };

        let path = output_dir.join(format!("{}-line-chart.svg", make_filename(agg_diff, &combo)));
        render_series(
            &series,
            &ChartFrame {
                title: &format!("Blockchain Forks: {}", make_title(agg_diff, &combo)),
                x_label: "Fork Size",
                y_label: "Frequency",
                y_range: None,
            },
            &path,
        )?;
    }
    Ok(())
}

struct ChartStyle<'a> {
    y_field: &'a str,
    y_err_field: Option<&'a str>,
    y_range: Option<(f64, f64)>,
}

/// Shared driver for the time-axis chart families: one chart per distinct
/// `agg_diff` combination, one series per `agg_same` value.
fn line_charts(
    df: &Table,
    metric_label: &str,
    agg_diff: &[String],
    agg_same: Option<&str>,
    output_dir: &Path,
    style: &ChartStyle,
) -> Result<(), AnalysisError> {
    if df.is_empty() {
        return Ok(());
    }
    // Only charts showing at least two traces are worth emitting.
    if let Some(series) = agg_same {
        if frame::distinct(df, series)?.len() <= 1 {
            debug!("skipping {metric_label}: single {series} trace");
            return Ok(());
        }
    }
    fs::create_dir_all(output_dir)?;

    for combo in frame::distinct_rows(df, agg_diff)? {
        let chart_df = filter_combo(df, agg_diff, &combo)?;

        let series = match agg_same {
            Some(column) => {
                let mut series = Vec::new();
                for trace in frame::distinct(&chart_df, column)? {
                    let sub = frame::filter_eq(&chart_df, &[(column, trace.clone())])?;
                    series.push(Series {
                        label: format!("{column}={trace}"),
                        points: collect_points(
                            &sub,
                            "time",
                            MINUTES_TO_MILLIS,
                            style.y_field,
                            style.y_err_field,
                        )?,
                    });
                }
                series
            }
            None => vec![Series {
                label: String::new(),
                points: collect_points(
                    &chart_df,
                    "time",
                    MINUTES_TO_MILLIS,
                    style.y_field,
                    style.y_err_field,
                )?,
            }],
        };

        let file = format!(
            "{}__{}.svg",
            agg_same.unwrap_or("none"),
            make_filename(agg_diff, &combo)
        );
        let path = output_dir.join(file);
        info!("Rendering {}", path.display());

        render_series(
            &series,
            &ChartFrame {
                title: &format!("{metric_label}: {}", make_title(agg_diff, &combo)),
                x_label: "Time (minutes)",
                y_label: "Metric value",
                y_range: style.y_range,
            },
            &path,
        )?;
    }
    Ok(())
}

struct Point {
    x: f64,
    y: f64,
    err: Option<f64>,
}

struct Series {
    label: String,
    points: Vec<Point>,
}

struct ChartFrame<'a> {
    title: &'a str,
    x_label: &'a str,
    y_label: &'a str,
    y_range: Option<(f64, f64)>,
}

fn render_series(series: &[Series], chart: &ChartFrame, path: &Path) -> Result<(), AnalysisError> {
    if series.iter().all(|s| s.points.is_empty()) {
        return Ok(());
    }
    let (x_range, y_range) = axis_ranges(series, chart.y_range);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| render_error(path, e))?;

    let mut ctx = ChartBuilder::on(&root)
        .caption(chart.title, ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)
        .map_err(|e| render_error(path, e))?;

    ctx.configure_mesh()
        .x_desc(chart.x_label)
        .y_desc(chart.y_label)
        .draw()
        .map_err(|e| render_error(path, e))?;

    for (i, s) in series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();

        let line = ctx
            .draw_series(LineSeries::new(
                s.points.iter().map(|p| (p.x, p.y)),
                color.stroke_width(2),
            ))
            .map_err(|e| render_error(path, e))?;
        if !s.label.is_empty() {
            line.label(s.label.clone()).legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
            });
        }

        let bars: Vec<_> = s
            .points
            .iter()
            .filter_map(|p| {
                p.err.filter(|e| e.is_finite()).map(|e| {
                    ErrorBar::new_vertical(p.x, p.y - e, p.y, p.y + e, color.filled(), 6)
                })
            })
            .collect();
        ctx.draw_series(bars).map_err(|e| render_error(path, e))?;
    }

    if series.len() > 1 {
        ctx.configure_series_labels()
            .border_style(&BLACK)
            .background_style(&WHITE.mix(0.8))
            .draw()
            .map_err(|e| render_error(path, e))?;
    }

    root.present().map_err(|e| render_error(path, e))?;
    Ok(())
}

fn render_error(path: &Path, error: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Render {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

fn axis_ranges(series: &[Series], y_override: Option<(f64, f64)>) -> (Range<f64>, Range<f64>) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for point in series.iter().flat_map(|s| s.points.iter()) {
        if point.x.is_finite() {
            x_min = x_min.min(point.x);
            x_max = x_max.max(point.x);
        }
        let err = point.err.filter(|e| e.is_finite()).unwrap_or(0.0);
        if point.y.is_finite() {
            y_min = y_min.min(point.y - err);
            y_max = y_max.max(point.y + err);
        }
    }

    if !x_min.is_finite() || !x_max.is_finite() {
        (x_min, x_max) = (0.0, 1.0);
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        (y_min, y_max) = (0.0, 1.0);
    }
    if let Some((lo, hi)) = y_override {
        (y_min, y_max) = (lo, hi);
    }

    // Degenerate ranges render as an empty band; pad them.
    if x_min == x_max {
        x_max += 1.0;
    }
    if y_min == y_max {
        y_max += 1.0;
    }
    (x_min..x_max, y_min..y_max)
}

fn collect_points(
    df: &Table,
    x_field: &str,
    x_scale: f64,
    y_field: &str,
    y_err_field: Option<&str>,
) -> Result<Vec<Point>, AnalysisError> {
    let x_idx = frame::col_index(df, x_field)?;
    let y_idx = frame::col_index(df, y_field)?;
    let err_idx = y_err_field.map(|f| frame::col_index(df, f)).transpose()?;

    let mut points = Vec::new();
    for row in df.rows() {
        let (Some(x), Some(y)) = (row[x_idx].as_f64(), row[y_idx].as_f64()) else {
            continue;
        };
        if x.is_nan() || y.is_nan() {
            continue;
        }
        let err = err_idx.and_then(|i| row[i].as_f64()).filter(|e| e.is_finite());
        points.push(Point {
            x: x / x_scale,
            y,
            err,
        });
    }
    Ok(points)
}

/// Align a sparse (x, y) series onto the full x grid, filling gaps with an
/// explicit zero. This is a chart-assembly concern only; the tables keep
/// their nulls.
fn complete_with_zeros(xs: &[f64], ys: &[f64], all_xs: &[f64]) -> Vec<f64> {
    all_xs
        .iter()
        .map(|x| xs.iter().position(|v| v == x).map_or(0.0, |i| ys[i]))
        .collect()
}

/// "a=1.0, b=10.0"
pub fn make_title(columns: &[String], values: &[Value]) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| format!("{column}={value}"))
        .join(", ")
}

/// "a-1.0-b-10.0"
pub fn make_filename(columns: &[String], values: &[Value]) -> String {
    if columns.is_empty() {
        return "all".to_string();
    }
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| format!("{column}-{value}"))
        .join("-")
}

fn aggregation_keys(agg_diff: &[String], agg_same: Option<&str>) -> Vec<String> {
    let mut keys = aggregation_keys_no_time(agg_diff, agg_same);
    keys.push("time".to_string());
    keys
}

fn aggregation_keys_no_time(agg_diff: &[String], agg_same: Option<&str>) -> Vec<String> {
    let mut keys = agg_diff.to_vec();
    if let Some(series) = agg_same {
        keys.push(series.to_string());
    }
    keys
}

fn with_seed(df: &Table, keys: &[String]) -> Vec<String> {
    if df.column_index(SEED_COLUMN).is_some() {
        let mut with_seed = vec![SEED_COLUMN.to_string()];
        with_seed.extend_from_slice(keys);
        with_seed
    } else {
        keys.to_vec()
    }
}

fn filter_core_blockchain(freq: &Table) -> Result<Table, AnalysisError> {
    frame::filter_eq(
        freq,
        &[
            ("protocol", Value::Text(CORE_PROTOCOL.to_string())),
            ("metric", Value::Text(BLOCKCHAIN_METRIC.to_string())),
        ],
    )
}

fn filter_combo(df: &Table, columns: &[String], combo: &[Value]) -> Result<Table, AnalysisError> {
    let predicates: Vec<(&str, Value)> = columns
        .iter()
        .map(String::as_str)
        .zip(combo.iter().cloned())
        .collect();
    frame::filter_eq(df, &predicates)
}

/// Rows where every named column is numeric and strictly positive.
fn filter_positive(df: &Table, columns: &[&str]) -> Result<Table, AnalysisError> {
    let indices: Vec<usize> = columns
        .iter()
        .map(|c| frame::col_index(df, c))
        .collect::<Result<_, _>>()?;

    let mut out = Table::new(df.columns().to_vec());
    for row in df.rows() {
        if indices.iter().all(|&i| row[i].as_f64().map_or(false, |v| v > 0.0)) {
            out.push_row(row.clone());
        }
    }
    Ok(out)
}

/// Keep only the rows at the latest sample time.
fn keep_max_time(df: &Table) -> Result<Table, AnalysisError> {
    let time_idx = frame::col_index(df, "time")?;
    let max_time = df
        .rows()
        .iter()
        .filter_map(|row| row[time_idx].as_f64())
        .fold(f64::NEG_INFINITY, f64::max);

    let mut out = Table::new(df.columns().to_vec());
    for row in df.rows() {
        if row[time_idx].as_f64() == Some(max_time) {
            out.push_row(row.clone());
        }
    }
    Ok(out)
}

/// Join output carries `mean_mean` (blocks) and `forks_mean`; add their
/// ratio, dropping the time-zero rows where no blocks exist yet.
fn append_rate(joined: &Table) -> Result<Table, AnalysisError> {
    let time_idx = frame::col_index(joined, "time")?;
    let blocks_idx = frame::col_index(joined, "mean_mean")?;
    let forks_idx = frame::col_index(joined, "forks_mean")?;

    let mut columns = joined.columns().to_vec();
    columns.push("rate".to_string());

    let mut out = Table::new(columns);
    for row in joined.rows() {
        let Some(time) = row[time_idx].as_f64() else {
            continue;
        };
        if time <= 0.0 {
            continue;
        }
        let rate = match (row[forks_idx].as_f64(), row[blocks_idx].as_f64()) {
            (Some(forks), Some(blocks)) if blocks != 0.0 => Value::Float(forks / blocks),
            _ => Value::Null,
        };
        let mut cells = row.clone();
        cells.push(rate);
        out.push_row(cells);
    }
    Ok(out)
}

/// Parallel x/y/err vectors for one series, skipping rows whose x or y is
/// not numeric; a missing error becomes zero (a zero-length bar).
fn aligned_xy_err(
    df: &Table,
    x_field: &str,
    y_field: &str,
    err_field: &str,
) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), AnalysisError> {
    let x_idx = frame::col_index(df, x_field)?;
    let y_idx = frame::col_index(df, y_field)?;
    let err_idx = frame::col_index(df, err_field)?;

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut errs = Vec::new();
    for row in df.rows() {
        let (Some(x), Some(y)) = (row[x_idx].as_f64(), row[y_idx].as_f64()) else {
            continue;
        };
        if x.is_nan() || y.is_nan() {
            continue;
        }
        xs.push(x);
        ys.push(y);
        errs.push(row[err_idx].as_f64().filter(|e| e.is_finite()).unwrap_or(0.0));
    }
    Ok((xs, ys, errs))
}

fn sorted_numeric(values: &[Value]) -> Vec<f64> {
    let mut xs: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    xs
}

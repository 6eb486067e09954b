//! Feature engineering for the daily revenue model.
//!
//! Every feature is derived from *shifted* history: the target day's own
//! revenue never appears in its feature row, so walk-forward prediction can
//! reuse the exact same construction with predicted values written back.

use crate::models::DailyRevenue;
use chrono::{Datelike, NaiveDate, Weekday};
use statrs::statistics::Statistics;
use std::f64::consts::PI;

/// Feature names, in column order. Train and predict share this table; the
/// tests assert it stays consistent.
pub const FEATURES: [&str; NUM_FEATURES] = [
    "day_of_week",
    "month",
    "day_of_month",
    "week_of_year",
    "quarter",
    "is_weekend",
    "is_month_start",
    "is_month_end",
    "month_sin",
    "month_cos",
    "dow_sin",
    "dow_cos",
    "dom_sin",
    "dom_cos",
    "lag_1d",
    "lag_2d",
    "lag_3d",
    "lag_7d",
    "lag_14d",
    "lag_28d",
    "lag_365d",
    "rolling_mean_7d",
    "rolling_mean_14d",
    "rolling_mean_28d",
    "rolling_mean_91d",
    "rolling_std_7d",
    "rolling_min_7d",
    "rolling_max_7d",
    "yoy_ratio",
    "momentum_7_28",
    "trend_index",
];

pub const NUM_FEATURES: usize = 31;

/// Short-history features a training row must have; rows where any of these
/// are still NaN are dropped. Long-horizon features impute instead so a
/// ~400-day series remains trainable.
const REQUIRED: [&str; 8] = [
    "lag_1d",
    "lag_2d",
    "lag_3d",
    "lag_7d",
    "lag_14d",
    "lag_28d",
    "rolling_mean_7d",
    "rolling_mean_28d",
];

#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub features: [f64; NUM_FEATURES],
    pub target: f64,
}

fn idx(name: &str) -> usize {
    FEATURES
        .iter()
        .position(|f| *f == name)
        .expect("known feature name")
}

fn weekday_num(date: NaiveDate) -> f64 {
    // Monday = 0 .. Sunday = 6
    date.weekday().num_days_from_monday() as f64
}

fn lag(values: &[f64], i: usize, offset: usize) -> f64 {
    if i >= offset {
        values[i - offset]
    } else {
        f64::NAN
    }
}

/// Rolling aggregate over the `window` values strictly before row `i`
/// (pandas `shift(1).rolling(window, min_periods)` semantics).
fn rolling<F: Fn(&[f64]) -> f64>(
    values: &[f64],
    i: usize,
    window: usize,
    min_periods: usize,
    agg: F,
) -> f64 {
    if i == 0 {
        return f64::NAN;
    }
    let end = i; // exclusive: strictly before row i
    let start = end.saturating_sub(window);
    let slice = &values[start..end];
    if slice.len() < min_periods {
        f64::NAN
    } else {
        agg(slice)
    }
}

fn mean(slice: &[f64]) -> f64 {
    Statistics::mean(slice)
}

fn std_dev(slice: &[f64]) -> f64 {
    if slice.len() < 2 {
        return f64::NAN;
    }
    Statistics::std_dev(slice)
}

/// Build one feature row per observation. `targets` keep NaN for future
/// placeholder rows so callers can tell actuals from predictions-to-be.
pub fn build_features(series: &[DailyRevenue]) -> Vec<FeatureRow> {
    let values: Vec<f64> = series.iter().map(|d| d.revenue).collect();

    series
        .iter()
        .enumerate()
        .map(|(i, day)| {
            let date = day.date;
            let mut f = [f64::NAN; NUM_FEATURES];

            let dow = weekday_num(date);
            let month = date.month() as f64;
            let dom = date.day() as f64;

            f[idx("day_of_week")] = dow;
            f[idx("month")] = month;
            f[idx("day_of_month")] = dom;
            f[idx("week_of_year")] = date.iso_week().week() as f64;
            f[idx("quarter")] = ((date.month0() / 3) + 1) as f64;
            f[idx("is_weekend")] =
                matches!(date.weekday(), Weekday::Sat | Weekday::Sun) as i64 as f64;
            f[idx("is_month_start")] = (date.day() == 1) as i64 as f64;
            f[idx("is_month_end")] = (date.succ_opt().map(|d| d.day() == 1).unwrap_or(false))
                as i64 as f64;

            f[idx("month_sin")] = (2.0 * PI * month / 12.0).sin();
            f[idx("month_cos")] = (2.0 * PI * month / 12.0).cos();
            f[idx("dow_sin")] = (2.0 * PI * dow / 7.0).sin();
            f[idx("dow_cos")] = (2.0 * PI * dow / 7.0).cos();
            f[idx("dom_sin")] = (2.0 * PI * dom / 31.0).sin();
            f[idx("dom_cos")] = (2.0 * PI * dom / 31.0).cos();

            f[idx("lag_1d")] = lag(&values, i, 1);
            f[idx("lag_2d")] = lag(&values, i, 2);
            f[idx("lag_3d")] = lag(&values, i, 3);
            f[idx("lag_7d")] = lag(&values, i, 7);
            f[idx("lag_14d")] = lag(&values, i, 14);
            f[idx("lag_28d")] = lag(&values, i, 28);
            f[idx("lag_365d")] = lag(&values, i, 365);

            let mean_7 = rolling(&values, i, 7, 3, mean);
            let mean_28 = rolling(&values, i, 28, 14, mean);
            f[idx("rolling_mean_7d")] = mean_7;
            f[idx("rolling_mean_14d")] = rolling(&values, i, 14, 7, mean);
            f[idx("rolling_mean_28d")] = mean_28;
            f[idx("rolling_mean_91d")] = rolling(&values, i, 91, 30, mean);
            f[idx("rolling_std_7d")] = rolling(&values, i, 7, 3, std_dev);
            f[idx("rolling_min_7d")] =
                rolling(&values, i, 7, 3, |s| s.iter().cloned().fold(f64::INFINITY, f64::min));
            f[idx("rolling_max_7d")] = rolling(&values, i, 7, 3, |s| {
                s.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            });

            // Year-over-year level ratio from shifted values only.
            let lag_1 = lag(&values, i, 1);
            let lag_366 = lag(&values, i, 366);
            f[idx("yoy_ratio")] = if lag_366.is_finite() && lag_366 != 0.0 {
                lag_1 / lag_366
            } else {
                f64::NAN
            };
            f[idx("momentum_7_28")] = if mean_28.is_finite() && mean_28 != 0.0 {
                mean_7 / mean_28
            } else {
                f64::NAN
            };

            f[idx("trend_index")] = i as f64;

            FeatureRow {
                date,
                features: f,
                target: values[i],
            }
        })
        .collect()
}

/// Impute the NaNs a finished feature row may carry: ratio features default
/// to 1.0, everything else to 0.0.
pub fn impute(features: &mut [f64; NUM_FEATURES]) {
    let yoy = idx("yoy_ratio");
    let momentum = idx("momentum_7_28");
    for (i, value) in features.iter_mut().enumerate() {
        if value.is_nan() {
            *value = if i == yoy || i == momentum { 1.0 } else { 0.0 };
        }
    }
}

/// Training view: drop warm-up rows missing required short-history features,
/// impute the rest.
pub fn training_rows(series: &[DailyRevenue]) -> Vec<FeatureRow> {
    let required: Vec<usize> = REQUIRED.iter().map(|name| idx(name)).collect();

    build_features(series)
        .into_iter()
        .filter(|row| required.iter().all(|&i| row.features[i].is_finite()))
        .map(|mut row| {
            impute(&mut row.features);
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(n: usize) -> Vec<DailyRevenue> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        (0..n)
            .map(|i| DailyRevenue {
                date: start + chrono::Days::new(i as u64),
                revenue: 100.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn feature_table_is_consistent() {
        assert_eq!(FEATURES.len(), NUM_FEATURES);
        let mut sorted = FEATURES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), NUM_FEATURES, "duplicate feature name");
        for name in REQUIRED {
            assert!(FEATURES.contains(&name));
        }
    }

    #[test]
    fn lags_use_prior_rows_only() {
        let rows = build_features(&series(40));
        let i = 30;
        assert_eq!(rows[i].features[idx("lag_1d")], 100.0 + (i - 1) as f64);
        assert_eq!(rows[i].features[idx("lag_7d")], 100.0 + (i - 7) as f64);
        assert_eq!(rows[i].features[idx("lag_28d")], 100.0 + (i - 28) as f64);
        assert!(rows[i].features[idx("lag_365d")].is_nan());
    }

    #[test]
    fn rolling_mean_excludes_current_day() {
        let rows = build_features(&series(10));
        // Row 7: mean over rows 0..6 (values 100..106) = 103.
        let got = rows[7].features[idx("rolling_mean_7d")];
        assert!((got - 103.0).abs() < 1e-9);
    }

    #[test]
    fn warm_up_rows_are_dropped_for_training() {
        let rows = training_rows(&series(100));
        // lag_28d needs 28 prior rows.
        assert_eq!(rows.len(), 100 - 28);
        for row in &rows {
            assert!(row.features.iter().all(|f| f.is_finite()));
        }
    }

    #[test]
    fn four_hundred_day_series_keeps_enough_rows() {
        let rows = training_rows(&series(400));
        assert!(rows.len() >= 90, "got {}", rows.len());
        // Long-horizon features imputed, not dropped.
        assert!(rows.iter().all(|r| r.features[idx("lag_365d")].is_finite()));
    }

    #[test]
    fn calendar_flags() {
        let rows = build_features(&[
            DailyRevenue {
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                revenue: 1.0,
            },
            DailyRevenue {
                date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                revenue: 2.0,
            },
            DailyRevenue {
                date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
                revenue: 3.0,
            },
        ]);
        assert_eq!(rows[0].features[idx("is_month_start")], 1.0);
        assert_eq!(rows[1].features[idx("is_month_end")], 1.0);
        assert_eq!(rows[2].features[idx("is_month_start")], 0.0);
        assert_eq!(rows[2].features[idx("is_month_end")], 0.0);
        assert_eq!(rows[2].features[idx("is_weekend")], 1.0); // Saturday
    }
}

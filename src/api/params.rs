//! Query-parameter resolution shared by the analytics handlers.

use crate::config;
use crate::errors::EngineError;
use crate::models::SalesFilter;
use crate::store::revenue::{AggregateFilter, CompareWindow};
use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use serde::Deserialize;

/// Parameters accepted by every aggregate endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CommonQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sales_type: Option<String>,
    pub source_id: Option<i64>,
    pub category_id: Option<i64>,
    pub brand: Option<String>,
    pub limit: Option<usize>,
    pub compare: Option<String>,
    pub forecast: Option<bool>,
}

pub fn kyiv_today() -> NaiveDate {
    Utc::now().with_timezone(&config::DISPLAY_TZ).date_naive()
}

/// Resolve a named period to an inclusive Kyiv-local date range.
pub fn resolve_period(period: &str, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), EngineError> {
    let range = match period {
        "today" => (today, today),
        "yesterday" => {
            let y = today - Days::new(1);
            (y, y)
        }
        "week" => {
            let monday = today.week(Weekday::Mon).first_day();
            (monday, today)
        }
        "last_week" => {
            let this_monday = today.week(Weekday::Mon).first_day();
            let last_monday = this_monday - Days::new(7);
            (last_monday, this_monday - Days::new(1))
        }
        "month" => {
            let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();
            (first, today)
        }
        "last_month" => {
            let this_first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();
            let last_end = this_first - Days::new(1);
            let last_first =
                NaiveDate::from_ymd_opt(last_end.year(), last_end.month(), 1).unwrap();
            (last_first, last_end)
        }
        other => {
            return Err(EngineError::Validation(format!("unknown period '{other}'")));
        }
    };
    Ok(range)
}

fn parse_iso_date(raw: &str, field: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| EngineError::Validation(format!("{field} must be YYYY-MM-DD, got '{raw}'")))
}

impl CommonQuery {
    pub fn sales(&self) -> Result<SalesFilter, EngineError> {
        match &self.sales_type {
            None => Ok(SalesFilter::Retail),
            Some(raw) => raw.parse().map_err(EngineError::Validation),
        }
    }

    /// Inclusive date range. Explicit dates win over `period`; a bare
    /// `start_date` or `end_date` is rejected.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate), EngineError> {
        let today = kyiv_today();
        match (&self.start_date, &self.end_date) {
            (Some(start), Some(end)) => {
                let start = parse_iso_date(start, "start_date")?;
                let end = parse_iso_date(end, "end_date")?;
                if start > end {
                    return Err(EngineError::Validation(
                        "start_date must not be after end_date".to_string(),
                    ));
                }
                Ok((start, end))
            }
            (None, None) => {
                resolve_period(self.period.as_deref().unwrap_or("month"), today)
            }
            _ => Err(EngineError::Validation(
                "start_date and end_date must be provided together".to_string(),
            )),
        }
    }

    pub fn filter(&self) -> Result<AggregateFilter, EngineError> {
        let (start, end) = self.date_range()?;
        let mut filter = AggregateFilter::new(start, end, self.sales()?);
        filter.source_id = self.source_id;
        filter.category_id = self.category_id;
        filter.brand = self
            .brand
            .as_ref()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        Ok(filter)
    }

    pub fn compare_window(&self) -> Result<CompareWindow, EngineError> {
        match &self.compare {
            None => Ok(CompareWindow::PreviousPeriod),
            Some(raw) => CompareWindow::parse(raw)
                .ok_or_else(|| EngineError::Validation(format!("unknown compare '{raw}'"))),
        }
    }

    pub fn limit_or(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max)
    }

    /// Forecast extension applies only to the unfiltered current month/week.
    pub fn forecast_applicable(&self) -> bool {
        self.forecast.unwrap_or(false)
            && self.source_id.is_none()
            && self.category_id.is_none()
            && self.brand.as_deref().map(str::is_empty).unwrap_or(true)
            && self.start_date.is_none()
            && matches!(self.period.as_deref(), None | Some("month") | Some("week"))
    }

    /// Cache key parameters in canonical form.
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("period", self.period.clone().unwrap_or_default()),
            ("start", self.start_date.clone().unwrap_or_default()),
            ("end", self.end_date.clone().unwrap_or_default()),
            ("sales", self.sales_type.clone().unwrap_or_default()),
            (
                "source",
                self.source_id.map(|v| v.to_string()).unwrap_or_default(),
            ),
            (
                "category",
                self.category_id.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("brand", self.brand.clone().unwrap_or_default()),
            ("limit", self.limit.map(|v| v.to_string()).unwrap_or_default()),
            ("compare", self.compare.clone().unwrap_or_default()),
            (
                "forecast",
                self.forecast.map(|v| v.to_string()).unwrap_or_default(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn named_periods() {
        let today = date(2024, 6, 14); // a Friday
        assert_eq!(
            resolve_period("today", today).unwrap(),
            (today, today)
        );
        assert_eq!(
            resolve_period("yesterday", today).unwrap(),
            (date(2024, 6, 13), date(2024, 6, 13))
        );
        assert_eq!(
            resolve_period("week", today).unwrap(),
            (date(2024, 6, 10), today)
        );
        assert_eq!(
            resolve_period("last_week", today).unwrap(),
            (date(2024, 6, 3), date(2024, 6, 9))
        );
        assert_eq!(
            resolve_period("month", today).unwrap(),
            (date(2024, 6, 1), today)
        );
        assert_eq!(
            resolve_period("last_month", today).unwrap(),
            (date(2024, 5, 1), date(2024, 5, 31))
        );
        assert!(resolve_period("fortnight", today).is_err());
    }

    #[test]
    fn explicit_dates_win_over_period() {
        let query = CommonQuery {
            period: Some("month".into()),
            start_date: Some("2024-01-05".into()),
            end_date: Some("2024-01-10".into()),
            ..Default::default()
        };
        assert_eq!(
            query.date_range().unwrap(),
            (date(2024, 1, 5), date(2024, 1, 10))
        );
    }

    #[test]
    fn half_open_explicit_range_is_rejected() {
        let query = CommonQuery {
            start_date: Some("2024-01-05".into()),
            ..Default::default()
        };
        assert!(query.date_range().is_err());

        let inverted = CommonQuery {
            start_date: Some("2024-02-01".into()),
            end_date: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(inverted.date_range().is_err());
    }

    #[test]
    fn sales_type_defaults_to_retail() {
        let query = CommonQuery::default();
        assert_eq!(query.sales().unwrap(), SalesFilter::Retail);

        let bad = CommonQuery {
            sales_type: Some("wholesale".into()),
            ..Default::default()
        };
        assert!(bad.sales().is_err());
    }

    #[test]
    fn forecast_extension_gating() {
        let yes = CommonQuery {
            forecast: Some(true),
            period: Some("month".into()),
            ..Default::default()
        };
        assert!(yes.forecast_applicable());

        let filtered = CommonQuery {
            forecast: Some(true),
            period: Some("month".into()),
            category_id: Some(3),
            ..Default::default()
        };
        assert!(!filtered.forecast_applicable());

        let explicit_dates = CommonQuery {
            forecast: Some(true),
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-01-31".into()),
            ..Default::default()
        };
        assert!(!explicit_dates.forecast_applicable());

        let past_period = CommonQuery {
            forecast: Some(true),
            period: Some("last_month".into()),
            ..Default::default()
        };
        assert!(!past_period.forecast_applicable());
    }
}

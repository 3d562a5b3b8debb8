//! Window arithmetic and performance statistics over a TRI slice. Undefined
//! metrics come back as NaN sentinels, never as errors, so one degenerate
//! window cannot fail an instrument.

use chrono::{Datelike, NaiveDate};

/// `date` minus `years` calendar years, month and day preserved. A Feb 29
/// landing in a non-leap year falls back to Feb 28.
pub fn years_before(date: NaiveDate, years: i32) -> NaiveDate {
    let year = date.year() - years;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
        .unwrap_or(date)
}

/// Performance statistics for one sliced window.
#[derive(Debug, Clone, Copy)]
pub struct WindowMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

/// Computes the window statistics over an ascending `(date, value)` slice.
///
/// - CAGR uses 365.25-day years and is NaN when no time elapsed or the value
///   ratio is non-positive.
/// - Volatility is the sample standard deviation of daily returns times
///   `sqrt(annualization)`; 0.0 with fewer than two returns or zero variance.
/// - Sharpe divides by that standard deviation and is NaN when it is zero;
///   excess returns subtract `risk_free_rate_annual / annualization` per day.
/// - Max drawdown measures the largest fall from the running peak; 0.0 for a
///   monotone non-decreasing series.
pub fn window_metrics(
    series: &[(NaiveDate, f64)],
    risk_free_rate_annual: f64,
    annualization: u32,
) -> WindowMetrics {
    let undefined = WindowMetrics {
        total_return: f64::NAN,
        cagr: f64::NAN,
        volatility: 0.0,
        sharpe_ratio: f64::NAN,
        max_drawdown: 0.0,
    };
    let (Some(&(first_date, first_value)), Some(&(last_date, last_value))) =
        (series.first(), series.last())
    else {
        return undefined;
    };
    if first_value == 0.0 {
        return undefined;
    }

    let ratio = last_value / first_value;
    let total_return = ratio - 1.0;

    let days_elapsed = (last_date - first_date).num_days();
    let cagr = if days_elapsed <= 0 || ratio <= 0.0 {
        f64::NAN
    } else {
        ratio.powf(365.25 / days_elapsed as f64) - 1.0
    };

    let returns: Vec<f64> = series
        .windows(2)
        .filter(|pair| pair[0].1 != 0.0)
        .map(|pair| pair[1].1 / pair[0].1 - 1.0)
        .collect();
    let periods = annualization as f64;
    let (volatility, sharpe_ratio) = if returns.len() < 2 {
        (0.0, f64::NAN)
    } else {
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        if variance == 0.0 {
            (0.0, f64::NAN)
        } else {
            let stdev = variance.sqrt();
            let excess_mean = mean - risk_free_rate_annual / periods;
            (stdev * periods.sqrt(), periods.sqrt() * excess_mean / stdev)
        }
    };

    let mut peak = f64::MIN;
    let mut max_drawdown: f64 = 0.0;
    for &(_, value) in series {
        peak = peak.max(value);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - value) / peak);
        }
    }

    WindowMetrics {
        total_return,
        cagr,
        volatility,
        sharpe_ratio,
        max_drawdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn subtracting_years_preserves_month_and_day() {
        assert_eq!(years_before(d("2024-05-10"), 3), d("2021-05-10"));
    }

    #[test]
    fn leap_day_falls_back_to_feb_28() {
        assert_eq!(years_before(d("2024-02-29"), 1), d("2023-02-28"));
        // Leap year to leap year keeps the 29th.
        assert_eq!(years_before(d("2024-02-29"), 4), d("2020-02-29"));
    }

    #[test]
    fn total_return_and_cagr_over_one_nominal_year() {
        let series = [(d("2023-05-10"), 100.0), (d("2024-05-09"), 110.0)];
        let m = window_metrics(&series, 0.0, 252);
        assert_relative_eq!(m.total_return, 0.10, max_relative = 1e-12);
        let expected = 1.1f64.powf(365.25 / 365.0) - 1.0;
        assert_relative_eq!(m.cagr, expected, max_relative = 1e-12);
    }

    #[test]
    fn monotone_series_has_zero_drawdown() {
        let series = [
            (d("2024-05-01"), 100.0),
            (d("2024-05-02"), 101.0),
            (d("2024-05-03"), 105.0),
        ];
        let m = window_metrics(&series, 0.0, 252);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn drawdown_measures_the_fall_from_the_running_peak() {
        let series = [
            (d("2024-05-01"), 100.0),
            (d("2024-05-02"), 120.0),
            (d("2024-05-03"), 90.0),
            (d("2024-05-06"), 130.0),
        ];
        let m = window_metrics(&series, 0.0, 252);
        assert_relative_eq!(m.max_drawdown, 0.25, max_relative = 1e-12);
    }

    #[test]
    fn zero_variance_yields_zero_volatility_and_nan_sharpe() {
        let series = [
            (d("2024-05-01"), 100.0),
            (d("2024-05-02"), 100.0),
            (d("2024-05-03"), 100.0),
        ];
        let m = window_metrics(&series, 0.02, 252);
        assert_eq!(m.volatility, 0.0);
        assert!(m.sharpe_ratio.is_nan());
        assert_eq!(m.total_return, 0.0);
    }

    #[test]
    fn single_point_window_has_nan_cagr_and_no_volatility() {
        let series = [(d("2024-05-01"), 100.0)];
        let m = window_metrics(&series, 0.0, 252);
        assert_eq!(m.total_return, 0.0);
        assert!(m.cagr.is_nan());
        assert_eq!(m.volatility, 0.0);
        assert!(m.sharpe_ratio.is_nan());
    }

    #[test]
    fn negative_terminal_value_reports_nan_cagr() {
        let series = [(d("2024-05-01"), 100.0), (d("2024-06-01"), -5.0)];
        let m = window_metrics(&series, 0.0, 252);
        assert!(m.cagr.is_nan());
        assert_relative_eq!(m.total_return, -1.05, max_relative = 1e-12);
    }
}

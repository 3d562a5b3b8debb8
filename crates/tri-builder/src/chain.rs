//! The pure chaining math behind the Total Return Index. Everything here is
//! deterministic over in-memory slices so the formulas can be tested without
//! a database.

use chrono::NaiveDate;
use core_types::{DividendEvent, PriceBar, Region, SplitEvent};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;

/// A split ratio as a >= 1 magnification factor. Feeds report a 1-for-4
/// reverse split either as 4 or as 0.25; fractions are inverted so the
/// de-adjustment always multiplies. Non-positive ratios are unusable.
fn magnification(ratio: Decimal) -> Option<f64> {
    let ratio = ratio.to_f64()?;
    if ratio <= 0.0 || !ratio.is_finite() {
        return None;
    }
    Some(if ratio < 1.0 { 1.0 / ratio } else { ratio })
}

/// Reconstructs the cash amount each dividend actually paid at its ex-date.
///
/// The raw close series is not split-adjusted while the dividend feed may be,
/// so each amount is scaled by the magnification of every split that took
/// effect strictly after the dividend's ex-date. Same-date amounts are
/// summed.
pub fn deadjusted_dividends(
    dividends: &[DividendEvent],
    splits: &[SplitEvent],
) -> BTreeMap<NaiveDate, f64> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for dividend in dividends {
        let Some(amount) = dividend.amount_per_unit.to_f64() else {
            continue;
        };
        let scale: f64 = splits
            .iter()
            .filter(|s| s.effective_date > dividend.ex_date)
            .filter_map(|s| magnification(s.ratio))
            .product();
        *by_date.entry(dividend.ex_date).or_insert(0.0) += amount * scale;
    }
    by_date
}

/// Extends a TRI series over `bars`, returning the newly computed points in
/// ascending date order.
///
/// With a seed, chaining resumes from `seed.1` and only dates strictly after
/// `seed.0` produce output. Without one, the first bar with a positive basis
/// price anchors the series at exactly `base` and chaining starts from the
/// next bar. Days whose factor is zero or non-finite (data gaps, zero
/// closes) are skipped, not fatal. Input bars are de-duplicated by date with
/// the last value winning.
pub fn extend_series(
    region: Region,
    bars: &[PriceBar],
    dividends: &[DividendEvent],
    splits: &[SplitEvent],
    seed: Option<(NaiveDate, f64)>,
    base: f64,
) -> Vec<(NaiveDate, f64)> {
    let mut by_date: BTreeMap<NaiveDate, &PriceBar> = BTreeMap::new();
    for bar in bars {
        by_date.insert(bar.trade_date, bar);
    }
    let ordered: Vec<&PriceBar> = by_date.into_values().collect();

    let payouts = if region.uses_adjusted_close() {
        BTreeMap::new()
    } else {
        deadjusted_dividends(dividends, splits)
    };
    let basis = |bar: &PriceBar| -> Option<f64> {
        let price = if region.uses_adjusted_close() {
            bar.adj_close
        } else {
            bar.close
        };
        let price = price.to_f64()?;
        (price > 0.0 && price.is_finite()).then_some(price)
    };

    let mut out = Vec::new();
    let (mut current, chained_after) = match seed {
        Some((seed_date, seed_value)) => (seed_value, seed_date),
        None => {
            // A fresh series is anchored at the base value on the first
            // usable price date.
            let Some(first) = ordered.iter().find(|b| basis(b).is_some()) else {
                return out;
            };
            out.push((first.trade_date, base));
            (base, first.trade_date)
        }
    };

    for pair in ordered.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur.trade_date <= chained_after {
            continue;
        }
        let (Some(prev_basis), Some(cur_basis)) = (basis(prev), basis(cur)) else {
            continue;
        };
        let payout = payouts.get(&cur.trade_date).copied().unwrap_or(0.0);
        let factor = (cur_basis + payout) / prev_basis;
        if factor <= 0.0 || !factor.is_finite() {
            continue;
        }
        current *= factor;
        out.push((cur.trade_date, current));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn bar(date: &str, close: Decimal, adj_close: Decimal) -> PriceBar {
        PriceBar {
            instrument_id: "0050.TW".into(),
            trade_date: d(date),
            open: close,
            high: close,
            low: close,
            close,
            adj_close,
            volume: 1_000,
        }
    }

    fn dividend(date: &str, amount: Decimal) -> DividendEvent {
        DividendEvent {
            instrument_id: "0050.TW".into(),
            ex_date: d(date),
            amount_per_unit: amount,
            currency: "TWD".into(),
        }
    }

    fn split(date: &str, ratio: Decimal) -> SplitEvent {
        SplitEvent {
            instrument_id: "0050.TW".into(),
            effective_date: d(date),
            ratio,
        }
    }

    #[test]
    fn fresh_series_starts_at_base_and_chains_daily_ratios() {
        let bars = [
            bar("2024-05-01", dec!(100), dec!(100)),
            bar("2024-05-02", dec!(102), dec!(102)),
            bar("2024-05-03", dec!(99), dec!(99)),
        ];
        let points = extend_series(Region::Tw, &bars, &[], &[], None, 100.0);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], (d("2024-05-01"), 100.0));
        assert_relative_eq!(points[1].1, 102.0, max_relative = 1e-12);
        assert_relative_eq!(points[2].1, 99.0, max_relative = 1e-12);
    }

    #[test]
    fn seeded_series_emits_only_dates_after_the_seed() {
        let bars = [
            bar("2024-05-02", dec!(102), dec!(102)),
            bar("2024-05-03", dec!(99), dec!(99)),
        ];
        let seed = Some((d("2024-05-02"), 204.0));
        let points = extend_series(Region::Tw, &bars, &[], &[], seed, 100.0);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].0, d("2024-05-03"));
        assert_relative_eq!(points[0].1, 204.0 * 99.0 / 102.0, max_relative = 1e-12);
    }

    #[test]
    fn no_new_trading_days_is_an_empty_extension() {
        let bars = [bar("2024-05-02", dec!(102), dec!(102))];
        let seed = Some((d("2024-05-02"), 204.0));
        let points = extend_series(Region::Tw, &bars, &[], &[], seed, 100.0);
        assert!(points.is_empty());
    }

    #[test]
    fn tw_formula_reinvests_the_dividend_on_its_ex_date() {
        let bars = [
            bar("2024-05-01", dec!(100), dec!(100)),
            bar("2024-05-02", dec!(100), dec!(100)),
        ];
        let dividends = [dividend("2024-05-02", dec!(2))];
        let points = extend_series(Region::Tw, &bars, &dividends, &[], None, 100.0);
        assert_eq!(points.len(), 2);
        // (100 + 2) / 100 on top of the base point.
        assert_relative_eq!(points[1].1, 102.0, max_relative = 1e-12);
    }

    #[test]
    fn us_formula_uses_adjusted_close_and_ignores_dividend_events() {
        let bars = [
            bar("2024-05-01", dec!(100), dec!(50)),
            bar("2024-05-02", dec!(101), dec!(51)),
        ];
        let dividends = [dividend("2024-05-02", dec!(2))];
        let points = extend_series(Region::Us, &bars, &dividends, &[], None, 100.0);
        assert_relative_eq!(points[1].1, 100.0 * 51.0 / 50.0, max_relative = 1e-12);
    }

    #[test]
    fn zero_close_days_are_skipped_without_halting_the_chain() {
        let bars = [
            bar("2024-05-01", dec!(100), dec!(100)),
            bar("2024-05-02", dec!(0), dec!(0)),
            bar("2024-05-03", dec!(100), dec!(100)),
            bar("2024-05-06", dec!(110), dec!(110)),
        ];
        let points = extend_series(Region::Tw, &bars, &[], &[], None, 100.0);
        // 05-02 has no basis and 05-03's factor has no usable denominator,
        // so only the base point and 05-06 survive.
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], (d("2024-05-01"), 100.0));
        assert_eq!(points[1].0, d("2024-05-06"));
        assert_relative_eq!(points[1].1, 110.0, max_relative = 1e-12);
    }

    #[test]
    fn duplicate_dates_keep_the_last_bar() {
        let bars = [
            bar("2024-05-01", dec!(100), dec!(100)),
            bar("2024-05-02", dec!(90), dec!(90)),
            bar("2024-05-02", dec!(102), dec!(102)),
        ];
        let points = extend_series(Region::Tw, &bars, &[], &[], None, 100.0);
        assert_relative_eq!(points[1].1, 102.0, max_relative = 1e-12);
    }

    #[test]
    fn dividends_before_a_split_are_scaled_back_up() {
        let dividends = [dividend("2023-01-10", dec!(0.5))];
        let splits = [split("2023-06-01", dec!(4))];
        let paid = deadjusted_dividends(&dividends, &splits);
        assert_relative_eq!(paid[&d("2023-01-10")], 2.0, max_relative = 1e-12);

        // A fractional reported ratio means the same thing.
        let splits = [split("2023-06-01", dec!(0.25))];
        let paid = deadjusted_dividends(&dividends, &splits);
        assert_relative_eq!(paid[&d("2023-01-10")], 2.0, max_relative = 1e-12);
    }

    #[test]
    fn splits_at_or_before_the_ex_date_leave_the_amount_alone() {
        let dividends = [dividend("2023-06-01", dec!(0.5))];
        let splits = [split("2023-06-01", dec!(4)), split("2023-01-02", dec!(2))];
        let paid = deadjusted_dividends(&dividends, &splits);
        assert_relative_eq!(paid[&d("2023-06-01")], 0.5, max_relative = 1e-12);
    }

    #[test]
    fn same_date_dividend_amounts_are_summed() {
        let dividends = [
            dividend("2023-01-10", dec!(0.3)),
            dividend("2023-01-10", dec!(0.2)),
        ];
        let paid = deadjusted_dividends(&dividends, &[]);
        assert_relative_eq!(paid[&d("2023-01-10")], 0.5, max_relative = 1e-12);
    }
}

use super::EngineError;

/// Price fields frozen onto a booking at creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSnapshot {
    pub rate: f64,
    pub duration_hours: f64,
    pub total_price: f64,
}

/// Nearest quarter hour, ties away from zero, never negative.
pub fn round_to_quarter_hour(raw_hours: f64) -> f64 {
    let rounded = (raw_hours * 4.0).round() / 4.0;
    if rounded > 0.0 { rounded } else { 0.0 }
}

/// Two decimal places, ties away from zero.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn snapshot(raw_hours: f64, rate: f64) -> Result<PriceSnapshot, EngineError> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(EngineError::Validation(format!("provider rate {rate} is not a valid price")));
    }
    if !raw_hours.is_finite() {
        return Err(EngineError::Validation("duration is not finite".into()));
    }
    let duration_hours = round_to_quarter_hour(raw_hours);
    Ok(PriceSnapshot {
        rate,
        duration_hours,
        total_price: round_cents(duration_hours * rate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{duration_hours, MS_PER_HOUR};

    const M: i64 = 60_000;

    #[test]
    fn one_hour_forty_at_100() {
        let raw = duration_hours(10 * MS_PER_HOUR, 11 * MS_PER_HOUR + 40 * M).unwrap();
        let p = snapshot(raw, 100.0).unwrap();
        assert_eq!(p.duration_hours, 1.75);
        assert_eq!(p.total_price, 175.0);
    }

    #[test]
    fn one_hour_ten_rounds_to_quarter_past() {
        let raw = duration_hours(0, MS_PER_HOUR + 10 * M).unwrap();
        assert_eq!(round_to_quarter_hour(raw), 1.25);
    }

    #[test]
    fn nearest_not_floor_or_ceil() {
        // 1h05m → 1.0 (down), 1h08m → 1.25 (up)
        assert_eq!(round_to_quarter_hour(65.0 / 60.0), 1.0);
        assert_eq!(round_to_quarter_hour(68.0 / 60.0), 1.25);
        assert_eq!(round_to_quarter_hour(2.0), 2.0);
    }

    #[test]
    fn half_rounds_away_from_zero() {
        // 7.5 minutes is exactly half a quarter.
        assert_eq!(round_to_quarter_hour(0.125), 0.25);
        assert_eq!(round_cents(0.125), 0.13);
    }

    #[test]
    fn tiny_durations_never_go_negative() {
        assert_eq!(round_to_quarter_hour(0.01), 0.0);
        assert_eq!(round_to_quarter_hour(-3.0), 0.0);
        let p = snapshot(0.05, 60.0).unwrap();
        assert_eq!(p.total_price, 0.0);
    }

    #[test]
    fn cents_rounding() {
        let p = snapshot(1.25, 33.333).unwrap();
        assert_eq!(p.total_price, 41.67);
        let p = snapshot(2.0, 49.995).unwrap();
        assert_eq!(p.total_price, 99.99);
    }

    #[test]
    fn rejects_bad_rates() {
        assert!(matches!(snapshot(1.0, -1.0), Err(EngineError::Validation(_))));
        assert!(matches!(snapshot(1.0, f64::NAN), Err(EngineError::Validation(_))));
        assert!(snapshot(1.0, 0.0).is_ok());
    }
}

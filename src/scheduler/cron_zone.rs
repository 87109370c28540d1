//! Local-time cron expressions on a UTC-only job scheduler
//!
//! `tokio-cron-scheduler` evaluates every expression in UTC. Jobs are
//! configured in the cooperative's wall-clock time, so the hour field is
//! shifted by the fixed zone offset before registration.

use std::collections::BTreeSet;

/// Rewrite a six or seven field cron expression written in a zone
/// `utc_offset_hours` east of UTC into the same schedule in UTC.
///
/// A shift that moves some firing across midnight is only accepted when the
/// day, month, weekday and year fields are unrestricted, since those would
/// have to move by a day as well.
pub(crate) fn to_utc_cron(expr: &str, utc_offset_hours: i32) -> Result<String, String> {
    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    if !(6..=7).contains(&fields.len()) {
        return Err(format!(
            "expected 6 or 7 fields (sec min hour dom mon dow [year]), got {}",
            fields.len()
        ));
    }
    if utc_offset_hours == 0 {
        return Ok(fields.join(" "));
    }

    let local_hours = expand_hours(&fields[2])?;
    let mut wraps = false;
    let utc_hours: BTreeSet<u32> = local_hours
        .iter()
        .map(|&hour| {
            let shifted = hour as i32 - utc_offset_hours;
            if !(0..24).contains(&shifted) {
                wraps = true;
            }
            shifted.rem_euclid(24) as u32
        })
        .collect();

    let days_unrestricted = fields[3..]
        .iter()
        .all(|field| field == "*" || field == "?");
    if wraps && !days_unrestricted {
        return Err(format!(
            "'{}' crosses midnight at UTC{:+} and restricts days; use a plain hour schedule",
            expr, utc_offset_hours
        ));
    }

    fields[2] = if utc_hours.len() == 24 {
        "*".to_string()
    } else {
        utc_hours
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };
    Ok(fields.join(" "))
}

fn expand_hours(field: &str) -> Result<BTreeSet<u32>, String> {
    let mut hours = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = parse_hour(step)?;
                if step == 0 {
                    return Err(format!("zero step in hour field '{}'", field));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = match range {
            "*" => (0, 23),
            _ => match range.split_once('-') {
                Some((start, end)) => (parse_hour(start)?, parse_hour(end)?),
                // `a/n` runs from a to the end of the day
                None if item.contains('/') => (parse_hour(range)?, 23),
                None => {
                    let hour = parse_hour(range)?;
                    (hour, hour)
                }
            },
        };
        if start > end {
            return Err(format!("descending hour range '{}'", item));
        }

        hours.extend((start..=end).step_by(step as usize));
    }
    Ok(hours)
}

fn parse_hour(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(hour) if hour < 24 => Ok(hour),
        _ => Err(format!("invalid hour '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_local_hour_moves_to_utc() {
        assert_eq!(to_utc_cron("0 0 9 * * *", 7).unwrap(), "0 0 2 * * *");
        // 06:00 WIB is 23:00 the previous UTC day
        assert_eq!(to_utc_cron("0 30 6 * * *", 7).unwrap(), "0 30 23 * * *");
        assert_eq!(to_utc_cron("0 0 20 * * *", -3).unwrap(), "0 0 23 * * *");
    }

    #[test]
    fn test_every_hour_schedules_are_unchanged() {
        assert_eq!(to_utc_cron("0 */5 * * * *", 7).unwrap(), "0 */5 * * * *");
        assert_eq!(to_utc_cron("0 0 * * * *", 7).unwrap(), "0 0 * * * *");
    }

    #[test]
    fn test_lists_ranges_and_steps_are_shifted() {
        assert_eq!(to_utc_cron("0 0 8-10 * * *", 7).unwrap(), "0 0 1,2,3 * * *");
        assert_eq!(to_utc_cron("0 0 */6 * * *", 7).unwrap(), "0 0 5,11,17,23 * * *");
        assert_eq!(to_utc_cron("0 0 12/4 * * *", 8).unwrap(), "0 0 4,8,12 * * *");
    }

    #[test]
    fn test_zero_offset_keeps_expression() {
        assert_eq!(to_utc_cron("0 15 6 * Mar Fri", 0).unwrap(), "0 15 6 * Mar Fri");
    }

    #[test]
    fn test_day_restricted_shift_across_midnight_is_rejected() {
        // 09:00 Monday stays Monday in UTC
        assert_eq!(to_utc_cron("0 0 9 * * Mon", 7).unwrap(), "0 0 2 * * Mon");
        assert!(to_utc_cron("0 0 3 * * Mon", 7).is_err());
        assert!(to_utc_cron("0 0 3 1 * *", 7).is_err());
    }

    #[test]
    fn test_malformed_expressions_are_rejected() {
        assert!(to_utc_cron("every morning", 7).is_err());
        assert!(to_utc_cron("0 0 25 * * *", 7).is_err());
        assert!(to_utc_cron("0 0 */0 * * *", 7).is_err());
        assert!(to_utc_cron("0 0 10-8 * * *", 7).is_err());
    }
}

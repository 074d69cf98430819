use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use control_core::Repeat;
use control_protocol::{AtSpec, RepeatSpec, TIME_FORMAT};

use crate::error::ApiError;

/// Parses one `at` wire value (`YYYY/MM/DD HH:MM:SS`, local time) into an
/// absolute UTC instant.
fn parse_one(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let naive = NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|_| ApiError::BadRequest(format!("invalid time {raw:?}, expected {TIME_FORMAT:?}")))?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ApiError::BadRequest(format!("ambiguous local time {raw:?}")))
}

/// Normalizes `at` (single value or list) into a chronological list of
/// absolute instants. The list must be non-empty and, after normalization,
/// strictly monotonic.
fn parse_at(at: AtSpec) -> Result<Vec<DateTime<Utc>>, ApiError> {
    let mut times = at
        .into_specs()
        .into_iter()
        .map(|raw| parse_one(&raw))
        .collect::<Result<Vec<_>, _>>()?;
    if times.is_empty() {
        return Err(ApiError::BadRequest("at must not be empty".into()));
    }
    times.sort();
    Ok(times)
}

/// Expands `at` plus an ordered list of `repeat` clauses into the
/// materialized `due` list the scheduler stores plus an optional trailing
/// forever repeat: each finite clause extends the due list from its tail,
/// and a `times: None` clause becomes the forever continuation. A forever
/// clause, if present, must be the last one — any repeat clause after it is
/// unreachable and ignored.
pub fn expand_schedule(
    at: Option<AtSpec>,
    repeat: Option<Vec<RepeatSpec>>,
) -> Result<(Vec<DateTime<Utc>>, Option<Repeat>), ApiError> {
    let at = at.ok_or_else(|| ApiError::BadRequest("at is required".into()))?;
    let mut due = parse_at(at)?;
    let mut forever = None;

    for clause in repeat.into_iter().flatten() {
        let parsed = Repeat::validate(clause.times, clause.interval)?;
        match parsed.times {
            None => {
                forever = Some(parsed);
                break;
            }
            Some(times) => {
                let delta = chrono::Duration::from_std(parsed.interval)
                    .map_err(|_| ApiError::BadRequest("interval too large".into()))?;
                let mut last = *due.last().expect("due validated non-empty above");
                for _ in 0..times {
                    last += delta;
                    due.push(last);
                }
            }
        }
    }

    Ok((due, forever))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_at_normalizes_to_one_entry() {
        let (due, forever) = expand_schedule(
            Some(AtSpec::Single("2099/01/01 12:00:05".into())),
            None,
        )
        .unwrap();
        assert_eq!(due.len(), 1);
        assert!(forever.is_none());
    }

    #[test]
    fn repeat_composition_matches_scenario_s4() {
        let (due, forever) = expand_schedule(
            Some(AtSpec::Single("2099/01/01 12:00:00".into())),
            Some(vec![
                RepeatSpec { times: Some(2), interval: 5.0 },
                RepeatSpec { times: None, interval: 10.0 },
            ]),
        )
        .unwrap();

        assert_eq!(due.len(), 3);
        assert_eq!((due[1] - due[0]).num_seconds(), 5);
        assert_eq!((due[2] - due[1]).num_seconds(), 5);
        let forever = forever.unwrap();
        assert_eq!(forever.interval.as_secs(), 10);
        assert!(forever.times.is_none());
    }

    #[test]
    fn missing_at_is_a_bad_request() {
        let err = expand_schedule(None, None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn malformed_time_is_a_bad_request() {
        let err = expand_schedule(Some(AtSpec::Single("not-a-time".into())), None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}

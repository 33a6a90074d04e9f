//! Colon mini-language for single alarms
//!
//! ```text
//! <event>:<kind>[:<value>][:tid<N>][:bcast][:count<N>][:global][:repeat]
//! uniform:<period>:<length>:<count>[:tid<N>][:<common tokens>]
//! ```

use crate::control::EventType;
use crate::domain::{ConfigError, ThreadId, UnknownEventError};

use super::condition::{AlarmKind, Condition};

/// Split on `sep`, dropping empty pieces (so `a::b:` is `["a", "b"]`).
#[must_use]
pub fn split_args(sep: char, input: &str) -> Vec<&str> {
    input.split(sep).filter(|token| !token.is_empty()).collect()
}

/// Decimal or `0x` hexadecimal.
pub fn parse_u64(s: &str) -> Result<u64, ConfigError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|_| ConfigError::InvalidNumber(s.to_string()))
}

pub fn parse_u32(s: &str) -> Result<u32, ConfigError> {
    let value = parse_u64(s)?;
    u32::try_from(value).map_err(|_| ConfigError::InvalidNumber(s.to_string()))
}

/// Periodic sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSpec {
    pub period: u64,
    /// Active window length
    pub length: u64,
    /// Number of windows
    pub count: u64,
}

/// Everything a control string says about one alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmSpec {
    pub event_name: String,
    pub event: EventType,
    pub condition: Condition,
    pub uniform: Option<UniformSpec>,
    pub tid: Option<ThreadId>,
    pub bcast: bool,
    /// Hit count for non-icount kinds
    pub count: u64,
    pub global: bool,
}

#[derive(Default)]
struct CommonTokens {
    tid: Option<ThreadId>,
    bcast: bool,
    count: Option<u64>,
    global: bool,
}

fn parse_tid(token: &str) -> Result<Option<ThreadId>, ConfigError> {
    token.strip_prefix("tid").map(|n| parse_u32(n).map(ThreadId)).transpose()
}

fn parse_common(tokens: &[&str], tid: Option<ThreadId>) -> Result<CommonTokens, ConfigError> {
    let mut common = CommonTokens { tid, ..CommonTokens::default() };
    let mut used_tid = false;

    for token in tokens {
        if let Some(tid) = parse_tid(token)? {
            common.tid = Some(tid);
            used_tid = true;
        } else if token.starts_with("bcast") {
            common.bcast = true;
        } else if let Some(n) = token.strip_prefix("count") {
            if n.is_empty() {
                return Err(ConfigError::MissingValue("count".to_string()));
            }
            common.count = Some(parse_u64(n)?);
        } else if token.starts_with("global") {
            common.global = true;
        } else if token.starts_with("repeat") {
            // Accepted for compatibility, repetition is a chain property
        } else {
            return Err(ConfigError::RedundantToken((*token).to_string()));
        }
    }

    if used_tid && common.global {
        return Err(ConfigError::TidWithGlobal);
    }
    Ok(common)
}

fn parse_uniform(tokens: &[&str]) -> Result<(UniformSpec, Option<ThreadId>, usize), ConfigError> {
    if tokens.len() < 4 {
        return Err(ConfigError::MalformedUniform);
    }
    let spec = UniformSpec {
        period: parse_u64(tokens[1])?,
        length: parse_u64(tokens[2])?,
        count: parse_u64(tokens[3])?,
    };
    if spec.period < spec.length {
        return Err(ConfigError::UniformPeriodTooShort { period: spec.period, length: spec.length });
    }
    match tokens.get(4).map(|t| parse_tid(t)).transpose()?.flatten() {
        Some(tid) => Ok((spec, Some(tid), 5)),
        None => Ok((spec, None, 4)),
    }
}

/// Parse one alarm.
///
/// `resolve_event` maps the event name to its type; it is consulted before
/// the alarm kind so an unknown event is reported first.
pub fn parse_alarm<F>(control: &str, vector: bool, resolve_event: F) -> Result<AlarmSpec, ConfigError>
where
    F: FnOnce(&str) -> Result<EventType, UnknownEventError>,
{
    let tokens = split_args(':', control);
    let Some(&head) = tokens.first() else {
        return Err(ConfigError::MissingEvent);
    };

    if head == "uniform" {
        let (uniform, tid, consumed) = parse_uniform(&tokens)?;
        let common = parse_common(&tokens[consumed..], tid)?;
        return Ok(AlarmSpec {
            event_name: "uniform".to_string(),
            event: EventType::Start,
            condition: Condition::Icount(1),
            uniform: Some(uniform),
            tid: common.tid,
            bcast: common.bcast,
            count: common.count.unwrap_or(1),
            global: common.global,
        });
    }

    let event = resolve_event(head)?;

    let Some(&kind_name) = tokens.get(1) else {
        return Err(ConfigError::MissingValue(head.to_string()));
    };
    let kind: AlarmKind = kind_name.parse()?;
    if vector && kind != AlarmKind::Icount {
        return Err(ConfigError::VectorNotIcount(kind.to_string()));
    }

    let (value, rest) = if kind.takes_value() {
        let Some(&value) = tokens.get(2) else {
            return Err(ConfigError::MissingValue(kind.to_string()));
        };
        (Some(value), &tokens[3..])
    } else {
        (None, &tokens[2..])
    };
    let condition = Condition::parse(kind, value)?;

    let common = parse_common(rest, None)?;
    if common.global && common.count.is_none() && kind != AlarmKind::Icount {
        return Err(ConfigError::GlobalWithoutCount);
    }

    Ok(AlarmSpec {
        event_name: head.to_string(),
        event,
        condition,
        uniform: None,
        tid: common.tid,
        bcast: common.bcast,
        count: common.count.unwrap_or(1),
        global: common.global,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(name: &str) -> Result<EventType, UnknownEventError> {
        match name {
            "start" => Ok(EventType::Start),
            "stop" => Ok(EventType::Stop),
            "precond" => Ok(EventType::Precond),
            other => Err(UnknownEventError(other.to_string())),
        }
    }

    fn parse(control: &str) -> Result<AlarmSpec, ConfigError> {
        parse_alarm(control, false, events)
    }

    #[test]
    fn test_split_skips_empty_tokens() {
        assert_eq!(split_args(':', ":start::icount:10:"), vec!["start", "icount", "10"]);
    }

    #[test]
    fn test_numbers_accept_hex() {
        assert_eq!(parse_u64("0x10").unwrap(), 16);
        assert_eq!(parse_u64("42").unwrap(), 42);
        assert_eq!(parse_u64("4z").unwrap_err(), ConfigError::InvalidNumber("4z".to_string()));
    }

    #[test]
    fn test_icount_with_tid() {
        let spec = parse("start:icount:100:tid3").unwrap();
        assert_eq!(spec.event, EventType::Start);
        assert_eq!(spec.condition, Condition::Icount(100));
        assert_eq!(spec.tid, Some(ThreadId(3)));
        assert!(!spec.bcast);
        assert!(!spec.global);
    }

    #[test]
    fn test_common_tokens() {
        let spec = parse("stop:address:0x400:count5:bcast:global").unwrap();
        assert_eq!(spec.count, 5);
        assert!(spec.bcast);
        assert!(spec.global);
    }

    #[test]
    fn test_unknown_event_reported_before_kind() {
        let err = parse("launch:bogus:1").unwrap_err();
        assert_eq!(err, ConfigError::UnknownEvent(UnknownEventError("launch".to_string())));
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(parse("start:bogus:1").unwrap_err(), ConfigError::UnknownAlarm("bogus".into()));
        assert_eq!(parse("start:icount").unwrap_err(), ConfigError::MissingValue("icount".into()));
        assert_eq!(parse("start:icount:5:tid1:global").unwrap_err(), ConfigError::TidWithGlobal);
        assert_eq!(parse("start:int3:x:global").unwrap_err(), ConfigError::GlobalWithoutCount);
        assert_eq!(
            parse("start:icount:5:fast").unwrap_err(),
            ConfigError::RedundantToken("fast".into())
        );
        assert_eq!(parse("").unwrap_err(), ConfigError::MissingEvent);
    }

    #[test]
    fn test_global_with_count_is_allowed_for_any_kind() {
        let spec = parse("start:int3:x:count2:global").unwrap();
        assert!(spec.global);
        assert_eq!(spec.count, 2);
    }

    #[test]
    fn test_vector_flag_requires_icount() {
        let err = parse_alarm("start:address:0x10", true, events).unwrap_err();
        assert_eq!(err, ConfigError::VectorNotIcount("address".into()));
        assert!(parse_alarm("start:icount:10", true, events).is_ok());
    }

    #[test]
    fn test_interactive_takes_no_value() {
        let spec = parse("stop:interactive:bcast").unwrap();
        assert_eq!(spec.condition, Condition::Interactive);
        assert!(spec.bcast);
    }

    #[test]
    fn test_uniform_forms() {
        let spec = parse("uniform:1000:200:5").unwrap();
        assert_eq!(spec.uniform, Some(UniformSpec { period: 1000, length: 200, count: 5 }));
        assert_eq!(spec.event, EventType::Start);
        assert_eq!(spec.tid, None);

        let spec = parse("uniform:1000:200:5:tid2:bcast").unwrap();
        assert_eq!(spec.tid, Some(ThreadId(2)));
        assert!(spec.bcast);

        assert_eq!(parse("uniform:1000:200").unwrap_err(), ConfigError::MalformedUniform);
        assert_eq!(
            parse("uniform:100:200:1").unwrap_err(),
            ConfigError::UniformPeriodTooShort { period: 100, length: 200 }
        );
        // A window as long as the period is allowed
        assert!(parse("uniform:100:100:1").is_ok());
    }
}

use chrono::{DateTime, Utc};
use ledgerhouse_model::{EventType, Record};
use serde_json::Value;

/// Project one raw batch entry onto the canonical record shape.
///
/// Upstream batches have drifted between snake_case and camelCase field
/// names and between string and integer timestamps; all of that is absorbed
/// here so nothing downstream ever sees a source-shaped record.
pub fn normalize_record(raw: &Value) -> Record {
    Record {
        event_id: string_field(raw, &["event_id", "eventId"]),
        update_id: string_field(raw, &["update_id", "updateId"]),
        contract_id: string_field(raw, &["contract_id", "contractId"]),
        template_id: string_field(raw, &["template_id", "templateId"]),
        event_type: string_field(raw, &["event_type", "eventType"])
            .map(|s| EventType::parse(&s)),
        consuming: bool_field(raw, &["consuming"]),
        choice: string_field(raw, &["choice"]),
        effective_at: timestamp_field(raw, &["effective_at", "effectiveAt"]),
        recorded_at: timestamp_field(raw, &["recorded_at", "recordedAt", "record_time", "recordTime"]),
        signatories: party_list(raw, &["signatories"]),
        observers: party_list(raw, &["observers"]),
        acting_parties: party_list(raw, &["acting_parties", "actingParties"]),
        payload: object_field(raw, &["payload", "create_arguments", "createArguments"]),
        exercise_argument: object_field(raw, &["exercise_argument", "exerciseArgument", "choice_argument", "choiceArgument"]),
        exercise_result: object_field(raw, &["exercise_result", "exerciseResult"]),
        synchronizer_id: string_field(raw, &["synchronizer_id", "synchronizerId", "domain_id", "domainId"]),
    }
}

fn field<'a>(raw: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        let v = raw.get(name)?;
        (!v.is_null()).then_some(v)
    })
}

fn string_field(raw: &Value, names: &[&str]) -> Option<String> {
    field(raw, names).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(raw: &Value, names: &[&str]) -> Option<bool> {
    field(raw, names).and_then(Value::as_bool)
}

fn object_field(raw: &Value, names: &[&str]) -> Option<Value> {
    field(raw, names).cloned()
}

fn party_list(raw: &Value, names: &[&str]) -> Vec<String> {
    field(raw, names)
        .and_then(Value::as_array)
        .map(|parties| {
            parties
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn timestamp_field(raw: &Value, names: &[&str]) -> Option<DateTime<Utc>> {
    field(raw, names).and_then(parse_timestamp)
}

/// Parse a timestamp from any of the encodings the source has produced:
/// ISO-8601 strings, or integer epochs in seconds, milliseconds, or
/// microseconds (disambiguated by magnitude).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let epoch = n.as_i64()?;
            from_epoch(epoch)
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Bare "YYYY-MM-DDTHH:MM:SS[.fff]" without an offset is taken as UTC.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    // A string-encoded integer epoch.
    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch <= 0 {
        return None;
    }
    // 1e14 as of 2024 can only be microseconds; 1e11..1e14 milliseconds;
    // anything smaller is seconds.
    if epoch >= 100_000_000_000_000 {
        DateTime::from_timestamp_micros(epoch)
    } else if epoch >= 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

use super::{Tool, ToolSpec};
use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Reports the current time, optionally shifted to a whole-hour UTC offset.
pub struct Clock;

impl Tool for Clock {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "clock".into(),
            description: "Return the current date and time".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "utc_offset_hours": { "type": "integer", "minimum": -23, "maximum": 23, "default": 0 }
                },
                "additionalProperties": false
            }),
        }
    }

    fn call(&self, args: &Value) -> Result<Value> {
        report(OffsetDateTime::now_utc(), args)
    }
}

fn offset_from(args: &Value) -> Result<UtcOffset> {
    let hours = match args.get("utc_offset_hours") {
        None | Some(Value::Null) => 0,
        Some(v) => v.as_i64().ok_or_else(|| anyhow!("utc_offset_hours must be an integer"))?,
    };
    let hours = i8::try_from(hours).map_err(|_| anyhow!("utc_offset_hours out of range: {hours}"))?;
    UtcOffset::from_hms(hours, 0, 0).with_context(|| format!("invalid utc_offset_hours: {hours}"))
}

fn report(now: OffsetDateTime, args: &Value) -> Result<Value> {
    let offset = offset_from(args)?;
    let local = now.to_offset(offset);
    let display = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    );
    Ok(json!({
        "rfc3339": local.format(&Rfc3339)?,
        "unix": local.unix_timestamp(),
        "display": local.format(display)?,
        "utc_offset_hours": offset.whole_hours(),
    }))
}

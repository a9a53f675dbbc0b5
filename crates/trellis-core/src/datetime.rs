use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{
  DateTime,
  NaiveDate,
  NaiveDateTime,
  Utc
};
use chrono_tz::Tz;

const TIMEZONE_ENV_VAR: &str =
  "TRELLIS_TIMEZONE";

const WIRE_FORMAT: &str =
  "%Y-%m-%dT%H:%M:%S%.3fZ";

const NAIVE_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%d %H:%M:%S"
];

/// Timezone used when rendering
/// timestamps for people. Stored
/// timestamps are always UTC.
pub fn display_timezone() -> &'static Tz
{
  static DISPLAY_TZ: OnceLock<Tz> =
    OnceLock::new();
  DISPLAY_TZ.get_or_init(
    resolve_display_timezone
  )
}

fn resolve_display_timezone() -> Tz {
  let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  else {
    return chrono_tz::UTC;
  };

  match raw.trim().parse::<Tz>() {
    | Ok(tz) => tz,
    | Err(err) => {
      tracing::warn!(
        env = TIMEZONE_ENV_VAR,
        value = %raw,
        error = %err,
        "invalid timezone; using UTC"
      );
      chrono_tz::UTC
    }
  }
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(display_timezone())
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

#[must_use]
pub fn format_timestamp(
  dt: DateTime<Utc>
) -> String {
  dt.format(WIRE_FORMAT).to_string()
}

/// Accepts RFC 3339, a naive
/// date-time (taken as UTC) or a bare
/// date (midnight UTC).
pub fn parse_timestamp(
  raw: &str
) -> anyhow::Result<DateTime<Utc>> {
  let trimmed = raw.trim();

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Ok(dt.with_timezone(&Utc));
  }

  for format in NAIVE_FORMATS {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        trimmed, format
      )
    {
      return Ok(ndt.and_utc());
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      trimmed, "%Y-%m-%d"
    )
    && let Some(ndt) =
      date.and_hms_opt(0, 0, 0)
  {
    return Ok(ndt.and_utc());
  }

  Err(anyhow!(
    "unrecognized timestamp: {raw}"
  ))
}

pub mod iso_serde {
  use chrono::{
    DateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &super::format_timestamp(*dt)
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_timestamp(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw)
          if !raw.trim().is_empty() =>
        {
          super::super::parse_timestamp(
            &raw
          )
          .map(Some)
          .map_err(
            serde::de::Error::custom
          )
        }
        | _ => Ok(None)
      }
    }
  }
}

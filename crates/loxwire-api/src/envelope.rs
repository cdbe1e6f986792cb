// Miniserver response envelope
//
// Every HTTP answer and every push-channel acknowledgement is wrapped as
// `{ "LL": { "control": "...", "Code": "200", "value": ... } }`. Firmware
// versions disagree on the casing of `Code` and on whether it is a number or
// a string, so both are accepted here.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::Error;

/// Result codes in this half-open range are treated as success.
pub const SUCCESS_CODES: std::ops::Range<i32> = 200..300;

/// A parsed `LL` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub code: i32,
    pub control: Option<String>,
    pub value: Option<Value>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    #[serde(rename = "Code", alias = "code", deserialize_with = "code_from_any")]
    code: i32,
    #[serde(default)]
    control: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn code_from_any<'de, D: Deserializer<'de>>(de: D) -> Result<i32, D::Error> {
    use serde::de::Error as _;

    match Value::deserialize(de)? {
        Value::Number(n) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| D::Error::custom(format!("code out of range: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("code is not numeric: {s}"))),
        other => Err(D::Error::custom(format!("unexpected code type: {other}"))),
    }
}

impl Envelope {
    /// Parse a raw response body.
    pub fn parse(body: &str) -> Result<Self, Error> {
        let root: Value = serde_json::from_str(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_owned(),
        })?;
        Self::from_value(root)
    }

    /// Parse an already-decoded JSON document.
    pub fn from_value(mut root: Value) -> Result<Self, Error> {
        let ll = root
            .get_mut("LL")
            .map(Value::take)
            .ok_or_else(|| Error::protocol("response has no LL envelope"))?;

        let body: EnvelopeBody = serde_json::from_value(ll)
            .map_err(|e| Error::protocol(format!("malformed LL envelope: {e}")))?;

        Ok(Self {
            code: body.code,
            control: body.control,
            value: body.value,
            message: body.message,
        })
    }

    pub fn is_success(&self) -> bool {
        SUCCESS_CODES.contains(&self.code)
    }

    /// Convert a failing code on an ordinary command into [`Error::Rejected`].
    pub fn into_success(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Rejected {
                code: self.code,
                message: self.failure_message(),
            })
        }
    }

    /// Convert a failing code on an authentication step into
    /// [`Error::Authentication`].
    pub fn into_auth_success(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Authentication {
                code: self.code,
                message: self.failure_message(),
            })
        }
    }

    /// Best human-readable explanation the server gave for a failure.
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.value.as_ref().and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_else(|| format!("server returned code {}", self.code))
    }

    // ── Value accessors ──────────────────────────────────────────────

    /// The `value` payload, or a protocol error if absent.
    pub fn require_value(&self) -> Result<&Value, Error> {
        self.value
            .as_ref()
            .ok_or_else(|| Error::protocol("response has no value"))
    }

    /// The `value` payload as a string (e.g. the raw key from `getkey`).
    pub fn value_str(&self) -> Result<&str, Error> {
        self.require_value()?
            .as_str()
            .ok_or_else(|| Error::protocol("response value is not a string"))
    }

    /// A required string field of an object-valued payload.
    pub fn field_str(&self, name: &str) -> Result<&str, Error> {
        self.field(name)?
            .as_str()
            .ok_or_else(|| Error::protocol(format!("field '{name}' is not a string")))
    }

    /// A required integer field of an object-valued payload.
    pub fn field_i64(&self, name: &str) -> Result<i64, Error> {
        self.field(name)?
            .as_i64()
            .ok_or_else(|| Error::protocol(format!("field '{name}' is not an integer")))
    }

    /// A required boolean field of an object-valued payload.
    pub fn field_bool(&self, name: &str) -> Result<bool, Error> {
        self.field(name)?
            .as_bool()
            .ok_or_else(|| Error::protocol(format!("field '{name}' is not a boolean")))
    }

    /// An optional field; `None` when absent or `null`.
    pub fn optional_field(&self, name: &str) -> Option<&Value> {
        self.value
            .as_ref()
            .and_then(|v| v.get(name))
            .filter(|v| !v.is_null())
    }

    fn field(&self, name: &str) -> Result<&Value, Error> {
        self.require_value()?;
        self.optional_field(name)
            .ok_or_else(|| Error::protocol(format!("response is missing field '{name}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_codes() {
        let a = Envelope::parse(r#"{"LL":{"control":"x","Code":200,"value":"ok"}}"#).unwrap();
        assert_eq!(a.code, 200);
        assert_eq!(a.control.as_deref(), Some("x"));

        let b = Envelope::parse(r#"{"LL":{"code":"401","value":""}}"#).unwrap();
        assert_eq!(b.code, 401);
    }

    #[test]
    fn whole_2xx_range_is_success() {
        let created = Envelope::parse(r#"{"LL":{"Code":"201"}}"#).unwrap();
        assert!(created.is_success());
        assert!(created.into_success().is_ok());

        let edge = Envelope::parse(r#"{"LL":{"Code":"300"}}"#).unwrap();
        assert!(!edge.is_success());
    }

    #[test]
    fn failing_code_carries_server_message() {
        let env =
            Envelope::parse(r#"{"LL":{"Code":"404","message":"no such control"}}"#).unwrap();
        match env.into_success() {
            Err(Error::Rejected { code, message }) => {
                assert_eq!(code, 404);
                assert_eq!(message, "no such control");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn failing_auth_code_maps_to_authentication() {
        let env = Envelope::parse(r#"{"LL":{"Code":"401","value":"bad hash"}}"#).unwrap();
        let err = env.into_auth_success().unwrap_err();
        assert!(matches!(err, Error::Authentication { code: 401, ref message } if message == "bad hash"));
    }

    #[test]
    fn missing_envelope_is_protocol_error() {
        assert!(matches!(Envelope::parse(r#"{"foo":1}"#), Err(Error::Protocol { .. })));
        assert!(matches!(
            Envelope::parse(r#"{"LL":{"value":1}}"#),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(
            Envelope::parse("<html>"),
            Err(Error::Deserialization { .. })
        ));
    }

    #[test]
    fn field_accessors_report_missing_fields() {
        let env = Envelope::parse(
            r#"{"LL":{"Code":"200","value":{"token":"t","validUntil":5,"unsecurePass":false}}}"#,
        )
        .unwrap();
        assert_eq!(env.field_str("token").unwrap(), "t");
        assert_eq!(env.field_i64("validUntil").unwrap(), 5);
        assert!(!env.field_bool("unsecurePass").unwrap());
        assert!(env.optional_field("key").is_none());
        assert!(matches!(env.field_str("key"), Err(Error::Protocol { .. })));
    }
}

//! Typed partial updates for the per-phase field groups.
//!
//! A [`FieldPatch`] is an ordered list of `(Field, FieldValue)` pairs for a
//! single [`FieldGroup`]. Patches built from JSON payloads reject unknown
//! keys and keys from other groups, and coerce values per field kind:
//!
//! | kind    | number            | string              | bool            | null  |
//! |---------|-------------------|---------------------|-----------------|-------|
//! | decimal | as-is             | parsed, "" = null   | rejected        | clear |
//! | integer | must be integral  | parsed, "" = null   | rejected        | clear |
//! | text    | stringified       | trimmed, "" = null  | "true"/"false"  | clear |

use crate::{
    Error, FieldChange, FieldGroup, IntraReading, PostDialysisVitals, PreDialysisVitals, Result,
};
use serde_json::{Map, Value};
use std::fmt;

/// Value type of a field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Decimal,
    Integer,
    Text,
}

/// Every editable clinical field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    PreWeight,
    PreSbp,
    PreDbp,
    PrePulse,
    PreTemperature,
    PreAccessSite,
    PreNotes,
    IntraSbp,
    IntraDbp,
    IntraPulse,
    BloodFlowRate,
    VenousPressure,
    ArterialPressure,
    TransmembranePressure,
    IntraNotes,
    PostWeight,
    PostSbp,
    PostDbp,
    PostPulse,
    PostTemperature,
    PostAccessStatus,
    PostNotes,
}

impl Field {
    pub const ALL: [Field; 22] = [
        Field::PreWeight,
        Field::PreSbp,
        Field::PreDbp,
        Field::PrePulse,
        Field::PreTemperature,
        Field::PreAccessSite,
        Field::PreNotes,
        Field::IntraSbp,
        Field::IntraDbp,
        Field::IntraPulse,
        Field::BloodFlowRate,
        Field::VenousPressure,
        Field::ArterialPressure,
        Field::TransmembranePressure,
        Field::IntraNotes,
        Field::PostWeight,
        Field::PostSbp,
        Field::PostDbp,
        Field::PostPulse,
        Field::PostTemperature,
        Field::PostAccessStatus,
        Field::PostNotes,
    ];

    /// Payload key for this field
    pub fn name(self) -> &'static str {
        match self {
            Field::PreWeight => "preWeight",
            Field::PreSbp => "preSBP",
            Field::PreDbp => "preDBP",
            Field::PrePulse => "prePulse",
            Field::PreTemperature => "preTemperature",
            Field::PreAccessSite => "preAccessSite",
            Field::PreNotes => "preNotes",
            Field::IntraSbp => "intraSBP",
            Field::IntraDbp => "intraDBP",
            Field::IntraPulse => "intraPulse",
            Field::BloodFlowRate => "bloodFlowRate",
            Field::VenousPressure => "venousPressure",
            Field::ArterialPressure => "arterialPressure",
            Field::TransmembranePressure => "transmembranePressure",
            Field::IntraNotes => "intraNotes",
            Field::PostWeight => "postWeight",
            Field::PostSbp => "postSBP",
            Field::PostDbp => "postDBP",
            Field::PostPulse => "postPulse",
            Field::PostTemperature => "postTemperature",
            Field::PostAccessStatus => "postAccessStatus",
            Field::PostNotes => "postNotes",
        }
    }

    /// Case-insensitive lookup by payload key
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn group(self) -> FieldGroup {
        match self {
            Field::PreWeight
            | Field::PreSbp
            | Field::PreDbp
            | Field::PrePulse
            | Field::PreTemperature
            | Field::PreAccessSite
            | Field::PreNotes => FieldGroup::PreDialysis,
            Field::IntraSbp
            | Field::IntraDbp
            | Field::IntraPulse
            | Field::BloodFlowRate
            | Field::VenousPressure
            | Field::ArterialPressure
            | Field::TransmembranePressure
            | Field::IntraNotes => FieldGroup::IntraDialysis,
            Field::PostWeight
            | Field::PostSbp
            | Field::PostDbp
            | Field::PostPulse
            | Field::PostTemperature
            | Field::PostAccessStatus
            | Field::PostNotes => FieldGroup::PostDialysis,
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::PreWeight | Field::PreTemperature | Field::PostWeight | Field::PostTemperature => {
                FieldKind::Decimal
            }
            Field::PreAccessSite
            | Field::PreNotes
            | Field::IntraNotes
            | Field::PostAccessStatus
            | Field::PostNotes => FieldKind::Text,
            _ => FieldKind::Integer,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A coerced field value
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Decimal(f64),
    Integer(i64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Decimal(v) => serde_json::json!(v),
            FieldValue::Integer(v) => Value::from(*v),
            FieldValue::Text(v) => Value::from(v.clone()),
            FieldValue::Null => Value::Null,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

fn invalid(field: Field, detail: impl fmt::Display) -> Error {
    Error::Validation(format!("{}: {}", field, detail))
}

/// Coerce a raw JSON value into the kind `field` expects
pub fn coerce(field: Field, raw: &Value) -> Result<FieldValue> {
    if raw.is_null() {
        return Ok(FieldValue::Null);
    }

    match field.kind() {
        FieldKind::Decimal => {
            let v = match raw {
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| invalid(field, "number out of range"))?,
                Value::String(s) if s.trim().is_empty() => return Ok(FieldValue::Null),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| invalid(field, format!("'{}' is not a number", s)))?,
                other => return Err(invalid(field, format!("expected a number, got {}", other))),
            };
            if !v.is_finite() {
                return Err(invalid(field, "must be finite"));
            }
            Ok(FieldValue::Decimal(v))
        }
        FieldKind::Integer => {
            let as_integral = |v: f64| -> Result<i64> {
                if !v.is_finite() || v.fract() != 0.0 {
                    Err(invalid(field, format!("{} is not a whole number", v)))
                } else if v < i64::MIN as f64 || v >= i64::MAX as f64 {
                    Err(invalid(field, format!("{} is out of range", v)))
                } else {
                    Ok(v as i64)
                }
            };
            let v = match raw {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => i,
                    None => as_integral(n.as_f64().unwrap_or(f64::NAN))?,
                },
                Value::String(s) if s.trim().is_empty() => return Ok(FieldValue::Null),
                Value::String(s) => match s.trim().parse::<i64>() {
                    Ok(i) => i,
                    Err(_) => {
                        let f = s
                            .trim()
                            .parse::<f64>()
                            .map_err(|_| invalid(field, format!("'{}' is not a number", s)))?;
                        as_integral(f)?
                    }
                },
                other => return Err(invalid(field, format!("expected a number, got {}", other))),
            };
            Ok(FieldValue::Integer(v))
        }
        FieldKind::Text => match raw {
            Value::String(s) if s.trim().is_empty() => Ok(FieldValue::Null),
            Value::String(s) => Ok(FieldValue::Text(s.trim().to_string())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            other => Err(invalid(field, format!("expected text, got {}", other))),
        },
    }
}

/// Mutable handle to one field's storage
enum FieldSlot<'a> {
    Decimal(&'a mut Option<f64>),
    Integer(&'a mut Option<i64>),
    Text(&'a mut Option<String>),
}

impl FieldSlot<'_> {
    fn current(&self) -> Value {
        match self {
            FieldSlot::Decimal(v) => v.map(|x| serde_json::json!(x)).unwrap_or(Value::Null),
            FieldSlot::Integer(v) => v.map(Value::from).unwrap_or(Value::Null),
            FieldSlot::Text(v) => v.as_deref().map(Value::from).unwrap_or(Value::Null),
        }
    }

    fn assign(self, value: &FieldValue) {
        match (self, value) {
            (FieldSlot::Decimal(slot), FieldValue::Decimal(v)) => *slot = Some(*v),
            (FieldSlot::Decimal(slot), FieldValue::Integer(v)) => *slot = Some(*v as f64),
            (FieldSlot::Integer(slot), FieldValue::Integer(v)) => *slot = Some(*v),
            (FieldSlot::Text(slot), FieldValue::Text(v)) => *slot = Some(v.clone()),
            (FieldSlot::Decimal(slot), FieldValue::Null) => *slot = None,
            (FieldSlot::Integer(slot), FieldValue::Null) => *slot = None,
            (FieldSlot::Text(slot), FieldValue::Null) => *slot = None,
            // Values are coerced to the slot's kind before assignment
            _ => {}
        }
    }
}

fn pre_slot(v: &mut PreDialysisVitals, field: Field) -> Option<FieldSlot<'_>> {
    Some(match field {
        Field::PreWeight => FieldSlot::Decimal(&mut v.weight),
        Field::PreSbp => FieldSlot::Integer(&mut v.sbp),
        Field::PreDbp => FieldSlot::Integer(&mut v.dbp),
        Field::PrePulse => FieldSlot::Integer(&mut v.pulse),
        Field::PreTemperature => FieldSlot::Decimal(&mut v.temperature),
        Field::PreAccessSite => FieldSlot::Text(&mut v.access_site),
        Field::PreNotes => FieldSlot::Text(&mut v.notes),
        _ => return None,
    })
}

fn intra_slot(v: &mut IntraReading, field: Field) -> Option<FieldSlot<'_>> {
    Some(match field {
        Field::IntraSbp => FieldSlot::Integer(&mut v.sbp),
        Field::IntraDbp => FieldSlot::Integer(&mut v.dbp),
        Field::IntraPulse => FieldSlot::Integer(&mut v.pulse),
        Field::BloodFlowRate => FieldSlot::Integer(&mut v.blood_flow_rate),
        Field::VenousPressure => FieldSlot::Integer(&mut v.venous_pressure),
        Field::ArterialPressure => FieldSlot::Integer(&mut v.arterial_pressure),
        Field::TransmembranePressure => FieldSlot::Integer(&mut v.transmembrane_pressure),
        Field::IntraNotes => FieldSlot::Text(&mut v.notes),
        _ => return None,
    })
}

fn post_slot(v: &mut PostDialysisVitals, field: Field) -> Option<FieldSlot<'_>> {
    Some(match field {
        Field::PostWeight => FieldSlot::Decimal(&mut v.weight),
        Field::PostSbp => FieldSlot::Integer(&mut v.sbp),
        Field::PostDbp => FieldSlot::Integer(&mut v.dbp),
        Field::PostPulse => FieldSlot::Integer(&mut v.pulse),
        Field::PostTemperature => FieldSlot::Decimal(&mut v.temperature),
        Field::PostAccessStatus => FieldSlot::Text(&mut v.access_status),
        Field::PostNotes => FieldSlot::Text(&mut v.notes),
        _ => return None,
    })
}

/// Ordered set of updates for one field group
#[derive(Clone, Debug, PartialEq)]
pub struct FieldPatch {
    group: FieldGroup,
    entries: Vec<(Field, FieldValue)>,
}

impl FieldPatch {
    pub fn new(group: FieldGroup) -> Self {
        Self {
            group,
            entries: Vec::new(),
        }
    }

    /// Add an update; kind and group are checked when the patch is applied
    pub fn with(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.entries.push((field, value.into()));
        self
    }

    /// Parse a JSON object payload (`null` is an empty patch)
    pub fn from_json(group: FieldGroup, payload: &Value) -> Result<Self> {
        let map = match payload {
            Value::Null => return Ok(Self::new(group)),
            Value::Object(map) => map,
            other => {
                return Err(Error::Validation(format!(
                    "payload must be an object, got {}",
                    other
                )))
            }
        };

        let mut patch = Self::new(group);
        for (key, raw) in map {
            let field = Field::from_name(key)
                .ok_or_else(|| Error::Validation(format!("unknown field '{}'", key)))?;
            if field.group() != group {
                return Err(Error::Validation(format!(
                    "field '{}' belongs to {}, not {}",
                    field,
                    field.group(),
                    group
                )));
            }
            patch.entries.push((field, coerce(field, raw)?));
        }
        Ok(patch)
    }

    /// Parse `key=value` pairs as typed on a command line; `null` clears
    pub fn from_pairs<S: AsRef<str>>(group: FieldGroup, pairs: &[S]) -> Result<Self> {
        let mut map = Map::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Validation(format!("expected key=value, got '{}'", pair)))?;
            let value = if value.trim() == "null" {
                Value::Null
            } else {
                Value::String(value.to_string())
            };
            map.insert(key.trim().to_string(), value);
        }
        Self::from_json(group, &Value::Object(map))
    }

    pub fn group(&self) -> FieldGroup {
        self.group
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.entries.iter().map(|(f, _)| *f)
    }

    /// Re-check group membership and kinds before touching anything
    fn validated(&self) -> Result<Vec<(Field, FieldValue)>> {
        self.entries
            .iter()
            .map(|(field, value)| {
                if field.group() != self.group {
                    return Err(Error::Validation(format!(
                        "field '{}' belongs to {}, not {}",
                        field,
                        field.group(),
                        self.group
                    )));
                }
                Ok((*field, coerce(*field, &value.to_json())?))
            })
            .collect()
    }

    pub fn apply_to_pre(&self, vitals: &mut PreDialysisVitals) -> Result<Vec<FieldChange>> {
        self.apply_with(vitals, pre_slot)
    }

    pub fn apply_to_reading(&self, reading: &mut IntraReading) -> Result<Vec<FieldChange>> {
        self.apply_with(reading, intra_slot)
    }

    pub fn apply_to_post(&self, vitals: &mut PostDialysisVitals) -> Result<Vec<FieldChange>> {
        self.apply_with(vitals, post_slot)
    }

    fn apply_with<T>(
        &self,
        target: &mut T,
        slot_for: for<'b> fn(&'b mut T, Field) -> Option<FieldSlot<'b>>,
    ) -> Result<Vec<FieldChange>> {
        let entries = self.validated()?;
        let mut changes = Vec::with_capacity(entries.len());
        for (field, value) in entries {
            let slot = slot_for(target, field).ok_or_else(|| {
                Error::Validation(format!("field '{}' cannot be applied here", field))
            })?;
            let previous = slot.current();
            slot.assign(&value);
            changes.push(FieldChange {
                field: field.name().to_string(),
                previous,
                new: value.to_json(),
            });
        }
        Ok(changes)
    }
}

use crate::data::Projection;
use serde::Serialize;
use serde_json::Value;

/// Constructor arguments for a [`FlagDescriptor`].
#[derive(Clone, Debug, Default)]
pub struct DescriptorInit {
    pub default_value: Value,
    pub data: Option<Projection>,
    pub is_relay: bool,
}

/// The result of resolving a flag.
///
/// A descriptor without data, or one built as a relay, carries no measured
/// value and tells the consumer to fall back to `default_value`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDescriptor {
    default_value: Value,
    data: Option<Projection>,
    is_relay: bool,
}

impl FlagDescriptor {
    pub fn new(init: DescriptorInit) -> Self {
        FlagDescriptor {
            is_relay: init.is_relay || init.data.is_none(),
            default_value: init.default_value,
            data: init.data,
        }
    }

    pub fn relay(default_value: Value) -> Self {
        FlagDescriptor::new(DescriptorInit {
            default_value,
            data: None,
            is_relay: true,
        })
    }

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    pub fn data(&self) -> Option<&Projection> {
        self.data.as_ref()
    }

    pub fn is_relay(&self) -> bool {
        self.is_relay
    }

    /// The measured enablement value, or the default for relays and records
    /// without an enablement field.
    pub fn value(&self) -> &Value {
        if self.is_relay {
            return &self.default_value;
        }
        self.data
            .as_ref()
            .and_then(Projection::enabled)
            .unwrap_or(&self.default_value)
    }

    pub fn is_enabled(&self) -> bool {
        truthy(self.value())
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

use serde_yaml::Value as Yaml;

/// Closed set of value shapes a config document may hold. Anything else
/// (null, nested maps, lists of lists) is rejected at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::List(_) => "list",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ConfigValue::List(_))
    }

    /// Natural textual form of a scalar. Lists have no implicit text form;
    /// the template contract decides how they join.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ConfigValue::String(s) => Some(s.clone()),
            ConfigValue::Bool(b) => Some(b.to_string()),
            ConfigValue::Int(n) => Some(n.to_string()),
            ConfigValue::Float(f) => Some(f.to_string()),
            ConfigValue::List(_) => None,
        }
    }

    /// Converts a YAML node, flattening tags and rejecting unsupported
    /// shapes with a human-readable reason.
    pub fn from_yaml(value: &Yaml) -> Result<ConfigValue, String> {
        match value {
            Yaml::Bool(b) => Ok(ConfigValue::Bool(*b)),
            Yaml::String(s) => Ok(ConfigValue::String(s.clone())),
            Yaml::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ConfigValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    if !f.is_finite() {
                        return Err(format!("non-finite number '{}' is not a config value", f));
                    }
                    Ok(ConfigValue::Float(f))
                } else {
                    Err(format!("unrepresentable number '{:?}'", n))
                }
            }
            Yaml::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let v = ConfigValue::from_yaml(item)?;
                    if v.is_list() {
                        return Err("nested lists are not config values".to_string());
                    }
                    out.push(v);
                }
                Ok(ConfigValue::List(out))
            }
            Yaml::Null => Err("null is not a config value".to_string()),
            Yaml::Mapping(_) => Err("mappings nest deeper than section.key".to_string()),
            Yaml::Tagged(tagged) => ConfigValue::from_yaml(&tagged.value),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigValue::String(s) => serde_json::Value::String(s.clone()),
            ConfigValue::Bool(b) => serde_json::Value::Bool(*b),
            ConfigValue::Int(n) => serde_json::Value::from(*n),
            ConfigValue::Float(f) => serde_json::Value::from(*f),
            ConfigValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ConfigValue::to_json).collect())
            }
        }
    }
}

//! Type descriptions for the generated API documentation.
//!
//! A route documents its JSON parameters with [`RouteArguments`]; each parameter carries the
//! [`ValueDescription`] of its type, obtained through [`Describe`]. The autodoc output turns
//! those descriptions into JSON-schema like `type`/`pattern`/`items`/`properties` entries.

use std::any::type_name;

use serde_json::{Map, Value, json};

/// How deep nested structures are expanded in the autodoc output.
pub const MAX_DESCRIPTION_DEPTH: usize = 2;

/// The shape of a value.
#[derive(Debug, Clone)]
pub enum ValueDescription {
    Integer,
    Float,
    Boolean,
    String,
    Enum { type_name: String, keys: Vec<String> },
    Array(Box<ValueDescription>),
    Structure(StructureDescription),
    /// A value serialized as a string whose structure is not described, optionally
    /// constrained by a regex.
    Atom { type_name: String, pattern: Option<String> },
    /// Arbitrary JSON.
    Any,
}

/// The fields of a structure.
///
/// Field types are described lazily, so a structure may contain itself.
#[derive(Debug, Clone)]
pub struct StructureDescription {
    pub type_name: String,
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub comment: String,
    pub describe: fn() -> ValueDescription,
}

/// Types that can describe their own shape.
///
/// ```
/// use micro_rest::value_description::{Describe, StructureDescription, ValueDescription};
///
/// struct Point {
///     x: i64,
///     y: i64,
/// }
///
/// impl Describe for Point {
///     fn describe() -> ValueDescription {
///         StructureDescription::new("Point").field::<i64>("x", "horizontal").field::<i64>("y", "vertical").into()
///     }
/// }
/// ```
pub trait Describe {
    fn describe() -> ValueDescription;
}

impl StructureDescription {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), fields: Vec::new() }
    }

    #[must_use]
    pub fn field<T: Describe>(mut self, name: impl Into<String>, comment: impl Into<String>) -> Self {
        self.fields.push(FieldDescription { name: name.into(), comment: comment.into(), describe: T::describe });
        self
    }
}

impl From<StructureDescription> for ValueDescription {
    fn from(structure: StructureDescription) -> Self {
        Self::Structure(structure)
    }
}

macro_rules! describe_as {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl Describe for $ty {
                fn describe() -> ValueDescription {
                    ValueDescription::$variant
                }
            }
        )+
    };
}

describe_as!(Integer: i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);
describe_as!(Float: f32, f64);
describe_as!(Boolean: bool);
describe_as!(String: String, &str);
describe_as!(Any: Value);

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> ValueDescription {
        ValueDescription::Array(Box::new(T::describe()))
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> ValueDescription {
        T::describe()
    }
}

impl ValueDescription {
    pub fn enumeration<I, S>(type_name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum { type_name: type_name.into(), keys: keys.into_iter().map(Into::into).collect() }
    }

    pub fn atom(type_name: impl Into<String>, pattern: Option<&str>) -> Self {
        Self::Atom { type_name: type_name.into(), pattern: pattern.map(ToString::to_string) }
    }

    /// Writes the `type` and related entries describing this value into `entry`.
    pub fn write_schema(&self, entry: &mut Value) {
        match self {
            Self::Integer => entry["type"] = json!("integer"),
            Self::Float => entry["type"] = json!("float"),
            Self::Boolean => entry["type"] = json!("boolean"),
            Self::String => entry["type"] = json!("string"),
            Self::Enum { keys, .. } => {
                entry["type"] = json!("string");
                entry["pattern"] = json!(keys.join("|"));
            }
            Self::Array(items) => {
                entry["type"] = json!("array");
                items.write_schema(&mut entry["items"]);
            }
            Self::Structure(_) => entry["type"] = json!("object"),
            Self::Atom { type_name, pattern } => {
                let described = format!("{} (type: {type_name})", entry["description"].as_str().unwrap_or_default());
                entry["description"] = json!(described);
                entry["type"] = json!("string");
                if let Some(pattern) = pattern {
                    entry["pattern"] = json!(pattern);
                }
            }
            Self::Any => entry["type"] = json!("object"),
        }
    }
}

impl StructureDescription {
    /// Describes every field as a property, expanding nested structures up to `depth`
    /// [`MAX_DESCRIPTION_DEPTH`].
    pub fn write_properties(&self, properties: &mut Map<String, Value>, depth: usize) {
        if depth > MAX_DESCRIPTION_DEPTH {
            return;
        }

        for field in &self.fields {
            let mut property = json!({ "description": field.comment });
            let description = (field.describe)();
            description.write_schema(&mut property);

            match &description {
                ValueDescription::Array(items) => match items.as_ref() {
                    ValueDescription::Structure(item) if item.type_name == self.type_name => {
                        property["items"]["type"] = json!(format!("object (recursive, type: {})", self.type_name));
                        property["items"]["properties"] = json!({});
                    }
                    ValueDescription::Structure(item) => {
                        let mut item_properties = Map::new();
                        item.write_properties(&mut item_properties, depth + 1);
                        property["items"]["properties"] = Value::Object(item_properties);
                    }
                    _ => {}
                },
                ValueDescription::Structure(nested) => {
                    let mut nested_properties = Map::new();
                    nested.write_properties(&mut nested_properties, depth + 1);
                    property["properties"] = Value::Object(nested_properties);
                }
                _ => {}
            }

            properties.insert(field.name.clone(), property);
        }
    }
}

/// One documented JSON parameter of a route.
#[derive(Debug, Clone)]
pub struct JsonParam {
    pub name: String,
    pub description: String,
    pub type_name: &'static str,
    pub value: ValueDescription,
}

/// The documented arguments of a route, shown in its help entry.
#[derive(Debug, Clone, Default)]
pub struct RouteArguments {
    pub json_params: Vec<JsonParam>,
    /// Query string parameters, as `name`/`description`/`type` entries.
    pub request_params: Vec<Value>,
    /// Path resources, as `name`/`description`/`type` entries.
    pub resource_params: Vec<Value>,
    pub payload: Option<String>,
    /// What a successful call answers with.
    pub result: Option<String>,
}

impl RouteArguments {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn json_param<T: Describe>(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.json_params.push(JsonParam { name: name.into(), description: description.into(), type_name: type_name::<T>(), value: T::describe() });
        self
    }

    /// The `arguments` entry of a help document.
    pub fn help(&self) -> Value {
        let params: Vec<Value> = self.json_params.iter().map(|param| json!({ "name": param.name, "description": param.description, "type": param.type_name })).collect();
        let mut help = json!({ "jsonParams": params });
        if !self.request_params.is_empty() {
            help["requestParams"] = json!(self.request_params);
        }
        if !self.resource_params.is_empty() {
            help["resourceParams"] = json!(self.resource_params);
        }
        if let Some(payload) = &self.payload {
            help["payload"] = json!({ "description": payload });
        }
        if let Some(result) = &self.result {
            help["result"] = json!(result);
        }
        help
    }

    /// The `in.properties` object of an autodoc route: structures contribute their fields,
    /// anything else one property named after the parameter.
    pub fn autodoc_properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        for param in &self.json_params {
            if let ValueDescription::Structure(structure) = &param.value {
                structure.write_properties(&mut properties, 0);
            } else {
                let mut property = json!({ "description": param.description });
                param.value.write_schema(&mut property);
                properties.insert(param.name.clone(), property);
            }
        }
        properties
    }
}

//! `application/x-www-form-urlencoded` bodies.
//!
//! A few endpoints only accept form fields. Scalars are stringified the way
//! the device expects: integers in base 10, floats with four decimals,
//! booleans as `1`/`0` and byte buffers as raw text.

use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
}

impl FormValue {
    pub fn render(&self) -> String {
        match self {
            FormValue::Int(i) => i.to_string(),
            FormValue::Float(f) => format!("{:.4}", f),
            FormValue::Bool(true) => "1".to_owned(),
            FormValue::Bool(false) => "0".to_owned(),
            FormValue::Bytes(bytes) => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            FormValue::Text(text) => text.clone(),
        }
    }
}

impl From<i64> for FormValue {
    fn from(value: i64) -> Self {
        FormValue::Int(value)
    }
}

impl From<i32> for FormValue {
    fn from(value: i32) -> Self {
        FormValue::Int(value.into())
    }
}

impl From<u32> for FormValue {
    fn from(value: u32) -> Self {
        FormValue::Int(value.into())
    }
}

impl From<f64> for FormValue {
    fn from(value: f64) -> Self {
        FormValue::Float(value)
    }
}

impl From<bool> for FormValue {
    fn from(value: bool) -> Self {
        FormValue::Bool(value)
    }
}

impl From<Vec<u8>> for FormValue {
    fn from(value: Vec<u8>) -> Self {
        FormValue::Bytes(value)
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_owned())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

/// Ordered list of form fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormBody {
    fields: Vec<(String, FormValue)>,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        value: impl Into<FormValue>,
    ) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Add the field only when a value is present.
    pub fn optional(
        self,
        name: impl Into<String>,
        value: Option<impl Into<FormValue>>,
    ) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.fields {
            serializer.append_pair(name, &value.render());
        }
        serializer.finish()
    }
}

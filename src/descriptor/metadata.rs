//! Serializable view of a `TypeDescriptor` for stub and documentation tools

use super::{FieldType, MethodKind, ReturnConvention, TypeDescriptor, Visibility};
use crate::inherit::BaseKind;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ClassMetadata<'a> {
    pub name: &'static str,
    pub doc: Option<&'static str>,
    pub base: &'static str,
    pub frozen: bool,
    pub dict: bool,
    pub weakref: bool,
    pub freelist: usize,
    /// Empty unless the class can be called
    pub constructor: Vec<&'static str>,
    pub fields: Vec<FieldMetadata>,
    pub methods: Vec<MethodMetadata>,
    pub properties: Vec<PropertyMetadata>,
    pub hooks: Vec<&'static str>,
    pub class_attrs: &'a [&'static str],
}

#[derive(Debug, Serialize)]
pub struct FieldMetadata {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub visibility: Visibility,
    pub doc: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct MethodMetadata {
    pub name: &'static str,
    pub kind: MethodKind,
    pub returns: ReturnConvention,
    pub doc: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct PropertyMetadata {
    pub name: &'static str,
    pub writable: bool,
    pub doc: Option<&'static str>,
}

impl TypeDescriptor {
    /// Everything a stub generator needs; private fields are left out
    pub fn metadata(&self) -> ClassMetadata<'_> {
        let base = match self.base {
            BaseKind::Object => "object",
            BaseKind::Builtin(builtin) => builtin.name(),
            BaseKind::Native(name) => name,
        };
        let constructor = if self.has_constructor() { self.constructor_args() } else { Vec::new() };
        let methods = self
            .methods
            .iter()
            .filter(|method| matches!(method.kind, MethodKind::Instance | MethodKind::Class | MethodKind::Static))
            .map(|method| MethodMetadata {
                name: method.name,
                kind: method.kind,
                returns: method.convention,
                doc: self.doc_of(method.name),
            })
            .collect();

        ClassMetadata {
            name: self.name,
            doc: self.doc,
            base,
            frozen: self.flags.is_frozen(),
            dict: self.flags.has_dict(),
            weakref: self.flags.has_weakref(),
            freelist: self.flags.freelist_capacity(),
            constructor,
            fields: self
                .public_fields()
                .map(|field| FieldMetadata {
                    name: field.name,
                    ty: field.ty,
                    visibility: field.visibility,
                    doc: field.doc,
                })
                .collect(),
            methods,
            properties: self
                .properties
                .iter()
                .map(|property| PropertyMetadata {
                    name: property.name,
                    writable: property.is_writable(),
                    doc: self.doc_of(property.name),
                })
                .collect(),
            hooks: self.hooks().map(|hook| hook.name).collect(),
            class_attrs: &self.class_attrs,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.metadata())
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::{ClassBuilder, FeatureFlags};
    use crate::field;
    use crate::host::gil::with_gil;
    use crate::host::Value;
    use crate::module::{register, NativeClass};
    use serde_json::json;

    #[derive(Default)]
    struct Sensor {
        reading: f64,
        unit: String,
        _raw: i64,
    }

    impl NativeClass for Sensor {
        const NAME: &'static str = "MetaSensor";
        const FLAGS: FeatureFlags = FeatureFlags::new().frozen();

        fn describe(class: &mut ClassBuilder<Self>) {
            class
                .doc("A calibrated reading.")
                .field("reading", field!(Sensor, reading))
                .field("unit", field!(Sensor, unit))
                .field("_raw", field!(Sensor, _raw))
                .member_doc("unit", "SI unit symbol.")
                .fields_constructor()
                .def("scaled", |this: &Sensor, _args: &[Value]| this.reading * 2.0)
                .member_doc("scaled", "Twice the reading.")
                .property("label", |this: &Sensor| format!("{} {}", this.reading, this.unit))
                .class_attr("precision", 3i64)
                .repr(|this: &Sensor| format!("Sensor({})", this.reading));
        }
    }

    #[test]
    fn metadata_lists_the_public_surface() {
        let json = with_gil(|| register::<Sensor>().unwrap().descriptor().unwrap().to_json().unwrap());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["name"], "MetaSensor");
        assert_eq!(value["base"], "object");
        assert_eq!(value["frozen"], true);
        assert_eq!(value["constructor"], json!(["reading", "unit"]));
        assert_eq!(
            value["fields"],
            json!([
                {"name": "reading", "type": "float", "visibility": "public", "doc": null},
                {"name": "unit", "type": "str", "visibility": "public", "doc": "SI unit symbol."},
            ])
        );
        assert_eq!(
            value["methods"],
            json!([{"name": "scaled", "kind": "instance", "returns": "always", "doc": "Twice the reading."}])
        );
        assert_eq!(value["properties"][0]["writable"], false);
        assert_eq!(value["hooks"], json!(["__repr__"]));
        assert_eq!(value["class_attrs"], json!(["precision"]));
    }
}

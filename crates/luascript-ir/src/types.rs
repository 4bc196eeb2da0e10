//! IR type descriptors
//!
//! Optional static annotations attached to nodes. Descriptors compare
//! structurally and serialize as tagged JSON objects, e.g.
//! `{"kind": "array", "element": {"kind": "primitive", "name": "number"}}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TypeDescriptor {
    /// `number`, `string`, `boolean`, `null`, `undefined`, `any`
    Primitive { name: String },
    Array { element: Box<TypeDescriptor> },
    /// Known properties of an object literal
    Object {
        properties: BTreeMap<String, TypeDescriptor>,
    },
    Function {
        params: Vec<TypeDescriptor>,
        returns: Box<TypeDescriptor>,
    },
    Union { members: Vec<TypeDescriptor> },
}

impl TypeDescriptor {
    pub fn primitive(name: &str) -> Self {
        TypeDescriptor::Primitive {
            name: name.to_string(),
        }
    }

    pub fn number() -> Self {
        Self::primitive("number")
    }

    pub fn string() -> Self {
        Self::primitive("string")
    }

    pub fn boolean() -> Self {
        Self::primitive("boolean")
    }

    pub fn any() -> Self {
        Self::primitive("any")
    }

    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array {
            element: Box::new(element),
        }
    }

    pub fn function(params: Vec<TypeDescriptor>, returns: TypeDescriptor) -> Self {
        TypeDescriptor::Function {
            params,
            returns: Box::new(returns),
        }
    }

    /// Union of `members`, flattened and deduplicated.
    ///
    /// A single distinct member collapses to that member; no members is `any`.
    pub fn union(members: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        let mut flat: Vec<TypeDescriptor> = Vec::new();
        for member in members {
            let nested = match member {
                TypeDescriptor::Union { members } => members,
                other => vec![other],
            };
            for ty in nested {
                if !flat.contains(&ty) {
                    flat.push(ty);
                }
            }
        }
        match flat.len() {
            0 => Self::any(),
            1 => flat.remove(0),
            _ => TypeDescriptor::Union { members: flat },
        }
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        matches!(self, TypeDescriptor::Primitive { name: n } if n == name)
    }

    pub fn is_string(&self) -> bool {
        self.is_primitive("string")
    }

    pub fn is_number(&self) -> bool {
        self.is_primitive("number")
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive { name } => write!(f, "{name}"),
            TypeDescriptor::Array { element } => write!(f, "{element}[]"),
            TypeDescriptor::Object { properties } => {
                write!(f, "{{")?;
                for (i, (name, ty)) in properties.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: {ty}")?;
                }
                if properties.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            TypeDescriptor::Function { params, returns } => {
                let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                write!(f, "({}) => {returns}", params.join(", "))
            }
            TypeDescriptor::Union { members } => {
                let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "{}", members.join(" | "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = TypeDescriptor::array(TypeDescriptor::number());
        let b = TypeDescriptor::array(TypeDescriptor::number());
        assert_eq!(a, b);
        assert_ne!(a, TypeDescriptor::array(TypeDescriptor::string()));
    }

    #[test]
    fn test_json_round_trip() {
        let mut properties = BTreeMap::new();
        properties.insert("x".to_string(), TypeDescriptor::number());
        properties.insert(
            "tag".to_string(),
            TypeDescriptor::union([TypeDescriptor::string(), TypeDescriptor::primitive("null")]),
        );
        let ty = TypeDescriptor::function(
            vec![TypeDescriptor::Object { properties }],
            TypeDescriptor::boolean(),
        );

        let json = serde_json::to_string(&ty).unwrap();
        let back: TypeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ty);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(TypeDescriptor::array(TypeDescriptor::string())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "array", "element": {"kind": "primitive", "name": "string"}})
        );
    }

    #[test]
    fn test_union_flattens_and_collapses() {
        let nested = TypeDescriptor::union([
            TypeDescriptor::number(),
            TypeDescriptor::union([TypeDescriptor::number(), TypeDescriptor::string()]),
        ]);
        assert_eq!(
            nested,
            TypeDescriptor::Union {
                members: vec![TypeDescriptor::number(), TypeDescriptor::string()]
            }
        );
        assert_eq!(
            TypeDescriptor::union([TypeDescriptor::number(), TypeDescriptor::number()]),
            TypeDescriptor::number()
        );
    }

    #[test]
    fn test_display() {
        let ty = TypeDescriptor::function(
            vec![TypeDescriptor::number(), TypeDescriptor::array(TypeDescriptor::string())],
            TypeDescriptor::any(),
        );
        assert_eq!(ty.to_string(), "(number, string[]) => any");
    }
}

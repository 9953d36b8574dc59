//! Named-parameter signatures for driver operations.
//!
//! A driver call is forwarded to models by parameter name, so every driver
//! declares its parameters up front. Binding turns a call's positional and
//! named arguments into one name-to-value map with defaults applied.

use crate::error::{BenchError, BenchResult};
use crate::types::{Args, Value};

/// One declared parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }
}

/// Ordered parameter list of one operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Self { params }
    }

    /// A signature of required parameters.
    pub fn from_names(names: &[&str]) -> Self {
        Self::new(names.iter().map(|name| Param::required(*name)).collect())
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Binds a call's arguments to parameter names, in declaration order.
    pub fn bind(&self, operation: &str, positional: Vec<Value>, named: Args) -> BenchResult<Args> {
        if positional.len() > self.params.len() {
            return Err(BenchError::TooManyArguments {
                operation: operation.to_string(),
                expected: self.params.len(),
                given: positional.len(),
            });
        }

        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        for (slot, value) in slots.iter_mut().zip(positional) {
            *slot = Some(value);
        }

        for (name, value) in named {
            let index = self
                .params
                .iter()
                .position(|param| param.name == name)
                .ok_or_else(|| BenchError::UnexpectedArgument {
                    operation: operation.to_string(),
                    name: name.clone(),
                })?;
            if slots[index].is_some() {
                return Err(BenchError::DuplicateArgument {
                    operation: operation.to_string(),
                    name,
                });
            }
            slots[index] = Some(value);
        }

        let mut bound = Args::new();
        for (param, slot) in self.params.iter().zip(slots) {
            let value = slot.or_else(|| param.default.clone()).ok_or_else(|| {
                BenchError::MissingArgument {
                    operation: operation.to_string(),
                    name: param.name.clone(),
                }
            })?;
            bound.insert(param.name.clone(), value);
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(pairs: &[(&str, Value)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_positional_and_named() {
        let sig = Signature::from_names(&["a", "b"]);
        let args = sig
            .bind("add", vec![json!(3)], named(&[("b", json!(4))]))
            .unwrap();
        assert_eq!(Value::Object(args), json!({"a": 3, "b": 4}));
    }

    #[test]
    fn test_declaration_order_kept() {
        let sig = Signature::from_names(&["b", "a"]);
        let args = sig
            .bind("op", vec![], named(&[("a", json!(1)), ("b", json!(2))]))
            .unwrap();
        let keys: Vec<_> = args.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_defaults_applied() {
        let sig = Signature::new(vec![Param::required("a"), Param::optional("cin", 0)]);
        let args = sig.bind("add", vec![json!(1)], Args::new()).unwrap();
        assert_eq!(args["cin"], json!(0));
    }

    #[test]
    fn test_binding_errors() {
        let sig = Signature::from_names(&["a"]);

        assert!(matches!(
            sig.bind("op", vec![json!(1), json!(2)], Args::new()),
            Err(BenchError::TooManyArguments { expected: 1, given: 2, .. })
        ));
        assert!(matches!(
            sig.bind("op", vec![], Args::new()),
            Err(BenchError::MissingArgument { .. })
        ));
        assert!(matches!(
            sig.bind("op", vec![], named(&[("z", json!(1))])),
            Err(BenchError::UnexpectedArgument { .. })
        ));
        assert!(matches!(
            sig.bind("op", vec![json!(1)], named(&[("a", json!(1))])),
            Err(BenchError::DuplicateArgument { .. })
        ));
    }
}

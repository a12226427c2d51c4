use std::{collections::BTreeMap, future::Future, rc::Rc};

use bson::Document;
use futures::{
    future::{self, LocalBoxFuture},
    FutureExt,
};
use serde::de::DeserializeOwned;

use parley_bus_common::{MethodSignature, Policy};

use crate::{Error, Request};

type MethodFunctionType = Box<dyn Fn(Request, Document) -> LocalBoxFuture<'static, crate::Result<()>>>;

pub(crate) struct Method {
    pub policy: Policy,
    pub handler: MethodFunctionType,
}

/// Bus object: a named set of methods
pub struct Object {
    name: Rc<str>,
    methods: BTreeMap<String, Method>,
}

impl Object {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_handle(&self) -> Rc<str> {
        self.name.clone()
    }

    /// Register a method.
    ///
    /// Call arguments are validated against the `policy` before the handler
    /// runs and then deserialized into `P`. A validation failure completes
    /// the call with [parley_bus_common::Status::InvalidArgument].
    ///
    /// Returning `Ok(())` completes the call with
    /// [parley_bus_common::Status::Ok] unless the handler deferred the request.
    /// Returning an error completes it with [Error::status]
    pub fn register_method<P, Fr, F>(&mut self, name: &str, policy: Policy, func: F) -> crate::Result<()>
    where
        P: DeserializeOwned + 'static,
        Fr: Future<Output = crate::Result<()>> + 'static,
        F: Fn(Request, P) -> Fr + 'static,
    {
        if self.methods.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_owned()));
        }

        let handler: MethodFunctionType = Box::new(move |request: Request, args: Document| {
            match bson::from_document::<P>(args) {
                Ok(params) => func(request, params).boxed_local(),
                Err(e) => future::ready(Err(Error::InvalidArgument(e.to_string()))).boxed_local(),
            }
        });

        self.methods
            .insert(name.to_owned(), Method { policy, handler });

        Ok(())
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub(crate) fn signatures(&self) -> Vec<MethodSignature> {
        self.methods
            .iter()
            .map(|(name, method)| MethodSignature {
                name: name.clone(),
                fields: method.policy.fields().to_vec(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use parley_bus_common::{Field, FieldType};

    use super::*;

    #[test]
    fn test_duplicate_method() {
        let mut object = Object::new("test");

        object
            .register_method("hello", Policy::default(), |_, _: Document| async { Ok(()) })
            .unwrap();

        assert!(matches!(
            object.register_method("hello", Policy::default(), |_, _: Document| async { Ok(()) }),
            Err(Error::AlreadyRegistered(name)) if name == "hello"
        ));
    }

    #[test]
    fn test_signatures() {
        let mut object = Object::new("test");
        let policy = Policy::new([Field::required("id", FieldType::Int32)]);

        object
            .register_method("watch", policy.clone(), |_, _: Document| async { Ok(()) })
            .unwrap();

        assert_eq!(
            object.signatures(),
            vec![MethodSignature {
                name: "watch".into(),
                fields: policy.fields().to_vec(),
            }]
        );
    }
}

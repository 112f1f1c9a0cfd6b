use once_cell::sync::{Lazy, OnceCell};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::instance::Instance;
use super::method::{Method, MethodSignature};

/// Shape of a runtime type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Primitive,
    Array(TypeInfo),
    Collection(TypeInfo),
    Map(TypeInfo),
}

struct TypeMeta {
    name: String,
    kind: TypeKind,
    superclass: Option<TypeInfo>,
    interfaces: Vec<TypeInfo>,
    methods: OnceCell<Vec<Method>>,
    is_final: bool,
}

/// Runtime metadata describing a component type.
///
/// The container never inspects Rust types directly; every bean, parameter and
/// proxy is described by a `TypeInfo`. Handles are cheap to clone and compare
/// nominally by name.
#[derive(Clone)]
pub struct TypeInfo(Arc<TypeMeta>);

struct Builtins {
    object: TypeInfo,
    string: TypeInfo,
}

static BUILTINS: Lazy<Builtins> = Lazy::new(|| {
    let object = TypeInfo(Arc::new(TypeMeta {
        name: "object".to_string(),
        kind: TypeKind::Class,
        superclass: None,
        interfaces: Vec::new(),
        methods: OnceCell::new(),
        is_final: false,
    }));
    let string = TypeInfo(Arc::new(TypeMeta {
        name: "string".to_string(),
        kind: TypeKind::Class,
        superclass: Some(object.clone()),
        interfaces: Vec::new(),
        methods: OnceCell::with_value(Vec::new()),
        is_final: true,
    }));
    let _ = object.0.methods.set(object_methods(&object, &string));
    Builtins { object, string }
});

static INT: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::primitive("int"));
static BOOLEAN: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::primitive("boolean"));
static FLOAT: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::primitive("float"));

fn object_methods(object: &TypeInfo, string: &TypeInfo) -> Vec<Method> {
    vec![
        Method::new("equals")
            .declared_by("object")
            .param(object.clone())
            .returns(BOOLEAN.clone())
            .body(|this, args| {
                let same = args.first().map(|other| this.ptr_eq(other)).unwrap_or(false);
                Ok(Some(Instance::boolean(same)))
            }),
        Method::new("hashCode")
            .declared_by("object")
            .returns(INT.clone())
            .body(|this, _| Ok(Some(Instance::int(this.identity() as i64)))),
        Method::new("toString")
            .declared_by("object")
            .returns(string.clone())
            .body(|this, _| {
                Ok(Some(Instance::string(format!(
                    "{}@{:x}",
                    this.type_info().name(),
                    this.identity()
                ))))
            }),
    ]
}

impl TypeInfo {
    /// Start building a class type; classes extend `object` unless told otherwise
    pub fn class(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name.into(), TypeKind::Class)
    }

    /// Start building an interface type
    pub fn interface(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name.into(), TypeKind::Interface)
    }

    fn primitive(name: &str) -> TypeInfo {
        TypeInfo(Arc::new(TypeMeta {
            name: name.to_string(),
            kind: TypeKind::Primitive,
            superclass: None,
            interfaces: Vec::new(),
            methods: OnceCell::with_value(Vec::new()),
            is_final: true,
        }))
    }

    fn container(name: String, kind: TypeKind) -> TypeInfo {
        TypeInfo(Arc::new(TypeMeta {
            name,
            kind,
            superclass: Some(TypeInfo::object()),
            interfaces: Vec::new(),
            methods: OnceCell::with_value(Vec::new()),
            is_final: true,
        }))
    }

    /// The root of every class hierarchy
    pub fn object() -> TypeInfo {
        BUILTINS.object.clone()
    }

    pub fn string() -> TypeInfo {
        BUILTINS.string.clone()
    }

    pub fn int() -> TypeInfo {
        INT.clone()
    }

    pub fn boolean() -> TypeInfo {
        BOOLEAN.clone()
    }

    pub fn float() -> TypeInfo {
        FLOAT.clone()
    }

    /// Array type with the given element type
    pub fn array_of(element: &TypeInfo) -> TypeInfo {
        Self::container(format!("{}[]", element.name()), TypeKind::Array(element.clone()))
    }

    /// Collection type with the given element type
    pub fn collection_of(element: &TypeInfo) -> TypeInfo {
        Self::container(
            format!("collection<{}>", element.name()),
            TypeKind::Collection(element.clone()),
        )
    }

    /// String-keyed map type with the given value type
    pub fn map_of(value: &TypeInfo) -> TypeInfo {
        Self::container(format!("map<{}>", value.name()), TypeKind::Map(value.clone()))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.0.kind, TypeKind::Interface)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.0.kind, TypeKind::Primitive)
    }

    pub fn is_final(&self) -> bool {
        self.0.is_final
    }

    pub fn is_object(&self) -> bool {
        self.name() == "object"
    }

    /// Whether this is an array, collection or map type
    pub fn is_container(&self) -> bool {
        matches!(
            self.0.kind,
            TypeKind::Array(_) | TypeKind::Collection(_) | TypeKind::Map(_)
        )
    }

    /// Element type of an array or collection, value type of a map
    pub fn element_type(&self) -> Option<&TypeInfo> {
        match &self.0.kind {
            TypeKind::Array(e) | TypeKind::Collection(e) | TypeKind::Map(e) => Some(e),
            _ => None,
        }
    }

    pub fn superclass(&self) -> Option<&TypeInfo> {
        self.0.superclass.as_ref()
    }

    /// Directly implemented (or, for interfaces, extended) interfaces
    pub fn interfaces(&self) -> &[TypeInfo] {
        &self.0.interfaces
    }

    /// Methods declared directly on this type
    pub fn declared_methods(&self) -> &[Method] {
        self.0.methods.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check whether a value of `other` can be used where `self` is expected
    pub fn is_assignable_from(&self, other: &TypeInfo) -> bool {
        if self == other || self.is_object() {
            return true;
        }
        match (&self.0.kind, &other.0.kind) {
            (TypeKind::Primitive, _) | (_, TypeKind::Primitive) => false,
            (TypeKind::Array(a), TypeKind::Array(b))
            | (TypeKind::Collection(a), TypeKind::Collection(b))
            | (TypeKind::Map(a), TypeKind::Map(b)) => a.is_assignable_from(b),
            (TypeKind::Collection(a), TypeKind::Array(b)) => a.is_assignable_from(b),
            _ => other.is_subtype_of(self.name()),
        }
    }

    /// Nominal subtype check against a type name
    pub fn is_subtype_of(&self, name: &str) -> bool {
        if self.name() == name || name == "object" {
            return true;
        }
        if let Some(superclass) = &self.0.superclass {
            if superclass.is_subtype_of(name) {
                return true;
            }
        }
        self.0.interfaces.iter().any(|i| i.is_subtype_of(name))
    }

    /// Every interface reachable from this type, nearest first, without duplicates
    pub fn all_interfaces(&self) -> Vec<TypeInfo> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_interfaces(&mut seen, &mut out);
        out
    }

    fn collect_interfaces(&self, seen: &mut HashSet<String>, out: &mut Vec<TypeInfo>) {
        for interface in &self.0.interfaces {
            if seen.insert(interface.name().to_string()) {
                out.push(interface.clone());
            }
            interface.collect_interfaces(seen, out);
        }
        if let Some(superclass) = &self.0.superclass {
            superclass.collect_interfaces(seen, out);
        }
    }

    /// All methods visible on this type, most specific declaration first
    pub fn all_methods(&self) -> Vec<Method> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_methods(&mut seen, &mut out);
        out
    }

    fn collect_methods(&self, seen: &mut HashSet<MethodSignature>, out: &mut Vec<Method>) {
        for method in self.declared_methods() {
            if seen.insert(method.signature()) {
                out.push(method.clone());
            }
        }
        if let Some(superclass) = &self.0.superclass {
            superclass.collect_methods(seen, out);
        }
        for interface in &self.0.interfaces {
            interface.collect_methods(seen, out);
        }
    }

    /// Find the most specific declaration of a method by signature
    pub fn find_method(&self, signature: &MethodSignature) -> Option<Method> {
        self.all_methods()
            .into_iter()
            .find(|m| &m.signature() == signature)
    }

    /// Find the method body that runs when `signature` is invoked on this type
    pub fn find_implementation(&self, signature: &MethodSignature) -> Option<Method> {
        let mut current = Some(self);
        while let Some(ty) = current {
            if let Some(m) = ty
                .declared_methods()
                .iter()
                .find(|m| m.has_body() && &m.signature() == signature)
            {
                return Some(m.clone());
            }
            current = ty.superclass();
        }
        // default bodies on interfaces
        self.all_interfaces().into_iter().find_map(|i| {
            i.declared_methods()
                .iter()
                .find(|m| m.has_body() && &m.signature() == signature)
                .cloned()
        })
    }

    /// All visible methods with the given name
    pub fn methods_named(&self, name: &str) -> Vec<Method> {
        self.all_methods()
            .into_iter()
            .filter(|m| m.name() == name)
            .collect()
    }

    pub fn ptr_eq(&self, other: &TypeInfo) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeInfo({})", self.0.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// Builder for class and interface metadata
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    superclass: Option<TypeInfo>,
    interfaces: Vec<TypeInfo>,
    methods: Vec<Method>,
    is_final: bool,
}

impl TypeBuilder {
    fn new(name: String, kind: TypeKind) -> Self {
        let superclass = match kind {
            TypeKind::Class => Some(TypeInfo::object()),
            _ => None,
        };
        Self {
            name,
            kind,
            superclass,
            interfaces: Vec::new(),
            methods: Vec::new(),
            is_final: false,
        }
    }

    /// Set the superclass (classes only)
    pub fn extends(mut self, superclass: &TypeInfo) -> Self {
        match self.kind {
            TypeKind::Interface => self.interfaces.push(superclass.clone()),
            _ => self.superclass = Some(superclass.clone()),
        }
        self
    }

    pub fn implements(mut self, interface: &TypeInfo) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// Declare a method; the declaring type is set to the type being built
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method.declared_by(self.name.clone()));
        self
    }

    pub fn final_class(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn build(self) -> TypeInfo {
        TypeInfo(Arc::new(TypeMeta {
            name: self.name,
            kind: self.kind,
            superclass: self.superclass,
            interfaces: self.interfaces,
            methods: OnceCell::with_value(self.methods),
            is_final: self.is_final,
        }))
    }
}

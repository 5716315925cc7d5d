use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::ast::FunctionDef;
use crate::host::Host;

pub(crate) type Shared<T> = Rc<RefCell<T>>;

pub(crate) fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Native function or namespace, addressed by `owner.name`.
///
/// Global entries have an empty owner, so `Math` is `("", "Math")` and
/// `Math.sin` is `("Math", "sin")`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Builtin {
    pub owner: &'static str,
    pub name: &'static str,
}

impl Builtin {
    pub const fn global(name: &'static str) -> Self {
        Self { owner: "", name }
    }

    pub const fn member(owner: &'static str, name: &'static str) -> Self {
        Self { owner, name }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Object {
    pub props: Vec<(Rc<str>, Value)>,
    /// Set for error objects so `instanceof Error` works.
    pub class: Option<&'static str>,
}

impl Object {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.props
            .iter()
            .find(|(name, _)| name.as_ref() == key)
            .map(|(_, value)| value.clone())
    }

    pub fn set(&mut self, key: Rc<str>, value: Value) {
        match self.props.iter_mut().find(|(name, _)| *name == key) {
            Some(slot) => slot.1 = value,
            None => self.props.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.props.len();
        self.props.retain(|(name, _)| name.as_ref() != key);
        before != self.props.len()
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        release(self.props.drain(..).map(|(_, value)| value));
    }
}

/// Element storage of a script array.
#[derive(Debug, Default)]
pub(crate) struct Items(pub Vec<Value>);

impl From<Vec<Value>> for Items {
    fn from(items: Vec<Value>) -> Self {
        Items(items)
    }
}

impl Deref for Items {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for Items {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl Drop for Items {
    fn drop(&mut self) {
        release(self.0.drain(..));
    }
}

/// Drops values through a worklist instead of the call stack.
///
/// An array or object whose last handle is in the list gives up its
/// children to the list before it is freed, so a chain of any length is
/// torn down one link at a time.
fn release(values: impl Iterator<Item = Value>) {
    let mut pending: Vec<Value> = values.collect();
    while let Some(value) = pending.pop() {
        match &value {
            Value::Array(cell) if Rc::strong_count(cell) == 1 => {
                if let Ok(mut items) = cell.try_borrow_mut() {
                    pending.append(&mut items.0);
                }
            }
            Value::Object(cell) if Rc::strong_count(cell) == 1 => {
                if let Ok(mut object) = cell.try_borrow_mut() {
                    pending.extend(object.props.drain(..).map(|(_, value)| value));
                }
            }
            _ => {}
        }
    }
}

pub(crate) struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Scope>,
}

/// A method looked up on a receiver, e.g. `points.push`.
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

#[derive(Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Shared<Items>),
    Object(Shared<Object>),
    Function(Rc<Closure>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Host(Host),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(text) => write!(f, "{text:?}"),
            Value::Number(_) | Value::Bool(_) | Value::Undefined | Value::Null => {
                f.write_str(&self.to_js_string())
            }
            other => write!(f, "[{}]", other.type_name()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value.into())
    }
}

impl Value {
    pub fn error(class: &'static str, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Value::Object(shared(Object {
            props: vec![
                ("name".into(), Value::from(class)),
                ("message".into(), Value::from(message)),
            ],
            class: Some(class),
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_)
        )
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) => "function",
            Value::Host(host) => host.class_name(),
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Method(_) => "function",
            Value::Builtin(builtin) if crate::stdlib::is_namespace(*builtin) => "object",
            Value::Builtin(_) => "function",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Host(_) => "object",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::Str(text) => !text.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(value) => f64::from(u8::from(*value)),
            Value::Number(value) => *value,
            Value::Str(text) => parse_number(text),
            Value::Array(_) => parse_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> String {
        self.stringify(0)
    }

    fn stringify(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Number(value) => format_number(*value),
            Value::Str(text) => text.to_string(),
            Value::Array(items) => {
                if depth > 16 {
                    return String::new();
                }
                items
                    .borrow()
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.stringify(depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(object) => {
                let object = object.borrow();
                match object.class {
                    Some(class) => {
                        let name = object
                            .get("name")
                            .map(|name| name.to_js_string())
                            .unwrap_or_else(|| class.to_string());
                        let message = object
                            .get("message")
                            .map(|message| message.to_js_string())
                            .unwrap_or_default();
                        if message.is_empty() {
                            name
                        } else {
                            format!("{name}: {message}")
                        }
                    }
                    None => "[object Object]".to_string(),
                }
            }
            Value::Function(closure) => format!(
                "function {}() {{ [code] }}",
                closure.def.name.as_deref().unwrap_or("")
            ),
            Value::Builtin(builtin) => format!("function {}() {{ [native code] }}", builtin.name),
            Value::Method(method) => format!("function {}() {{ [native code] }}", method.name),
            Value::Host(host) => format!("[object {}]", host.class_name()),
        }
    }

    /// `===` semantics: primitives by value, everything else by identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==` semantics, without the object-to-primitive corner cases.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            (Value::Array(_), Value::Str(_)) | (Value::Str(_), Value::Array(_)) => {
                self.to_js_string() == other.to_js_string()
            }
            _ => self.strict_equals(other),
        }
    }
}

/// Argument at `index`, or `undefined` when missing.
pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Numeric argument, falling back to `default` when missing or `undefined`.
pub(crate) fn number_arg(args: &[Value], index: usize, default: f64) -> f64 {
    match args.get(index) {
        None | Some(Value::Undefined) => default,
        Some(value) => value.to_number(),
    }
}

/// Formats a number the way JavaScript's `String(n)` does.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let formatted = format!("{value:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => formatted,
        };
    }
    if value.fract() == 0.0 && magnitude < 1e15 {
        return format!("{}", value as i64);
    }
    format!("{value}")
}

/// `Number(text)` conversion.
pub(crate) fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let radix = match digits.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0b" | "0B") => Some(2),
        Some("0o" | "0O") => Some(8),
        _ => None,
    };
    if let Some(radix) = radix {
        if sign < 0.0 {
            return f64::NAN;
        }
        return u64::from_str_radix(&digits[2..], radix)
            .map(|value| value as f64)
            .unwrap_or(f64::NAN);
    }
    if digits == "Infinity" {
        return sign * f64::INFINITY;
    }
    if digits
        .chars()
        .any(|ch| !(ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '+' | '-')))
    {
        return f64::NAN;
    }
    digits
        .parse::<f64>()
        .map(|value| sign * value)
        .unwrap_or(f64::NAN)
}

struct Slot {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignError {
    Undeclared,
    Constant,
}

/// Lexical environment. Function scopes receive `var` declarations.
pub(crate) struct Scope {
    vars: RefCell<HashMap<Rc<str>, Slot>>,
    parent: Option<Rc<Scope>>,
    function_scope: bool,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function_scope: true,
        })
    }

    pub fn child(parent: &Rc<Scope>, function_scope: bool) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            function_scope,
        })
    }

    pub fn declare(&self, name: Rc<str>, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name, Slot { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(slot) = scope.vars.borrow().get(name) {
                return Some(slot.value.clone());
            }
            scope = scope.parent.as_deref()?;
        }
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut scope = self;
        loop {
            if let Some(slot) = scope.vars.borrow_mut().get_mut(name) {
                if !slot.mutable {
                    return Err(AssignError::Constant);
                }
                slot.value = value;
                return Ok(());
            }
            scope = scope.parent.as_deref().ok_or(AssignError::Undeclared)?;
        }
    }

    /// Nearest enclosing scope that receives `var` declarations.
    pub fn function_scope(self: &Rc<Self>) -> Rc<Scope> {
        let mut scope = Rc::clone(self);
        while !scope.function_scope {
            match &scope.parent {
                Some(parent) => scope = Rc::clone(parent),
                None => break,
            }
        }
        scope
    }

    /// Copies every binding into a fresh sibling scope; used to give each
    /// `for (let ...)` iteration its own bindings.
    pub fn fork(&self) -> Rc<Scope> {
        let vars = self
            .vars
            .borrow()
            .iter()
            .map(|(name, slot)| {
                (
                    Rc::clone(name),
                    Slot {
                        value: slot.value.clone(),
                        mutable: slot.mutable,
                    },
                )
            })
            .collect();
        Rc::new(Self {
            vars: RefCell::new(vars),
            parent: self.parent.clone(),
            function_scope: self.function_scope,
        })
    }

    pub fn names(&self) -> Vec<Rc<str>> {
        let mut names = Vec::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            names.extend(current.vars.borrow().keys().cloned());
            scope = current.parent.as_deref();
        }
        names
    }

    /// Drops every binding, breaking reference cycles through closures.
    pub fn clear(&self) {
        let drained: Vec<Slot> = self.vars.borrow_mut().drain().map(|(_, slot)| slot).collect();
        drop(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::{AssignError, Items, Scope, Value, format_number, parse_number, shared};

    #[test]
    fn numbers_format_like_javascript() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e21), "1e+21");
    }

    #[test]
    fn string_to_number_conversion() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("0x1f"), 31.0);
        assert!(parse_number("12px").is_nan());
        assert_eq!(parse_number("-2.5e1"), -25.0);
    }

    #[test]
    fn loose_equality_coerces_numbers_and_strings() {
        assert!(Value::from(1.0).loose_equals(&Value::from("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::from(0.0)));
        assert!(!Value::from(f64::NAN).strict_equals(&Value::from(f64::NAN)));
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        let root = Scope::root();
        root.declare("size".into(), Value::from(1.0), false);
        let inner = Scope::child(&root, false);
        assert_eq!(
            inner.assign("size", Value::from(2.0)),
            Err(AssignError::Constant)
        );
        assert_eq!(
            inner.assign("missing", Value::from(2.0)),
            Err(AssignError::Undeclared)
        );
        assert_eq!(inner.lookup("size").map(|v| v.to_number()), Some(1.0));
    }

    #[test]
    fn array_and_error_strings() {
        let items = Value::Array(shared(Items(vec![Value::from(1.0), Value::Null, Value::from("x")])));
        assert_eq!(items.to_js_string(), "1,,x");
        assert_eq!(
            Value::error("TypeError", "bad").to_js_string(),
            "TypeError: bad"
        );
    }
}

//! Language built-ins: `Math`, `console`, the primitive wrappers, errors and
//! the methods of arrays, strings, numbers, plain objects and functions.

use std::cmp::Ordering;
use std::f64::consts;
use std::rc::Rc;

use crate::host;
use crate::interpreter::{Flow, Interpreter, MAX_ARRAY_LENGTH, number_index, to_int32};
use crate::value::{
    BoundMethod, Builtin, Items, Shared, Value, arg, format_number, number_arg,
};

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "slice", "splice", "concat", "join", "reverse", "indexOf",
    "lastIndexOf", "includes", "find", "findIndex", "findLast", "findLastIndex", "filter", "map",
    "forEach", "reduce", "reduceRight", "some", "every", "sort", "flat", "flatMap", "fill", "at",
    "toString",
];
const STRING_METHODS: &[&str] = &[
    "charAt", "charCodeAt", "indexOf", "lastIndexOf", "includes", "startsWith", "endsWith",
    "slice", "substring", "substr", "toUpperCase", "toLowerCase", "trim", "trimStart", "trimEnd",
    "split", "replace", "replaceAll", "repeat", "padStart", "padEnd", "concat", "at", "toString",
];
const NUMBER_METHODS: &[&str] = &["toFixed", "toString", "toPrecision", "valueOf", "toLocaleString"];
const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString"];
const FUNCTION_METHODS: &[&str] = &["call", "apply"];

const MATH_FUNCTIONS: &[&str] = &[
    "abs", "acos", "acosh", "asin", "asinh", "atan", "atanh", "atan2", "cbrt", "ceil", "cos",
    "cosh", "exp", "expm1", "floor", "fround", "hypot", "log", "log10", "log1p", "log2", "max",
    "min", "pow", "random", "round", "sign", "sin", "sinh", "sqrt", "tan", "tanh", "trunc",
];
const CONSOLE_FUNCTIONS: &[&str] = &["log", "info", "debug", "warn", "error"];
const NUMBER_STATICS: &[&str] = &[
    "isInteger", "isFinite", "isNaN", "isSafeInteger", "parseFloat", "parseInt",
];
const ARRAY_STATICS: &[&str] = &["isArray", "from", "of"];
const OBJECT_STATICS: &[&str] = &["keys", "values", "entries", "assign", "freeze", "seal", "fromEntries"];
const STRING_STATICS: &[&str] = &["fromCharCode"];

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn is_array_method(key: &str) -> bool {
    ARRAY_METHODS.contains(&key)
}

pub(crate) fn is_string_method(key: &str) -> bool {
    STRING_METHODS.contains(&key)
}

pub(crate) fn is_number_method(key: &str) -> bool {
    NUMBER_METHODS.contains(&key)
}

pub(crate) fn is_object_method(key: &str) -> bool {
    OBJECT_METHODS.contains(&key)
}

pub(crate) fn is_function_method(key: &str) -> bool {
    FUNCTION_METHODS.contains(&key)
}

pub(crate) fn bind_method(receiver: &Value, key: &str) -> Value {
    Value::Method(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        name: key.into(),
    }))
}

/// Built-ins that are plain namespaces rather than callable functions.
pub(crate) fn is_namespace(builtin: Builtin) -> bool {
    builtin.owner.is_empty() && matches!(builtin.name, "Math" | "console" | "THREE" | "MathUtils")
}

fn member_of(owner: &'static str, names: &'static [&'static str], key: &str) -> Option<Value> {
    names
        .iter()
        .find(|name| **name == key)
        .map(|name| Value::Builtin(Builtin::member(owner, name)))
}

pub(crate) fn builtin_property(interp: &mut Interpreter<'_>, builtin: Builtin, key: &str) -> Value {
    let found = if builtin.owner.is_empty() {
        match builtin.name {
            "Math" => math_constant(key).or_else(|| member_of("Math", MATH_FUNCTIONS, key)),
            "console" => member_of("console", CONSOLE_FUNCTIONS, key),
            "Number" => number_constant(key).or_else(|| member_of("Number", NUMBER_STATICS, key)),
            "Array" => member_of("Array", ARRAY_STATICS, key),
            "Object" => member_of("Object", OBJECT_STATICS, key),
            "String" => member_of("String", STRING_STATICS, key),
            "THREE" => interp.capabilities().three_member(key),
            name @ ("MathUtils" | "CSG") => host::static_property(name, key),
            _ => None,
        }
    } else {
        None
    };

    match found {
        Some(value) => value,
        None if key == "name" => Value::from(builtin.name),
        None if is_function_method(key) && !is_namespace(builtin) => {
            bind_method(&Value::Builtin(builtin), key)
        }
        None => Value::Undefined,
    }
}

fn math_constant(key: &str) -> Option<Value> {
    let value = match key {
        "PI" => consts::PI,
        "E" => consts::E,
        "LN2" => consts::LN_2,
        "LN10" => consts::LN_10,
        "LOG2E" => consts::LOG2_E,
        "LOG10E" => consts::LOG10_E,
        "SQRT2" => consts::SQRT_2,
        "SQRT1_2" => consts::FRAC_1_SQRT_2,
        _ => return None,
    };
    Some(Value::Number(value))
}

fn number_constant(key: &str) -> Option<Value> {
    let value = match key {
        "MAX_SAFE_INTEGER" => MAX_SAFE_INTEGER,
        "MIN_SAFE_INTEGER" => -MAX_SAFE_INTEGER,
        "EPSILON" => f64::EPSILON,
        "MAX_VALUE" => f64::MAX,
        "MIN_VALUE" => 5e-324,
        "POSITIVE_INFINITY" => f64::INFINITY,
        "NEGATIVE_INFINITY" => f64::NEG_INFINITY,
        "NaN" => f64::NAN,
        _ => return None,
    };
    Some(Value::Number(value))
}

/// `value instanceof <builtin>`.
pub(crate) fn instance_of(value: &Value, builtin: Builtin) -> bool {
    if !builtin.owner.is_empty() {
        return false;
    }
    let class = builtin.name;
    match value {
        Value::Host(host) => host.instance_of(class),
        Value::Array(_) => matches!(class, "Array" | "Object"),
        Value::Object(object) => match object.borrow().class {
            Some(own) => class == own || matches!(class, "Error" | "Object"),
            None => class == "Object",
        },
        Value::Function(_) | Value::Builtin(_) | Value::Method(_) => class == "Object",
        _ => false,
    }
}

// ---- global functions -----------------------------------------------------

pub(crate) fn call_builtin(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    _this: Value,
    args: Vec<Value>,
) -> Flow<Value> {
    match builtin.owner {
        "" => call_global(interp, builtin, args),
        "Math" => math_function(interp, builtin.name, &args),
        "console" => {
            let text = args
                .iter()
                .map(Value::to_js_string)
                .collect::<Vec<_>>()
                .join(" ");
            match builtin.name {
                "warn" | "error" => tracing::warn!(target: "cad_script::console", "{text}"),
                _ => tracing::debug!(target: "cad_script::console", "{text}"),
            }
            Ok(Value::Undefined)
        }
        "Number" => number_static(interp, builtin.name, &args),
        "Array" => array_static(interp, builtin.name, args),
        "Object" => object_static(interp, builtin.name, &args),
        "String" => {
            let text: String = args
                .iter()
                .filter_map(|code| char::from_u32(to_int32(code.to_number()) as u32 & 0xffff))
                .collect();
            Ok(Value::from(text))
        }
        _ => host::call_builtin(interp, builtin, args),
    }
}

fn call_global(interp: &mut Interpreter<'_>, builtin: Builtin, args: Vec<Value>) -> Flow<Value> {
    match builtin.name {
        "Array" => match args.as_slice() {
            [Value::Number(length)] => {
                let Some(length) = number_index(*length).filter(|n| *n <= MAX_ARRAY_LENGTH) else {
                    return Err(interp.range_error("Invalid array length"));
                };
                Ok(interp.new_array(vec![Value::Undefined; length]))
            }
            _ => Ok(interp.new_array(args)),
        },
        "Object" => Ok(match args.into_iter().next() {
            Some(value @ (Value::Object(_) | Value::Array(_) | Value::Host(_))) => value,
            _ => interp.new_object(Vec::new()),
        }),
        "Number" => Ok(Value::Number(number_arg(&args, 0, 0.0))),
        "String" => Ok(Value::from(
            args.first().map(Value::to_js_string).unwrap_or_default(),
        )),
        "Boolean" => Ok(Value::Bool(arg(&args, 0).truthy())),
        "parseFloat" => Ok(Value::Number(parse_float(&arg(&args, 0).to_js_string()))),
        "parseInt" => Ok(Value::Number(parse_int(
            &arg(&args, 0).to_js_string(),
            number_arg(&args, 1, 0.0),
        ))),
        "isNaN" => Ok(Value::Bool(arg(&args, 0).to_number().is_nan())),
        "isFinite" => Ok(Value::Bool(arg(&args, 0).to_number().is_finite())),
        class @ ("Error" | "TypeError" | "RangeError") => {
            let message = match args.first() {
                None | Some(Value::Undefined) => String::new(),
                Some(message) => message.to_js_string(),
            };
            Ok(interp.new_error(class, message))
        }
        kind @ ("Float32Array" | "Float64Array" | "Int32Array" | "Uint8Array" | "Uint16Array"
        | "Uint32Array") => typed_array(interp, kind, &arg(&args, 0)),
        name if is_namespace(builtin) => Err(interp.type_error(format!("{name} is not a function"))),
        _ => host::call_builtin(interp, builtin, args),
    }
}

/// Typed arrays are plain arrays whose elements are coerced once, on
/// construction.
fn typed_array(interp: &mut Interpreter<'_>, kind: &str, source: &Value) -> Flow<Value> {
    let values = match source {
        Value::Undefined => Vec::new(),
        Value::Number(length) => {
            let Some(length) = number_index(*length).filter(|n| *n <= MAX_ARRAY_LENGTH) else {
                return Err(interp.range_error("Invalid typed array length"));
            };
            vec![0.0; length]
        }
        other => interp
            .iterate(other)?
            .iter()
            .map(Value::to_number)
            .collect(),
    };
    let coerce = |value: f64| -> f64 {
        match kind {
            "Float32Array" => f64::from(value as f32),
            "Int32Array" => f64::from(to_int32(value)),
            "Uint8Array" => f64::from(to_int32(value) as u32 & 0xff),
            "Uint16Array" => f64::from(to_int32(value) as u32 & 0xffff),
            "Uint32Array" => f64::from(to_int32(value) as u32),
            _ => value,
        }
    };
    let items = values.into_iter().map(|v| Value::Number(coerce(v))).collect();
    Ok(interp.new_array(items))
}

/// Longest numeric prefix, as `parseFloat` reads it.
fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if text.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if text.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }

    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if end == digits_start || &text[digits_start..end] == "." {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent_end = end + 1;
        if matches!(bytes.get(exponent_end), Some(b'+' | b'-')) {
            exponent_end += 1;
        }
        let exponent_digits = exponent_end;
        while bytes.get(exponent_end).is_some_and(u8::is_ascii_digit) {
            exponent_end += 1;
        }
        if exponent_end > exponent_digits {
            end = exponent_end;
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

fn parse_int(text: &str, radix: f64) -> f64 {
    let mut text = text.trim();
    let mut sign = 1.0;
    if let Some(rest) = text.strip_prefix('-') {
        sign = -1.0;
        text = rest;
    } else if let Some(rest) = text.strip_prefix('+') {
        text = rest;
    }

    let mut radix = to_int32(radix) as u32;
    if radix == 0 || radix == 16 {
        if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            text = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let mut value = 0.0;
    let mut any = false;
    for ch in text.chars() {
        let Some(digit) = ch.to_digit(radix) else {
            break;
        };
        value = value * f64::from(radix) + f64::from(digit);
        any = true;
    }
    if any { sign * value } else { f64::NAN }
}

fn math_function(interp: &mut Interpreter<'_>, name: &str, args: &[Value]) -> Flow<Value> {
    let x = number_arg(args, 0, f64::NAN);
    let y = number_arg(args, 1, f64::NAN);
    let result = match name {
        "abs" => x.abs(),
        "acos" => x.acos(),
        "acosh" => x.acosh(),
        "asin" => x.asin(),
        "asinh" => x.asinh(),
        "atan" => x.atan(),
        "atanh" => x.atanh(),
        "atan2" => x.atan2(y),
        "cbrt" => x.cbrt(),
        "ceil" => x.ceil(),
        "cos" => x.cos(),
        "cosh" => x.cosh(),
        "exp" => x.exp(),
        "expm1" => x.exp_m1(),
        "floor" => x.floor(),
        "fround" => f64::from(x as f32),
        "hypot" => args.iter().map(|v| v.to_number().powi(2)).sum::<f64>().sqrt(),
        "log" => x.ln(),
        "log10" => x.log10(),
        "log1p" => x.ln_1p(),
        "log2" => x.log2(),
        "max" => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.max(v) }
        }),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.min(v) }
        }),
        "pow" => x.powf(y),
        "random" => interp.random(),
        "round" => (x + 0.5).floor(),
        "sign" => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        "sin" => x.sin(),
        "sinh" => x.sinh(),
        "sqrt" => x.sqrt(),
        "tan" => x.tan(),
        "tanh" => x.tanh(),
        "trunc" => x.trunc(),
        _ => return Err(interp.type_error(format!("Math.{name} is not a function"))),
    };
    Ok(Value::Number(result))
}

fn number_static(interp: &mut Interpreter<'_>, name: &str, args: &[Value]) -> Flow<Value> {
    let value = arg(args, 0);
    let number = match value {
        Value::Number(n) => Some(n),
        _ => None,
    };
    let result = match name {
        "isInteger" => number.is_some_and(|n| n.is_finite() && n.fract() == 0.0),
        "isSafeInteger" => {
            number.is_some_and(|n| n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER)
        }
        "isFinite" => number.is_some_and(f64::is_finite),
        "isNaN" => number.is_some_and(f64::is_nan),
        "parseFloat" => return Ok(Value::Number(parse_float(&value.to_js_string()))),
        "parseInt" => {
            return Ok(Value::Number(parse_int(
                &value.to_js_string(),
                number_arg(args, 1, 0.0),
            )));
        }
        _ => return Err(interp.type_error(format!("Number.{name} is not a function"))),
    };
    Ok(Value::Bool(result))
}

fn array_static(interp: &mut Interpreter<'_>, name: &str, args: Vec<Value>) -> Flow<Value> {
    match name {
        "isArray" => Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_))))),
        "of" => Ok(interp.new_array(args)),
        "from" => {
            let source = arg(&args, 0);
            let items = match &source {
                Value::Array(_) | Value::Str(_) => interp.iterate(&source)?,
                Value::Object(_) => {
                    let length = interp.get_property(&source, "length")?.to_number();
                    let Some(length) = number_index(length).filter(|n| *n <= MAX_ARRAY_LENGTH)
                    else {
                        return Err(interp.range_error("Invalid array length"));
                    };
                    let mut items = Vec::with_capacity(length.min(1 << 16));
                    for index in 0..length {
                        interp.tick()?;
                        items.push(interp.get_property(&source, &index.to_string())?);
                    }
                    items
                }
                Value::Undefined | Value::Null => {
                    return Err(interp.type_error(format!(
                        "{} is not iterable",
                        source.type_name()
                    )));
                }
                _ => Vec::new(),
            };
            let mapper = arg(&args, 1);
            let items = if mapper.is_callable() {
                let mut mapped = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    mapped.push(interp.call_function(
                        &mapper,
                        Value::Undefined,
                        vec![item, Value::Number(index as f64)],
                    )?);
                }
                mapped
            } else {
                items
            };
            Ok(interp.new_array(items))
        }
        _ => Err(interp.type_error(format!("Array.{name} is not a function"))),
    }
}

fn object_static(interp: &mut Interpreter<'_>, name: &str, args: &[Value]) -> Flow<Value> {
    let target = arg(args, 0);
    match name {
        "keys" | "values" | "entries" => {
            if target.is_nullish() {
                return Err(interp.type_error(format!(
                    "Cannot convert {} to object",
                    target.type_name()
                )));
            }
            let keys = interp.own_keys(&target);
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let item = match name {
                    "keys" => key,
                    "values" => interp.get_property(&target, &key.to_js_string())?,
                    _ => {
                        let value = interp.get_property(&target, &key.to_js_string())?;
                        interp.new_array(vec![key, value])
                    }
                };
                out.push(item);
            }
            Ok(interp.new_array(out))
        }
        "assign" => {
            for source in args.iter().skip(1) {
                for key in interp.own_keys(source) {
                    let key = key.to_js_string();
                    let value = interp.get_property(source, &key)?;
                    interp.set_property(&target, &key, value)?;
                }
            }
            Ok(target)
        }
        "freeze" | "seal" => Ok(target),
        "fromEntries" => {
            let object = interp.new_object(Vec::new());
            for entry in interp.iterate(&target)? {
                let key = interp.get_index(&entry, &Value::Number(0.0))?.to_js_string();
                let value = interp.get_index(&entry, &Value::Number(1.0))?;
                interp.set_property(&object, &key, value)?;
            }
            Ok(object)
        }
        _ => Err(interp.type_error(format!("Object.{name} is not a function"))),
    }
}

// ---- arrays ---------------------------------------------------------------

/// Resolves a possibly negative position against `len`, as `slice` does.
fn relative_index(value: f64, len: usize) -> usize {
    if value.is_nan() {
        return 0;
    }
    let value = value.trunc();
    if value < 0.0 {
        (len as f64 + value).max(0.0) as usize
    } else {
        value.min(len as f64) as usize
    }
}

fn check_length(interp: &Interpreter<'_>, length: usize) -> Flow<()> {
    if length > MAX_ARRAY_LENGTH {
        return Err(interp.range_error("Invalid array length"));
    }
    Ok(())
}

fn element(items: &Shared<Items>, index: usize) -> Value {
    items.borrow().get(index).cloned().unwrap_or(Value::Undefined)
}

fn default_compare(a: &Value, b: &Value) -> Ordering {
    a.to_js_string().cmp(&b.to_js_string())
}

fn sort_compare(interp: &mut Interpreter<'_>, comparator: &Value, a: &Value, b: &Value) -> Flow<Ordering> {
    if !comparator.is_callable() {
        return Ok(default_compare(a, b));
    }
    let result = interp
        .call_function(comparator, Value::Undefined, vec![a.clone(), b.clone()])?
        .to_number();
    Ok(if result < 0.0 {
        Ordering::Less
    } else if result > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

/// Bottom-up stable merge sort driven by a script comparator that may throw.
fn merge_sort(interp: &mut Interpreter<'_>, mut items: Vec<Value>, comparator: &Value) -> Flow<Vec<Value>> {
    let len = items.len();
    let mut buffer = Vec::with_capacity(len);
    let mut width = 1;
    while width < len {
        buffer.clear();
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut left, mut right) = (start, mid);
            while left < mid && right < end {
                if sort_compare(interp, comparator, &items[right], &items[left])? == Ordering::Less {
                    buffer.push(items[right].clone());
                    right += 1;
                } else {
                    buffer.push(items[left].clone());
                    left += 1;
                }
            }
            buffer.extend_from_slice(&items[left..mid]);
            buffer.extend_from_slice(&items[right..end]);
            start = end;
        }
        std::mem::swap(&mut items, &mut buffer);
        width *= 2;
    }
    Ok(items)
}

fn flatten_into(interp: &Interpreter<'_>, out: &mut Vec<Value>, items: &[Value], depth: f64) -> Flow<()> {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => {
                let inner = inner.borrow().clone();
                flatten_into(interp, out, &inner, depth - 1.0)?;
            }
            other => out.push(other.clone()),
        }
        check_length(interp, out.len())?;
    }
    Ok(())
}

pub(crate) fn array_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    items: &Shared<Items>,
    name: &str,
    args: Vec<Value>,
) -> Flow<Value> {
    let len = items.borrow().len();
    let callback = arg(&args, 0);
    let call = |interp: &mut Interpreter<'_>, item: Value, index: usize| -> Flow<Value> {
        interp.call_function(
            &callback,
            Value::Undefined,
            vec![item, Value::Number(index as f64), receiver.clone()],
        )
    };
    let needs_callback = matches!(
        name,
        "find" | "findIndex" | "findLast" | "findLastIndex" | "filter" | "map" | "forEach"
            | "reduce" | "reduceRight" | "some" | "every" | "flatMap"
    );
    if needs_callback && !callback.is_callable() {
        return Err(interp.type_error(format!(
            "{} is not a function",
            callback.to_js_string()
        )));
    }

    match name {
        "push" => {
            check_length(interp, len + args.len())?;
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
        "shift" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Ok(Value::Undefined)
            } else {
                Ok(items.remove(0))
            }
        }
        "unshift" => {
            check_length(interp, len + args.len())?;
            let mut items = items.borrow_mut();
            items.splice(0..0, args);
            Ok(Value::Number(items.len() as f64))
        }
        "slice" => {
            let start = relative_index(number_arg(&args, 0, 0.0), len);
            let end = relative_index(number_arg(&args, 1, len as f64), len);
            let slice = items
                .borrow()
                .get(start..end.max(start))
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            Ok(interp.new_array(slice))
        }
        "splice" => {
            let start = relative_index(number_arg(&args, 0, 0.0), len);
            let delete = match args.get(1) {
                None => len - start,
                Some(count) => {
                    let count = count.to_number();
                    if count.is_nan() { 0 } else { count.trunc().clamp(0.0, (len - start) as f64) as usize }
                }
            };
            let inserts: Vec<Value> = args.into_iter().skip(2).collect();
            check_length(interp, len - delete + inserts.len())?;
            let removed: Vec<Value> = items
                .borrow_mut()
                .splice(start..start + delete, inserts)
                .collect();
            Ok(interp.new_array(removed))
        }
        "concat" => {
            let mut out = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other),
                }
                check_length(interp, out.len())?;
            }
            Ok(interp.new_array(out))
        }
        "join" | "toString" => {
            let separator = match args.first() {
                Some(sep) if name == "join" && !matches!(sep, Value::Undefined) => sep.to_js_string(),
                _ => ",".to_string(),
            };
            let snapshot = items.borrow().clone();
            let mut out = String::new();
            for (index, item) in snapshot.iter().enumerate() {
                if index > 0 {
                    out.push_str(&separator);
                }
                if !item.is_nullish() {
                    out.push_str(&item.to_js_string());
                }
                interp.check_string_length(out.len())?;
            }
            Ok(Value::from(out))
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(receiver.clone())
        }
        "indexOf" | "lastIndexOf" | "includes" => {
            let needle = arg(&args, 0);
            let snapshot = items.borrow();
            let found = if name == "lastIndexOf" {
                snapshot.iter().rposition(|item| item.strict_equals(&needle))
            } else if name == "includes" {
                let nan = matches!(needle, Value::Number(n) if n.is_nan());
                return Ok(Value::Bool(snapshot.iter().any(|item| {
                    item.strict_equals(&needle) || (nan && matches!(item, Value::Number(n) if n.is_nan()))
                })));
            } else {
                let from = relative_index(number_arg(&args, 1, 0.0), len);
                snapshot
                    .iter()
                    .skip(from)
                    .position(|item| item.strict_equals(&needle))
                    .map(|position| position + from)
            };
            Ok(Value::Number(found.map_or(-1.0, |index| index as f64)))
        }
        "find" | "findIndex" => {
            for index in 0..len {
                let item = element(items, index);
                if call(interp, item.clone(), index)?.truthy() {
                    return Ok(if name == "find" { item } else { Value::Number(index as f64) });
                }
            }
            Ok(if name == "find" { Value::Undefined } else { Value::Number(-1.0) })
        }
        "findLast" | "findLastIndex" => {
            for index in (0..len).rev() {
                let item = element(items, index);
                if call(interp, item.clone(), index)?.truthy() {
                    return Ok(if name == "findLast" { item } else { Value::Number(index as f64) });
                }
            }
            Ok(if name == "findLast" { Value::Undefined } else { Value::Number(-1.0) })
        }
        "filter" => {
            let mut out = Vec::new();
            for index in 0..len {
                let item = element(items, index);
                if call(interp, item.clone(), index)?.truthy() {
                    out.push(item);
                }
            }
            Ok(interp.new_array(out))
        }
        "map" => {
            let mut out = Vec::with_capacity(len);
            for index in 0..len {
                let item = element(items, index);
                out.push(call(interp, item, index)?);
            }
            Ok(interp.new_array(out))
        }
        "flatMap" => {
            let mut out = Vec::with_capacity(len);
            for index in 0..len {
                let item = element(items, index);
                match call(interp, item, index)? {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other),
                }
                check_length(interp, out.len())?;
            }
            Ok(interp.new_array(out))
        }
        "forEach" => {
            for index in 0..len {
                let item = element(items, index);
                call(interp, item, index)?;
            }
            Ok(Value::Undefined)
        }
        "some" | "every" => {
            let want = name == "some";
            for index in 0..len {
                let item = element(items, index);
                if call(interp, item, index)?.truthy() == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        "reduce" | "reduceRight" => {
            let order: Vec<usize> = if name == "reduce" {
                (0..len).collect()
            } else {
                (0..len).rev().collect()
            };
            let mut order = order.into_iter();
            let mut accumulator = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match order.next() {
                    Some(first) => element(items, first),
                    None => {
                        return Err(interp.type_error("Reduce of empty array with no initial value"));
                    }
                },
            };
            for index in order {
                let item = element(items, index);
                accumulator = interp.call_function(
                    &callback,
                    Value::Undefined,
                    vec![accumulator, item, Value::Number(index as f64), receiver.clone()],
                )?;
            }
            Ok(accumulator)
        }
        "sort" => {
            let comparator = arg(&args, 0);
            if !comparator.is_nullish() && !comparator.is_callable() {
                return Err(interp.type_error(
                    "The comparison function must be either a function or undefined",
                ));
            }
            let snapshot = items.borrow().clone();
            let (defined, undefined): (Vec<Value>, Vec<Value>) = snapshot
                .into_iter()
                .partition(|item| !matches!(item, Value::Undefined));
            let mut sorted = merge_sort(interp, defined, &comparator)?;
            sorted.extend(undefined);
            *items.borrow_mut() = Items(sorted);
            Ok(receiver.clone())
        }
        "flat" => {
            let depth = number_arg(&args, 0, 1.0);
            let snapshot = items.borrow().clone();
            let mut out = Vec::with_capacity(len);
            flatten_into(interp, &mut out, &snapshot, depth)?;
            Ok(interp.new_array(out))
        }
        "fill" => {
            let value = arg(&args, 0);
            let start = relative_index(number_arg(&args, 1, 0.0), len);
            let end = relative_index(number_arg(&args, 2, len as f64), len);
            let mut items_mut = items.borrow_mut();
            for slot in items_mut.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            Ok(receiver.clone())
        }
        "at" => {
            let index = number_arg(&args, 0, 0.0).trunc();
            let index = if index < 0.0 { len as f64 + index } else { index };
            Ok(number_index(index)
                .map(|index| element(items, index))
                .unwrap_or(Value::Undefined))
        }
        _ => Err(interp.type_error(format!("Array.{name} is not a function"))),
    }
}

// ---- strings --------------------------------------------------------------

fn char_slice(chars: &[char], start: usize, end: usize) -> Value {
    let end = end.min(chars.len());
    let start = start.min(end);
    Value::from(chars[start..end].iter().collect::<String>())
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    (from..=haystack.len().saturating_sub(needle.len()))
        .find(|&start| haystack.get(start..start + needle.len()) == Some(needle))
}

fn rfind_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&start| &haystack[start..start + needle.len()] == needle)
}

fn pad(interp: &Interpreter<'_>, text: &[char], args: &[Value], at_start: bool) -> Flow<Value> {
    let target = number_arg(args, 0, 0.0);
    let filler: Vec<char> = match args.get(1) {
        None | Some(Value::Undefined) => vec![' '],
        Some(value) => value.to_js_string().chars().collect(),
    };
    let original: String = text.iter().collect();
    if target.is_nan() || target <= text.len() as f64 || filler.is_empty() {
        return Ok(Value::from(original));
    }
    let target = target as usize;
    interp.check_string_length(target)?;
    let padding: String = filler.iter().cycle().take(target - text.len()).collect();
    Ok(Value::from(if at_start {
        padding + &original
    } else {
        original + &padding
    }))
}

pub(crate) fn string_method(
    interp: &mut Interpreter<'_>,
    text: &Rc<str>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let string_arg = |index: usize| -> String {
        match args.get(index) {
            None => "undefined".to_string(),
            Some(value) => value.to_js_string(),
        }
    };

    match name {
        "charAt" => {
            let index = number_arg(args, 0, 0.0);
            Ok(number_index(index.trunc())
                .and_then(|i| chars.get(i))
                .map(|ch| Value::from(ch.to_string()))
                .unwrap_or_else(|| Value::from("")))
        }
        "charCodeAt" => {
            let index = number_arg(args, 0, 0.0);
            Ok(Value::Number(
                number_index(index.trunc())
                    .and_then(|i| chars.get(i))
                    .map_or(f64::NAN, |ch| f64::from(u32::from(*ch))),
            ))
        }
        "at" => {
            let index = number_arg(args, 0, 0.0).trunc();
            let index = if index < 0.0 { len as f64 + index } else { index };
            Ok(number_index(index)
                .and_then(|i| chars.get(i))
                .map(|ch| Value::from(ch.to_string()))
                .unwrap_or(Value::Undefined))
        }
        "indexOf" | "includes" => {
            let needle: Vec<char> = string_arg(0).chars().collect();
            let from = relative_index(number_arg(args, 1, 0.0).max(0.0), len);
            let found = find_chars(&chars, &needle, from);
            Ok(if name == "includes" {
                Value::Bool(found.is_some())
            } else {
                Value::Number(found.map_or(-1.0, |i| i as f64))
            })
        }
        "lastIndexOf" => {
            let needle: Vec<char> = string_arg(0).chars().collect();
            Ok(Value::Number(
                rfind_chars(&chars, &needle).map_or(-1.0, |i| i as f64),
            ))
        }
        "startsWith" => Ok(Value::Bool(text.starts_with(string_arg(0).as_str()))),
        "endsWith" => Ok(Value::Bool(text.ends_with(string_arg(0).as_str()))),
        "slice" => {
            let start = relative_index(number_arg(args, 0, 0.0), len);
            let end = relative_index(number_arg(args, 1, len as f64), len);
            Ok(char_slice(&chars, start, end))
        }
        "substring" => {
            let clamp = |value: f64| if value.is_nan() { 0 } else { value.clamp(0.0, len as f64) as usize };
            let a = clamp(number_arg(args, 0, 0.0));
            let b = clamp(number_arg(args, 1, len as f64));
            Ok(char_slice(&chars, a.min(b), a.max(b)))
        }
        "substr" => {
            let start = relative_index(number_arg(args, 0, 0.0), len);
            let count = number_arg(args, 1, (len - start) as f64);
            let count = if count.is_nan() { 0.0 } else { count.max(0.0) };
            let end = start.saturating_add(count.min(len as f64) as usize);
            Ok(char_slice(&chars, start, end))
        }
        "toUpperCase" => Ok(Value::from(text.to_uppercase())),
        "toLowerCase" => Ok(Value::from(text.to_lowercase())),
        "trim" => Ok(Value::from(text.trim())),
        "trimStart" => Ok(Value::from(text.trim_start())),
        "trimEnd" => Ok(Value::from(text.trim_end())),
        "toString" => Ok(Value::Str(Rc::clone(text))),
        "split" => {
            let limit = match args.get(1) {
                None | Some(Value::Undefined) => usize::MAX,
                Some(limit) => limit.to_number().max(0.0) as usize,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::Str(Rc::clone(text))],
                Some(separator) => {
                    let separator = separator.to_js_string();
                    if separator.is_empty() {
                        chars.iter().map(|ch| Value::from(ch.to_string())).collect()
                    } else {
                        text.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Ok(interp.new_array(parts.into_iter().take(limit).collect()))
        }
        "replace" | "replaceAll" => {
            let pattern = string_arg(0);
            let replacement = arg(args, 1);
            let mut out = String::with_capacity(text.len());
            let mut rest: &str = text;
            while let Some(position) = rest.find(pattern.as_str()) {
                out.push_str(&rest[..position]);
                let matched = Value::from(pattern.as_str());
                let substitute = if replacement.is_callable() {
                    interp.call_function(&replacement, Value::Undefined, vec![matched])?
                } else {
                    replacement.clone()
                };
                out.push_str(&substitute.to_js_string());
                interp.check_string_length(out.len())?;
                rest = &rest[position + pattern.len()..];
                if name == "replace" {
                    break;
                }
                if pattern.is_empty() {
                    let mut remaining = rest.chars();
                    match remaining.next() {
                        Some(ch) => out.push(ch),
                        None => break,
                    }
                    rest = remaining.as_str();
                }
            }
            out.push_str(rest);
            Ok(Value::from(out))
        }
        "repeat" => {
            let count = number_arg(args, 0, 0.0);
            if count < 0.0 || !count.is_finite() {
                return Err(interp.range_error(format!("Invalid count value: {}", format_number(count))));
            }
            let count = count as usize;
            interp.check_string_length(text.len().saturating_mul(count))?;
            Ok(Value::from(text.repeat(count)))
        }
        "padStart" => pad(interp, &chars, args, true),
        "padEnd" => pad(interp, &chars, args, false),
        "concat" => {
            let mut out = text.to_string();
            for value in args {
                out.push_str(&value.to_js_string());
                interp.check_string_length(out.len())?;
            }
            Ok(Value::from(out))
        }
        _ => Err(interp.type_error(format!("String.{name} is not a function"))),
    }
}

// ---- numbers --------------------------------------------------------------

fn to_precision(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -6 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{}", exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        format!("{value:.decimals$}")
    }
}

fn to_radix(value: f64, radix: u32) -> String {
    let negative = value < 0.0;
    let value = value.abs();
    let mut integer = value.trunc();
    let mut digits = Vec::new();
    loop {
        let digit = (integer % f64::from(radix)) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        integer = (integer / f64::from(radix)).trunc();
        if integer < 1.0 {
            break;
        }
    }
    let mut out: String = digits.iter().rev().collect();
    let mut fraction = value.fract();
    if fraction > 0.0 {
        out.push('.');
        for _ in 0..20 {
            fraction *= f64::from(radix);
            let digit = fraction.trunc() as u32;
            out.push(std::char::from_digit(digit, radix).unwrap_or('0'));
            fraction = fraction.fract();
            if fraction == 0.0 {
                break;
            }
        }
    }
    if negative {
        out.insert(0, '-');
    }
    out
}

pub(crate) fn number_method(
    interp: &mut Interpreter<'_>,
    value: f64,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match name {
        "toFixed" => {
            let digits = number_arg(args, 0, 0.0).trunc();
            if !(0.0..=100.0).contains(&digits) {
                return Err(interp.range_error("toFixed() digits argument must be between 0 and 100"));
            }
            if !value.is_finite() || value.abs() >= 1e21 {
                return Ok(Value::from(format_number(value)));
            }
            Ok(Value::from(format!("{:.*}", digits as usize, value)))
        }
        "toPrecision" => match args.first() {
            None | Some(Value::Undefined) => Ok(Value::from(format_number(value))),
            Some(precision) => {
                let precision = precision.to_number().trunc();
                if !(1.0..=100.0).contains(&precision) {
                    return Err(interp.range_error(
                        "toPrecision() argument must be between 1 and 100",
                    ));
                }
                if !value.is_finite() {
                    return Ok(Value::from(format_number(value)));
                }
                Ok(Value::from(to_precision(value, precision as usize)))
            }
        },
        "toString" | "toLocaleString" => {
            let radix = number_arg(args, 0, 10.0).trunc();
            if !(2.0..=36.0).contains(&radix) {
                return Err(interp.range_error("toString() radix must be between 2 and 36"));
            }
            if radix == 10.0 || !value.is_finite() {
                return Ok(Value::from(format_number(value)));
            }
            Ok(Value::from(to_radix(value, radix as u32)))
        }
        "valueOf" => Ok(Value::Number(value)),
        _ => Err(interp.type_error(format!("Number.{name} is not a function"))),
    }
}

// ---- objects and functions ------------------------------------------------

pub(crate) fn object_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match (name, receiver) {
        ("hasOwnProperty", Value::Object(object)) => {
            let key = arg(args, 0).to_js_string();
            Ok(Value::Bool(object.borrow().get(&key).is_some()))
        }
        ("toString", _) => Ok(Value::from(receiver.to_js_string())),
        _ => Err(interp.type_error(format!("{}.{name} is not a function", receiver.type_name()))),
    }
}

pub(crate) fn function_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> Flow<Value> {
    let mut args = args.into_iter();
    let this = args.next().unwrap_or(Value::Undefined);
    match name {
        "call" => interp.call_function(receiver, this, args.collect()),
        "apply" => {
            let list = match args.next() {
                None | Some(Value::Undefined | Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.borrow().clone(),
                Some(other) => {
                    return Err(interp.type_error(format!(
                        "CreateListFromArrayLike called on non-object ({})",
                        other.type_name()
                    )));
                }
            };
            interp.call_function(receiver, this, list)
        }
        _ => Err(interp.type_error(format!("function.{name} is not a function"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_float, parse_int, relative_index, to_precision, to_radix};

    #[test]
    fn parse_float_reads_numeric_prefix() {
        assert_eq!(parse_float("  3.5mm"), 3.5);
        assert_eq!(parse_float("-2e3x"), -2000.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert_eq!(parse_float("Infinity"), f64::INFINITY);
        assert!(parse_float("mm").is_nan());
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn parse_int_honours_radix_and_hex_prefix() {
        assert_eq!(parse_int("42px", 0.0), 42.0);
        assert_eq!(parse_int("-0x1F", 0.0), -31.0);
        assert_eq!(parse_int("101", 2.0), 5.0);
        assert!(parse_int("z", 10.0).is_nan());
        assert!(parse_int("1", 40.0).is_nan());
    }

    #[test]
    fn relative_positions_clamp() {
        assert_eq!(relative_index(-1.0, 5), 4);
        assert_eq!(relative_index(-10.0, 5), 0);
        assert_eq!(relative_index(9.0, 5), 5);
        assert_eq!(relative_index(f64::NAN, 5), 0);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(to_precision(123.456, 4), "123.5");
        assert_eq!(to_precision(0.000_001_5, 2), "0.0000015");
        assert_eq!(to_precision(123_456.0, 2), "1.2e+5");
        assert_eq!(to_radix(255.0, 16), "ff");
        assert_eq!(to_radix(-5.5, 2), "-101.1");
    }
}

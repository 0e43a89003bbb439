use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDecl;
use crate::interpreter::{EnvRef, Interpreter};

/// Type tag of a runtime value. `type(v)` reifies these as values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Nil,
    Bool,
    Number,
    Str,
    List,
    Map,
    Type,
    Function,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Nil => "nil",
            TypeTag::Bool => "bool",
            TypeTag::Number => "number",
            TypeTag::Str => "string",
            TypeTag::List => "list",
            TypeTag::Map => "map",
            TypeTag::Type => "type",
            TypeTag::Function => "function",
        };
        write!(f, "{}", name)
    }
}

/// A user function bundled with the environment captured at its declaration
/// site.
pub struct UserFunction {
    pub decl: Rc<FunctionDecl>,
    pub env: EnvRef,
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The captured environment may reference the function itself.
        write!(f, "UserFunction({})", self.decl.name.name)
    }
}

pub type NativeHandler = fn(&mut Interpreter, &[Value]) -> Result<Value, String>;

/// A built-in function; the handler runs host code.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub variadic: bool,
    pub handler: NativeHandler,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

#[derive(Debug, Clone)]
pub enum FunctionValue {
    User(Rc<UserFunction>),
    Native(&'static NativeFunction),
}

impl FunctionValue {
    pub fn name(&self) -> &str {
        match self {
            FunctionValue::User(f) => &f.decl.name.name,
            FunctionValue::Native(f) => f.name,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            FunctionValue::User(f) => f.decl.params.len(),
            FunctionValue::Native(f) => f.arity,
        }
    }

    pub fn variadic(&self) -> bool {
        match self {
            FunctionValue::User(_) => false,
            FunctionValue::Native(f) => f.variadic,
        }
    }
}

impl fmt::Display for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionValue::User(func) => write!(f, "<fun-{}>", func.decl.name.name),
            FunctionValue::Native(func) => write!(f, "<native-{}>", func.name),
        }
    }
}

/// An insertion-ordered map. Iteration and printing follow insertion order;
/// lookup goes through a hash of the key. Re-inserting an existing key
/// updates the value in place.
#[derive(Debug, Clone, Default)]
pub struct MapValue {
    pairs: Vec<(Value, Value)>,
    index: HashMap<u32, usize>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), String> {
        let hash = hash_key(&key)
            .ok_or_else(|| format!("key type '{}' is not hashable", key.type_tag()))?;
        match self.index.get(&hash) {
            Some(&slot) => self.pairs[slot].1 = value,
            None => {
                self.index.insert(hash, self.pairs.len());
                self.pairs.push((key, value));
            }
        }
        Ok(())
    }

    /// Missing keys yield nil; unhashable keys are an error.
    pub fn get(&self, key: &Value) -> Result<Value, String> {
        let hash = hash_key(key)
            .ok_or_else(|| format!("key must be hashable, was {}", key.type_tag()))?;
        Ok(match self.index.get(&hash) {
            Some(&slot) => self.pairs[slot].1.clone(),
            None => Value::Nil,
        })
    }

    pub fn merge(&mut self, other: &MapValue) -> Result<(), String> {
        for (key, value) in &other.pairs {
            self.insert(key.clone(), value.clone())?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(Value, Value)] {
        &self.pairs
    }

    pub fn values(&self) -> Vec<Value> {
        self.pairs.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        // Order-sensitive structural equality.
        self.pairs == other.pairs
    }
}

/// The closed set of runtime values.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(MapValue),
    Type(TypeTag),
    Function(FunctionValue),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Number(_) => TypeTag::Number,
            Value::Str(_) => TypeTag::Str,
            Value::List(_) => TypeTag::List,
            Value::Map(_) => TypeTag::Map,
            Value::Type(_) => TypeTag::Type,
            Value::Function(_) => TypeTag::Function,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Type(_) => true,
            Value::Function(_) => true,
        }
    }

    /// Element view shared by `len`, `avg`, and `append`: strings iterate as
    /// one-character strings, maps as their values in insertion order.
    pub fn sequence_elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::Str(s) => Some(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::List(items) => Some(items.clone()),
            Value::Map(map) => Some(map.values()),
            _ => None,
        }
    }

    pub fn sequence_len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Appends a single element, producing a new value. Lists accept
    /// anything; strings accept strings; maps merge maps.
    pub fn append_one(&self, item: &Value) -> Result<Value, String> {
        match self {
            Value::List(items) => {
                let mut next = items.clone();
                next.push(item.clone());
                Ok(Value::List(next))
            }
            Value::Str(s) => match item {
                Value::Str(other) => Ok(Value::Str(format!("{}{}", s, other))),
                other => Err(format!(
                    "cannot append {} to {}",
                    other.type_tag(),
                    self.type_tag()
                )),
            },
            Value::Map(map) => match item {
                Value::Map(other) => {
                    let mut next = map.clone();
                    next.merge(other)?;
                    Ok(Value::Map(next))
                }
                other => Err(format!(
                    "cannot append {} to {}",
                    other.type_tag(),
                    self.type_tag()
                )),
            },
            other => Err(format!("append() expects a sequence, was {}", other.type_tag())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(n.to_string())),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map.pairs() {
                    object.insert(key.to_string(), value.to_json());
                }
                serde_json::Value::Object(object)
            }
            Value::Type(tag) => serde_json::Value::String(tag.to_string()),
            Value::Function(func) => serde_json::Value::String(func.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => match (a, b) {
                (FunctionValue::User(a), FunctionValue::User(b)) => Rc::ptr_eq(a, b),
                (FunctionValue::Native(a), FunctionValue::Native(b)) => std::ptr::eq(*a, *b),
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.pairs().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Type(tag) => write!(f, "{}", tag),
            Value::Function(func) => write!(f, "{}", func),
        }
    }
}

// ------------------------------------
// Key hashing
// ------------------------------------

/// FNV-1a, 32-bit.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

pub fn is_hashable(value: &Value) -> bool {
    hash_key(value).is_some()
}

/// Hash for map keys. Composites and functions are not hashable. The
/// rendering is prefixed with the type tag so `true` and `"true"` occupy
/// different slots.
pub fn hash_key(value: &Value) -> Option<u32> {
    let rendering = match value {
        Value::Number(n) => format!("number:{:.6}", n),
        Value::Str(s) => format!("string:{}", s),
        Value::Bool(b) => format!("bool:{}", b),
        Value::Nil => "nil:nil".to_string(),
        Value::Type(tag) => format!("type:{}", tag),
        _ => return None,
    };
    Some(fnv1a(rendering.as_bytes()))
}

// ------------------------------------
// Operator dispatch
// ------------------------------------

fn check_type_compat(left: &Value, right: &Value) -> Result<(), String> {
    if left.type_tag() != right.type_tag() {
        return Err(format!(
            "incompatible types {} and {}",
            left.type_tag(),
            right.type_tag()
        ));
    }
    Ok(())
}

pub fn add(left: &Value, right: &Value) -> Result<Value, String> {
    check_type_compat(left, right)?;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            Ok(Value::List(items))
        }
        _ => Err(format!("cannot add type {}", left.type_tag())),
    }
}

pub fn subtract(left: &Value, right: &Value) -> Result<Value, String> {
    check_type_compat(left, right)?;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
        _ => Err(format!("cannot subtract type {}", left.type_tag())),
    }
}

pub fn multiply(left: &Value, right: &Value) -> Result<Value, String> {
    check_type_compat(left, right)?;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
        _ => Err(format!("cannot multiply type {}", left.type_tag())),
    }
}

pub fn divide(left: &Value, right: &Value) -> Result<Value, String> {
    check_type_compat(left, right)?;
    match (left, right) {
        (Value::Number(_), Value::Number(b)) if *b == 0.0 => {
            Err("divide by zero error".to_string())
        }
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
        _ => Err(format!("cannot divide type {}", left.type_tag())),
    }
}

/// Integer modulo of truncated operands.
pub fn modulo(left: &Value, right: &Value) -> Result<Value, String> {
    check_type_compat(left, right)?;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let divisor = b.trunc() as i64;
            if divisor == 0 {
                return Err("modulo by zero error".to_string());
            }
            Ok(Value::Number(((a.trunc() as i64) % divisor) as f64))
        }
        _ => Err(format!("cannot modulo type {}", left.type_tag())),
    }
}

pub fn negate(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) => Ok(Value::Number(-n)),
        other => Err(format!("cannot negate type {}", other.type_tag())),
    }
}

/// Logical not works on every value through truthiness.
pub fn not(value: &Value) -> Value {
    Value::Bool(!value.is_truthy())
}

pub fn equal_to(left: &Value, right: &Value) -> Value {
    Value::Bool(left == right)
}

pub fn not_equal_to(left: &Value, right: &Value) -> Value {
    Value::Bool(left != right)
}

/// Ordering exists only for numbers and strings; everything else (including
/// cross-type pairs) compares false under every ordering operator.
fn partial_order(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub fn less_than(left: &Value, right: &Value) -> Value {
    Value::Bool(matches!(
        partial_order(left, right),
        Some(std::cmp::Ordering::Less)
    ))
}

pub fn less_than_eq(left: &Value, right: &Value) -> Value {
    Value::Bool(matches!(
        partial_order(left, right),
        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
    ))
}

pub fn greater_than(left: &Value, right: &Value) -> Value {
    Value::Bool(matches!(
        partial_order(left, right),
        Some(std::cmp::Ordering::Greater)
    ))
}

pub fn greater_than_eq(left: &Value, right: &Value) -> Value {
    Value::Bool(matches!(
        partial_order(left, right),
        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
    ))
}

/// `seq[idx]` for lists, strings, and maps.
pub fn item_at_index(sequence: &Value, index: &Value) -> Result<Value, String> {
    match sequence {
        Value::List(items) => {
            let i = expect_index(index)?;
            items
                .get(i)
                .cloned()
                .ok_or_else(|| "list index out of range".to_string())
        }
        Value::Str(s) => {
            let i = expect_index(index)?;
            s.chars()
                .nth(i)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| "string index out of range".to_string())
        }
        Value::Map(map) => map.get(index),
        other => Err(format!("{} is not indexable", other.type_tag())),
    }
}

fn expect_index(index: &Value) -> Result<usize, String> {
    match index {
        Value::Number(n) if *n >= 0.0 => Ok(*n as usize),
        // Negative indexes fall out of range in the caller.
        Value::Number(_) => Ok(usize::MAX),
        other => Err(format!("index must be a number, was {}", other.type_tag())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn text(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!num(0.0).is_truthy());
        assert!(num(0.5).is_truthy());
        assert!(!text("").is_truthy());
        assert!(text("x").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::Nil]).is_truthy());
        assert!(Value::Type(TypeTag::Number).is_truthy());
    }

    #[test]
    fn arithmetic_dispatch() {
        assert_eq!(add(&num(1.0), &num(2.0)).unwrap(), num(3.0));
        assert_eq!(add(&text("foo"), &text("bar")).unwrap(), text("foobar"));
        assert_eq!(
            add(&Value::List(vec![num(1.0)]), &Value::List(vec![num(2.0)])).unwrap(),
            Value::List(vec![num(1.0), num(2.0)])
        );
        assert_eq!(subtract(&num(5.0), &num(3.0)).unwrap(), num(2.0));
        assert_eq!(multiply(&num(4.0), &num(2.5)).unwrap(), num(10.0));
        assert_eq!(divide(&num(9.0), &num(2.0)).unwrap(), num(4.5));
    }

    #[test]
    fn cross_type_arithmetic_is_an_error() {
        let err = add(&num(1.0), &text("x")).unwrap_err();
        assert_eq!(err, "incompatible types number and string");
    }

    #[test]
    fn divide_by_zero() {
        assert_eq!(divide(&num(1.0), &num(0.0)).unwrap_err(), "divide by zero error");
    }

    #[test]
    fn modulo_truncates_operands() {
        assert_eq!(modulo(&num(7.9), &num(3.2)).unwrap(), num(1.0));
        assert_eq!(modulo(&num(-7.0), &num(3.0)).unwrap(), num(-1.0));
        assert_eq!(modulo(&num(5.0), &num(0.4)).unwrap_err(), "modulo by zero error");
    }

    #[test]
    fn equality_is_cross_type_false() {
        assert_eq!(equal_to(&num(1.0), &text("1")), Value::Bool(false));
        assert_eq!(equal_to(&Value::Nil, &Value::Nil), Value::Bool(true));
        assert_eq!(not_equal_to(&num(1.0), &num(2.0)), Value::Bool(true));
    }

    #[test]
    fn list_equality_is_structural() {
        let a = Value::List(vec![num(1.0), text("x")]);
        let b = Value::List(vec![num(1.0), text("x")]);
        assert_eq!(equal_to(&a, &b), Value::Bool(true));
    }

    #[test]
    fn ordering_for_numbers_and_strings_only() {
        assert_eq!(less_than(&num(1.0), &num(2.0)), Value::Bool(true));
        assert_eq!(less_than(&text("abc"), &text("abd")), Value::Bool(true));
        assert_eq!(less_than(&num(1.0), &text("2")), Value::Bool(false));
        assert_eq!(greater_than_eq(&num(2.0), &num(2.0)), Value::Bool(true));
        assert_eq!(less_than(&Value::Bool(false), &Value::Bool(true)), Value::Bool(false));
    }

    #[test]
    fn map_preserves_insertion_order() {
        let mut map = MapValue::new();
        map.insert(text("b"), num(1.0)).unwrap();
        map.insert(text("a"), num(2.0)).unwrap();
        let keys: Vec<String> = map.pairs().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(Value::Map(map).to_string(), "{b:1, a:2}");
    }

    #[test]
    fn map_reinsert_updates_in_place() {
        let mut map = MapValue::new();
        map.insert(text("k"), num(1.0)).unwrap();
        map.insert(text("k"), num(9.0)).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&text("k")).unwrap(), num(9.0));
    }

    #[test]
    fn map_miss_yields_nil() {
        let map = MapValue::new();
        assert_eq!(map.get(&text("missing")).unwrap(), Value::Nil);
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let mut map = MapValue::new();
        let err = map.insert(Value::List(vec![]), num(1.0)).unwrap_err();
        assert_eq!(err, "key type 'list' is not hashable");
        assert!(is_hashable(&Value::Bool(true)));
        assert!(is_hashable(&Value::Nil));
        assert!(is_hashable(&Value::Type(TypeTag::Str)));
        assert!(!is_hashable(&Value::Map(MapValue::new())));
    }

    #[test]
    fn indexing() {
        let list = Value::List(vec![num(10.0), num(20.0)]);
        assert_eq!(item_at_index(&list, &num(1.0)).unwrap(), num(20.0));
        assert_eq!(
            item_at_index(&list, &num(2.0)).unwrap_err(),
            "list index out of range"
        );
        assert_eq!(
            item_at_index(&list, &num(-1.0)).unwrap_err(),
            "list index out of range"
        );
        assert_eq!(item_at_index(&text("abc"), &num(0.0)).unwrap(), text("a"));
        assert_eq!(
            item_at_index(&text("abc"), &text("x")).unwrap_err(),
            "index must be a number, was string"
        );
        assert_eq!(
            item_at_index(&num(5.0), &num(0.0)).unwrap_err(),
            "number is not indexable"
        );
    }

    #[test]
    fn append_rules() {
        let list = Value::List(vec![num(1.0)]);
        assert_eq!(
            list.append_one(&num(2.0)).unwrap(),
            Value::List(vec![num(1.0), num(2.0)])
        );
        assert_eq!(text("ab").append_one(&text("c")).unwrap(), text("abc"));

        let mut left = MapValue::new();
        left.insert(text("k"), num(1.0)).unwrap();
        let mut right = MapValue::new();
        right.insert(text("w"), num(3.0)).unwrap();
        let merged = Value::Map(left).append_one(&Value::Map(right)).unwrap();
        assert_eq!(merged.sequence_len(), Some(2));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(num(5.0).to_string(), "5");
        assert_eq!(num(2.5).to_string(), "2.5");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(
            Value::List(vec![num(1.0), text("x")]).to_string(),
            "[1, x]"
        );
    }

    #[test]
    fn json_conversion() {
        let mut map = MapValue::new();
        map.insert(text("n"), num(1.5)).unwrap();
        map.insert(text("flag"), Value::Bool(true)).unwrap();
        let json = Value::Map(map).to_json();
        assert_eq!(json, serde_json::json!({"n": 1.5, "flag": true}));
        assert_eq!(Value::Nil.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn type_tags_round_trip() {
        let values = [
            Value::Nil,
            Value::Bool(true),
            num(1.0),
            text("s"),
            Value::List(vec![]),
            Value::Map(MapValue::new()),
            Value::Type(TypeTag::Number),
        ];
        for value in values {
            let tag = value.type_tag();
            assert_eq!(Value::Type(tag), Value::Type(tag));
        }
    }
}

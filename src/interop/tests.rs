//! Marshaling tests against a live Lua state

use pretty_assertions::assert_eq;

use super::*;
use crate::error::{Error, ErrorKind};
use crate::types::{Method, Signature, Type};
use crate::value::{HostValue, Reflect};
use crate::State;
use mlua::Value as LuaValue;

fn state() -> State {
    State::new().unwrap()
}

fn point_type() -> Type {
    Type::record("geo.point")
        .field("X", Type::float64())
        .field("Y", Type::float64())
        .field("label", Type::string())
        .build()
}

#[test]
fn test_classify_rules() {
    assert_eq!(classify(&Type::int()), Rule::Number);
    assert_eq!(classify(&Type::string()), Rule::Text);
    assert_eq!(classify(&Type::slice(Type::int())), Rule::Proxy(ProxyKind::Sequence));
    assert_eq!(classify(&Type::pointer(point_type())), Rule::Proxy(ProxyKind::Record));
    assert_eq!(classify(&Type::pointer(Type::int())), Rule::Proxy(ProxyKind::Scalar));
    assert_eq!(classify(&Type::pointer(Type::pointer(Type::int()))), Rule::Unsupported);
    assert_eq!(classify(&Type::chan(Type::int())), Rule::Unsupported);
    assert_eq!(classify(&Type::any()), Rule::Dynamic);

    let named = Type::named("luar.A", &Type::int())
        .with_method(Method::from_fn("String", |_: HostValue| String::new()));
    assert_eq!(classify(&named), Rule::Proxy(ProxyKind::Scalar));
    assert_eq!(classify(&Type::named("luar.B", &Type::int())), Rule::Number);
}

#[test]
fn test_push_primitives() {
    let s = state();
    let lua = s.lua();
    assert_eq!(push(lua, &42i32.into_host()).unwrap(), LuaValue::Integer(42));
    assert_eq!(push(lua, &2.5f64.into_host()).unwrap(), LuaValue::Number(2.5));
    assert_eq!(push(lua, &true.into_host()).unwrap(), LuaValue::Boolean(true));
    let wide = push(lua, &u64::MAX.into_host()).unwrap();
    assert_eq!(wide, LuaValue::Integer(-1));
    assert_eq!(pull(&wide, &Type::uint64()).unwrap().as_u64(), Some(u64::MAX));

    let text = push(lua, &"hi".to_string().into_host()).unwrap();
    assert_eq!(pull(&text, &Type::string()).unwrap().as_str(), Some("hi"));
}

#[test]
fn test_nil_top_level_and_element() {
    let s = state();
    let lua = s.lua();
    let nil_slice = HostValue::zero(&Type::slice(Type::int()));
    assert_eq!(push(lua, &nil_slice).unwrap(), LuaValue::Nil);
    assert!(is_null(&push_element(lua, &nil_slice).unwrap()));
    assert_eq!(push(lua, &HostValue::nil()).unwrap(), LuaValue::Nil);
}

#[test]
fn test_pull_is_strict() {
    let s = state();
    let lua = s.lua();
    let text = LuaValue::String(lua.create_string("12").unwrap());
    let err = pull(&text, &Type::int()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);

    assert!(pull(&LuaValue::Integer(12), &Type::string()).is_err());
    assert!(pull(&LuaValue::Nil, &Type::int()).is_err());
    assert!(pull(&LuaValue::Number(1.5), &Type::int()).is_err());
    assert!(pull(&LuaValue::Integer(256), &Type::uint8()).is_err());
    assert_eq!(pull(&LuaValue::Number(3.0), &Type::int()).unwrap().as_i64(), Some(3));
}

#[test]
fn test_pull_nil_references() {
    for ty in [
        Type::pointer(point_type()),
        Type::any(),
        Type::slice(Type::int()),
        Type::map(Type::string(), Type::int()),
    ] {
        assert!(pull(&LuaValue::Nil, &ty).unwrap().is_nil(), "{ty}");
    }
}

#[test]
fn test_sequence_proxy_identity() {
    let s = state();
    let lua = s.lua();
    let items = vec![1i64, 2, 3].into_host();
    let first = push(lua, &items).unwrap();
    let second = push(lua, &items).unwrap();
    assert_eq!(first, second);
    assert_eq!(s.anchored(), 1);

    let back = pull(&first, &Type::slice(Type::int64())).unwrap();
    assert_eq!(back.identity(), items.identity());
}

#[test]
fn test_sequence_proxy_live_mutation() {
    let s = state();
    let items = vec![10i64, 20].into_host();
    s.set_global("s", &items).unwrap();
    s.do_string(
        r#"
assert(#s == 2 and s[1] == 10 and s[3] == nil)
s[1] = 11
s[3] = 30
"#,
    )
    .unwrap();
    let values = Vec::<i64>::from_host(&items).unwrap();
    assert_eq!(values, vec![11, 20, 30]);

    let err = s.do_string("s[9] = 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);
    let err = s.do_string("s[1] = 'x'").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
}

#[test]
fn test_map_proxy_semantics() {
    let s = state();
    let map = HostValue::new_map(&Type::string(), &Type::slice(Type::int()));
    map.insert("full".to_string().into_host(), vec![1i64].into_host())
        .unwrap();
    map.insert("empty".to_string().into_host(), HostValue::zero(&Type::slice(Type::int())))
        .unwrap();
    s.set_global("m", &map).unwrap();
    s.do_string(
        r#"
assert(m.missing == nil)
assert(m.empty == luar.null)
assert(m.full[1] == 1)
assert(#m == 2)
m.full = nil
local n = 0
for k, v in pairs(m) do n = n + 1 end
assert(n == 1)
"#,
    )
    .unwrap();
    assert_eq!(map.len(), 1);

    let err = s.do_string("local _ = m[5]").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert!(matches!(err, Error::KeyType { .. }));
}

#[test]
fn test_map_proxy_wrong_key_type() {
    let s = state();
    let names_ty = Type::named("luar.Names", &Type::map(Type::int64(), Type::string()))
        .with_method(Method::from_fn("Size", |m: HostValue| m.len() as i64));
    let map = HostValue::new_map(&Type::int64(), &Type::string());
    map.insert(5i64.into_host(), "five".to_string().into_host()).unwrap();
    s.set_global("m", &map).unwrap();
    s.set_global("n", &HostValue::of(&names_ty, map.clone()).unwrap()).unwrap();

    s.do_string("assert(m[5] == 'five'); assert(m[6] == nil)").unwrap();
    let err = s.do_string("local _ = m['five']").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert!(matches!(err, Error::KeyType { .. }));

    // a string key still reaches methods on a named map
    s.do_string("assert(n.Size() == 1); assert(n[5] == 'five')").unwrap();
    let err = s.do_string("local _ = n.Missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
}

#[test]
fn test_record_proxy_fields() {
    let s = state();
    let ty = point_type();
    let value = HostValue::record(&ty, [("X", 1.0f64.into_host())]).unwrap();
    let ptr = HostValue::pointer_to(value.clone());
    s.set_global("p", &ptr).unwrap();
    s.set_global("v", &value).unwrap();

    s.do_string("assert(p.X == 1 and p.label == nil); p.Y = 2").unwrap();
    assert_eq!(ptr.field("Y").and_then(|v| v.as_f64()), Some(2.0));

    let err = s.do_string("p.label = 'x'").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);
    let err = s.do_string("p.Z = 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);

    // by-value structs are read-only copies
    s.do_string("assert(v.X == 1)").unwrap();
    let err = s.do_string("v.X = 5").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Access);
}

#[test]
fn test_table_to_struct_ignores_unknown_keys() {
    let s = state();
    s.do_string("t = {X = 3, Y = 4, label = 'hidden', Extra = true, [1] = 0}").unwrap();
    let value = s.get_global("t", &point_type()).unwrap();
    assert_eq!(value.field("X").and_then(|v| v.as_f64()), Some(3.0));
    assert_eq!(value.field("label").unwrap().as_str(), Some(""));

    let ptr = s.get_global("t", &Type::pointer(point_type())).unwrap();
    assert_eq!(ptr.field("Y").and_then(|v| v.as_f64()), Some(4.0));
}

#[test]
fn test_table_to_sequence_fills_gaps() {
    let s = state();
    s.do_string("t = {[1] = 'a', [3] = 'c', [4] = luar.null}").unwrap();
    let value = s.get_global("t", &Type::slice(Type::string())).unwrap();
    let strings = Vec::<String>::from_host(&value).unwrap();
    assert_eq!(strings, vec!["a", "", "c", ""]);
}

#[test]
fn test_sparse_tables_are_bounded() {
    let s = state();
    let count = HostValue::func(|xs: Vec<i64>| xs.len() as i64);
    s.register("", [("count", count)]).unwrap();
    s.do_string(
        r#"
assert(count({[3] = 1}) == 3)
assert(not pcall(count, {[2^36] = 1}))
assert(not pcall(count, {[2^62] = 1}))
"#,
    )
    .unwrap();

    s.do_string("wide = {[2^36] = 1}; huge = {[2^62] = 1}").unwrap();
    for name in ["wide", "huge"] {
        let err = s.get_global(name, &Type::slice(Type::int64())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        // inference falls back to a map instead of a sequence
        let inferred = s.get_global(name, &Type::any()).unwrap();
        assert_eq!(inferred.dynamic_type().to_string(), "map[interface {}]interface {}");
    }
}

#[test]
fn test_cyclic_tables_are_rejected() {
    let s = state();
    let take = HostValue::func(|v: HostValue| v.is_nil());
    s.register("", [("take", take)]).unwrap();
    s.do_string("local t = {}; t.self = t; assert(not pcall(take, t))").unwrap();

    s.do_string("t = {}; t[1] = t; u = {}; u.next = {back = u}").unwrap();
    let err = s.get_global("t", &Type::any()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    let err = s.get_global("t", &Type::slice(Type::any())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    let err = s.get_global("u", &Type::map(Type::string(), Type::any())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);

    // a table reached twice without a cycle is fine
    s.do_string("shared = {1}; pair = {a = shared, b = shared}").unwrap();
    let pair = s.get_global("pair", &Type::any()).unwrap();
    assert_eq!(pair.len(), 2);
}

#[test]
fn test_deep_nesting_is_rejected() {
    let s = state();
    s.do_string("deep = {}; local c = deep; for i = 1, 1000 do c.next = {}; c = c.next end")
        .unwrap();
    let err = s.get_global("deep", &Type::any()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
}

#[test]
fn test_infer_shapes() {
    let s = state();
    s.do_string("a = {1, 2}; b = {x = 1}; c = {1, x = 2}; d = {}; e = 7; f = 7.5").unwrap();
    let shape = |name: &str| s.get_global(name, &Type::any()).unwrap().dynamic_type().to_string();
    assert_eq!(shape("a"), "[]interface {}");
    assert_eq!(shape("b"), "map[string]interface {}");
    assert_eq!(shape("c"), "map[interface {}]interface {}");
    assert_eq!(shape("d"), "[]interface {}");
    assert_eq!(shape("e"), "int64");
    assert_eq!(shape("f"), "float64");
}

#[test]
fn test_arity_is_strict_by_default() {
    let s = state();
    s.register("", [("add", HostValue::func(|a: i64, b: i64| a + b))]).unwrap();
    s.do_string("assert(add(2, 3) == 5)").unwrap();

    let err = s.do_string("add(1)").unwrap_err();
    assert!(matches!(err, Error::Arity { expected: 2, got: 1, .. }));
}

#[test]
fn test_lenient_arity_pads_with_zero() {
    let mut config = crate::Config::default();
    config.bridge.strict_arity = false;
    let s = State::with_config(config).unwrap();
    s.register("", [("add", HostValue::func(|a: i64, b: i64| a + b))]).unwrap();
    s.do_string("assert(add(2) == 2); assert(add(1, 2, 3) == 3)").unwrap();
}

#[test]
fn test_host_error_surfaces_as_invocation() {
    let s = state();
    let fail = HostValue::func(|name: String| -> Result<i64, String> { Err(format!("bad {name}")) });
    s.register("", [("fail", fail)]).unwrap();

    s.do_string("local ok, err = pcall(fail, 'x'); assert(not ok)").unwrap();
    let err = s.do_string("fail('x')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invocation);
}

#[test]
fn test_lua_function_round_trip() {
    let s = state();
    s.do_string("function double(x) return x * 2 end").unwrap();
    let sig = Signature::new(vec![Type::int64()], vec![Type::int64()]);
    let double = s.get_global("double", &Type::func(sig)).unwrap();
    let out = double.call(&[21i64.into_host()]).unwrap();
    assert_eq!(out[0].as_i64(), Some(42));

    // pushing it back yields the original function
    s.set_global("again", &double).unwrap();
    s.do_string("assert(again == double)").unwrap();
}

#[test]
fn test_scalar_proxy_equality() {
    let s = state();
    let a_ty = Type::named("luar.A", &Type::int())
        .with_method(Method::from_fn("String", |a: HostValue| {
            a.as_i64().unwrap_or_default().to_string()
        }));
    s.set_global("x", &HostValue::of(&a_ty, 8i64).unwrap()).unwrap();
    s.set_global("y", &HostValue::of(&a_ty, 8i64).unwrap()).unwrap();
    s.set_global("z", &HostValue::of(&a_ty, 9i64).unwrap()).unwrap();
    s.do_string("assert(x == y); assert(x ~= z); assert(tostring(z) == '9')").unwrap();
}

#[test]
fn test_materialized_tables_are_deep_copies() {
    let s = state();
    let nested = vec![vec![1i64, 2]].into_host();
    s.set_global("nested", &nested).unwrap();
    s.do_string(
        r#"
t = luar.slice2table(nested)
nested[1][1] = 99
assert(type(t[1]) == 'table')
assert(t[1][1] == 1 and t[1][2] == 2)
"#,
    )
    .unwrap();
    assert_eq!(nested.index(0).and_then(|inner| inner.index(0)).and_then(|v| v.as_i64()), Some(99));

    let groups = HostValue::new_map(&Type::string(), &Type::slice(Type::int64()));
    groups.insert("odd".to_string().into_host(), vec![1i64, 3].into_host()).unwrap();
    s.set_global("groups", &groups).unwrap();
    s.do_string(
        r#"
g = luar.map2table(groups)
groups.odd[1] = 7
assert(type(g.odd) == 'table' and g.odd[1] == 1)
"#,
    )
    .unwrap();

    let looped = HostValue::new_slice(&Type::any(), 1);
    looped.set_index(0, looped.clone()).unwrap();
    let err = crate::slice_to_table(s.lua(), &looped).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
}

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};

use luar::{
    Error, ErrorKind, HostValue, Method, MethodSig, Reflect, Signature, State, Type, Variadic,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn person_type() -> Type {
    Type::record("luar.person")
        .field("Name", Type::string())
        .field("Age", Type::int())
        .method(
            Method::from_fn("GetName", |this: HostValue| {
                this.field("Name")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            })
            .pointer_receiver(),
        )
        .build()
}

fn has_name() -> Type {
    Type::interface(
        "luar.hasName",
        vec![MethodSig::new("GetName", Signature::new(vec![], vec![Type::string()]))],
    )
}

fn function_library() -> Vec<(&'static str, HostValue)> {
    let person_ptr = Type::pointer(person_type());
    vec![
        ("id", HostValue::func(|x: f32, a: String| (x, a))),
        ("sum", HostValue::func(|args: Vec<f64>| args.iter().sum::<f64>())),
        ("sumv", HostValue::func(|args: Variadic<f64>| args.iter().sum::<f64>())),
        (
            "squares",
            HostValue::func(|args: Vec<i64>| {
                args.iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v * v))
                    .collect::<HashMap<String, i64>>()
            }),
        ),
        ("IsNilInterface", HostValue::func(|v: HostValue| v.is_nil())),
        (
            "IsNilPointer",
            HostValue::raw_func(Signature::new(vec![person_ptr], vec![Type::bool()]), |args| {
                Ok(vec![args[0].is_nil().into_host()])
            }),
        ),
    ]
}

#[test]
fn test_host_function_calls() {
    let cases = [
        ("go function call", "x, a = id(42, 'foo')\nassert(x == 42 and a == 'foo')"),
        ("auto-convert table to slice", "res = sum{1, 10, 100}\nassert(res == 111)"),
        ("variadic call", "res = sumv(1, 10, 100)\nassert(res == 111)"),
        ("variadic call with table", "res = sumv{1, 10, 100}\nassert(res == 111)"),
        (
            "init proxy",
            "proxy = squares{10, 20}\nassert(proxy['0'] == 100)\nassert(proxy['1'] == 400)",
        ),
        (
            "copy proxy to table",
            "proxy = squares{10, 20}\nt = luar.map2table(proxy)\nassert(type(t)=='table')\nassert(t['0'] == 100)\nassert(t['1'] == 400)",
        ),
        (
            "change proxy, not table",
            "proxy = squares{10, 20}\nt = luar.map2table(proxy)\nproxy['0'] = 0\nassert(t['0'] == 100)",
        ),
        ("pass nil to host functions", "assert(IsNilInterface(nil))\nassert(IsNilPointer(nil))"),
    ];

    for (desc, code) in cases {
        let state = State::new().unwrap();
        state.register("", function_library()).unwrap();
        if let Err(err) = state.do_string(code) {
            panic!("{desc}: {err}");
        }
    }
}

#[test]
fn test_namespace() {
    let keys = HostValue::func(|m: HashMap<String, HostValue>| m.into_keys().collect::<Vec<String>>());
    let values = HostValue::func(|m: HashMap<String, HostValue>| m.into_values().collect::<Vec<HostValue>>());

    let state = State::new().unwrap();
    state.register("gons", [("keys", keys), ("values", values)]).unwrap();
    state
        .do_string(
            r#"
local T = {one=1, two=2}
local k = gons.keys(T)
assert( (k[1]=='one' and k[2]=='two') or (k[2]=='one' and k[1]=='two') )

local v = gons.values(T)
assert(v[1]==1 or v[2]==1)
v = luar.slice2table(v)
assert( (v[1]==1 and v[2]==2) or (v[2]==1 and v[1]==2) )
"#,
        )
        .unwrap();
}

#[test]
fn test_namespace_collision_is_atomic() {
    let state = State::new().unwrap();
    state.register("gons", [("keys", 1i64.into_host())]).unwrap();

    let err = state
        .register("gons", [("fresh", 2i64.into_host()), ("keys", 3i64.into_host())])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Binding);
    state.do_string("assert(gons.fresh == nil and gons.keys == 1)").unwrap();

    // the global table overwrites
    state.register("", [("g", 1i64.into_host())]).unwrap();
    state.register("", [("g", 2i64.into_host())]).unwrap();
    state.do_string("assert(g == 2)").unwrap();

    let nil_func = HostValue::zero(&Type::func(Signature::default()));
    let err = state.register("", [("f", nil_func)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Binding);
}

#[test]
fn test_struct_access() {
    let person = person_type();
    let person_ptr = Type::pointer(person.clone());

    let new_person = {
        let person = person.clone();
        HostValue::raw_func(
            Signature::new(vec![Type::string(), Type::int()], vec![person_ptr.clone()]),
            move |args| {
                let value = HostValue::record(&person, [("Name", args[0].clone()), ("Age", args[1].clone())])?;
                Ok(vec![HostValue::pointer_to(value)])
            },
        )
    };
    let new_name = HostValue::raw_func(
        Signature::new(vec![person_ptr.clone()], vec![has_name()]),
        |args| Ok(vec![args[0].clone()]),
    );
    let get_name = HostValue::raw_func(
        Signature::new(vec![has_name()], vec![Type::string()]),
        |args| args[0].call_method("GetName", &[]),
    );

    let state = State::new().unwrap();
    state
        .register("", [("NewPerson", new_person), ("NewName", new_name), ("GetName", get_name)])
        .unwrap();
    state
        .do_string(
            r#"
local t = NewPerson("Alice", 16)
assert(t.Name == 'Alice')
assert(t.Age == 16)
t.Name = 'Caterpillar'
assert(t.GetName() == 'Caterpillar')

t = NewPerson("Alice", 16)
it = NewName(t)
assert(it.GetName()=='Alice')
assert(GetName(it)=='Alice')
assert(GetName(t)=='Alice')
assert(luar.type(t).String() == "*luar.person")
assert(luar.type(it).String() == "*luar.person")
"#,
        )
        .unwrap();
}

#[test]
fn test_interface_access() {
    let mut source = tempfile::NamedTempFile::new().unwrap();
    write!(source, "package luar\n\n{}", "// filler\n".repeat(20)).unwrap();

    let file_ty = Type::named("os.File", &Type::native())
        .with_method(Method::new(
            "Read",
            Signature::new(vec![Type::slice(Type::uint8())], vec![Type::int(), Type::any()]),
            |file, args| {
                let handle = file
                    .native_ref::<Mutex<Option<File>>>()
                    .ok_or_else(|| Error::Invocation("not a file".into()))?;
                let buff = &args[0];
                let mut bytes = vec![0u8; buff.len()];
                let read = match handle.lock().as_mut() {
                    Some(f) => f.read(&mut bytes).map_err(|e| Error::Invocation(e.to_string()))?,
                    None => return Err(Error::Invocation("file already closed".into())),
                };
                for (i, b) in bytes[..read].iter().copied().enumerate() {
                    buff.set_index(i, b.into_host())?;
                }
                Ok(vec![HostValue::of(&Type::int(), read as i64)?, HostValue::nil()])
            },
        ))
        .with_method(Method::new("Close", Signature::default(), |file, _| {
            if let Some(handle) = file.native_ref::<Mutex<Option<File>>>() {
                handle.lock().take();
            }
            Ok(vec![])
        }));

    let os_open = {
        let file_ty = file_ty.clone();
        HostValue::raw_func(
            Signature::new(vec![Type::string()], vec![file_ty.clone(), Type::any()]),
            move |args| {
                let path = String::from_host(&args[0])?;
                Ok(match File::open(&path) {
                    Ok(f) => vec![HostValue::native(&file_ty, Mutex::new(Some(f))), HostValue::nil()],
                    Err(e) => vec![HostValue::zero(&file_ty), e.to_string().into_host()],
                })
            },
        )
    };

    let state = State::new().unwrap();
    state
        .register(
            "",
            [
                ("OsOpen", os_open),
                ("byteBuffer", HostValue::func(|n: i64| vec![0u8; n as usize])),
                (
                    "bytesToString",
                    HostValue::func(|bytes: Vec<u8>| String::from_utf8_lossy(&bytes).into_owned()),
                ),
                ("path", source.path().display().to_string().into_host()),
            ],
        )
        .unwrap();
    state
        .do_string(
            r#"
local f, err = OsOpen(path)
assert(err == nil)
local buff = byteBuffer(100)
assert(#buff == 100)
local k, err = f.Read(buff)
assert(k == 100)
local s = bytesToString(buff)
assert(s:match '^package luar')
f.Close()
local _, closed = pcall(f.Read, buff)
assert(not _)
"#,
        )
        .unwrap();
}

#[test]
fn test_lua_call_with_proxies() {
    let state = State::new().unwrap();
    state
        .do_string(
            r#"
Libs = {}
function Libs.fun(s,i,t,m)
	assert(s == 'hello')
	assert(i == 42)
	assert(type(t) == 'userdata' and t[1] == 42)
	assert(type(m) == 'userdata' and m.name == 'Joe')
	return 'ok'
end"#,
        )
        .unwrap();

    let mut m = HashMap::new();
    m.insert("name".to_string(), "Joe".to_string());

    let fun = state.callable("Libs.fun").unwrap();
    let got = fun
        .call(&[
            "hello".to_string().into_host(),
            42i64.into_host(),
            vec![42i64, 66, 104].into_host(),
            m.into_host(),
        ])
        .unwrap();
    assert_eq!(got[0].as_str(), Some("ok"));
}

#[test]
fn test_lua_call_typed_results() {
    let state = State::new().unwrap();
    state
        .do_string("function return_slices()\n    return {{'one'}, luar.null, {'three'}}\nend")
        .unwrap();

    let fun = state.callable("return_slices").unwrap();
    let results = fun
        .call_typed(&[Vec::<Vec<String>>::type_of()], &[])
        .unwrap();
    let outer = &results[0];
    assert_eq!(outer.len(), 3);
    assert!(outer.index(1).unwrap().is_nil());

    let slices = Vec::<Vec<String>>::from_host(outer).unwrap();
    assert_eq!(slices[0][0], "one");
    assert_eq!(slices[2][0], "three");
}

#[test]
fn test_callable_rejects_non_function() {
    let state = State::new().unwrap();
    state.do_string("x = 1").unwrap();
    assert_eq!(state.callable("x").unwrap_err().kind(), ErrorKind::Binding);
    assert_eq!(state.callable("missing.fn").unwrap_err().kind(), ErrorKind::Binding);
}

#[test]
fn test_anchoring() {
    let state = State::new().unwrap();
    state
        .do_string(
            r#"
local s = luar.slice(2)
s[1] = 10
s[2] = 20
collectgarbage()
assert(#s == 2 and s[1]==10 and s[2]==20)
s = nil
"#,
        )
        .unwrap();
    assert_eq!(state.anchored(), 1);
    state.close();
}

#[test]
fn test_type_discipline() {
    let a_ty = Type::named("luar.A", &Type::int()).with_method(Method::from_fn("String", |a: HostValue| {
        a.as_i64().unwrap_or_default().to_string()
    }));
    let b_ty = Type::named("luar.B", &Type::int());
    let new_a = {
        let a_ty = a_ty.clone();
        HostValue::raw_func(Signature::new(vec![Type::int()], vec![a_ty.clone()]), move |args| {
            Ok(vec![luar::coerce(&args[0], &a_ty)?])
        })
    };

    let state = State::new().unwrap();
    state
        .register(
            "",
            [
                ("a", HostValue::of(&a_ty, 5i64).unwrap()),
                ("b", HostValue::of(&b_ty, 9i64).unwrap()),
                ("new_a", new_a),
            ],
        )
        .unwrap();

    let cases = [
        ("call methods on derived primitives", "assert(a.String() == '5')"),
        ("get underlying primitive value", "assert(luar.raw(a) == 5)"),
        ("equality on derived types", "assert(new_a(8) == new_a(8))\nassert(new_a(5) ~= new_a(6))"),
    ];
    for (desc, code) in cases {
        if let Err(err) = state.do_string(code) {
            panic!("{desc}: {err}");
        }
    }

    let a = state.get_global("a", &a_ty).unwrap();
    assert_eq!(a.ty(), &a_ty);
    assert_eq!(a.as_i64(), Some(5));

    assert!(state.do_string("assert(b != new_a(9))").is_err());
}

#[test]
fn test_type_map() {
    let mut m = HashMap::new();
    m.insert("test".to_string(), "art".to_string());

    let state = State::new().unwrap();
    state.register("", [("m", m.into_host())]).unwrap();
    state.do_string("assert(m.test == 'art')\nassert(m.Test == nil)").unwrap();

    let err = state.do_string("_=m[5]").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
}

#[test]
fn test_type_conversion_with_null() {
    let sl = HostValue::slice_of(
        &Type::slice(Type::slice(Type::int())),
        vec![
            HostValue::zero(&Type::slice(Type::int())),
            vec![1i64, 2].into_host(),
            HostValue::zero(&Type::slice(Type::int())),
            vec![10i64, 20].into_host(),
        ],
    )
    .unwrap();

    let mn = HostValue::new_map(&Type::string(), &Type::slice(Type::int()));
    for (key, value) in [
        ("aay", vec![1i64, 2].into_host()),
        ("bee", HostValue::zero(&Type::slice(Type::int()))),
        ("cee", vec![10i64, 20].into_host()),
        ("dee", HostValue::zero(&Type::slice(Type::int()))),
    ] {
        mn.insert(key.to_string().into_host(), value).unwrap();
    }

    let state = State::new().unwrap();
    state.register("", [("sl", sl), ("mn", mn)]).unwrap();
    state
        .do_string(
            r#"
tab = luar.slice2table(sl)
assert(#tab == 4)
assert(tab[1] == luar.null)
assert(tab[3] == luar.null)

tab2 = luar.map2table(mn)
assert(tab2.bee == luar.null and tab2.dee == luar.null)
"#,
        )
        .unwrap();
}

#[test]
fn test_library_helpers() {
    let state = State::new().unwrap();
    state
        .do_string(
            r#"
local s = luar.slice()
luar.append(s, 1, 'two', {3})
assert(#s == 3 and s[1] == 1 and s[2] == 'two')
assert(luar.type(s).String() == '[]interface {}')
assert(luar.type(s).Elem().Kind() == 'interface')

local m = luar.map()
m.key = 'value'
assert(m.key == 'value' and #m == 1)
assert(luar.type(m) == luar.type(luar.map()))
assert(luar.type(nil) == nil)
assert(luar.raw(5) == 5)
"#,
        )
        .unwrap();
}

#[test]
fn test_reentrant_host_and_lua_calls() {
    let state = State::new().unwrap();
    state
        .do_string(
            r#"
function middle(x) return inner(x) + 1 end
function top(x) return outer(x) + 5 end
"#,
        )
        .unwrap();

    let middle = state.callable("middle").unwrap();
    let outer = HostValue::func(move |x: i64| -> Result<i64, String> {
        let got = middle.call(&[x.into_host()]).map_err(|err| err.to_string())?;
        Ok(got[0].as_i64().unwrap_or_default() * 10)
    });
    state
        .register("", [("inner", HostValue::func(|x: i64| x * 2)), ("outer", outer)])
        .unwrap();

    // Lua -> host -> Lua -> host
    state.do_string("assert(outer(5) == 110)").unwrap();

    // host -> Lua -> host -> Lua -> host
    let top = state.callable("top").unwrap();
    let got = top.call(&[2i64.into_host()]).unwrap();
    assert_eq!(got[0].as_i64(), Some(55));

    // the state stays usable after the nested calls unwind
    state.do_string("assert(outer(1) == 30); assert(inner(4) == 8)").unwrap();
    let err = state.do_string("outer('x')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    state.do_string("assert(outer(0) == 10)").unwrap();
}

use std::cell::RefCell;
use std::rc::Rc;

use json_mirror::{action, bind, MirrorHandle, MirrorOptions, Setter, Slot, Value};
use json_mirror_doc::{Doc, Op};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn v(json: serde_json::Value) -> Value {
    Value::from(json)
}

/// Relay every committed patch of each replica to the other one.
fn connect(a: &Doc, b: &Doc) {
    let to_b = b.clone();
    a.on_update(move |patch| {
        to_b.apply_update(patch).expect("relay a -> b");
    });
    let to_a = a.clone();
    b.on_update(move |patch| {
        to_a.apply_update(patch).expect("relay b -> a");
    });
}

fn counter(setter: &Setter) -> Value {
    let set = setter.clone();
    Value::object([
        ("count", Value::from(0)),
        (
            "inc",
            action(move || {
                set.set_with(
                    |s| {
                        let n = s.get_key("count").and_then(Value::as_i64).unwrap_or(0);
                        Value::object([("count", Value::from(n + 1))])
                    },
                    false,
                )
            }),
        ),
    ])
}

fn with_state(state: serde_json::Value) -> impl FnOnce(&Setter) -> Value {
    move |_| Value::from(state)
}

fn shared(handle: &MirrorHandle) -> Value {
    handle.root().to_value().unwrap()
}

#[test]
fn counter_increments_locally_and_in_the_shared_root() {
    init_tracing();
    let handle = bind(&Doc::new(), counter, MirrorOptions::new("counter")).unwrap();

    handle.call("inc").unwrap();

    assert_eq!(handle.get().get_key("count"), Some(&Value::from(1)));
    assert_eq!(shared(&handle), v(json!({"count": 1})));
}

#[test]
fn two_relayed_mirrors_converge() {
    init_tracing();
    let a = Doc::with_session_id(70_000);
    let b = Doc::with_session_id(80_000);
    connect(&a, &b);
    let left = bind(&a, counter, MirrorOptions::new("counter")).unwrap();
    let right = bind(&b, counter, MirrorOptions::new("counter")).unwrap();

    left.call("inc").unwrap();
    right.call("inc").unwrap();
    left.call("inc").unwrap();

    assert_eq!(left.get().get_key("count"), Some(&Value::from(3)));
    assert_eq!(right.get().get_key("count"), Some(&Value::from(3)));
    assert_eq!(shared(&left), shared(&right));
}

#[test]
fn actions_keep_their_identity_across_remote_patches() {
    init_tracing();
    let a = Doc::with_session_id(70_000);
    let b = Doc::with_session_id(80_000);
    connect(&a, &b);
    let left = bind(&a, counter, MirrorOptions::new("counter")).unwrap();
    let right = bind(&b, counter, MirrorOptions::new("counter")).unwrap();
    let inc = right.get().get_key("inc").cloned().unwrap();

    left.call("inc").unwrap();

    assert_eq!(right.get().get_key("count"), Some(&Value::from(1)));
    assert!(Value::ptr_eq(right.get().get_key("inc").unwrap(), &inc));
}

#[test]
fn nested_mutation_reaches_the_shared_tree() {
    init_tracing();
    let handle = bind(
        &Doc::new(),
        with_state(json!({"person": {"name": "Joe", "age": 30}})),
        MirrorOptions::new("people"),
    )
    .unwrap();

    handle
        .setter()
        .produce(|draft| {
            if let Some(person) = draft.get_mut(&"person".into()).and_then(Value::object_mut) {
                person.insert("age".to_string(), Value::from(31));
            }
        })
        .unwrap();

    let expected = v(json!({"person": {"name": "Joe", "age": 31}}));
    assert_eq!(handle.get(), expected);
    assert_eq!(shared(&handle), expected);
}

#[test]
fn deep_mutation_leaves_siblings_alone() {
    init_tracing();
    let handle = bind(
        &Doc::new(),
        with_state(json!({"owner": {"person": {"name": "Joe", "age": 30}}})),
        MirrorOptions::new("owners"),
    )
    .unwrap();

    handle
        .setter()
        .set(v(json!({"owner": {"person": {"name": "Joe", "age": 31}}})))
        .unwrap();

    let state = shared(&handle);
    assert_eq!(
        state.pointer(&["owner".into(), "person".into(), "age".into()]),
        Some(&Value::from(31))
    );
    assert_eq!(
        state.pointer(&["owner".into(), "person".into(), "name".into()]),
        Some(&Value::from("Joe"))
    );
}

#[test]
fn array_append_is_a_single_insert_at_the_end() {
    init_tracing();
    let doc = Doc::new();
    let handle = bind(
        &doc,
        with_state(json!({"users": ["amy", "sam", "harold"]})),
        MirrorOptions::new("room"),
    )
    .unwrap();
    let patches = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&patches);
    doc.on_update(move |patch| sink.borrow_mut().push(patch.clone()));

    handle
        .setter()
        .set(v(json!({"users": ["amy", "sam", "harold", "bob"]})))
        .unwrap();

    let patches = patches.borrow();
    assert_eq!(patches.len(), 1);
    assert!(matches!(
        patches[0].ops.as_slice(),
        [Op::ArrayInsert { index: 3, content, .. }] if content.len() == 1
    ));
    assert_eq!(shared(&handle), v(json!({"users": ["amy", "sam", "harold", "bob"]})));
}

#[test]
fn consecutive_composite_appends_do_not_fault() {
    init_tracing();
    let handle = bind(&Doc::new(), with_state(json!({"todos": []})), MirrorOptions::new("todos")).unwrap();

    for id in 1..=3 {
        handle
            .setter()
            .set_with(
                |s| {
                    let mut todos = s.get_key("todos").and_then(Value::as_array).unwrap_or(&[]).to_vec();
                    todos.push(v(json!({"id": id, "done": false})));
                    Value::object([("todos", Value::array(todos))])
                },
                false,
            )
            .unwrap();
    }

    let expected = v(json!({"todos": [
        {"id": 1, "done": false},
        {"id": 2, "done": false},
        {"id": 3, "done": false},
    ]}));
    assert_eq!(handle.get(), expected);
    assert_eq!(shared(&handle), expected);
    assert_eq!(handle.last_error(), None);
}

#[test]
fn unset_key_can_be_reused() {
    init_tracing();
    let handle = bind(&Doc::new(), with_state(json!({"keep": 1})), MirrorOptions::new("scratch")).unwrap();
    let setter = handle.setter();

    setter.set(v(json!({"tmp": {"a": 1}}))).unwrap();
    setter
        .produce(|draft| {
            if let Some(map) = draft.object_mut() {
                map.shift_remove("tmp");
            }
        })
        .unwrap();
    assert_eq!(shared(&handle), v(json!({"keep": 1})));

    setter.set(v(json!({"tmp": {"b": [2]}}))).unwrap();
    assert_eq!(shared(&handle), v(json!({"keep": 1, "tmp": {"b": [2]}})));
    assert_eq!(handle.get(), shared(&handle));
}

#[test]
fn transaction_origin_is_passed_through() {
    init_tracing();
    for origin in [Value::from("ui"), v(json!({"user": "amy", "tab": 2}))] {
        let doc = Doc::new();
        let handle = bind(
            &doc,
            counter,
            MirrorOptions::new("counter").with_origin(origin.clone()),
        )
        .unwrap();
        let origins = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&origins);
        handle
            .root()
            .observe_deep(move |event| sink.borrow_mut().push(event.origin.clone()))
            .unwrap();

        handle.call("inc").unwrap();

        assert_eq!(*origins.borrow(), vec![Some(origin)]);
    }
}

#[test]
fn store_listeners_fire_once_per_local_write() {
    init_tracing();
    let handle = bind(&Doc::new(), counter, MirrorOptions::new("counter")).unwrap();
    let calls = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&calls);
    handle.store().subscribe(move |_, _| *sink.borrow_mut() += 1);

    handle.call("inc").unwrap();
    handle.call("inc").unwrap();

    // The feedback from the shared root is an identity no-op.
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn late_binder_adopts_the_shared_state() {
    init_tracing();
    let a = Doc::with_session_id(70_000);
    let b = Doc::with_session_id(80_000);
    connect(&a, &b);
    let first = bind(&a, counter, MirrorOptions::new("counter")).unwrap();
    first.call("inc").unwrap();
    first.call("inc").unwrap();

    let second = bind(&b, counter, MirrorOptions::new("counter")).unwrap();

    assert_eq!(second.get().get_key("count"), Some(&Value::from(2)));
    second.call("inc").unwrap();
    assert_eq!(first.get().get_key("count"), Some(&Value::from(3)));
}

#[test]
fn undefined_nested_slot_then_unrelated_update() {
    init_tracing();
    let handle = bind(
        &Doc::new(),
        with_state(json!({"count": 0, "draft": {"title": "x"}})),
        MirrorOptions::new("editor"),
    )
    .unwrap();
    let setter = handle.setter();

    setter
        .produce(|draft| {
            if let Some(map) = draft.get_mut(&"draft".into()).and_then(Value::object_mut) {
                map.insert("title".to_string(), Value::Undefined);
            }
        })
        .unwrap();
    setter.set(v(json!({"count": 1}))).unwrap();

    assert_eq!(handle.get(), shared(&handle));
    assert_eq!(handle.get().get_key("count"), Some(&Value::from(1)));
    assert_eq!(handle.last_error(), None);
}

#[test]
fn deep_mutation_propagates_to_the_other_mirror() {
    init_tracing();
    let a = Doc::with_session_id(70_000);
    let b = Doc::with_session_id(80_000);
    connect(&a, &b);
    let state = json!({"owner": {"person": {"name": "Joe", "age": 0}}});
    let left = bind(&a, with_state(state.clone()), MirrorOptions::new("owners")).unwrap();
    let right = bind(&b, with_state(state), MirrorOptions::new("owners")).unwrap();

    left.setter()
        .produce(|draft| {
            let person = draft
                .get_mut(&"owner".into())
                .and_then(|owner| owner.get_mut(&"person".into()))
                .and_then(Value::object_mut);
            if let Some(person) = person {
                person.insert("age".to_string(), Value::from(1));
            }
        })
        .unwrap();

    let age: [Slot; 3] = ["owner".into(), "person".into(), "age".into()];
    let name: [Slot; 3] = ["owner".into(), "person".into(), "name".into()];
    assert_eq!(right.get().pointer(&age), Some(&Value::from(1)));
    assert_eq!(right.get().pointer(&name), Some(&Value::from("Joe")));
    assert_eq!(left.get(), right.get());
}

fn counter_with_nested_action(setter: &Setter) -> Value {
    let mut state = counter(setter);
    if let Some(map) = state.object_mut() {
        map.insert(
            "other".to_string(),
            Value::object([
                ("label", Value::from("extra")),
                ("foo", action(|| Ok(()))),
            ]),
        );
    }
    state
}

#[test]
fn nested_actions_keep_identity() {
    init_tracing();
    let a = Doc::with_session_id(70_000);
    let b = Doc::with_session_id(80_000);
    connect(&a, &b);
    let left = bind(&a, counter_with_nested_action, MirrorOptions::new("counter")).unwrap();
    let right = bind(&b, counter_with_nested_action, MirrorOptions::new("counter")).unwrap();
    let foo: [Slot; 2] = ["other".into(), "foo".into()];
    let left_foo = left.get().pointer(&foo).cloned().unwrap();
    let right_foo = right.get().pointer(&foo).cloned().unwrap();

    left.call("inc").unwrap();
    right.call("inc").unwrap();

    assert!(Value::ptr_eq(left.get().pointer(&foo).unwrap(), &left_foo));
    assert!(Value::ptr_eq(right.get().pointer(&foo).unwrap(), &right_foo));
    assert_eq!(right.get().get_key("count"), Some(&Value::from(2)));
    assert_eq!(shared(&left), v(json!({"count": 2, "other": {"label": "extra"}})));
}

#[test]
fn remote_write_notifies_subscribers() {
    init_tracing();
    let a = Doc::with_session_id(70_000);
    let b = Doc::with_session_id(80_000);
    connect(&a, &b);
    let left = bind(&a, counter, MirrorOptions::new("counter")).unwrap();
    let right = bind(&b, counter, MirrorOptions::new("counter")).unwrap();
    let seen: Rc<RefCell<Vec<(Value, Value)>>> = Rc::default();
    let sink = Rc::clone(&seen);
    right.store().subscribe(move |new, old| {
        sink.borrow_mut()
            .push((new.get_key("count").cloned().unwrap(), old.get_key("count").cloned().unwrap()))
    });

    left.call("inc").unwrap();

    assert_eq!(*seen.borrow(), vec![(Value::from(1), Value::from(0))]);
}

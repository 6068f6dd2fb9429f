//! Test fixtures - program descriptions for testing

use indoc::indoc;
use std::fmt::Write as _;

/// A three-animal hierarchy with one root calling the base method both
/// directly and through a static helper
pub fn zoo() -> &'static str {
    indoc! {r#"
        classes:
          - name: Animal
            methods:
              - name: speak
                code:
                  - { op: const-null, dest: 1 }
                  - { op: return, src: 1 }
          - name: Dog
            super: Animal
            methods:
              - name: speak
                code:
                  - { op: new, dest: 1, class: Dog }
                  - { op: return, src: 1 }
          - name: Cat
            super: Animal
            methods:
              - name: speak
                code:
                  - { op: new, dest: 1, class: Cat }
                  - { op: return, src: 1 }
          - name: Zoo
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: new, dest: 0, class: Dog }
                  - { op: invoke, kind: virtual, method: Animal.speak, args: [0], dest: 1 }
                  - { op: invoke, kind: static, method: Zoo.feed, args: [0] }
                  - { op: return }
              - name: feed
                static: true
                params: [Animal]
                code:
                  - { op: invoke, kind: virtual, method: Animal.speak, args: [0] }
                  - { op: return }
    "#}
}

/// `a` and `b` call each other
pub fn mutual_recursion() -> &'static str {
    indoc! {r#"
        classes:
          - name: Ping
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: invoke, kind: static, method: Ping.a, args: [] }
                  - { op: return }
              - name: a
                static: true
                code:
                  - { op: invoke, kind: static, method: Ping.b, args: [] }
                  - { op: return }
              - name: b
                static: true
                code:
                  - { op: invoke, kind: static, method: Ping.a, args: [] }
                  - { op: return }
    "#}
}

/// A static initializer calls `init`, which calls `helper`, which reads a
/// static field nobody writes
pub fn static_init_helper() -> &'static str {
    indoc! {r#"
        classes:
          - name: Bar
          - name: Foo
            fields:
              - { name: F, type: Bar, static: true }
            methods:
              - name: "<clinit>"
                static: true
                code:
                  - { op: invoke, kind: static, method: Foo.init, args: [] }
                  - { op: return }
              - name: init
                static: true
                code:
                  - { op: invoke, kind: static, method: Foo.helper, args: [], dest: 0 }
                  - { op: return }
              - name: helper
                static: true
                code:
                  - { op: sget, dest: 0, field: Foo.F }
                  - { op: return, src: 0 }
    "#}
}

/// Like `static_init_helper`, but the initializer assigns the field after
/// calling `init`
pub fn static_init_writes_field() -> &'static str {
    indoc! {r#"
        classes:
          - name: Bar
          - name: Foo
            fields:
              - { name: F, type: Bar, static: true }
            methods:
              - name: "<clinit>"
                static: true
                code:
                  - { op: invoke, kind: static, method: Foo.init, args: [] }
                  - { op: new, dest: 0, class: Bar }
                  - { op: sput, src: 0, field: Foo.F }
                  - { op: return }
              - name: init
                static: true
                code:
                  - { op: invoke, kind: static, method: Foo.helper, args: [], dest: 0 }
                  - { op: return }
              - name: helper
                static: true
                code:
                  - { op: sget, dest: 0, field: Foo.F }
                  - { op: return, src: 0 }
    "#}
}

/// A constructor reaching two static helpers and one unresolvable virtual
/// call
pub fn constructor_chain() -> &'static str {
    indoc! {r#"
        classes:
          - name: Shape
            methods:
              - name: draw
                code:
                  - { op: return }
          - name: Circle
            super: Shape
            methods:
              - name: draw
                code:
                  - { op: invoke, kind: static, method: Widget.refresh, args: [] }
                  - { op: return }
          - name: Widget
            fields:
              - { name: shape, type: Shape }
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: new, dest: 0, class: Widget }
                  - { op: new, dest: 1, class: Circle }
                  - { op: invoke, kind: direct, method: "Widget.<init>", args: [0, 1] }
                  - { op: return }
              - name: "<init>"
                params: [Shape]
                code:
                  - { op: iput, src: 1, object: 0, field: Widget.shape }
                  - { op: invoke, kind: static, method: Widget.layout, args: [] }
                  - { op: invoke, kind: virtual, method: Shape.draw, args: [1] }
                  - { op: return }
              - name: layout
                static: true
                code:
                  - { op: invoke, kind: static, method: Widget.measure, args: [] }
                  - { op: return }
              - name: measure
                static: true
                code:
                  - { op: return }
              - name: refresh
                static: true
                code:
                  - { op: return }
    "#}
}

/// Static methods returning constants; no fields and no virtual dispatch
pub fn static_returns() -> &'static str {
    indoc! {r#"
        classes:
          - name: Calc
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: invoke, kind: static, method: Calc.one, args: [], dest: 0 }
                  - { op: invoke, kind: static, method: Calc.make, args: [], dest: 1 }
                  - { op: return }
              - name: one
                static: true
                code:
                  - { op: const, dest: 0, value: 1 }
                  - { op: return, src: 0 }
              - name: make
                static: true
                code:
                  - { op: new, dest: 0, class: Calc }
                  - { op: return, src: 0 }
    "#}
}

/// One method stores a fresh object in a static field, another reads it
pub fn field_flow() -> &'static str {
    indoc! {r#"
        classes:
          - name: Cache
            fields:
              - { name: entry, type: Cache, static: true }
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: invoke, kind: static, method: Cache.fill, args: [] }
                  - { op: invoke, kind: static, method: Cache.read, args: [], dest: 0 }
                  - { op: return }
              - name: fill
                static: true
                code:
                  - { op: new, dest: 0, class: Cache }
                  - { op: sput, src: 0, field: Cache.entry }
                  - { op: return }
              - name: read
                static: true
                code:
                  - { op: sget, dest: 0, field: Cache.entry }
                  - { op: return, src: 0 }
    "#}
}

/// An empty constructor, then a read of `Foo.f` before the only store to it
pub fn late_field_store() -> &'static str {
    indoc! {r#"
        classes:
          - name: Foo
            fields:
              - { name: f, type: Foo }
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: new, dest: 0, class: Foo }
                  - { op: invoke, kind: direct, method: "Foo.<init>", args: [0] }
                  - { op: invoke, kind: virtual, method: Foo.get, args: [0], dest: 1 }
                  - { op: invoke, kind: virtual, method: Foo.set, args: [0] }
                  - { op: return }
              - name: "<init>"
                code:
                  - { op: return }
              - name: get
                code:
                  - { op: iget, dest: 1, object: 0, field: Foo.f }
                  - { op: return, src: 1 }
              - name: set
                code:
                  - { op: new, dest: 1, class: Foo }
                  - { op: iput, src: 1, object: 0, field: Foo.f }
                  - { op: return }
    "#}
}

/// `Handler.handle` with `overriders` subclasses overriding it, called
/// from the root and from a static `route` helper
pub fn big_override(overriders: usize) -> String {
    let mut yaml = String::from(indoc! {r#"
        classes:
          - name: Handler
            methods:
              - name: handle
                code:
                  - { op: return }
          - name: Dispatcher
            methods:
              - name: main
                static: true
                root: true
                code:
                  - { op: new, dest: 0, class: Handler }
                  - { op: invoke, kind: virtual, method: Handler.handle, args: [0] }
                  - { op: invoke, kind: static, method: Dispatcher.route, args: [0] }
                  - { op: return }
              - name: route
                static: true
                params: [Handler]
                code:
                  - { op: invoke, kind: virtual, method: Handler.handle, args: [0] }
                  - { op: return }
    "#});
    for i in 0..overriders {
        let _ = write!(
            yaml,
            "  - name: Handler{i}\n    super: Handler\n    methods:\n      - name: handle\n        code:\n          - {{ op: return }}\n"
        );
    }
    yaml
}

//! Tests for resolving member-access expressions against target memory

mod common;

use std::sync::Arc;

use common::{FakeMemory, CHILD_ADDR, G_ADDR, NEST_ADDR, N_SLOT, PZ_ADDR, Z_ADDR};
use fathom_core::error::FathomError;
use fathom_core::eval::{format_value, AccessStep, Expression, LiveVariable, Resolver};
use fathom_core::layout::{LayoutIndex, MAX_POINTER_DEPTH};
use fathom_core::memory::MemoryReader;
use fathom_core::types::Address;

fn read_i32(memory: &FakeMemory, variable: &LiveVariable) -> i32
{
    let bytes = memory.read_memory(variable.address, 4).unwrap();
    i32::from_le_bytes(bytes.try_into().unwrap())
}

#[test]
fn test_arrow_through_anonymous_struct()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let memory = common::memory();
    let resolver = Resolver::new(&index, &memory);

    let n = LiveVariable::new("n", Address::new(N_SLOT), types.nest_ptr);
    let d = resolver.resolve_expression(n.clone(), &Expression::parse("n->foo.d").unwrap()).unwrap();
    assert_eq!(d.address, Address::new(NEST_ADDR + 8));
    assert_eq!(d.ty, types.int);
    assert_eq!(d.path, "n->foo.d");
    assert_eq!(read_i32(&memory, &d), 4);

    let b = resolver.resolve_expression(n, &Expression::parse("n->b").unwrap()).unwrap();
    assert_eq!(read_i32(&memory, &b), 2);
}

#[test]
fn test_one_read_per_dereference()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let memory = common::memory();
    let resolver = Resolver::new(&index, &memory);

    let n = LiveVariable::new("n", Address::new(N_SLOT), types.nest_ptr);
    let before = memory.reads();
    resolver.resolve_expression(n, &Expression::parse("n->foo.d").unwrap()).unwrap();
    assert_eq!(memory.reads() - before, 1);

    let g = LiveVariable::new("g", Address::new(G_ADDR), types.grandparent);
    let before = memory.reads();
    resolver.resolve_expression(g, &Expression::parse("g.child.foo.d").unwrap()).unwrap();
    assert_eq!(memory.reads(), before, "member access is pure arithmetic");
}

#[test]
fn test_grandchild_through_pointer()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let mut memory = common::memory();
    memory.write_u64(common::C_SLOT, CHILD_ADDR);
    let resolver = Resolver::new(&index, &memory);

    let c = LiveVariable::new("c", Address::new(common::C_SLOT), types.child_ptr);
    let foo_d = resolver.resolve_expression(c.clone(), &Expression::parse("c->foo.d").unwrap()).unwrap();
    assert_eq!(read_i32(&memory, &foo_d), 4);
    let b = resolver.resolve_expression(c, &Expression::parse("c->grandchild.b").unwrap()).unwrap();
    assert_eq!(read_i32(&memory, &b), 2);
}

#[test]
fn test_flattened_and_literal_steps_agree()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let memory = common::memory();
    let resolver = Resolver::new(&index, &memory);
    let g = LiveVariable::new("g", Address::new(G_ADDR), types.grandparent);

    let stepwise = resolver
        .resolve(
            g.clone(),
            &[
                AccessStep::Member("child".into()),
                AccessStep::Member("foo".into()),
                AccessStep::Member("d".into()),
            ],
        )
        .unwrap();
    let (offset, ty) = index.offset_of(types.grandparent, &["child", "foo", "d"]).unwrap();
    assert_eq!(stepwise.address, Address::new(G_ADDR + offset));
    assert_eq!(stepwise.ty, ty);
    assert_eq!(read_i32(&memory, &stepwise), 4);

    let b = resolver.resolve_expression(g, &Expression::parse("g.child.b").unwrap()).unwrap();
    assert_eq!(b.address, Address::new(G_ADDR + 4 + 12));
    assert_eq!(read_i32(&memory, &b), 2);
}

#[test]
fn test_null_dereference_through_cast()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let memory = common::memory();
    let resolver = Resolver::new(&index, &memory);
    let pz = LiveVariable::new("pz", Address::new(PZ_ADDR), types.type_z_ptr);

    let err = resolver
        .resolve_expression(pz.clone(), &Expression::parse("*(type_z *)pz").unwrap())
        .unwrap_err();
    match err {
        FathomError::NullDereference { expression } => assert_eq!(expression, "*((type_z *)pz)"),
        other => panic!("expected NullDereference, got {other:?}"),
    }

    for text in ["pz->y", "pz[0]", "*pz"] {
        let err = resolver.resolve_expression(pz.clone(), &Expression::parse(text).unwrap()).unwrap_err();
        assert!(matches!(err, FathomError::NullDereference { .. }), "{text}: {err:?}");
    }
}

#[test]
fn test_casts_to_multi_level_pointers()
{
    let types = common::types();
    let graph = &types.graph;
    let index = LayoutIndex::new(Arc::clone(graph));
    let memory = common::memory();
    let resolver = Resolver::new(&index, &memory);
    let pz = LiveVariable::new("pz", Address::new(PZ_ADDR), types.type_z_ptr);
    let n = LiveVariable::new("n", Address::new(N_SLOT), types.nest_ptr);

    for (text, type_name) in [
        ("(type_z **)pz", "type_z **"),
        ("(int **)pz", "int **"),
        ("(struct anonymous_nest ***)n", "struct anonymous_nest ***"),
    ] {
        let root = if text.ends_with('n') { n.clone() } else { pz.clone() };
        let cast = resolver.resolve_expression(root.clone(), &Expression::parse(text).unwrap()).unwrap();
        assert_eq!(cast.address, root.address, "{text}");
        assert_eq!(graph.display_name(cast.ty), type_name, "{text}");
    }

    // n points at { a = 1, foo.c = 3 }, read back as one pointer
    let inner = resolver
        .resolve_expression(n, &Expression::parse("*(struct anonymous_nest **)n").unwrap())
        .unwrap();
    assert_eq!(inner.address, Address::new(NEST_ADDR));
    assert_eq!(graph.display_name(inner.ty), "struct anonymous_nest *");
    let bytes = memory.read_memory(inner.address, 8).unwrap();
    assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 0x3_0000_0001);

    let err = resolver
        .resolve_expression(pz.clone(), &Expression::parse("*(type_z **)pz").unwrap())
        .unwrap_err();
    assert!(matches!(err, FathomError::NullDereference { .. }), "{err:?}");

    let too_deep = format!("(int {})pz", "*".repeat(MAX_POINTER_DEPTH + 1));
    let err = resolver.resolve_expression(pz, &Expression::parse(&too_deep).unwrap()).unwrap_err();
    assert!(matches!(err, FathomError::UnknownType(_)), "{err:?}");
}

#[test]
fn test_errors_name_the_failing_step()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let memory = common::memory();
    let resolver = Resolver::new(&index, &memory);
    let n = LiveVariable::new("n", Address::new(N_SLOT), types.nest_ptr);

    match resolver.resolve_expression(n.clone(), &Expression::parse("n->foo.e").unwrap()) {
        Err(FathomError::NotFound { member, .. }) => assert_eq!(member, "e"),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(matches!(
        resolver.resolve_expression(n.clone(), &Expression::parse("n.a").unwrap()),
        Err(FathomError::NotAggregate { .. })
    ));
    assert!(matches!(
        resolver.resolve_expression(n.clone(), &Expression::parse("n->a->b").unwrap()),
        Err(FathomError::NotPointer { .. })
    ));
    assert!(matches!(
        resolver.resolve_expression(n, &Expression::parse("(no_such_type *)n").unwrap()),
        Err(FathomError::UnknownType(_))
    ));
}

#[test]
fn test_unmapped_pointer_is_a_memory_error()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let mut memory = common::memory();
    memory.write_u64(N_SLOT, 0xdead_0000);
    let resolver = Resolver::new(&index, &memory);

    // Resolution only computes the address; the failing read is the value read
    let n = LiveVariable::new("n", Address::new(N_SLOT), types.nest_ptr);
    let d = resolver.resolve_expression(n, &Expression::parse("n->foo.d").unwrap()).unwrap();
    assert_eq!(d.address, Address::new(0xdead_0008));
    assert!(matches!(
        format_value(&index, &memory, &d),
        Err(FathomError::MemoryRead { .. })
    ));
}

#[test]
fn test_format_values()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let memory = common::memory();

    let pz = LiveVariable::new("pz", Address::new(PZ_ADDR), types.type_z_ptr);
    assert_eq!(format_value(&index, &memory, &pz).unwrap(), "0x0000000000000000");

    let y = Resolver::new(&index, &memory)
        .resolve_expression(
            LiveVariable::new("z", Address::new(Z_ADDR), types.type_z),
            &Expression::parse("z.y").unwrap(),
        )
        .unwrap();
    assert_eq!(types.graph.display_name(y.ty), "type_y");
    assert_eq!(format_value(&index, &memory, &y).unwrap(), "{ dummy = 2 }");

    let nest = LiveVariable::new("*n", Address::new(NEST_ADDR), types.nest);
    assert_eq!(
        format_value(&index, &memory, &nest).unwrap(),
        "{ { a = 1, foo = { c = 3, d = 4 } }, b = 2 }"
    );
}

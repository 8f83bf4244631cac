//! Tests for flattening anonymous structs and unions

mod common;

use std::sync::Arc;

use fathom_core::error::FathomError;
use fathom_core::layout::{LayoutIndex, ScalarEncoding, TypeGraphBuilder};

#[test]
fn test_anonymous_members_are_promoted()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let layout = index.flatten(types.nest).unwrap();

    let names: Vec<(&str, u64)> = layout.members().iter().map(|m| (m.name.as_str(), m.offset)).collect();
    assert_eq!(names, vec![("a", 0), ("foo", 4), ("b", 12)]);
    assert_eq!(layout.type_name(), "struct anonymous_nest");
}

#[test]
fn test_named_member_is_not_promoted_past_its_name()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));
    let layout = index.flatten(types.nest).unwrap();

    assert!(layout.get("d").is_none());
    match layout.member("d") {
        Err(FathomError::NotFound { member, type_name }) => {
            assert_eq!(member, "d");
            assert_eq!(type_name, "struct anonymous_nest");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(index.offset_of(types.nest, &["foo", "d"]).unwrap(), (8, types.int));
}

#[test]
fn test_identity_without_anonymous_members()
{
    let mut b = TypeGraphBuilder::new(8);
    let int = b.scalar("int", 4, ScalarEncoding::Signed);
    let long = b.scalar("long", 8, ScalarEncoding::Signed);
    let point = b.structure(Some("point"), 16);
    b.field(point, Some("x"), 0, int).unwrap();
    b.field(point, Some("y"), 4, int).unwrap();
    b.field(point, Some("z"), 8, long).unwrap();
    let graph = Arc::new(b.finish().unwrap());
    let index = LayoutIndex::new(Arc::clone(&graph));

    let flattened: Vec<_> = index
        .flatten(point)
        .unwrap()
        .members()
        .iter()
        .map(|m| (m.name.clone(), m.offset, m.ty))
        .collect();
    let direct: Vec<_> = graph
        .get(point)
        .fields
        .iter()
        .map(|f| (f.name.clone().unwrap(), f.offset, f.ty))
        .collect();
    assert_eq!(flattened, direct);
}

#[test]
fn test_deep_nesting_matches_single_lookup()
{
    // struct deep { int pad; struct { int p; struct { int q; union { int r; long s; }; }; }; };
    let mut b = TypeGraphBuilder::new(8);
    let int = b.scalar("int", 4, ScalarEncoding::Signed);
    let long = b.scalar("long", 8, ScalarEncoding::Signed);
    let level3 = b.union(None, 8);
    b.field(level3, Some("r"), 0, int).unwrap();
    b.field(level3, Some("s"), 0, long).unwrap();
    let level2 = b.structure(None, 16);
    b.field(level2, Some("q"), 0, int).unwrap();
    b.field(level2, None, 8, level3).unwrap();
    let level1 = b.structure(None, 24);
    b.field(level1, Some("p"), 0, int).unwrap();
    b.field(level1, None, 8, level2).unwrap();
    let deep = b.structure(Some("deep"), 32);
    b.field(deep, Some("pad"), 0, int).unwrap();
    b.field(deep, None, 8, level1).unwrap();
    let index = LayoutIndex::new(Arc::new(b.finish().unwrap()));

    let layout = index.flatten(deep).unwrap();
    assert_eq!(layout.member("p").unwrap().offset, 8);
    assert_eq!(layout.member("q").unwrap().offset, 16);
    assert_eq!(layout.member("r").unwrap().offset, 24);
    assert_eq!(layout.member("s").unwrap().offset, 24);
    assert_eq!(layout.member("s").unwrap().ty, long);

    // Walking the anonymous levels by hand lands on the same offset
    let by_hand = 8 + 8 + 8 + index.flatten(level3).unwrap().member("s").unwrap().offset;
    assert_eq!(by_hand, layout.member("s").unwrap().offset);
}

#[test]
fn test_union_members_share_offset_zero()
{
    let mut b = TypeGraphBuilder::new(8);
    let int = b.scalar("int", 4, ScalarEncoding::Signed);
    let float = b.scalar("float", 4, ScalarEncoding::Float);
    let u = b.union(Some("number"), 4);
    b.field(u, Some("i"), 0, int).unwrap();
    // Bogus offsets from broken debug info are ignored for unions
    b.field(u, Some("f"), 4, float).unwrap();
    let index = LayoutIndex::new(Arc::new(b.finish().unwrap()));

    let layout = index.flatten(u).unwrap();
    assert!(layout.members().iter().all(|m| m.offset == 0));
    assert_eq!(layout.type_name(), "union number");
}

#[test]
fn test_collision_between_promoted_members_is_rejected()
{
    let mut b = TypeGraphBuilder::new(8);
    let int = b.scalar("int", 4, ScalarEncoding::Signed);
    let first = b.structure(None, 4);
    b.field(first, Some("v"), 0, int).unwrap();
    let second = b.union(None, 4);
    b.field(second, Some("v"), 0, int).unwrap();
    let clash = b.structure(Some("clash"), 8);
    b.field(clash, None, 0, first).unwrap();
    b.field(clash, None, 4, second).unwrap();
    let index = LayoutIndex::new(Arc::new(b.finish().unwrap()));

    assert!(matches!(
        index.flatten(clash),
        Err(FathomError::AmbiguousMember { ref member, .. }) if member == "v"
    ));
    // Other types in the same graph stay usable
    assert_eq!(index.flatten(first).unwrap().len(), 1);
}

#[test]
fn test_duplicate_named_members_are_rejected()
{
    let mut b = TypeGraphBuilder::new(8);
    let int = b.scalar("int", 4, ScalarEncoding::Signed);
    let dup = b.structure(Some("dup"), 8);
    b.field(dup, Some("x"), 0, int).unwrap();
    b.field(dup, Some("x"), 4, int).unwrap();
    let index = LayoutIndex::new(Arc::new(b.finish().unwrap()));

    assert!(matches!(index.flatten(dup), Err(FathomError::AmbiguousMember { .. })));
}

#[test]
fn test_child_member_uses_flattened_table()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));

    let grandchild = index.child_member(types.child, "grandchild").unwrap();
    assert_eq!(grandchild.offset, 0);
    let b = index.child_member(grandchild.ty, "b").unwrap();
    assert_eq!(b.offset, 4);
    assert_eq!(index.child_member(types.grandparent, "child").unwrap().offset, 4);
    assert!(matches!(
        index.child_member(types.grandparent, "nope"),
        Err(FathomError::NotFound { .. })
    ));
}

#[test]
fn test_typedef_of_anonymous_struct_is_flattened_through()
{
    let types = common::types();
    let index = LayoutIndex::new(Arc::clone(&types.graph));

    let y = index.child_member(types.type_z, "y").unwrap();
    assert_eq!(y.ty, types.type_y);
    assert_eq!(index.offset_of(types.type_z, &["y", "dummy"]).unwrap(), (0, types.int));
}

#[test]
fn test_type_from_another_graph_is_rejected()
{
    let types = common::types();
    let mut b = TypeGraphBuilder::new(8);
    b.scalar("int", 4, ScalarEncoding::Signed);
    let small = LayoutIndex::new(Arc::new(b.finish().unwrap()));

    let foreign = types.graph.iter().last().unwrap().id;
    assert!(foreign.index() >= small.graph().len());
    assert!(matches!(small.flatten(foreign), Err(FathomError::InvalidArgument(_))));
    assert!(matches!(
        small.child_member(foreign, "a"),
        Err(FathomError::InvalidArgument(_))
    ));
}

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dom::events::{AttributeModified, ChildNodeInserted, ChildNodeRemoved, SetChildNodes};
use dom::{DomArena, DomEvent, Node, NodeId, NodeType};

fn wide_document(width: u32) -> Node {
    let children = (0..width)
        .map(|i| Node::new(10 + i, 10_000 + i, NodeType::Element, "DIV").with_children(vec![]))
        .collect();
    Node::new(1, 1, NodeType::Document, "#document").with_children(vec![
        Node::new(2, 2, NodeType::Element, "BODY").with_children(children),
    ])
}

fn bench_load_document(c: &mut Criterion) {
    c.bench_function("load_document_1000", |b| {
        b.iter(|| {
            let mut arena = DomArena::new();
            arena.load_document(black_box(wide_document(1000)));
            black_box(arena.len())
        })
    });
}

fn bench_insert_remove(c: &mut Criterion) {
    let mut arena = DomArena::new();
    arena.load_document(wide_document(1000));

    c.bench_function("insert_then_remove", |b| {
        b.iter(|| {
            arena.apply(DomEvent::ChildNodeInserted(ChildNodeInserted {
                parent_node_id: NodeId(2),
                previous_node_id: NodeId(510),
                node: Node::new(5000, 50_000, NodeType::Element, "SPAN"),
            }));
            arena.apply(DomEvent::ChildNodeRemoved(ChildNodeRemoved {
                parent_node_id: NodeId(2),
                node_id: NodeId(5000),
            }));
        })
    });
}

fn bench_attribute_churn(c: &mut Criterion) {
    let mut arena = DomArena::new();
    arena.load_document(wide_document(100));

    c.bench_function("attribute_modified", |b| {
        let mut n = 0u32;
        b.iter(|| {
            n = n.wrapping_add(1);
            arena.apply(DomEvent::AttributeModified(AttributeModified {
                node_id: NodeId(10 + n % 100),
                name: "data-tick".into(),
                value: n.to_string(),
            }))
        })
    });
}

fn bench_set_child_nodes(c: &mut Criterion) {
    let mut arena = DomArena::new();
    arena.load_document(wide_document(10));

    c.bench_function("set_child_nodes_100", |b| {
        b.iter(|| {
            let nodes = (0..100)
                .map(|i| Node::new(20_000 + i, 90_000 + i, NodeType::Text, "#text"))
                .collect();
            arena.apply(DomEvent::SetChildNodes(SetChildNodes {
                parent_id: NodeId(10),
                nodes,
            }))
        })
    });
}

criterion_group!(
    benches,
    bench_load_document,
    bench_insert_remove,
    bench_attribute_churn,
    bench_set_child_nodes
);
criterion_main!(benches);

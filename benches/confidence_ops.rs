//! Benchmarks for confidence merges, template similarity, and ranking.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use seshat::embed::embed_text;
use seshat::knowledge::graph::{GraphTuning, KnowledgeGraph};
use seshat::knowledge::similarity::template_similarity;
use seshat::rank::SimilarityRanker;
use seshat::{confidence, embed};

fn bench_merge(c: &mut Criterion) {
    c.bench_function("confidence_merge", |bench| {
        bench.iter(|| black_box(confidence::merge(black_box(0.6), black_box(0.9), 0.1)))
    });
}

fn bench_template_similarity(c: &mut Criterion) {
    let a = "acquire a connection from the pool and run the prepared query";
    let b = "acquire a connection from the pool and execute the prepared statement";

    c.bench_function("template_similarity", |bench| {
        bench.iter(|| black_box(template_similarity(black_box(a), black_box(b))))
    });
}

fn bench_embed(c: &mut Criterion) {
    let text = "spawn one asynchronous worker task per accepted network connection";
    c.bench_function("embed_text_256", |bench| {
        bench.iter(|| black_box(embed::embed_text(black_box(text))))
    });
}

fn bench_search_1k(c: &mut Criterion) {
    let graph = KnowledgeGraph::new(GraphTuning::default());
    for i in 0..1000 {
        graph
            .upsert_concept(
                &format!("concept-{i}"),
                &format!("library number {i} for networking and serialization"),
                0.5 + (i % 5) as f64 * 0.1,
                serde_json::Value::Null,
            )
            .unwrap();
    }
    let query = embed_text("networking library for serialization");

    c.bench_function("search_1k_concepts", |bench| {
        let ranker = SimilarityRanker::new(&graph);
        bench.iter(|| black_box(ranker.search(black_box(&query), 0.3, 10).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_merge,
    bench_template_similarity,
    bench_embed,
    bench_search_1k
);
criterion_main!(benches);

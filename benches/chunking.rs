use criterion::{Criterion, criterion_group, criterion_main};
use rag_store::embeddings::TextSplitter;
use std::hint::black_box;

fn sample_document() -> String {
    let paragraph = "Retrieval stores split long documents into overlapping windows so \
        that every passage can be embedded on its own. Überlänge and emoji 🦀 keep \
        the splitter honest about character boundaries.\n\n";
    paragraph.repeat(400)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let content = sample_document();
    let splitter = TextSplitter::default();
    c.bench_function("chunking", |b| {
        b.iter(|| splitter.split(black_box(&content)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

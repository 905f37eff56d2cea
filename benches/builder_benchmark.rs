//! Benchmarks for parsing, in-memory rendering and full site builds.

use std::fs;
use std::path::Path;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docs_builder::{BuildConfig, DocsBuilder, ExtensionRegistry, MarkupEngine, RstEngine, SourceDocument};

/// Generate a document with `sections` sections, each with a glossary
/// reference, a code block and a note.
fn generate_rst(sections: usize) -> String {
    let mut rst = String::from("Document Title\n==============\n\n");
    for i in 0..sections {
        let title = format!("Section {}", i);
        rst.push_str(&format!("{}\n{}\n\n", title, "-".repeat(title.len())));
        rst.push_str("This paragraph has *emphasis*, **strong** text and ``literals``.\n");
        rst.push_str("It links to :phpclass:`ArrayAccess` and :term:`Kernel`.\n\n");
        rst.push_str(".. code-block:: php\n\n    $kernel->boot();\n\n");
        rst.push_str(".. note::\n\n    Remember to clear the cache.\n\n");
    }
    rst
}

fn write_site(root: &Path, documents: usize) {
    fs::write(
        root.join("glossary.rst"),
        "Glossary\n========\n\n.. glossary::\n\n   Kernel\n      The core of the application.\n",
    )
    .unwrap();
    for i in 0..documents {
        let dir = root.join(format!("part{}", i % 4));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("page{}.rst", i)), generate_rst(5)).unwrap();
    }
}

fn bench_parse(c: &mut Criterion) {
    let registry = ExtensionRegistry::default();
    let engine = RstEngine::new();
    let mut group = c.benchmark_group("parse");

    for sections in [10, 50, 200] {
        let document = SourceDocument::from_string("bench", &generate_rst(sections));
        group.throughput(Throughput::Bytes(document.content.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sections), &document, |b, doc| {
            b.iter(|| engine.parse(doc, &registry, None).unwrap());
        });
    }
    group.finish();
}

fn bench_build_string(c: &mut Criterion) {
    let mut config = BuildConfig::new();
    config.set_content_is_string(true);
    let builder = DocsBuilder::new(config).unwrap();
    let content = generate_rst(20);

    c.bench_function("build_string_20_sections", |b| {
        b.iter(|| builder.build_string(&content).unwrap());
    });
}

fn bench_site_build(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("site_build");
    group.sample_size(10);

    for documents in [20, 100] {
        let temp_dir = tempfile::tempdir().unwrap();
        write_site(temp_dir.path(), documents);

        group.bench_with_input(BenchmarkId::new("cold", documents), &documents, |b, _| {
            b.iter(|| {
                let mut config = BuildConfig::new();
                config.set_content_dir(temp_dir.path()).unwrap();
                config.disable_build_cache();
                let builder = DocsBuilder::new(config).unwrap();
                runtime.block_on(builder.build()).unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("cached", documents), &documents, |b, _| {
            b.iter(|| {
                let mut config = BuildConfig::new();
                config.set_content_dir(temp_dir.path()).unwrap();
                let builder = DocsBuilder::new(config).unwrap();
                runtime.block_on(builder.build()).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_build_string, bench_site_build);
criterion_main!(benches);

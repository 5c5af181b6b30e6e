use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use solvent::{Id, Rule, Term, TermArg, World};

/// Build a world with `width` IsA chains of `depth` levels, each leaf
/// class holding one instance.
fn generate_taxonomy(width: usize, depth: usize) -> World {
    let mut w = World::new();
    let root = w.entity("Root");

    for chain in 0..width {
        let mut parent = root;
        for level in 0..depth {
            let class = w.entity(&format!("Class_{}_{}", chain, level));
            w.add(class, Id::pair(Id::ISA, parent));
            parent = class;
        }
        let leaf = w.entity(&format!("Instance_{}", chain));
        w.add(leaf, parent);
    }

    w
}

fn count_results(rule: &Rule<'_>) -> usize {
    let mut it = rule.iter();
    let mut count = 0;
    while it.next_match() {
        count += 1;
    }
    count
}

/// Compilation cost for rules of growing term counts.
fn bench_compile(c: &mut Criterion) {
    let mut w = World::new();
    let likes = w.entity("Likes");
    w.set_final(likes);

    let mut group = c.benchmark_group("compile");
    for terms in [1usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("chain", terms), &terms, |b, &terms| {
            b.iter(|| {
                let terms: Vec<Term> = (0..terms)
                    .map(|i| {
                        Term::pair(
                            likes,
                            TermArg::Var(format!("V{}", i)),
                            TermArg::Var(format!("V{}", i + 1)),
                        )
                    })
                    .collect();
                black_box(Rule::new(&w, terms).expect("rule compiles"));
            })
        });
    }
    group.finish();
}

/// Transitive closure over taxonomies of growing depth.
fn bench_transitive_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("transitive_closure");
    for depth in [4usize, 16, 64] {
        let w = generate_taxonomy(8, depth);
        let root = w.named("Root").expect("root exists");
        let rule =
            Rule::new(&w, vec![Term::pair(Id::ISA, TermArg::This, root)]).expect("rule compiles");

        group.bench_with_input(BenchmarkId::new("subsets", depth), &depth, |b, _| {
            b.iter(|| black_box(count_results(&rule)))
        });
    }
    group.finish();
}

/// Wildcard enumeration with a join between two terms.
fn bench_join(c: &mut Criterion) {
    let mut w = World::new();
    let likes = w.entity("Likes");
    w.set_final(likes);
    for i in 0..256usize {
        let a = w.entity(&format!("a{}", i));
        let b = w.entity(&format!("b{}", i));
        w.add(a, Id::pair(likes, b));
        w.add(b, Id::pair(likes, a));
    }
    let rule = Rule::new(
        &w,
        vec![
            Term::pair(likes, TermArg::This, "X"),
            Term::pair(likes, "X", TermArg::This),
        ],
    )
    .expect("rule compiles");

    c.bench_function("join/mutual_likes", |b| {
        b.iter(|| black_box(count_results(&rule)))
    });
}

criterion_group!(benches, bench_compile, bench_transitive_closure, bench_join);
criterion_main!(benches);

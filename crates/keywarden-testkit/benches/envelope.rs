use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use keywarden_envelope::{
    derive_key, generate_keypair, symmetric_decrypt, symmetric_encrypt, wrap_for_recipient,
    EncryptionKey, KdfParams, Salt,
};

fn bench_wrap(c: &mut Criterion) {
    let (public, secret) = generate_keypair();
    let key = EncryptionKey::generate();

    c.bench_function("wrap_content_key", |b| {
        b.iter(|| wrap_for_recipient(black_box(key.as_bytes()), &public).unwrap())
    });

    let wrapped = wrap_for_recipient(key.as_bytes(), &public).unwrap();
    c.bench_function("unwrap_content_key", |b| {
        b.iter(|| black_box(&wrapped).unwrap_key(&secret).unwrap())
    });
}

fn bench_symmetric(c: &mut Criterion) {
    let key = EncryptionKey::generate();
    let mut group = c.benchmark_group("symmetric");
    for size in [64usize, 1024, 16 * 1024] {
        let data = vec![7u8; size];
        group.bench_with_input(BenchmarkId::new("encrypt", size), &data, |b, data| {
            b.iter(|| symmetric_encrypt(black_box(data), &key).unwrap())
        });
        let sealed = symmetric_encrypt(&data, &key).unwrap();
        group.bench_with_input(BenchmarkId::new("decrypt", size), &sealed, |b, sealed| {
            b.iter(|| symmetric_decrypt(black_box(sealed), &key).unwrap())
        });
    }
    group.finish();
}

fn bench_kdf(c: &mut Criterion) {
    let salt = Salt::generate();
    let params = KdfParams::testing();
    c.bench_function("derive_key_testing_params", |b| {
        b.iter(|| derive_key(black_box(b"correct horse battery staple"), &salt, &params).unwrap())
    });
}

criterion_group!(benches, bench_wrap, bench_symmetric, bench_kdf);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use quantcoin::block::Block;
use quantcoin::transaction::Transaction;
use quantcoin::wallet::Wallet;

fn transactions(count: usize) -> Vec<Transaction> {
    let receiver = Wallet::create(Some("bench receiver")).address;
    (0..count)
        .map(|i| {
            let wallet = Wallet::create(Some(&format!("bench sender {i}")));
            let mut tx = Transaction::new(
                Some(wallet.address.clone()),
                vec![(None, 0.1), (Some(receiver.clone()), 1.0)],
            );
            tx.sign(&wallet).expect("bench wallets sign");
            tx
        })
        .collect()
}

fn merkle_root(c: &mut Criterion) {
    let author = Wallet::create(Some("bench author")).address;
    for count in [1, 16, 128] {
        let block = Block::new(author.clone(), transactions(count), None).unwrap();
        c.bench_function(&format!("merkle_root/{count}"), |b| {
            b.iter(|| block.merkle_root())
        });
    }
}

fn proof_of_work_window(c: &mut Criterion) {
    let author = Wallet::create(Some("bench author")).address;
    let block = Block::new(author, transactions(8), None).unwrap();
    c.bench_function("proof_of_work/window", |b| {
        b.iter_batched(
            || block.clone(),
            // Difficulty 32 never succeeds, so this measures a full window.
            |mut block| block.proof_of_work(32, 0, 101),
            BatchSize::SmallInput,
        )
    });
}

fn sign_and_verify(c: &mut Criterion) {
    let wallet = Wallet::create(Some("bench signer"));
    let receiver = Wallet::create(Some("bench receiver")).address;
    let unsigned = Transaction::new(Some(wallet.address.clone()), vec![(Some(receiver), 1.0)]);

    c.bench_function("transaction/sign", |b| {
        b.iter_batched(
            || unsigned.clone(),
            |mut tx| tx.sign(&wallet).expect("bench wallets sign"),
            BatchSize::SmallInput,
        )
    });

    let mut signed = unsigned;
    signed.sign(&wallet).expect("bench wallets sign");
    c.bench_function("transaction/verify", |b| b.iter(|| signed.verify()));
}

criterion_group!(benches, merkle_root, proof_of_work_window, sign_and_verify);
criterion_main!(benches);

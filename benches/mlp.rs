use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

use poly_sweep::{Mlp, ModelSpec, create_model, loss};

fn factory_model(width: usize, dropout_rate: f32, layer_norm: bool) -> Mlp {
    let spec = ModelSpec {
        input_dim: 1,
        output_dim: 1,
        width,
        dropout_rate,
        layer_norm,
    };
    create_model(&spec, &mut StdRng::seed_from_u64(0)).unwrap()
}

fn mlp_forward_bench(c: &mut Criterion) {
    for width in [64, 256] {
        let mlp = factory_model(width, 0.0, false);
        let mut scratch = mlp.scratch();
        let input = vec![0.1_f32; mlp.input_dim()];

        c.bench_function(&format!("mlp_forward_w{width}"), |b| {
            b.iter(|| {
                let out = mlp.forward(black_box(&input), &mut scratch);
                black_box(out);
            })
        });
    }
}

fn mlp_train_step_bench(c: &mut Criterion) {
    let mlp = factory_model(256, 0.5, true);
    let mut trainer = mlp.trainer();
    let mut rng = StdRng::seed_from_u64(1);
    let input = vec![0.1_f32; mlp.input_dim()];
    let target = vec![0.0_f32; mlp.output_dim()];

    c.bench_function("mlp_train_step_w256_dropout_layernorm", |b| {
        b.iter(|| {
            mlp.forward_train(black_box(&input), &mut trainer.scratch, &mut rng);
            loss::mse_backward(trainer.scratch.output(), &target, trainer.grads.d_output_mut());
            let d_input = mlp.backward(black_box(&input), &trainer.scratch, &mut trainer.grads);
            black_box(d_input);
        })
    });
}

criterion_group!(benches, mlp_forward_bench, mlp_train_step_bench);
criterion_main!(benches);

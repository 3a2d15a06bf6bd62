use std::path::Path;

use poly_sweep::polynomial::PolynomialTask;
use poly_sweep::sweep::{Configuration, output_path};
use poly_sweep::table::{ResultsTable, trial_count};
use poly_sweep::{History, Optimizer, OptimizerPreset};
use proptest::prelude::*;

fn configuration() -> impl Strategy<Value = Configuration> {
    (
        "sgd-[0-9]{1,4}",
        1usize..4096,
        prop_oneof![Just(0.0_f32), 0.01_f32..0.99],
        any::<bool>(),
    )
        .prop_map(|(name, width, dropout_rate, layer_norm)| Configuration {
            optimizer: OptimizerPreset::new(name, Optimizer::sgd(0.1)),
            width,
            dropout_rate,
            layer_norm,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Output paths depend on the configuration alone.
    #[test]
    fn prop_output_path_is_deterministic(c in configuration()) {
        let base = Path::new("output/polynomial");
        let a = output_path(base, "polynomial", &c);
        let b = output_path(base, "polynomial", &c.clone());
        prop_assert_eq!(&a, &b);
        prop_assert!(a.starts_with(base));

        let name = c.file_name("polynomial");
        prop_assert!(name.ends_with(".csv"));
        prop_assert_eq!(name.contains("-dropout"), c.dropout_rate > 0.0);
        prop_assert_eq!(name.ends_with("-layernorm.csv"), c.layer_norm);
    }

    /// Distinct widths never collide for otherwise equal configurations.
    #[test]
    fn prop_width_is_part_of_identity(c in configuration(), other in 1usize..4096) {
        prop_assume!(other != c.width);
        let moved = Configuration { width: other, ..c.clone() };
        let base = Path::new("out");
        prop_assert_ne!(output_path(base, "p", &c), output_path(base, "p", &moved));
    }

    /// Split sizes are disjoint and cover every generated sample.
    #[test]
    fn prop_split_partitions_samples(
        train_len in 1usize..40,
        val_len in 1usize..20,
        test_len in 1usize..20,
        input_dim in 1usize..4,
        seed in any::<u64>(),
    ) {
        let task = PolynomialTask { input_dim, train_len, val_len, test_len, seed, ..PolynomialTask::default() };
        let split = task.generate().unwrap();
        prop_assert_eq!(split.train.len(), train_len);
        prop_assert_eq!(split.val.len(), val_len);
        prop_assert_eq!(split.test.len(), test_len);
        prop_assert_eq!(split.len(), task.sample_count());

        // Concatenating the parts gives back one contiguous draw.
        let mut joined: Vec<f32> = split.train.inputs().as_flat().to_vec();
        joined.extend_from_slice(split.val.inputs().as_flat());
        joined.extend_from_slice(split.test.inputs().as_flat());
        prop_assert_eq!(joined.len(), task.sample_count() * input_dim);
    }

    /// A table with 2k+1 columns has exactly k trials.
    #[test]
    fn prop_trial_count_from_columns(k in 1usize..50) {
        prop_assert_eq!(trial_count(2 * k + 1).unwrap(), k);
        prop_assert!(trial_count(2 * k + 2).is_err());
    }

    /// Written tables read back with the same columns, rows and values.
    #[test]
    fn prop_table_round_trip(
        curves in prop::collection::vec(
            (prop::collection::vec(0.0_f32..10.0, 7), prop::collection::vec(0.0_f32..10.0, 7)),
            1..6,
        )
    ) {
        let mut table = ResultsTable::new(7);
        for (loss, val_loss) in &curves {
            table.push_trial(&History { loss: loss.clone(), val_loss: val_loss.clone() }).unwrap();
        }
        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();
        let back = ResultsTable::read_from(buf.as_slice()).unwrap();
        prop_assert_eq!(back, table);
    }
}

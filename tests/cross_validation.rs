use approx::assert_abs_diff_eq;
use ermkit::config::ModelConfig;
use ermkit::fit::FoldOptions;
use ermkit::losses::QuadLoss;
use ermkit::model::Model;
use ermkit::regularizers::QuadReg;
use ermkit::results::LossSummary;
use ermkit::source::{Table, TableSource};
use ndarray::Array1;
use std::io::Write;
use tempfile::NamedTempFile;

fn ten_row_source() -> TableSource {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "a,b,target").unwrap();
    for i in 0..10 {
        let a = i as f64;
        let b = (i % 3) as f64;
        writeln!(file, "{a},{b},{}", 1.0 + 2.0 * a - b).unwrap();
    }
    let table = Table::from_csv_path(file.path(), b',').unwrap();
    TableSource::new(table, vec!["target".to_string()]).unwrap()
}

fn model() -> Model<TableSource> {
    let config = ModelConfig {
        seed: Some(5),
        embed_all: true,
        ..ModelConfig::default()
    };
    Model::new(ten_row_source(), Box::new(QuadLoss), Box::new(QuadReg), config).unwrap()
}

#[test]
fn five_folds_over_ten_rows() {
    let mut model = model();
    let folded = model.split_folds(5, false, false).unwrap();
    assert_eq!(folded.folds.len(), 5);
    for fold in &folded.folds {
        assert_eq!(fold.held_out.len(), 2);
        assert_eq!(fold.kept.len(), 8);
    }

    let results = model.train_folds(&FoldOptions::default()).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results.folds().len(), 5);
    // Noise-free linear data: every fold fits and predicts almost exactly.
    for fold in results.folds() {
        assert!(fold.train_loss() < 1e-6);
        assert!(fold.test_loss() < 1e-6);
    }
    assert_eq!(model.data_reads(), 1);
    assert!(model.is_trained());
}

#[test]
fn fold_held_out_sets_cover_every_row_once() {
    let mut model = model();
    let folded = model.split_folds(5, false, false).unwrap();
    let mut seen: Vec<usize> = folded
        .folds
        .iter()
        .flat_map(|fold| fold.held_out.iter().copied())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn resplit_draws_new_folds() {
    let mut model = model();
    model.train_folds(&FoldOptions::default()).unwrap();
    model
        .train_folds(&FoldOptions {
            resplit: true,
            ..FoldOptions::default()
        })
        .unwrap();
    assert_eq!(model.data_reads(), 2);
}

#[test]
fn fold_results_summarize_in_fold_order() {
    let mut model = model();
    let results = model
        .train_folds(&FoldOptions {
            lambda: 0.5,
            nfolds: 2,
            resplit: false,
        })
        .unwrap();
    let tests = Array1::from(results.test_losses());
    assert_eq!(tests.len(), 2);
    assert_abs_diff_eq!(results.mean_test_loss(), tests.mean().unwrap(), epsilon = 1e-12);
    assert_abs_diff_eq!(results.lambda_opt(), 0.5);
    assert!(model.status().contains("2-fold cross-validation"));
}

#[test]
fn too_many_folds_is_an_error() {
    let mut model = model();
    assert!(model.split_folds(11, false, false).is_err());
    assert!(model.split_folds(1, false, false).is_err());
}

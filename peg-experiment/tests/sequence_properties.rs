use peg_core::{Grouping, TrialInstance, TrialTable};
use peg_experiment::{
    CompileOptions, Input, RunConfig, ScriptedSource, TrialRuntime, compile, expected_len,
    run_to_completion,
};
use peg_table::{AuthoredRow, ValidationOptions, validate_rows};
use peg_timing::ManualTimer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;

fn table(rows: &[[&str; 7]]) -> TrialTable {
    let rows: Vec<AuthoredRow> = rows.iter().map(|r| AuthoredRow::from_cells(*r)).collect();
    let options = ValidationOptions {
        check_images: false,
        ..ValidationOptions::default()
    };
    validate_rows(&rows, &options).unwrap()
}

fn stimuli(sequence: &[TrialInstance]) -> Vec<String> {
    sequence.iter().map(|t| t.spec.stimulus.clone()).collect()
}

fn example() -> TrialTable {
    table(&[
        ["1", "", "intro A", "space", "NA", "", ""],
        ["1", "", "intro B", "space", "NA", "", ""],
        ["101", "2", "S101", "f,j", "1000", "f", ""],
        ["102", "", "S102", "f,j", "1000", "j", ""],
    ])
}

#[test]
fn worked_example_has_six_trials() {
    let table = example();
    let mut rng = StdRng::seed_from_u64(11);
    let sequence = compile(&table, CompileOptions::default(), &mut rng).unwrap();

    assert_eq!(sequence.len(), 6);
    assert_eq!(expected_len(&table, 1), 6);
    assert_eq!(stimuli(&sequence[..2]), vec!["intro A", "intro B"]);
    for pair in sequence[2..].chunks(2) {
        let mut names = stimuli(pair);
        names.sort();
        assert_eq!(names, vec!["S101", "S102"]);
    }
    assert!(matches!(
        sequence[4].grouping,
        Grouping::Sectioned {
            section: 1,
            section_repetition: 2
        }
    ));
}

#[test]
fn length_scales_with_repetitions() {
    let table = table(&[
        ["1", "3", "a", "NA", "10", "", ""],
        ["1", "", "b", "NA", "10", "", ""],
        ["201", "4", "c", "NA", "10", "", ""],
        ["250", "9", "d", "NA", "10", "", ""],
        ["301", "", "e", "NA", "10", "", ""],
    ]);
    for repetitions in 1..=3 {
        let options = CompileOptions {
            repetitions,
            randomize_sections: true,
        };
        let mut rng = StdRng::seed_from_u64(repetitions as u64);
        let sequence = compile(&table, options, &mut rng).unwrap();
        let per_pass = 2 * 3 + 2 * 4 + 1;
        assert_eq!(sequence.len(), per_pass * repetitions as usize);
        assert_eq!(expected_len(&table, repetitions), sequence.len());
    }
}

#[test]
fn fixed_blocks_never_move() {
    let table = table(&[
        ["1", "2", "f1", "NA", "10", "", ""],
        ["1", "", "f2", "NA", "10", "", ""],
        ["1", "", "f3", "NA", "10", "", ""],
        ["101", "", "s1", "NA", "10", "", ""],
        ["101", "", "s2", "NA", "10", "", ""],
        ["101", "", "s3", "NA", "10", "", ""],
    ]);
    let options = CompileOptions {
        repetitions: 2,
        randomize_sections: true,
    };
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let sequence = compile(&table, options, &mut rng).unwrap();
        let fixed: Vec<String> = sequence
            .iter()
            .filter(|t| t.spec.block == 1)
            .map(|t| t.spec.stimulus.clone())
            .collect();
        assert_eq!(fixed, ["f1", "f2", "f3"].repeat(4));
    }
}

#[test]
fn unrandomized_sections_keep_authored_order() {
    let table = table(&[
        ["103", "2", "c", "NA", "10", "", ""],
        ["101", "", "a", "NA", "10", "", ""],
        ["101", "", "b", "NA", "10", "", ""],
    ]);
    let mut config = RunConfig {
        randomize_sections: false,
        seed: Some(5),
        ..RunConfig::default()
    };
    config.repetitions = 2;
    let sequence = compile(&table, config.compile_options(), &mut config.rng()).unwrap();
    // Block 101 leads, so its repeat count (1) applies.
    assert_eq!(stimuli(&sequence), vec!["c", "a", "b", "c", "a", "b"]);
}

#[test]
fn randomized_sections_get_permuted() {
    let table = table(&[
        ["101", "", "a", "NA", "10", "", ""],
        ["101", "", "b", "NA", "10", "", ""],
        ["102", "", "c", "NA", "10", "", ""],
        ["102", "", "d", "NA", "10", "", ""],
    ]);
    let authored = vec!["a", "b", "c", "d"];
    let permuted = (0..200)
        .filter(|seed| {
            let mut rng = StdRng::seed_from_u64(*seed);
            let sequence = compile(&table, CompileOptions::default(), &mut rng).unwrap();
            stimuli(&sequence) != authored
        })
        .count();
    // 1 in 24 orders is the identity.
    assert!(permuted > 150, "only {permuted} of 200 runs were permuted");
}

#[test]
fn compiled_example_runs_end_to_end() {
    let table = example();
    // Section trials are answered well after onset, so keys stay open.
    let config = RunConfig {
        seed: Some(3),
        key_grace_ms: None,
        ..RunConfig::default()
    };
    let sequence = compile(&table, config.compile_options(), &mut config.rng()).unwrap();
    let order = stimuli(&sequence);

    let timer = ManualTimer::new();
    let mut runtime = TrialRuntime::new(sequence, timer.clone(), config.runtime_settings());
    let mut script = vec![
        (Duration::from_millis(100), Input::Key("Space".into())),
        (Duration::from_millis(200), Input::Key(" ".into())),
    ];
    // Answer every section trial with "f" 250 ms after the previous press.
    for i in 0..4 {
        script.push((Duration::from_millis(450 + 250 * i), Input::Key("F".into())));
    }
    let mut source = ScriptedSource::new(timer, script);

    let results = run_to_completion(&mut runtime, &mut source).unwrap();
    assert_eq!(results.len(), 6);
    for (result, stimulus) in results.iter().zip(&order) {
        assert_eq!(&result.stimulus, stimulus);
        assert!(!result.timed_out);
    }
    for result in &results[2..] {
        let expected = result.stimulus == "S101";
        assert_eq!(result.is_correct, Some(expected));
        assert_eq!(result.response_time_ms, 250.0);
    }
    assert_eq!(results[0].is_correct, None);
    assert_eq!(results[0].actual_response.as_deref(), Some(" "));
}

//! Pins the external command contract: what exactly gets executed for
//! servers and workers is asserted through the specs the fake manager
//! records during a real run.

use std::time::Duration;

use showdown_harness::prelude::*;
use showdown_harness::worker::log_path;

use crate::fake::FakeProcessManager;

mod fake;

fn fast_config() -> Configuration {
    Configuration::new()
        .with_verbose(false)
        .with_warm_up(Duration::ZERO)
        .with_stagger(Duration::ZERO)
        .with_poll_interval(Duration::from_millis(1))
}

fn run(manager: &FakeProcessManager, config: Configuration, experiment: Experiment) {
    Orchestrator::new(manager.clone(), config)
        .run_with_token(experiment, CancelToken::new())
        .unwrap();
}

#[test]
fn server_command_is_detached_silenced_and_insecure() {
    let manager = FakeProcessManager::new();
    let config = fast_config().with_server_dir("/opt/pokemon-showdown");
    let experiment = Experiment::builder(WorkerMode::Eval)
        .add_slot(TeamSelector::Count(4), 7200, "cuda:0")
        .build()
        .unwrap();
    run(&manager, config, experiment);

    let server = &manager.server_specs()[0];
    assert_eq!(server.program, "node");
    assert_eq!(server.args, vec!["pokemon-showdown", "start", "7200", "--no-security"]);
    assert_eq!(server.cwd.as_deref(), Some(std::path::Path::new("/opt/pokemon-showdown")));
    assert_eq!(server.output, OutputMode::Suppress);
    assert!(server.detach);
}

#[test]
fn train_command_carries_all_slot_parameters() {
    let manager = FakeProcessManager::new();
    let config = fast_config();
    let options = TrainOptions::new(LearningStyle::SelfPlay)
        .with_behavior_clone(true)
        .with_mirror_match(false)
        .with_num_frames(3)
        .with_num_envs(8)
        .with_num_eval_workers(2);
    let experiment = Experiment::builder(WorkerMode::Train(options))
        .with_regulation("H")
        .with_run_id(2)
        .add_slot(TeamSelector::Count(4), 7201, "cuda:1")
        .build()
        .unwrap();
    run(&manager, config.clone(), experiment);

    let worker = &manager.worker_specs()[0];
    assert_eq!(worker.program, "python");
    assert_eq!(
        worker.args,
        vec![
            "train.py",
            "--reg",
            "H",
            "--run_id",
            "2",
            "--num_teams",
            "4",
            "--port",
            "7201",
            "--device",
            "cuda:1",
            "--num_envs",
            "8",
            "--num_eval_workers",
            "2",
            "--log_level",
            "25",
            "--self_play",
            "--behavior_clone",
            "--no_mirror_match",
            "--num_frames",
            "3",
        ]
    );
    assert_eq!(worker.output, OutputMode::LogFile(log_path(&config, 7201)));
    assert!(!worker.detach);
}

#[test]
fn matchup_solving_passes_full_team_strings() {
    let manager = FakeProcessManager::new();
    let options = TrainOptions::new(LearningStyle::FictitiousPlay);
    let experiment = Experiment::builder(WorkerMode::Train(options))
        .add_slot(
            TeamSelector::Pair {
                team1: "Koraidon @ Life Orb\nAbility: Orichalcum Pulse".to_string(),
                team2: "Miraidon @ Choice Specs\nAbility: Hadron Engine".to_string(),
                results_suffix: "koraidon-vs-miraidon".to_string(),
            },
            7200,
            "cuda:0",
        )
        .build()
        .unwrap();
    run(&manager, fast_config(), experiment);

    let args = &manager.worker_specs()[0].args;
    let team1 = args.iter().position(|a| a == "--team1").unwrap();
    assert!(args[team1 + 1].starts_with("Koraidon"));
    let team2 = args.iter().position(|a| a == "--team2").unwrap();
    assert!(args[team2 + 1].starts_with("Miraidon"));
    let suffix = args.iter().position(|a| a == "--results_suffix").unwrap();
    assert_eq!(args[suffix + 1], "koraidon-vs-miraidon");
    assert!(args.contains(&"--fictitious_play".to_string()));
    assert!(!args.contains(&"--num_teams".to_string()));
}

#[test]
fn team_indices_replace_the_team_count() {
    let manager = FakeProcessManager::new();
    let experiment = Experiment::builder(WorkerMode::Train(TrainOptions::new(
        LearningStyle::SelfPlay,
    )))
    .add_slot(TeamSelector::Indices(vec![0, 3, 7]), 7200, "cuda:0")
    .build()
    .unwrap();
    run(&manager, fast_config(), experiment);

    let args = &manager.worker_specs()[0].args;
    let teams = args.iter().position(|a| a == "--teams").unwrap();
    assert_eq!(&args[teams + 1..teams + 4], &["0", "3", "7"]);
    assert!(!args.contains(&"--num_teams".to_string()));
}

#[test]
fn eval_command_is_minimal() {
    let manager = FakeProcessManager::new();
    let experiment = Experiment::builder(WorkerMode::Eval)
        .add_slot(TeamSelector::Count(16), 7200, "cuda:0")
        .build()
        .unwrap();
    run(&manager, fast_config(), experiment);

    let worker = &manager.worker_specs()[0];
    assert_eq!(
        worker.args,
        vec!["eval.py", "--reg", "G", "--num_teams", "16", "--port", "7200", "--device", "cuda:0"]
    );
}

#[test]
fn program_locations_are_configurable() {
    let manager = FakeProcessManager::new();
    let config = fast_config()
        .with_python("python3")
        .with_train_script("vgc_bench/train.py")
        .with_worker_dir("/srv/vgc-bench")
        .with_log_dir("/srv/vgc-bench/logs");
    let experiment = Experiment::builder(WorkerMode::Train(TrainOptions::new(
        LearningStyle::DoubleOracle,
    )))
    .add_slot(TeamSelector::Count(1), 7300, "cpu")
    .build()
    .unwrap();
    run(&manager, config, experiment);

    let worker = &manager.worker_specs()[0];
    assert_eq!(worker.program, "python3");
    assert_eq!(worker.args[0], "vgc_bench/train.py");
    assert_eq!(worker.cwd.as_deref(), Some(std::path::Path::new("/srv/vgc-bench")));
    assert_eq!(
        worker.output,
        OutputMode::LogFile("/srv/vgc-bench/logs/debug7300.log".into())
    );
}

//! Policy-level behavior: terminal handling, locked battery, trace replay.

mod common;

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use plaza_sim::data::HOURS_PER_YEAR;
use plaza_sim::env::{ACTION_DIM, Action};
use plaza_sim::error::PlazaError;
use plaza_sim::io::export::write_timeseries;
use plaza_sim::runner::{Policy, load_action_trace, run_episode};

#[test]
fn terminal_step_flags_and_refuses_overrun() {
    let mut env = common::default_env();
    env.reset(common::SEED);
    let a = Action::baseline();

    for h in 0..HOURS_PER_YEAR - 1 {
        let out = env.step(&a).unwrap();
        assert!(!out.terminated, "terminated early at hour {h}");
    }
    let last = env.step(&a).unwrap();
    assert!(last.terminated);

    assert!(matches!(
        env.step(&a),
        Err(PlazaError::EpisodeComplete { hour: 8760 })
    ));

    // Reset restores a stepable episode.
    env.reset(common::SEED);
    assert!(env.step(&a).is_ok());
}

#[test]
fn locked_battery_carries_soc_unchanged_all_year() {
    let mut env = common::default_env();
    env.reset(common::SEED);
    let locked = Action::bess_locked();
    let initial = env.soc_kwh();
    for _ in 0..HOURS_PER_YEAR {
        let out = env.step(&locked).unwrap();
        assert_eq!(out.result.bess_charge_in, 0.0);
        assert_eq!(out.result.bess_discharge_out, 0.0);
    }
    assert_eq!(env.soc_kwh(), initial);
}

#[test]
fn all_ones_trace_replays_identically_to_baseline() {
    let dir = std::env::temp_dir().join(format!("plaza-sim-trace-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path: PathBuf = dir.join("ones.csv");
    let mut f = fs::File::create(&path).unwrap();
    let row = vec!["1.0"; ACTION_DIM].join(",");
    for _ in 0..HOURS_PER_YEAR {
        writeln!(f, "{row}").unwrap();
    }
    drop(f);

    let trace = Policy::resolve(path.to_str().unwrap()).unwrap();
    let mut env1 = common::default_env();
    let mut env2 = common::default_env();
    let from_trace = run_episode(&mut env1, &trace, common::SEED).unwrap();
    let from_builtin = run_episode(&mut env2, &Policy::Baseline, common::SEED).unwrap();

    let mut buf1 = Vec::new();
    let mut buf2 = Vec::new();
    write_timeseries(&from_trace.records, &mut buf1).unwrap();
    write_timeseries(&from_builtin.records, &mut buf2).unwrap();
    assert_eq!(buf1, buf2);
}

#[test]
fn short_trace_is_rejected() {
    let dir = std::env::temp_dir().join(format!("plaza-sim-shorttrace-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("short.csv");
    let mut f = fs::File::create(&path).unwrap();
    let row = vec!["1.0"; ACTION_DIM].join(",");
    for _ in 0..100 {
        writeln!(f, "{row}").unwrap();
    }
    drop(f);

    let err = load_action_trace(&path);
    assert!(err.is_err());
}

#[test]
fn grid_charging_preset_pays_for_battery_energy() {
    let baseline_cfg = common::default_config();
    let mut grid_cfg = common::default_config();
    grid_cfg.bess.grid_charging = true;

    let mut env1 = common::env_with_config(&baseline_cfg);
    let mut env2 = common::env_with_config(&grid_cfg);
    let plain = run_episode(&mut env1, &Policy::Baseline, common::SEED).unwrap();
    let topped = run_episode(&mut env2, &Policy::Baseline, common::SEED).unwrap();

    assert_eq!(plain.metrics.grid_to_bess_kwh, 0.0);
    assert!(topped.metrics.grid_to_bess_kwh > 0.0);
    assert!(topped.metrics.grid_import_kwh > plain.metrics.grid_import_kwh);
}

#[test]
fn full_charge_counters_accumulate_on_synthetic_year() {
    let mut env = common::default_env();
    let out = run_episode(&mut env, &Policy::Baseline, common::SEED).unwrap();
    // Every synthetic day schedules one session per socket; most finish.
    assert!(
        out.metrics.motos_fully_charged > 0,
        "expected some motos fully charged"
    );
    assert!(
        out.metrics.mototaxis_fully_charged > 0,
        "expected some mototaxis fully charged"
    );
}

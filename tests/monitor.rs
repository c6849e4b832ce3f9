mod common;

use common::{Fault, SimulatedChain};
use ltc6813_lib::config::MonitorConfig;
use ltc6813_lib::protocol::commands;
use ltc6813_lib::{Chain, LatestSnapshot, Monitor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADCVSC_FILTERED_DCP: u16 = commands::ADCVSC + 0x180 + 0x10;

fn monitor(length: usize) -> (SimulatedChain, Arc<LatestSnapshot>, Monitor<SimulatedChain>) {
    let sim = SimulatedChain::new(length);
    let latest = Arc::new(LatestSnapshot::new());
    let monitor = Monitor::new(
        Arc::new(Chain::new(sim.clone(), length)),
        Arc::clone(&latest),
    );
    (sim, latest, monitor)
}

#[test]
fn discovery_initialises_and_takes_a_first_measurement() {
    let (sim, latest, mut monitor) = monitor(2);
    sim.state().devices[0].cells[0] = 33000;

    assert_eq!(monitor.discover().unwrap(), 2);
    assert_eq!(monitor.devices(), 2);
    assert!(latest.latest().is_none());

    let sent = sim.state().commands();
    assert_eq!(sent[..3], [commands::WRCFGA, commands::WRCFGB, commands::WRCFGB]);
    assert!(sent.contains(&commands::RDAUXA));
    assert_eq!(monitor.chain().cell_volts(0)[0], 33000);
}

#[test]
fn failed_initialisation_stops_discovery() {
    let (sim, latest, mut monitor) = monitor(2);
    sim.state().fail(commands::WRCFGA, Fault::Transport, 1);

    assert!(monitor.discover().is_err());
    assert_eq!(monitor.devices(), 0);

    sim.state().fail(commands::WRCFGA, Fault::Transport, 1);
    assert!(monitor.perform_measurements().is_err());
    assert!(latest.latest().is_none());
}

#[test]
fn single_failure_is_absorbed_by_the_retry() {
    let (sim, latest, mut monitor) = monitor(1);
    monitor.discover().unwrap();
    sim.state().fail(commands::RDCVA, Fault::CorruptPec(0), 1);

    monitor.perform_measurements().unwrap();
    assert_eq!(monitor.errors(), 0);
    assert_eq!(monitor.devices(), 1);

    let sent = sim.state().commands();
    let conversions = sent.iter().filter(|&&c| c == ADCVSC_FILTERED_DCP).count();
    assert_eq!(conversions, 2);
    assert_eq!(latest.latest().unwrap().0, 1);
}

#[test]
fn repeated_failure_forces_rediscovery() {
    let (sim, latest, mut monitor) = monitor(2);
    monitor.discover().unwrap();
    sim.state().fail(ADCVSC_FILTERED_DCP, Fault::Transport, 2);

    monitor.perform_measurements().unwrap();
    assert_eq!(monitor.errors(), 1);
    assert_eq!(monitor.devices(), 0);
    let (generation, snapshot) = latest.latest().unwrap();
    assert_eq!(generation, 1);
    assert!(snapshot.voltage_error.starts_with("Voltage Error : "));

    sim.state().frames.clear();
    monitor.perform_measurements().unwrap();
    assert_eq!(monitor.devices(), 2);
    assert_eq!(monitor.errors(), 1);
    assert_eq!(sim.state().commands()[0], commands::WRCFGA);
    assert_eq!(latest.latest().unwrap().0, 2);
}

#[test]
fn corrupted_frames_leave_the_chain_discovered() {
    let (sim, latest, mut monitor) = monitor(2);
    monitor.discover().unwrap();
    sim.state().fail(commands::RDCVA, Fault::CorruptPec(1), 2);

    monitor.perform_measurements().unwrap();
    assert_eq!(monitor.errors(), 1);
    assert_eq!(monitor.devices(), 2);
    let (_, snapshot) = latest.latest().unwrap();
    assert!(snapshot.voltage_error.starts_with("Voltage Error : PEC error"));

    sim.state().frames.clear();
    monitor.perform_measurements().unwrap();
    assert!(!sim.state().commands().contains(&commands::WRCFGA));
}

#[test]
fn every_cycle_publishes_a_snapshot() {
    let (sim, latest, mut monitor) = monitor(2);
    {
        let mut state = sim.state();
        state.devices[0].cells[..3].copy_from_slice(&[30000, 31000, 32000]);
        state.devices[0].sum_of_cells = 1000;
    }
    monitor.perform_measurements().unwrap();
    monitor.perform_measurements().unwrap();

    let (generation, snapshot) = latest.latest().unwrap();
    assert_eq!(generation, 2);
    assert_eq!(snapshot.voltages[0].len(), 38);
    assert_eq!(snapshot.voltages[0][..3], [30000, 31000, 32000]);
    assert_eq!(snapshot.voltage_error, "");
}

#[test]
fn run_returns_once_stopped() {
    let (_sim, latest, mut monitor) = monitor(1);
    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let config = MonitorConfig {
        interval: Duration::from_millis(10),
    };
    monitor.run(&config, &stop).unwrap();
    stopper.join().unwrap();
    assert!(latest.latest().unwrap().0 >= 1);
}

#[test]
fn run_does_nothing_when_already_stopped() {
    let (sim, latest, mut monitor) = monitor(1);
    monitor
        .run(&MonitorConfig::default(), &AtomicBool::new(true))
        .unwrap();
    assert!(sim.state().frames.is_empty());
    assert!(latest.latest().is_none());
}

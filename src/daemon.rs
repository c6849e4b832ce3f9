use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use ltc6813_lib::config::MonitorConfig;
use ltc6813_lib::transport::Transport;
use ltc6813_lib::{Chain, LatestSnapshot, Monitor, Snapshot};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{commandline, mqtt};

fn publish_simple_format(
    publisher: &mut mqtt::MqttPublisher,
    base_topic: &str,
    value: &serde_json::Value,
) {
    fn publish_recursive(
        publisher: &mut mqtt::MqttPublisher,
        topic: &str,
        val: &serde_json::Value,
    ) {
        match val {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    let sub_topic = format!("{topic}/{k}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    let sub_topic = format!("{topic}/{i}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::String(s) => {
                if let Err(e) = publisher.publish(topic, s) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Number(n) => {
                if let Err(e) = publisher.publish(topic, &n.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Bool(b) => {
                if let Err(e) = publisher.publish(topic, &b.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Null => {
                // Do not publish null values
            }
        }
    }
    publish_recursive(publisher, base_topic, value);
}

fn output_snapshot(
    output: &commandline::DaemonOutput,
    publisher: Option<&mut mqtt::MqttPublisher>,
    snapshot: &Snapshot,
) -> Result<()> {
    match output {
        commandline::DaemonOutput::Console => {
            println!("--- Snapshot at {} ---", chrono::Local::now().to_rfc3339());
            println!("{}", serde_json::to_string(snapshot)?);
            println!(
                "Active battery voltage: {:.2}V",
                snapshot.active_battery_voltage()
            );
            println!("--------------------------");
        }
        commandline::DaemonOutput::Mqtt { format, .. } => {
            let Some(publisher) = publisher else {
                warn!("MQTT output selected, but publisher is not initialized. Skipping publish.");
                return Ok(());
            };
            match format {
                commandline::MqttFormat::Json => {
                    let payload = json!({
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "battery": snapshot,
                    });
                    let json_payload = serde_json::to_string(&payload)?;
                    info!("MQTT output: Attempting to publish data: {json_payload}");
                    let topic = publisher.topic().to_string();
                    if let Err(e) = publisher.publish(&topic, &json_payload) {
                        error!("Failed to publish data to MQTT: {e:?}");
                    } else {
                        info!("Successfully published data to MQTT.");
                    }
                }
                commandline::MqttFormat::Simple => {
                    let base_topic = publisher.topic().to_string();
                    let value = serde_json::to_value(snapshot)?;
                    publish_simple_format(publisher, &base_topic, &value);
                }
            }
        }
    }
    Ok(())
}

/// Measures on a worker thread and outputs every snapshot it publishes. Only returns
/// when the chain cannot be (re)initialised.
pub fn run<T: Transport + 'static>(
    chain: Chain<T>,
    output: commandline::DaemonOutput,
    monitor_config: MonitorConfig,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, {monitor_config:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;

    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher =
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?;
        info!("MQTT Publisher created successfully.");
        mqtt_publisher = Some(publisher);
    }

    let latest = Arc::new(LatestSnapshot::new());
    let mut monitor = Monitor::new(Arc::new(chain), Arc::clone(&latest));
    monitor
        .discover()
        .with_context(|| "Cannot initialise the LTC6813 chain")?;

    let timeout = monitor_config.interval.max(Duration::from_secs(1)) * 2;
    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("measure".into())
            .spawn(move || monitor.run(&monitor_config, &stop))
            .with_context(|| "Cannot start measurement thread")?
    };

    let mut seen = 0;
    let result = loop {
        if worker.is_finished() {
            break Ok(());
        }
        let Some((generation, snapshot)) = latest.wait_newer_timeout(seen, timeout) else {
            continue;
        };
        if generation > seen + 1 {
            warn!("Skipped {} snapshots", generation - seen - 1);
        }
        seen = generation;
        if let Err(e) = output_snapshot(&output, mqtt_publisher.as_mut(), &snapshot) {
            break Err(e);
        }
    };

    stop.store(true, Ordering::Relaxed);
    let measured = worker
        .join()
        .map_err(|_| anyhow!("Measurement thread panicked"))?;
    measured.with_context(|| "Cannot reinitialise the LTC6813 chain")?;
    result
}

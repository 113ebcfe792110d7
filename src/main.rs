#![warn(clippy::pedantic)]
#![warn(clippy::all)]
#![allow(clippy::cast_precision_loss)]

use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

use async_std::task;
use chrono::Local;

use fastchic::configs;

fn main() {
    let config_path = configs::find_config_file(Path::new("config.toml"))
        .expect("no config.toml found next to the executable or in the working directory");
    println!("Reading config file {}", config_path.display());
    let cfg_text = read_to_string(&config_path).expect("Failed to open config file!");
    let cfg: toml::Value = toml::from_str(&cfg_text).expect("Failed to parse config file");

    let mut straight = configs::straight_from_config(&cfg)
        .expect("Failed to construct the straight from config file");
    let mut comms = task::block_on(configs::comms_from_config(&cfg))
        .expect("Failed to construct sockets from config file");
    let snapshot_path = configs::snapshot_path(&cfg);
    let frame_interval = Duration::from_millis(configs::frame_interval_ms(&cfg));

    if snapshot_path.exists() {
        match read_to_string(&snapshot_path)
            .map_err(|e| e.to_string())
            .and_then(|text| toml::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(snapshot) => {
                straight.restore(snapshot);
                println!(
                    "[{}] restored tuning snapshot from {}",
                    Local::now(),
                    snapshot_path.display()
                );
            }
            Err(e) => eprintln!(
                "[{}] ignoring snapshot {}: {}",
                Local::now(),
                snapshot_path.display(),
                e
            ),
        }
    }

    println!(
        "[{}] publishing frames on port {}, answering commands on port {}",
        Local::now(),
        comms.data_port(),
        comms.command_port()
    );
    println!("Entering main loop...");
    task::block_on(async {
        loop {
            straight.cycle_counter += 1;
            let t = straight.cycle_counter as f64;

            match straight.step(t) {
                Ok(frame) => {
                    if comms.should_publish(straight.cycle_counter) {
                        if let Err(e) = comms.publish_frame(&straight, &frame).await {
                            eprintln!(
                                "[{}] Failed to publish frame: error [{}]",
                                Local::now(),
                                e
                            );
                        }
                    }
                }
                Err(e) => {
                    eprintln!("[{}] skipping frame: {}", Local::now(), e);
                }
            }

            while let Some(request) = comms
                .handle_socket_request(&mut straight, &snapshot_path)
                .await
            {
                println!("[{}] Handled socket request <{}>", Local::now(), request);
            }

            task::sleep(frame_interval).await;
        }
    });
}

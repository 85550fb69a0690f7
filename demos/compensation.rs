use std::env;
use std::fs::File;
use std::io::BufReader;

use anyhow::{bail, Context, Result};
use mi48::{discovery, flash, CalibrationRecord};

/// Write per-module compensation parameters into the user flash.
///
/// Usage: compensation <params.csv> [--reset]
///
/// The file holds one `serial,p0,p1,p2,p3` record per line; missing
/// trailing parameters default to zero. `--reset` clears all four slots
/// to zero instead.
fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        bail!("usage: compensation <params.csv> [--reset]");
    };
    let reset = args.iter().any(|a| a == "--reset");

    let mut camera = discovery::bind_first().context("discovering sensor")?;
    let serial = camera.camera_info().serial.clone();
    println!("{}", camera.camera_info());

    let record = if reset {
        println!("resetting compensation parameters for {}", serial);
        CalibrationRecord::default()
    } else {
        let file = File::open(path).with_context(|| format!("opening {}", path))?;
        match flash::find_record(BufReader::new(file), &serial)? {
            Some(record) => record,
            None => bail!("no parameters found for {} in {}", serial, path),
        }
    };
    println!(
        "writing parameters: {}",
        record
            .0
            .iter()
            .map(|p| format!("{:.4}", p))
            .collect::<Vec<_>>()
            .join("  ")
    );

    let read_back = camera.with_user_flash(|user_flash| {
        user_flash.store(record)?;
        user_flash.read()
    })?;
    println!(
        "verified:           {}",
        read_back
            .0
            .iter()
            .map(|p| format!("{:.4}", p))
            .collect::<Vec<_>>()
            .join("  ")
    );
    // The store is relocked by the bracket, so address 0x00 reads as the
    // erased sentinel again for the EVK-vs-module hardware probe.
    camera.close();
    Ok(())
}

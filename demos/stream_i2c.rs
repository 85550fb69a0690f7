use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use linux_embedded_hal::I2cdev;
use mi48::{I2cTransport, Mi48, SyncStrategy};

/// Stream over an I2C-only header, polling the status register for frame
/// boundaries (this link has no DATA_READY signal).
///
/// Usage: stream_i2c [I2C_BUS] [ADDRESS]
fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let bus_path = args.get(1).map(String::as_str).unwrap_or("/dev/i2c-1");
    let address: u8 = match args.get(2) {
        Some(raw) if raw.starts_with("0x") => u8::from_str_radix(&raw[2..], 16)?,
        Some(raw) => raw.parse()?,
        // ADDR pin tied low
        None => 0x40,
    };

    let bus = I2cdev::new(bus_path).with_context(|| format!("opening {}", bus_path))?;
    let transport = I2cTransport::new(bus, address);
    let mut camera = Mi48::with_sync(transport, SyncStrategy::polling())?;
    println!("{}", camera.camera_info());

    camera.set_fps(5.0)?;
    camera.start()?;
    let read_timeout = 2 * camera.nominal_frame_period();
    for _ in 0..25 {
        if let Some(frame) = camera.read(read_timeout)? {
            let (cols, rows) = frame.shape();
            let center = frame
                .sample(cols / 2, rows / 2)
                .map(mi48::frame::raw_to_celsius)
                .unwrap_or(f32::NAN);
            println!(
                "frame {:5}  die {:5.1} C  centre {:5.1} C",
                frame.header().frame_counter,
                frame.header().senxor_temperature(),
                center,
            );
        }
    }

    camera.stop_with_timeouts(Duration::from_millis(250), Duration::from_millis(1200))?;
    camera.close();
    Ok(())
}

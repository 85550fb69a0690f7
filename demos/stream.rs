use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use mi48::{discovery, FilterControl, Mi48, UsbSerialTransport};

/// Stream frames from a sensor and print per-frame statistics.
///
/// Usage: stream [PORT] [FPS]
///
/// With no PORT, the single attached sensor is used.
fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let port = args.get(1).filter(|a| a.as_str() != "-");
    let fps: f32 = match args.get(2) {
        Some(raw) => raw.parse().context("FPS must be a number")?,
        None => 9.0,
    };

    let mut camera = match port {
        Some(port) => {
            let transport = UsbSerialTransport::open(port)
                .with_context(|| format!("opening {}", port))?;
            Mi48::new(transport)?
        }
        None => discovery::bind_first().context("discovering sensor")?,
    };
    println!("{}", camera.camera_info());

    let divisor = camera.set_fps(fps)?;
    // Unity sensitivity enhancement; the factory per-pixel calibration is
    // enough for most applications.
    camera.regwrite(mi48::register::SENS_FACTOR, 0x64, 1)?;
    if camera.filters_available() {
        camera.set_f1_temporal(true)?;
    }
    println!("streaming at divisor {} (~{:.1} FPS)", divisor, mi48::BASE_FRAME_RATE_HZ / divisor as f32);

    camera.start()?;
    let read_timeout = 2 * camera.nominal_frame_period();
    for _ in 0..100 {
        let frame = match camera.read(read_timeout)? {
            Some(frame) => frame,
            None => continue,
        };
        let celsius = frame.to_celsius();
        let (mut min, mut max, mut sum) = (f32::MAX, f32::MIN, 0.0f32);
        for &t in &celsius {
            min = min.min(t);
            max = max.max(t);
            sum += t;
        }
        let header = frame.header();
        println!(
            "frame {:5}  die {:5.1} C  min {:5.1}  max {:5.1}  avg {:5.1}",
            header.frame_counter,
            header.senxor_temperature(),
            min,
            max,
            sum / celsius.len() as f32,
        );
    }

    camera.stop_with_timeouts(Duration::from_millis(250), Duration::from_millis(1200))?;
    camera.close();
    Ok(())
}

use std::env;
use std::fs::File;
use std::io::{BufWriter, Read, Write};

use pni_compass::{CompassEvent, FrameDecoder};

/// Read size used when replaying the capture through the decoder, roughly
/// what a serial read returns at 115200 baud.
const CHUNK_SIZE: usize = 64;

fn describe(event: &CompassEvent) -> (String, String) {
    match event {
        CompassEvent::SampleCount(n) => ("sample_count".into(), n.to_string()),
        CompassEvent::Score(s) => (
            "score".into(),
            format!(
                "std_dev_err={} x={} y={} z={} accel_x={} accel_y={} accel_z={} accel_std_dev_err={}",
                s.std_dev_err,
                s.x_coverage,
                s.y_coverage,
                s.z_coverage,
                s.x_accel_coverage,
                s.y_accel_coverage,
                s.z_accel_coverage,
                s.accel_std_dev_err
            ),
        ),
        CompassEvent::DataResponse(d) => (
            "data".into(),
            format!(
                "heading={} pitch={} roll={} distortion={} calibrated={}",
                d.heading, d.pitch, d.roll, d.distortion, d.calibrated
            ),
        ),
        CompassEvent::NumPoints(n) => ("num_points".into(), n.to_string()),
        CompassEvent::Declination(d) => ("declination".into(), d.to_string()),
        CompassEvent::StableCheck(b) => ("stable_check".into(), b.to_string()),
        CompassEvent::AutoSampling(b) => ("auto_sampling".into(), b.to_string()),
        CompassEvent::FirTaps(n) => ("fir_taps".into(), n.to_string()),
        CompassEvent::ModuleInfo(info) => (
            "module_info".into(),
            format!("{} {}", info.kind, info.revision),
        ),
        CompassEvent::SaveFailed(code) => ("save_failed".into(), code.to_string()),
        other => (format!("{other:?}"), String::new()),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <dump_file> <output_csv>", args[0]);
        std::process::exit(1);
    }

    let path = &args[1];
    let output_path = &args[2];

    let mut file = File::open(path).expect("Failed to open file");
    let mut data = Vec::new();
    file.read_to_end(&mut data).expect("Failed to read file");

    println!("Read {} bytes from {}", data.len(), path);

    let file = File::create(output_path).expect("Failed to create output file");
    let mut out = BufWriter::new(file);
    writeln!(out, "index,offset,kind,detail").unwrap();

    let mut decoder = FrameDecoder::new();
    let mut event_count = 0usize;
    let mut error_count = 0usize;

    for (chunk_index, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
        let offset = chunk_index * CHUNK_SIZE;
        for result in decoder.push(chunk) {
            match result {
                Ok(event) => {
                    let (kind, detail) = describe(&event);
                    writeln!(out, "{event_count},{offset},{kind},\"{detail}\"").unwrap();
                    event_count += 1;
                }
                Err(e) => {
                    writeln!(out, ",{offset},error,\"{e}\"").unwrap();
                    error_count += 1;
                }
            }
        }
    }

    println!(
        "Decoded {event_count} events, {error_count} malformed frames ({} bytes skipped, {} left over)",
        decoder.skipped_bytes(),
        decoder.pending_bytes()
    );
    println!("Wrote {output_path}");
}

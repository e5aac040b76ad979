//! Integration tests for siltop-core.
//!
//! These tests drive the full pipeline against files on disk:
//! sampler output → record reader → normalization against chip ceilings.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use siltop_core::{
    Poll, RecordReader, ThermalPressure, Unavailable, lookup, lookup_for_cores, normalize,
    read_latest,
};

/// One sampler frame at `second` past 2024-05-01T12:00:00Z.
fn frame(second: u32, thermal: &str, cpu_mw: u32, gpu_mw: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>elapsed_ns</key><integer>1000000000</integer>
  <key>timestamp</key><date>2024-05-01T12:00:{second:02}Z</date>
  <key>thermal_pressure</key><string>{thermal}</string>
  <key>processor</key>
  <dict>
    <key>clusters</key>
    <array>
      <dict>
        <key>name</key><string>E-Cluster</string>
        <key>freq_hz</key><real>2064000000</real>
        <key>idle_ratio</key><real>0.5</real>
        <key>cpus</key><array/>
      </dict>
      <dict>
        <key>name</key><string>P-Cluster</string>
        <key>freq_hz</key><real>3504000000</real>
        <key>idle_ratio</key><real>0.1</real>
        <key>cpus</key><array/>
      </dict>
    </array>
    <key>cpu_energy</key><integer>{cpu_mw}</integer>
    <key>gpu_energy</key><integer>{gpu_mw}</integer>
    <key>ane_energy</key><integer>2000</integer>
  </dict>
  <key>gpu</key>
  <dict>
    <key>freq_hz</key><real>1296</real>
    <key>idle_ratio</key><real>0.6</real>
  </dict>
</dict>
</plist>
"#
    )
}

fn append(path: &Path, bytes: &[u8]) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(bytes).unwrap();
}

#[test]
fn capture_file_to_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture");
    fs::write(
        &path,
        [frame(0, "Nominal", 9_000, 1_000), frame(1, "Heavy", 18_000, 30_000)].join("\0"),
    )
    .unwrap();

    let record = read_latest(&path).unwrap();
    let snap = normalize(&record, &lookup("Apple M2 Max"));

    assert_eq!(snap.thermal_pressure, ThermalPressure::Heavy);
    assert_eq!(snap.timestamp, UNIX_EPOCH + Duration::from_secs(1_714_564_801));
    assert_eq!(snap.cpu.power.percent_of_ceiling, Some(60));
    assert_eq!(snap.gpu.power.percent_of_ceiling, Some(50));
    assert_eq!(snap.cpu.ane_power.percent_of_ceiling, Some(25));
    assert_eq!(snap.cpu.e_cluster.unwrap().active_percent, 50);
    assert_eq!(snap.cpu.p_cluster.unwrap().active_percent, 90);
    assert_eq!(snap.cpu.p_cluster.unwrap().freq_mhz, 3504);
    assert_eq!(snap.gpu.active_percent, 40);
    assert_eq!(snap.gpu.freq_mhz, 1296);
    assert!(!snap.approximate_ceilings);
}

#[test]
fn reader_follows_a_growing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live");
    let mut reader = RecordReader::new(&path);

    assert!(matches!(reader.poll(), Poll::Unavailable(Unavailable::Missing)));

    // The writer is halfway through its first frame.
    let first = frame(0, "Nominal", 5_000, 0);
    let (head, tail) = first.as_bytes().split_at(first.len() / 2);
    append(&path, head);
    assert!(matches!(
        reader.poll(),
        Poll::Unavailable(Unavailable::NoCompleteFrame { .. })
    ));

    append(&path, tail);
    append(&path, b"\0");
    match reader.poll() {
        Poll::Fresh(rec) => assert_eq!(rec.processor.cpu_energy, Some(5_000.0)),
        other => panic!("expected first frame, got {other:?}"),
    }

    // Second frame only partly flushed: the first one is still served.
    let second = frame(1, "Moderate", 7_000, 0);
    append(&path, &second.as_bytes()[..100]);
    assert!(matches!(reader.poll(), Poll::Unchanged));

    append(&path, &second.as_bytes()[100..]);
    match reader.poll() {
        Poll::Fresh(rec) => assert_eq!(rec.thermal_pressure, ThermalPressure::Moderate),
        other => panic!("expected second frame, got {other:?}"),
    }
    // Only the partly flushed second frame needed the fallback; a trailing
    // delimiter after a finished frame does not.
    assert_eq!(reader.fallbacks(), 1);
    assert_eq!(reader.misses(), 2);
}

#[test]
fn unknown_chip_uses_bounded_fallback_ceilings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture");
    fs::write(&path, frame(0, "Nominal", 45_000, 45_000)).unwrap();

    let snap = normalize(&read_latest(&path).unwrap(), &lookup("Apple M9 Hyper"));
    assert!(snap.approximate_ceilings);
    assert_eq!(snap.cpu.power.percent_of_ceiling, Some(100));
    assert_eq!(snap.gpu.power.percent_of_ceiling, Some(100));
}

#[test]
fn m4_max_core_count_refines_bandwidth() {
    assert_eq!(lookup_for_cores("Apple M4 Max", Some(14)).cpu_max_bw_gbs, 410.0);
    assert_eq!(lookup_for_cores("Apple M4 Max", Some(16)).gpu_max_bw_gbs, 546.0);
    assert_eq!(lookup_for_cores("Apple M2", Some(8)), lookup("Apple M2"));
}

#[cfg(unix)]
mod supervised {
    use super::*;
    use siltop_core::{
        Elevation, LaunchSpec, Launcher, RecordStore, SamplerConfig, Supervisor,
    };
    use std::process::Command;

    /// Writes one frame to the requested output path, then idles.
    struct ScriptedSampler(String);

    impl Launcher for ScriptedSampler {
        fn command(&self, spec: &LaunchSpec<'_>) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg("printf '%s' \"$1\" > \"$2\"; exec sleep 30")
                .arg("sh")
                .arg(&self.0)
                .arg(spec.output_path);
            cmd
        }
    }

    fn config(dir: &Path) -> SamplerConfig {
        SamplerConfig {
            store: RecordStore::new(dir, "siltop_test_"),
            elevation: Elevation::None,
            startup_grace: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn poll_fresh(reader: &mut RecordReader) -> Option<siltop_core::RawTelemetryRecord> {
        for _ in 0..200 {
            if let Poll::Fresh(rec) = reader.poll() {
                return Some(rec);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn restart_retargets_reader_and_drops_old_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::with_launcher(
            config(dir.path()),
            ScriptedSampler(frame(0, "Nominal", 3_000, 0)),
        );

        let first = sup.start("1", 1000, 10).unwrap();
        let mut reader = RecordReader::new(&first.path);
        let rec = poll_fresh(&mut reader).expect("first sampler never wrote a frame");
        assert_eq!(rec.thermal_pressure, ThermalPressure::Nominal);

        let second = sup.rotate("2").unwrap();
        assert!(!first.is_current(&sup));
        assert!(!first.path.exists());

        // A reader still pointed at the old path sees nothing.
        assert!(matches!(reader.poll(), Poll::Unavailable(Unavailable::Missing)));

        reader.retarget(sup.current_path().unwrap());
        assert_eq!(reader.path(), second.path.as_path());
        assert!(poll_fresh(&mut reader).is_some());

        sup.shutdown();
        assert!(!second.path.exists());
        assert!(RecordStore::new(dir.path(), "siltop_test_")
            .existing_files()
            .unwrap()
            .is_empty());
    }
}

#[test]
#[ignore] // Requires macOS and sudo. Run with: cargo test -- --ignored
fn live_powermetrics_produces_a_record() {
    use siltop_core::{SamplerConfig, Supervisor, detect_soc_info, timecode_now};

    let soc = detect_soc_info();
    let mut sup = Supervisor::new(SamplerConfig::default());
    let handle = sup.start(&timecode_now(), 500, 10).unwrap();
    let mut reader = RecordReader::new(&handle.path);
    for _ in 0..50 {
        if let Poll::Fresh(rec) = reader.poll() {
            let snap = normalize(&rec, &soc.capability);
            assert!(snap.gpu.active_percent <= 100);
            return;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    panic!("powermetrics produced no record within 10s");
}

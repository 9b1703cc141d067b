//! Example wiring a Heart Rate server to a stack that only logs
//!
//! The stack hands out handles from 1 and prints every confirm and
//! notification. The example then plays the part of a peer: it enables
//! notifications, reads the sensor location and receives a few measurements.

use log::{info, LevelFilter, Log, Metadata, Record};
use rustyprofiles::att::{NtfInd, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest};
use rustyprofiles::gatt::{ConnIdx, GattsStack, ProfileConfig, ServerProfileManager, ServiceDb};
use rustyprofiles::profiles::hrs::{HeartRateServer, HrsInit, SensorLocation};
use rustyprofiles::ProfileResult;
use std::sync::{Arc, Mutex};

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{:<5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Stack that allocates handles and logs outgoing traffic
struct LoggingStack {
    next_handle: Mutex<u16>,
}

impl GattsStack for LoggingStack {
    fn create_service(&self, db: &ServiceDb) -> ProfileResult<u16> {
        let mut next = self.next_handle.lock().unwrap_or_else(|e| e.into_inner());
        let start = *next;
        *next += db.mask.count(db.attrs.len()) as u16;
        info!("service {} created at {:#06x}", db.uuid, start);
        Ok(start)
    }

    fn read_confirm(&self, conn: ConnIdx, cfm: ReadConfirm) {
        match cfm.result {
            Ok(value) => info!("conn {}: read {:#06x} -> {}", conn, cfm.handle, hex::encode(value)),
            Err(code) => info!("conn {}: read {:#06x} failed: {}", conn, cfm.handle, code),
        }
    }

    fn write_confirm(&self, conn: ConnIdx, cfm: WriteConfirm) {
        info!("conn {}: write {:#06x} -> {:?}", conn, cfm.handle, cfm.result);
    }

    fn notify_indicate(&self, conn: ConnIdx, ntf: &NtfInd) -> ProfileResult<()> {
        info!("conn {}: {:?} {:#06x} {}", conn, ntf.kind, ntf.handle, hex::encode(&ntf.value));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Trace);

    let stack = Arc::new(LoggingStack { next_handle: Mutex::new(1) });
    let mut manager = ServerProfileManager::new(stack.clone());

    let init = HrsInit {
        sensor_loc: SensorLocation::Wrist,
        is_sensor_contact_supported: true,
        ..HrsInit::default()
    };
    let hrs = Arc::new(Mutex::new(HeartRateServer::new(
        stack,
        &ProfileConfig::default(),
        init,
        Box::new(|conn, event| println!("conn {}: {:?}", conn, event)),
    )));
    manager.add_profile(hrs.clone())?;

    let conn: ConnIdx = 0;
    // measurement CCCD and body sensor location of a service starting at 1
    manager.on_write(conn, &WriteRequest::new(4, [0x01, 0x00]));
    manager.on_read(conn, &ReadRequest { handle: 6 });

    let mut server = hrs.lock().map_err(|_| "heart rate server lock poisoned")?;
    server.sensor_contact_detected_update(true);
    for (i, heart_rate) in [62u16, 64, 71, 280].into_iter().enumerate() {
        server.rr_interval_add(1024 * 60 / heart_rate);
        server.energy_update(i as u16 * 3);
        server.heart_rate_measurement_send(conn, heart_rate, i % 2 == 0)?;
    }
    Ok(())
}

//! End-to-end ingest: scan/adapter output through the merge engine
//! into the reconciliation service and out of the store again.

use serde_json::json;

use lansight::database::queries;
use lansight::{merge_sources, Database, DeviceRecord, IngestService, SourceBatch};

fn service_with_db() -> (IngestService, Database) {
    let db = Database::in_memory().expect("in-memory database should open");
    (IngestService::new(db.clone(), 0), db)
}

fn to_entries(records: &[DeviceRecord]) -> Vec<serde_json::Value> {
    records
        .iter()
        .map(|record| serde_json::to_value(record).expect("record should serialize"))
        .collect()
}

#[test]
fn merged_router_view_lands_as_device_rows() {
    let (service, db) = service_with_db();

    // A DHCP lease batch and a session table that only proves liveness
    let leases = SourceBatch::leases(vec![
        DeviceRecord::new("laptop", "192.168.1.10", "AA:BB:CC:DD:EE:01", "Unknown"),
        DeviceRecord::new("", "192.168.1.20", "AA:BB:CC:DD:EE:02", "Unknown"),
    ]);
    let sessions = SourceBatch::liveness(vec![
        DeviceRecord::new("", "192.168.1.10", "AA:BB:CC:DD:EE:01", "Unknown"),
        DeviceRecord::new("", "192.168.1.30", "AA:BB:CC:DD:EE:03", "Unknown"),
    ]);

    let merged = merge_sources(vec![leases, sessions]);
    let outcome = service
        .process_devices(&to_entries(&merged))
        .expect("batch should process");

    assert_eq!(outcome.success_count, 3);
    assert!(outcome.errors.is_empty());

    let conn_arc = db.connection();
    let conn = conn_arc.lock().expect("lock should not be poisoned");
    let rows = queries::get_all_devices(&conn).expect("devices should list");
    assert_eq!(rows.len(), 3);

    let laptop = queries::get_device_by_mac(&conn, "AABBCCDDEE01")
        .expect("query should succeed")
        .expect("laptop row should exist");
    assert_eq!(laptop.hostname, "laptop");
    assert_eq!(laptop.ip, "192.168.1.10");
}

#[test]
fn mixed_batch_reports_per_item_errors() {
    let (service, _db) = service_with_db();

    let entries = vec![
        json!({"hostname": "nas", "ip": "192.168.1.5", "mac": "aa:bb:cc:dd:ee:05"}),
        json!({"hostname": "ghost", "ip": "192.168.1.9"}),
        json!({"hostname": "bad ip", "ip": "999.1.1.1", "mac": "AABBCCDDEE06"}),
    ];

    let outcome = service
        .process_devices(&entries)
        .expect("batch should process");

    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.errors[0].index, 1);
    assert_eq!(outcome.errors[0].error, "Must Supply MAC Address");
    assert_eq!(outcome.errors[1].index, 2);
    assert_eq!(outcome.errors[1].error, "Invalid IP Address");
}

#[test]
fn repeat_sightings_are_idempotent_and_preserve_vendor() {
    let (service, db) = service_with_db();

    let sighting = json!({
        "hostname": "printer",
        "ip": "192.168.1.30",
        "mac": "AA:BB:CC:DD:EE:30",
        "vendor": "HP"
    });

    let first = service
        .process_device(&sighting)
        .expect("first sighting should succeed");
    assert!(first.created);

    let second = service
        .process_device(&sighting)
        .expect("repeat sighting should succeed");
    assert!(!second.created);
    assert_eq!(second.message, "Device updated");

    // The device moves and the new source carries no vendor info
    let moved = json!({
        "hostname": "printer",
        "ip": "192.168.1.31",
        "mac": "AABBCCDDEE30"
    });
    service
        .process_device(&moved)
        .expect("moved sighting should succeed");

    let conn_arc = db.connection();
    let conn = conn_arc.lock().expect("lock should not be poisoned");
    let rows = queries::get_all_devices(&conn).expect("devices should list");
    assert_eq!(rows.len(), 1, "one MAC must stay one row");
    assert_eq!(rows[0].ip, "192.168.1.31");
    assert_eq!(rows[0].vendor, "HP", "empty incoming vendor must not blank the row");
}

#[test]
fn port_batches_dedupe_on_device_and_port() {
    let (service, db) = service_with_db();

    service
        .process_device(&json!({"hostname": "nas", "ip": "192.168.1.5", "mac": "AABBCCDDEE05"}))
        .expect("device should ingest");

    let scan = vec![
        json!({"mac": "AABBCCDDEE05", "port": "22", "protocol": "tcp", "name": "ssh"}),
        json!({"mac": "AABBCCDDEE05", "port": 445, "protocol": "tcp", "name": "microsoft-ds"}),
        json!({"port": "80", "protocol": "tcp", "name": "http"}),
    ];
    let outcome = service.process_ports(&scan).expect("port batch should process");
    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].error, "missing mac address");

    // Rescan refreshes the same rows instead of creating new ones
    let rescan = vec![json!({
        "mac": "AABBCCDDEE05",
        "port": "22",
        "protocol": "tcp",
        "name": "ssh",
        "product": "OpenSSH",
        "version": "9.6"
    })];
    let first_pass = {
        let conn_arc = db.connection();
        let conn = conn_arc.lock().expect("lock should not be poisoned");
        let device = queries::get_device_by_mac(&conn, "AABBCCDDEE05")
            .expect("query should succeed")
            .expect("device should exist");
        queries::get_port(&conn, device.id, 22)
            .expect("query should succeed")
            .expect("port should exist")
    };

    service.process_ports(&rescan).expect("rescan should process");

    let conn_arc = db.connection();
    let conn = conn_arc.lock().expect("lock should not be poisoned");
    let device = queries::get_device_by_mac(&conn, "AABBCCDDEE05")
        .expect("query should succeed")
        .expect("device should exist");
    let ports = queries::get_ports_for_device(&conn, device.id).expect("ports should list");
    assert_eq!(ports.len(), 2);

    let ssh = queries::get_port(&conn, device.id, 22)
        .expect("query should succeed")
        .expect("port should exist");
    assert_eq!(ssh.id, first_pass.id, "rescan must reuse the existing row");
    assert_eq!(ssh.product, "OpenSSH");
    assert_eq!(ssh.version, "9.6");
    assert!(ssh.last_seen >= first_pass.last_seen);
    assert_eq!(ssh.first_seen, first_pass.first_seen);
}

#[test]
fn deleting_a_device_cascades_to_its_ports() {
    let (service, db) = service_with_db();

    service
        .process_device(&json!({"hostname": "nas", "ip": "192.168.1.5", "mac": "AABBCCDDEE05"}))
        .expect("device should ingest");
    service
        .process_port(&json!({"mac": "AABBCCDDEE05", "port": "22", "protocol": "tcp", "name": "ssh"}))
        .expect("port should ingest");

    let conn_arc = db.connection();
    let conn = conn_arc.lock().expect("lock should not be poisoned");
    let device = queries::get_device_by_mac(&conn, "AABBCCDDEE05")
        .expect("query should succeed")
        .expect("device should exist");

    assert!(queries::delete_device(&conn, device.id).expect("delete should succeed"));
    let orphans: i64 = conn
        .query_row("SELECT COUNT(*) FROM ports", [], |row| row.get(0))
        .expect("count should succeed");
    assert_eq!(orphans, 0, "ports must cascade with their device");
}

#[test]
fn sensor_heartbeats_upsert_one_row_per_mac() {
    let (service, db) = service_with_db();

    let report = lansight::SensorHealthReport {
        mac: "aa:bb:cc:dd:ee:ff".to_string(),
        hostname: "sensor-attic".to_string(),
    };
    service
        .process_sensor_health(&report)
        .expect("first heartbeat should succeed");

    let renamed = lansight::SensorHealthReport {
        mac: "aa:bb:cc:dd:ee:ff".to_string(),
        hostname: "sensor-roof".to_string(),
    };
    service
        .process_sensor_health(&renamed)
        .expect("second heartbeat should succeed");

    let conn_arc = db.connection();
    let conn = conn_arc.lock().expect("lock should not be poisoned");
    let sensors = queries::get_all_sensors(&conn).expect("sensors should list");
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].hostname, "sensor-roof");
}
